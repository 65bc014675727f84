//! IR entity references.
//!
//! Instructions, values, blocks and spill slots are referenced by structs
//! wrapping a `u32` index into a table in the `Function`. Rust references
//! would make the graph unrepresentable under the borrow checker and waste
//! space; a separate index type per entity keeps the indices type safe.

use cranelift_entity::entity_impl;

/// An opaque reference to an SSA value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// An opaque reference to an instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to a basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to a spill slot in the stack frame.
///
/// The allocator only creates and distributes slots; assigning frame
/// offsets to them is the business of a later frame layout pass.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpillSlot(u32);
entity_impl!(SpillSlot, "ss");
