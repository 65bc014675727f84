//! The backend intermediate representation the allocator works on.
//!
//! Programs are kept in scheduled SSA form: every value has exactly one
//! defining instruction, instructions live in basic blocks, and the
//! [`Layout`] assigns every block a place in the function and every
//! instruction a place in its block. Entities are dense `u32` indices into
//! arenas owned by the [`Function`]; cross references are indices, never
//! owning pointers.

mod dfg;
mod entities;
mod function;
mod instructions;
mod layout;

pub use self::dfg::{BlockData, DataFlowGraph, ValueData};
pub use self::entities::{Block, Inst, SpillSlot, Value};
pub use self::function::{Function, SpillSlotData};
pub use self::instructions::{InstData, InstKind};
pub use self::layout::Layout;
