//! Chordal register allocation.
//!
//! This library implements the register allocation back end for compilers
//! that keep their programs in SSA form until late in the pipeline. SSA
//! interference graphs are chordal, so the allocator can color them
//! optimally by walking a perfect elimination order derived from the
//! dominator tree; no iterative simplify/spill loop is needed.
//!
//! Three cooperating passes are provided:
//!
//! - A *list scheduler* ([`schedule_graph`]) that linearises each basic
//!   block, driven by a pluggable [`Selector`](regalloc::Selector).
//! - A *Belady spill chooser* ([`spill_belady`]) that bounds the number of
//!   simultaneously live values per register class by evicting the value
//!   with the farthest next use.
//! - A *chordal allocator* ([`chordal_color`]) that handles instruction
//!   register constraints with `Perm`/`Copy` insertion and bipartite
//!   matching, then colors the program greedily along the perfect
//!   elimination order.
//!
//! The [`Context`](regalloc::Context) struct runs all three in the right
//! order and owns the analysis scratch between runs.

#![warn(missing_docs, trivial_numeric_casts, unused_extern_crates)]

pub use cranelift_entity as entity;

pub mod dominator_tree;
pub mod flowgraph;
pub mod ir;
pub mod regalloc;
pub mod registers;
pub mod write;

mod dump;
mod fx;
mod result;

pub use crate::dump::{ChordalOptions, DumpFlags};
pub use crate::regalloc::{chordal_color, schedule_graph, spill_belady};
pub use crate::result::{RegallocError, RegallocResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
