//! Register allocation.
//!
//! This module contains the three cooperating passes and the data
//! structures they share: the list scheduler, the Belady spill chooser and
//! the chordal coloring allocator, plus liveness, next-use distances, the
//! working set container, the spill environment and the bipartite matching
//! solvers.

mod belady;
mod coloring;
mod constraints;
mod context;
mod insn;
mod liveness;
mod scheduler;
mod solver;
mod spill;
mod uses;
mod workset;

pub use self::belady::spill_belady;
pub use self::coloring::chordal_color;
pub use self::context::Context;
pub use self::liveness::{Border, Liveness};
pub use self::scheduler::{schedule_graph, RegPressureSelector, Selector, TrivialSelector};
pub use self::solver::{make_solver, Augmenting, Layered, MatcherKind, MatchingSolver};
pub use self::spill::{remove_dead_code, SpillEnv};
pub use self::uses::{Distance, NextUses, NO_USE};
pub use self::workset::{Loc, Workset};
