//! Instruction kinds and per-instruction data.
//!
//! Backend instructions fall into a small, closed family: ordinary target
//! operations plus the pseudo instructions the allocator itself creates and
//! consumes (`Perm`, `Copy`, `Spill`, `Reload`, keep markers). They share a
//! common header, the argument vector with its parallel input requirement
//! vector, and differ only in a small per-kind payload.

use crate::ir::{SpillSlot, Value};
use crate::registers::RegReq;
use smallvec::SmallVec;

/// The kind of an instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstKind {
    /// An ordinary target operation. The mnemonic is only used in dumps.
    Op {
        /// Display mnemonic.
        opcode: &'static str,
    },

    /// The entry pseudo instruction of a function. Produces the values
    /// that are live on entry (incoming arguments, the stack pointer) and
    /// is always scheduled first in the entry block.
    Start,

    /// A phi. Its arguments are parallel to the predecessors of its block;
    /// the transfer happens on the incoming edges, not at the phi itself.
    Phi,

    /// Projection of one result out of a tuple-producing instruction.
    /// Projections sit immediately after their tuple instruction in the
    /// schedule.
    Proj {
        /// Index of the projected result.
        index: u8,
    },

    /// A placeholder value that is available everywhere and never needs a
    /// reload.
    Unknown,

    /// Keeps its arguments alive up to this schedule position without
    /// computing anything.
    Keep,

    /// A scheduling barrier joining several instructions; like `Keep`, it
    /// must stay adjacent to its arguments.
    Sync,

    /// Register-to-register copy of its single argument.
    Copy,

    /// A copy that additionally keeps its remaining arguments alive.
    CopyKeep,

    /// Simultaneous permutation of its arguments. The permuted values come
    /// out as projections of the tuple result.
    Perm,

    /// Store a value to a spill slot. No results.
    Spill {
        /// The slot written.
        slot: SpillSlot,
    },

    /// Load a value back from a spill slot.
    Reload {
        /// The slot read.
        slot: SpillSlot,
    },

    /// A call. Produces its results as a tuple; argument and result
    /// requirements carry the calling convention.
    Call {
        /// Display name of the callee.
        callee: &'static str,
    },

    /// Function return. Its arguments carry the return-value constraints.
    Return,
}

impl InstKind {
    /// Is this a phi?
    pub fn is_phi(&self) -> bool {
        matches!(self, Self::Phi)
    }

    /// Is this a projection?
    pub fn is_proj(&self) -> bool {
        matches!(self, Self::Proj { .. })
    }

    /// Does this instruction occupy a position in the schedule at all?
    /// `Unknown` values float freely and are never laid out.
    pub fn appears_in_schedule(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Is this a real scheduling step? Phis only rename values on block
    /// entry and projections ride along with their tuple instruction, so
    /// neither advances the instruction counter of a block walk.
    pub fn is_schedule_step(&self) -> bool {
        self.appears_in_schedule() && !self.is_phi() && !self.is_proj()
    }

    /// Must this instruction be scheduled as soon as it becomes ready so
    /// that it stays adjacent to its operands?
    pub fn must_stay_adjacent(&self) -> bool {
        matches!(self, Self::Keep | Self::CopyKeep | Self::Sync)
    }
}

/// An instruction: its kind, its ordered arguments, and one input register
/// requirement per argument.
#[derive(Clone, Debug)]
pub struct InstData {
    /// What the instruction is.
    pub kind: InstKind,
    /// Argument values, in operand order.
    pub args: SmallVec<[Value; 4]>,
    /// Input register requirements, parallel to `args`.
    pub in_reqs: SmallVec<[RegReq; 4]>,
}

impl InstData {
    /// Create instruction data, sanity-checking the requirement vector.
    pub fn new(kind: InstKind, args: SmallVec<[Value; 4]>, in_reqs: SmallVec<[RegReq; 4]>) -> Self {
        debug_assert_eq!(args.len(), in_reqs.len());
        Self {
            kind,
            args,
            in_reqs,
        }
    }
}
