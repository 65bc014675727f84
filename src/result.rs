//! Result and error types reported by the allocation passes.

use crate::ir::{Inst, Value};
use thiserror::Error;

/// An error produced by one of the register allocation passes.
///
/// All of these mean that the input program was not *register pressure
/// faithful* for the class being allocated: the Belady pass either was not
/// run, or was run with a different register count, or the constraints on
/// some instruction demand more registers than the class provides. There is
/// no recovery; the pipeline must be aborted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegallocError {
    /// A register class has no allocatable registers but contains values.
    #[error("register class {class} has no allocatable registers")]
    EmptyRegisterClass {
        /// Name of the offending class.
        class: &'static str,
    },

    /// The bipartite matching at a constrained instruction left an operand
    /// without a register.
    #[error("operands of {inst} over-constrained in class {class}: no register for {value}")]
    OverConstrained {
        /// The constrained instruction.
        inst: Inst,
        /// The operand value that could not be matched.
        value: Value,
        /// Name of the class being colored.
        class: &'static str,
    },

    /// The coloring walk ran out of free registers at a definition.
    #[error("no free register in class {class} for {value}")]
    OutOfRegisters {
        /// The value being defined.
        value: Value,
        /// Name of the class being colored.
        class: &'static str,
    },

    /// A pre-assigned register was already occupied at the definition of
    /// its value.
    #[error("pre-assigned register {reg} of {value} is already occupied in class {class}")]
    PreColoredConflict {
        /// The pre-colored value.
        value: Value,
        /// The register index within the class.
        reg: u8,
        /// Name of the class being colored.
        class: &'static str,
    },
}

/// A convenient alias for a `Result` using the `RegallocError` error type.
pub type RegallocResult<T> = Result<T, RegallocError>;
