//! Converting functions to text.
//!
//! The textual form is only consumed by humans: diagnostics, dumps and
//! test failure output. Values are annotated with their register once one
//! is assigned, so a dump taken after allocation shows the coloring.

use crate::ir::{Function, Inst, InstKind, Value};
use core::fmt::{self, Write};

/// Write `func` in its entirety.
pub fn write_function<W: Write>(w: &mut W, func: &Function) -> fmt::Result {
    writeln!(w, "function {{")?;
    for block in func.layout.blocks() {
        let preds = func.dfg.block_preds(block);
        if preds.is_empty() {
            writeln!(w, "{}:", block)?;
        } else {
            write!(w, "{}: ; preds:", block)?;
            for &pred in preds {
                write!(w, " {}", pred)?;
            }
            writeln!(w)?;
        }
        for inst in func.layout.block_insts(block) {
            write_inst(w, func, inst)?;
        }
    }
    writeln!(w, "}}")
}

/// Write one instruction line.
pub fn write_inst<W: Write>(w: &mut W, func: &Function, inst: Inst) -> fmt::Result {
    write!(w, "    ")?;
    let results = func.dfg.inst_results(inst);
    for (i, &r) in results.iter().enumerate() {
        if i > 0 {
            write!(w, ", ")?;
        }
        write_value(w, func, r)?;
    }
    if !results.is_empty() {
        write!(w, " = ")?;
    }

    match &func.dfg.insts[inst].kind {
        InstKind::Op { opcode } => write!(w, "{}", opcode)?,
        InstKind::Start => write!(w, "start")?,
        InstKind::Phi => write!(w, "phi")?,
        InstKind::Proj { index } => write!(w, "proj.{}", index)?,
        InstKind::Unknown => write!(w, "unknown")?,
        InstKind::Keep => write!(w, "keep")?,
        InstKind::Sync => write!(w, "sync")?,
        InstKind::Copy => write!(w, "copy")?,
        InstKind::CopyKeep => write!(w, "copykeep")?,
        InstKind::Perm => write!(w, "perm")?,
        InstKind::Spill { slot } => write!(w, "spill {}", slot)?,
        InstKind::Reload { slot } => write!(w, "reload {}", slot)?,
        InstKind::Call { callee } => write!(w, "call {}", callee)?,
        InstKind::Return => write!(w, "return")?,
    }

    for (i, &arg) in func.dfg.args(inst).iter().enumerate() {
        if i == 0 {
            write!(w, " ")?;
        } else {
            write!(w, ", ")?;
        }
        write_value(w, func, arg)?;
    }
    writeln!(w)
}

fn write_value<W: Write>(w: &mut W, func: &Function, value: Value) -> fmt::Result {
    write!(w, "{}", value)?;
    if let Some(reg) = func.reg(value) {
        write!(w, ":r{}", reg)?;
    }
    Ok(())
}
