//! Allocator options and diagnostic file dumps.

use crate::dominator_tree::DominatorTreePreorder;
use crate::ir::Function;
use crate::regalloc::{Liveness, MatcherKind};
use crate::registers::RegClassIndex;
use crate::write::write_function;
use core::fmt::Write;
use core::ops::BitOr;
use log::warn;
use std::fs;
use std::path::PathBuf;

/// Which intermediate states of the allocator to dump.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DumpFlags(u8);

impl DumpFlags {
    /// Dump nothing.
    pub const NONE: Self = Self(0);
    /// The program as the coloring phase receives it, after spilling.
    pub const SPLIT: Self = Self(1);
    /// The program after constraint handling.
    pub const CONSTR: Self = Self(2);
    /// The per-block liveness intervals the coloring walk used.
    pub const TREE_INTV: Self = Self(4);

    /// Are all flags of `other` set in `self`?
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DumpFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Options of the chordal allocator.
pub struct ChordalOptions {
    /// Which intermediate dumps to write.
    pub dump: DumpFlags,
    /// The directory dumps go to; without one, dump flags are inert.
    pub dump_dir: Option<PathBuf>,
    /// The bipartite matching algorithm used by constraint handling.
    pub matcher: MatcherKind,
}

impl Default for ChordalOptions {
    fn default() -> Self {
        Self {
            dump: DumpFlags::NONE,
            dump_dir: None,
            matcher: MatcherKind::default(),
        }
    }
}

/// Write `func` to `<class>-<suffix>.txt` in the dump directory if `flag`
/// is enabled. Dump failures are reported but never abort allocation.
pub(crate) fn dump_function(
    opts: &ChordalOptions,
    flag: DumpFlags,
    class_name: &str,
    suffix: &str,
    func: &Function,
) {
    if !opts.dump.contains(flag) {
        return;
    }
    let Some(dir) = &opts.dump_dir else { return };
    let mut text = String::new();
    let _ = write_function(&mut text, func);
    let path = dir.join(format!("{}-{}.txt", class_name, suffix));
    if let Err(err) = fs::write(&path, text) {
        warn!("cannot write dump {}: {}", path.display(), err);
    }
}

/// Write the border lists of every block to `<class>-intv.txt` if interval
/// dumping is enabled.
pub(crate) fn dump_intervals(
    opts: &ChordalOptions,
    class_name: &str,
    func: &Function,
    liveness: &Liveness,
    dtpo: &DominatorTreePreorder,
    class: RegClassIndex,
) {
    if !opts.dump.contains(DumpFlags::TREE_INTV) {
        return;
    }
    let Some(dir) = &opts.dump_dir else { return };

    let mut text = String::new();
    for &block in dtpo.blocks() {
        let _ = writeln!(text, "{}:", block);
        for border in liveness.border_list(func, block, class) {
            let kind = if border.is_def { "def" } else { "use" };
            match func.reg(border.value) {
                Some(reg) => {
                    let _ = writeln!(text, "  {} {}:r{}", kind, border.value, reg);
                }
                None => {
                    let _ = writeln!(text, "  {} {}", kind, border.value);
                }
            }
        }
    }
    let path = dir.join(format!("{}-intv.txt", class_name));
    if let Err(err) = fs::write(&path, text) {
        warn!("cannot write dump {}: {}", path.display(), err);
    }
}
