//! Next-use distances.
//!
//! The spill chooser ranks resident values by the distance, in scheduling
//! steps, to their next use. Distances are measured in *real*
//! instructions: phis and projections do not advance the counter, matching
//! the instruction numbering of the block walk. A phi argument counts as a
//! use at the very end of the corresponding predecessor block.

use crate::flowgraph::ControlFlowGraph;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Block, Function, Inst, Value};
use crate::regalloc::Liveness;

/// A next-use distance in scheduling steps.
pub type Distance = u32;

/// The distance reported when a value is never used again.
pub const NO_USE: Distance = Distance::MAX;

/// Memoizing next-use distance oracle.
pub struct NextUses<'a> {
    func: &'a Function,
    cfg: &'a ControlFlowGraph,
    liveness: &'a Liveness,
    /// Distance from the top of a block to the first use of a value,
    /// memoized across queries.
    from_start: FxHashMap<(Block, Value), Distance>,
    /// Cycle guard for the block-level search.
    in_progress: FxHashSet<(Block, Value)>,
}

impl<'a> NextUses<'a> {
    /// Create an oracle for `func`.
    pub fn new(func: &'a Function, cfg: &'a ControlFlowGraph, liveness: &'a Liveness) -> Self {
        Self {
            func,
            cfg,
            liveness,
            from_start: FxHashMap::default(),
            in_progress: FxHashSet::default(),
        }
    }

    /// The distance from `from` to the next use of `value`.
    ///
    /// `from_step` is the caller's step number of `from`; the returned
    /// distance is absolute with respect to it, so distances obtained with
    /// the same base are comparable. With `skip_uses_at_from`, uses by
    /// `from` itself are not counted; a displacement for a definition must
    /// look past the instruction that consumes its operands.
    ///
    /// Values that must not be spilled report distance 0, which pins them
    /// into the working set.
    pub fn next_use(
        &mut self,
        from: Inst,
        from_step: u32,
        value: Value,
        skip_uses_at_from: bool,
    ) -> Distance {
        let data = &self.func.dfg.values[value];
        debug_assert!(!data.is_ignore, "next-use query for an ignored value");
        if data.is_no_spill {
            return 0;
        }

        let block = self.func.inst_block(from);
        let mut step = 0u32;
        let mut next = Some(from);
        while let Some(inst) = next {
            if self.func.dfg.insts[inst].kind.is_schedule_step() {
                let at_from = inst == from;
                if (!at_from || !skip_uses_at_from) && self.func.dfg.args(inst).contains(&value) {
                    return from_step.saturating_add(step);
                }
                step += 1;
            }
            next = self.func.layout.next_inst(inst);
        }

        match self.use_from_block_end(block, value) {
            NO_USE => NO_USE,
            d => from_step.saturating_add(step).saturating_add(d),
        }
    }

    /// The distance from the top of `block` to the first use of `value`
    /// inside or beyond it.
    fn use_from_start(&mut self, block: Block, value: Value) -> Distance {
        if let Some(&d) = self.from_start.get(&(block, value)) {
            return d;
        }
        if !self.in_progress.insert((block, value)) {
            // Already searching through this block: a cycle contributes no
            // closer use.
            return NO_USE;
        }

        let mut step = 0u32;
        let mut found = None;
        let mut next = self.func.layout.first_inst(block);
        while let Some(inst) = next {
            if self.func.dfg.insts[inst].kind.is_schedule_step() {
                if self.func.dfg.args(inst).contains(&value) {
                    found = Some(step);
                    break;
                }
                step += 1;
            }
            next = self.func.layout.next_inst(inst);
        }

        let dist = match found {
            Some(d) => d,
            None => match self.use_from_block_end(block, value) {
                NO_USE => NO_USE,
                d => step.saturating_add(d),
            },
        };

        self.in_progress.remove(&(block, value));
        self.from_start.insert((block, value), dist);
        dist
    }

    /// The distance from the end of `block` to the next use of `value`:
    /// zero if a successor phi consumes it on one of our edges, otherwise
    /// the best distance through any successor it is live into.
    fn use_from_block_end(&mut self, block: Block, value: Value) -> Distance {
        let mut best = NO_USE;
        let succs: Vec<_> = self.cfg.succs(block).to_vec();
        for edge in succs {
            for inst in self.func.layout.block_insts(edge.block) {
                if !self.func.dfg.insts[inst].kind.is_phi() {
                    continue;
                }
                if self.func.dfg.args(inst)[edge.pred_idx as usize] == value {
                    return 0;
                }
            }
            if self.liveness.is_live_in(edge.block, value) {
                best = best.min(self.use_from_start(edge.block, value));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Function;
    use crate::registers::RegInfo;

    #[test]
    fn in_block_distances() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 4);

        let mut func = Function::new();
        let b0 = func.dfg.make_block();
        func.layout.append_block(b0);
        let (i0, a) = func.dfg.make_op("a", gpr, &[]);
        let (i1, b) = func.dfg.make_op("b", gpr, &[]);
        let (i2, _) = func.dfg.make_op("use_a", gpr, &[a]);
        let (i3, _) = func.dfg.make_op("use_ab", gpr, &[a, b]);
        for i in [i0, i1, i2, i3] {
            func.layout.append_inst(i, b0);
        }

        let cfg = ControlFlowGraph::with_function(&func);
        let mut liveness = Liveness::new();
        liveness.compute(&func, &cfg);
        let mut uses = NextUses::new(&func, &cfg, &liveness);

        // From i1: a is used two steps on at i2... counting i1 itself as
        // step zero.
        assert_eq!(uses.next_use(i1, 0, a, false), 1);
        assert_eq!(uses.next_use(i1, 0, b, true), 2);
        assert_eq!(uses.next_use(i2, 0, a, false), 0);
        assert_eq!(uses.next_use(i2, 0, a, true), 1);
        // After its last use, a value has no next use.
        assert_eq!(uses.next_use(i3, 0, a, true), NO_USE);
        // Absolute distances respect the base step.
        assert_eq!(uses.next_use(i1, 7, b, true), 9);
    }

    #[test]
    fn cross_block_and_phi_distances() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 4);

        let mut func = Function::new();
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        func.dfg.append_pred(b1, b0);
        func.layout.append_block(b0);
        func.layout.append_block(b1);

        let (i0, a) = func.dfg.make_op("a", gpr, &[]);
        let (i1, b) = func.dfg.make_op("b", gpr, &[]);
        let (i2, _) = func.dfg.make_op("jmp", gpr, &[]);
        for i in [i0, i1, i2] {
            func.layout.append_inst(i, b0);
        }
        let (p, pv) = func.dfg.make_phi(gpr, &[b]);
        func.layout.append_inst(p, b1);
        let (i3, _) = func.dfg.make_op("pad", gpr, &[]);
        let (i4, _) = func.dfg.make_op("use", gpr, &[a, pv]);
        func.layout.append_inst(i3, b1);
        func.layout.append_inst(i4, b1);

        let cfg = ControlFlowGraph::with_function(&func);
        let mut liveness = Liveness::new();
        liveness.compute(&func, &cfg);
        let mut uses = NextUses::new(&func, &cfg, &liveness);

        // a: two steps to the end of b0, one more into b1 (the phi does
        // not count as a step).
        assert_eq!(uses.next_use(i1, 0, a, false), 3);
        // b: consumed by the phi at the end of b0.
        assert_eq!(uses.next_use(i1, 0, b, true), 2);

        // A no-spill value pins at distance zero.
        func.dfg.values[a].is_no_spill = true;
        let mut uses = NextUses::new(&func, &cfg, &liveness);
        assert_eq!(uses.next_use(i1, 5, a, false), 0);
    }
}
