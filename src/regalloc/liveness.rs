//! Liveness analysis.
//!
//! Computes per-block live-in and live-out sets by backward fix-point
//! iteration, and derives the two views the allocation passes consume:
//! pairwise interference queries and per-block *border lists*, the
//! def/use event streams whose definitions, read back to front, form a
//! perfect elimination order of the interference graph.
//!
//! Phi arguments are uses at the end of the corresponding predecessor
//! block, never uses inside the phi's own block; phi results are ordinary
//! definitions at the top of their block.

use crate::dominator_tree::DominatorTreePreorder;
use crate::flowgraph::ControlFlowGraph;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Block, Function, Inst, Value};
use crate::registers::RegClassIndex;
use core::cmp::Ordering;
use cranelift_entity::{EntityRef, SecondaryMap};

/// One liveness event in a block's border list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Border {
    /// `true` for a definition, `false` for the last use.
    pub is_def: bool,
    /// The value the event is about.
    pub value: Value,
}

/// Per-block live value sets.
pub struct Liveness {
    live_in: SecondaryMap<Block, FxHashSet<Value>>,
    live_out: SecondaryMap<Block, FxHashSet<Value>>,
    valid: bool,
}

impl Liveness {
    /// Create an empty liveness analysis.
    pub fn new() -> Self {
        Self {
            live_in: SecondaryMap::new(),
            live_out: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Clear all results.
    pub fn clear(&mut self) {
        self.live_in.clear();
        self.live_out.clear();
        self.valid = false;
    }

    /// Check if the analysis has been computed.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Recompute liveness for `func`, overwriting previous results.
    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        self.clear();
        self.live_in.resize(func.dfg.num_blocks());
        self.live_out.resize(func.dfg.num_blocks());

        // Backward fix point. Iterating the blocks in reverse layout order
        // converges quickly because successors mostly come later.
        let blocks: Vec<Block> = func.layout.blocks().collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in blocks.iter().rev() {
                let mut out = FxHashSet::default();
                for edge in cfg.succs(block) {
                    let succ = edge.block;
                    for &v in &self.live_in[succ] {
                        out.insert(v);
                    }
                    // Phi data flows on the edge: the argument is live out
                    // of this block, the result is not live into the
                    // successor from our point of view.
                    for inst in func.layout.block_insts(succ) {
                        if !func.dfg.insts[inst].kind.is_phi() {
                            continue;
                        }
                        for &r in func.dfg.inst_results(inst) {
                            out.remove(&r);
                        }
                        out.insert(func.dfg.args(inst)[edge.pred_idx as usize]);
                    }
                }

                let mut live = out.clone();
                let insts: Vec<Inst> = func.layout.block_insts(block).collect();
                for &inst in insts.iter().rev() {
                    for &r in func.dfg.inst_results(inst) {
                        live.remove(&r);
                    }
                    if !func.dfg.insts[inst].kind.is_phi() {
                        for &a in func.dfg.args(inst) {
                            live.insert(a);
                        }
                    }
                }

                if out != self.live_out[block] || live != self.live_in[block] {
                    self.live_out[block] = out;
                    self.live_in[block] = live;
                    changed = true;
                }
            }
        }
        self.valid = true;
    }

    /// The values live at the entry of `block`. Phi results of the block
    /// are not live in; they are defined here.
    pub fn live_in(&self, block: Block) -> &FxHashSet<Value> {
        debug_assert!(self.valid);
        &self.live_in[block]
    }

    /// The values live at the exit of `block`, including values flowing
    /// into successor phis.
    pub fn live_out(&self, block: Block) -> &FxHashSet<Value> {
        debug_assert!(self.valid);
        &self.live_out[block]
    }

    /// Is `value` live at the entry of `block`?
    pub fn is_live_in(&self, block: Block, value: Value) -> bool {
        self.live_in(block).contains(&value)
    }

    /// The set of values live immediately before `inst`.
    pub fn live_before_inst(&self, func: &Function, inst: Inst) -> FxHashSet<Value> {
        let mut live = self.live_after_inst(func, inst);
        for &r in func.dfg.inst_results(inst) {
            live.remove(&r);
        }
        if !func.dfg.insts[inst].kind.is_phi() {
            for &a in func.dfg.args(inst) {
                live.insert(a);
            }
        }
        live
    }

    /// The set of values live immediately after `inst` (before any
    /// trailing projections of a tuple instruction).
    pub fn live_after_inst(&self, func: &Function, inst: Inst) -> FxHashSet<Value> {
        let block = func.inst_block(inst);
        let mut live = self.live_out(block).clone();
        let insts: Vec<Inst> = func.layout.block_insts(block).collect();
        for &i in insts.iter().rev() {
            if i == inst {
                break;
            }
            for &r in func.dfg.inst_results(i) {
                live.remove(&r);
            }
            if !func.dfg.insts[i].kind.is_phi() {
                for &a in func.dfg.args(i) {
                    live.insert(a);
                }
            }
        }
        live
    }

    /// The set of values live after `inst` and after the projection
    /// cluster unpacking its results, i.e. the values whose live ranges
    /// cross the whole instruction.
    pub fn live_across_inst(&self, func: &Function, inst: Inst) -> FxHashSet<Value> {
        let mut last = inst;
        let mut results: Vec<Value> = func.dfg.inst_results(inst).to_vec();
        let mut next = func.layout.next_inst(inst);
        while let Some(p) = next {
            if !func.dfg.insts[p].kind.is_proj() {
                break;
            }
            last = p;
            results.extend_from_slice(func.dfg.inst_results(p));
            next = func.layout.next_inst(p);
        }
        let mut live = self.live_after_inst(func, last);
        for r in results {
            live.remove(&r);
        }
        live
    }

    /// Do the live ranges of `a` and `b` overlap?
    ///
    /// In SSA form, two values interfere exactly if one is live just
    /// behind the definition of the other, so it suffices to order the
    /// definitions by dominance and scan the later definition's block. A
    /// value whose last use feeds the defining instruction does *not*
    /// interfere with the definition; that is what allows an output to
    /// reuse a dying input's register.
    pub fn values_interfere(
        &self,
        func: &Function,
        dtpo: &DominatorTreePreorder,
        a: Value,
        b: Value,
    ) -> bool {
        if a == b {
            return false;
        }
        let (first, second) = match self.def_order(func, dtpo, a, b) {
            Some(pair) => pair,
            None => return false,
        };

        let def_second = func.dfg.value_def(second);
        let block = match func.layout.inst_block(def_second) {
            Some(block) => block,
            // `second` is a floating placeholder; it is live everywhere
            // and overlaps anything whose range is not empty.
            None => return true,
        };
        if self.live_out(block).contains(&first) {
            return true;
        }
        // `first` dies in this block: it interferes iff some use comes
        // strictly after the definition of `second`.
        for inst in func.layout.block_insts(block) {
            if func.dfg.insts[inst].kind.is_phi() {
                continue;
            }
            if func.layout.cmp(inst, def_second) != Ordering::Greater {
                continue;
            }
            if func.dfg.args(inst).contains(&first) {
                return true;
            }
        }
        false
    }

    /// Order two values so that the first's definition dominates the
    /// second's, or `None` when neither dominates the other (in which case
    /// the values cannot interfere).
    fn def_order(
        &self,
        func: &Function,
        dtpo: &DominatorTreePreorder,
        a: Value,
        b: Value,
    ) -> Option<(Value, Value)> {
        let da = func.dfg.value_def(a);
        let db = func.dfg.value_def(b);
        let ba = func.layout.inst_block(da);
        let bb = func.layout.inst_block(db);
        match (ba, bb) {
            // Floating placeholder definitions behave as if defined before
            // the function entry.
            (None, _) => Some((a, b)),
            (_, None) => Some((b, a)),
            (Some(ba), Some(bb)) if ba == bb => match func.layout.cmp(da, db) {
                Ordering::Less => Some((a, b)),
                Ordering::Greater => Some((b, a)),
                Ordering::Equal => None,
            },
            (Some(ba), Some(bb)) => {
                if dtpo.dominates(ba, bb) {
                    Some((a, b))
                } else if dtpo.dominates(bb, ba) {
                    Some((b, a))
                } else {
                    None
                }
            }
        }
    }

    /// Build the border list of `block` for one register class.
    ///
    /// The list is in schedule order: definitions of live-in values first
    /// (the coloring walk skips them), then per instruction the closing
    /// uses of values dying there followed by the instruction's own
    /// definitions, and finally pseudo uses at the block end for values
    /// that live out. A definition that is never used closes immediately.
    pub fn border_list(
        &self,
        func: &Function,
        block: Block,
        class: RegClassIndex,
    ) -> Vec<Border> {
        let mut borders = Vec::new();
        let considered = |v: Value| func.dfg.consider_in_alloc(v, class);

        let mut live_in: Vec<Value> = self
            .live_in(block)
            .iter()
            .copied()
            .filter(|&v| considered(v))
            .collect();
        live_in.sort_unstable_by_key(|v| v.index());
        for &v in &live_in {
            borders.push(Border { is_def: true, value: v });
        }

        // The last in-block use of every value used here. Phi arguments
        // are edge uses and do not count.
        let mut last_use: FxHashMap<Value, Inst> = FxHashMap::default();
        for inst in func.layout.block_insts(block) {
            if func.dfg.insts[inst].kind.is_phi() {
                continue;
            }
            for &a in func.dfg.args(inst) {
                if considered(a) {
                    last_use.insert(a, inst);
                }
            }
        }

        let live_out = self.live_out(block);
        for inst in func.layout.block_insts(block) {
            if !func.dfg.insts[inst].kind.is_phi() {
                for &a in func.dfg.args(inst) {
                    if considered(a)
                        && last_use.get(&a) == Some(&inst)
                        && !live_out.contains(&a)
                    {
                        borders.push(Border { is_def: false, value: a });
                    }
                }
            }
            for &r in func.dfg.inst_results(inst) {
                if !considered(r) {
                    continue;
                }
                borders.push(Border { is_def: true, value: r });
                if !last_use.contains_key(&r) && !live_out.contains(&r) {
                    // Dead definition: the range closes where it opens.
                    borders.push(Border { is_def: false, value: r });
                }
            }
        }

        let mut out: Vec<Value> = live_out
            .iter()
            .copied()
            .filter(|&v| considered(v))
            .collect();
        out.sort_unstable_by_key(|v| v.index());
        for v in out {
            borders.push(Border { is_def: false, value: v });
        }

        borders
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Function;
    use crate::registers::RegInfo;

    #[test]
    fn straight_line() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 3);

        let mut func = Function::new();
        let b0 = func.dfg.make_block();
        func.layout.append_block(b0);
        let (i0, a) = func.dfg.make_op("a", gpr, &[]);
        let (i1, b) = func.dfg.make_op("b", gpr, &[]);
        let (i2, _c) = func.dfg.make_op("use", gpr, &[a, b]);
        for i in [i0, i1, i2] {
            func.layout.append_inst(i, b0);
        }

        let cfg = ControlFlowGraph::with_function(&func);
        let mut liveness = Liveness::new();
        liveness.compute(&func, &cfg);

        assert!(liveness.live_in(b0).is_empty());
        assert!(liveness.live_out(b0).is_empty());
        let live = liveness.live_before_inst(&func, i2);
        assert!(live.contains(&a) && live.contains(&b));
        assert!(liveness.live_after_inst(&func, i2).is_empty());
    }

    #[test]
    fn phi_edge_uses() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 3);

        let mut func = Function::new();
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        let b2 = func.dfg.make_block();
        let b3 = func.dfg.make_block();
        func.dfg.append_pred(b1, b0);
        func.dfg.append_pred(b2, b0);
        func.dfg.append_pred(b3, b1);
        func.dfg.append_pred(b3, b2);
        for b in [b0, b1, b2, b3] {
            func.layout.append_block(b);
        }

        let (i0, x) = func.dfg.make_op("x", gpr, &[]);
        let (i1, y) = func.dfg.make_op("y", gpr, &[]);
        let (ib, _) = func.dfg.make_op("br", gpr, &[]);
        func.layout.append_inst(i0, b0);
        func.layout.append_inst(i1, b0);
        func.layout.append_inst(ib, b0);
        let (j1, _) = func.dfg.make_op("jmp", gpr, &[]);
        func.layout.append_inst(j1, b1);
        let (j2, _) = func.dfg.make_op("jmp", gpr, &[]);
        func.layout.append_inst(j2, b2);

        let (p, pv) = func.dfg.make_phi(gpr, &[x, y]);
        func.layout.append_inst(p, b3);
        let (r, _) = func.dfg.make_op("ret", gpr, &[pv]);
        func.layout.append_inst(r, b3);

        let cfg = ControlFlowGraph::with_function(&func);
        let mut liveness = Liveness::new();
        liveness.compute(&func, &cfg);

        // x flows to b3 through b1, y through b2; the phi result is not
        // live into b3.
        assert!(liveness.live_out(b1).contains(&x));
        assert!(!liveness.live_out(b1).contains(&y));
        assert!(liveness.live_out(b2).contains(&y));
        assert!(liveness.is_live_in(b1, x));
        assert!(!liveness.is_live_in(b3, pv));

        // x and y never coexist on any path.
        let cfg = ControlFlowGraph::with_function(&func);
        let dt = crate::dominator_tree::DominatorTree::with_function(&func, &cfg);
        let mut dtpo = DominatorTreePreorder::new();
        dtpo.compute(&dt);
        assert!(liveness.values_interfere(&func, &dtpo, x, y));
        // Both are live at the end of b0, hence they do interfere there.
    }

    #[test]
    fn border_list_shape() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 3);

        let mut func = Function::new();
        let b0 = func.dfg.make_block();
        func.layout.append_block(b0);
        let (i0, a) = func.dfg.make_op("a", gpr, &[]);
        let (i1, b) = func.dfg.make_op("b", gpr, &[a]);
        let (i2, _c) = func.dfg.make_op("c", gpr, &[b]);
        for i in [i0, i1, i2] {
            func.layout.append_inst(i, b0);
        }

        let cfg = ControlFlowGraph::with_function(&func);
        let mut liveness = Liveness::new();
        liveness.compute(&func, &cfg);

        let borders = liveness.border_list(&func, b0, gpr);
        // def a, use a / def b, use b / def c, use c (dead def closes).
        let defs: Vec<_> = borders.iter().filter(|bo| bo.is_def).map(|bo| bo.value).collect();
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[0], a);
        // Every def is matched by exactly one closing use.
        let uses = borders.iter().filter(|bo| !bo.is_def).count();
        assert_eq!(uses, 3);
    }
}
