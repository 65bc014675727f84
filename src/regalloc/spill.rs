//! Spill decision collection and materialisation.
//!
//! The Belady walk only *decides*: reload this value before that
//! instruction, reload on that edge, this phi lives in memory. The
//! [`SpillEnv`] records those decisions and materialises them afterwards
//! in one go: a `Spill` after each spilled value's definition, `Reload`
//! instructions at the requested points, and a rewiring of uses to the
//! reaching definition that keeps the program in SSA form.

use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Block, Function, Inst, InstKind, SpillSlot, Value};
use crate::registers::RegClassIndex;
use core::cmp::Ordering;
use cranelift_entity::packed_option::ReservedValue;
use log::trace;
use smallvec::SmallVec;

/// Collected spill and reload decisions for one register class.
pub struct SpillEnv {
    class: RegClassIndex,
    reloads: Vec<(Value, Inst)>,
    edge_reloads: Vec<(Value, Block, usize)>,
    spilled_phis: Vec<Value>,
    spilled_phi_set: FxHashSet<Value>,
}

impl SpillEnv {
    /// Create an empty environment for `class`.
    pub fn new(class: RegClassIndex) -> Self {
        Self {
            class,
            reloads: Vec::new(),
            edge_reloads: Vec::new(),
            spilled_phis: Vec::new(),
            spilled_phi_set: FxHashSet::default(),
        }
    }

    /// Request a reload of `value` immediately before `before`.
    pub fn add_reload(&mut self, value: Value, before: Inst) {
        trace!("reload {} before {}", value, before);
        self.reloads.push((value, before));
    }

    /// Request a reload of `value` on the edge entering `block` from its
    /// predecessor number `pred_idx`.
    pub fn add_reload_on_edge(&mut self, value: Value, block: Block, pred_idx: usize) {
        trace!("reload {} on edge {} of {}", value, pred_idx, block);
        self.edge_reloads.push((value, block, pred_idx));
    }

    /// Mark `phi` as living in memory. Its arguments are stored into the
    /// phi's spill slot at the end of the predecessors, so all of them
    /// share one slot.
    pub fn spill_phi(&mut self, phi: Value) {
        if self.spilled_phi_set.insert(phi) {
            trace!("spill phi {}", phi);
            self.spilled_phis.push(phi);
        }
    }

    /// Materialise all collected decisions into `func`.
    pub fn insert_spills_reloads(self, func: &mut Function) {
        // Everything that needs a memory copy: reload targets plus phis
        // explicitly marked. Unknowns are available everywhere and never
        // materialise.
        let mut spilled: Vec<Value> = Vec::new();
        let mut seen = FxHashSet::default();
        let mut consider = |v: Value, spilled: &mut Vec<Value>, func: &Function| {
            if !seen.insert(v) {
                return;
            }
            let def = func.dfg.value_def(v);
            if matches!(func.dfg.insts[def].kind, InstKind::Unknown) {
                return;
            }
            spilled.push(v);
        };
        for &(v, _) in &self.reloads {
            consider(v, &mut spilled, func);
        }
        for &(v, _, _) in &self.edge_reloads {
            consider(v, &mut spilled, func);
        }
        for &v in &self.spilled_phis {
            consider(v, &mut spilled, func);
        }
        if spilled.is_empty() {
            return;
        }

        let mut slot_of: FxHashMap<Value, SpillSlot> = FxHashMap::default();
        for &v in &spilled {
            slot_of.insert(v, func.make_slot(self.class));
        }
        let frame = func.frame_ptr;

        // Spills always sit right behind the definition, where the value
        // is certainly still in a register.
        for &v in &spilled {
            let slot = slot_of[&v];
            if self.spilled_phi_set.contains(&v) {
                let phi_inst = func.dfg.value_def(v);
                let block = func.inst_block(phi_inst);
                let preds: SmallVec<[Block; 4]> =
                    SmallVec::from_slice(func.dfg.block_preds(block));
                let args: SmallVec<[Value; 4]> =
                    SmallVec::from_slice(func.dfg.args(phi_inst));
                for (&arg, &pred) in args.iter().zip(preds.iter()) {
                    let def = func.dfg.value_def(arg);
                    if matches!(func.dfg.insts[def].kind, InstKind::Unknown) {
                        continue;
                    }
                    let spill = func.dfg.make_spill(arg, slot, frame);
                    let anchor = func
                        .layout
                        .last_inst(pred)
                        .expect("empty predecessor block");
                    func.layout.insert_before(spill, anchor);
                    trace!("spill {} for {} at end of {}", arg, v, pred);
                }
            } else {
                let def = func.dfg.value_def(v);
                let anchor = spill_anchor(func, def);
                let spill = func.dfg.make_spill(v, slot, frame);
                func.layout.insert_after(spill, anchor);
                trace!("spill {} after its definition", v);
            }
        }

        // Reloads. Each produces a fresh value; the rewiring below sends
        // every use to its reaching definition.
        let mut new_defs: FxHashMap<Value, Vec<Value>> = FxHashMap::default();
        let mut seen_reload = FxHashSet::default();
        for &(v, before) in &self.reloads {
            let Some(&slot) = slot_of.get(&v) else { continue };
            if !seen_reload.insert((v, before)) {
                continue;
            }
            let (reload, new_v) = func.dfg.make_reload(slot, self.class, frame);
            func.layout.insert_before(reload, before);
            new_defs.entry(v).or_default().push(new_v);
        }
        let mut seen_edge = FxHashSet::default();
        for &(v, block, idx) in &self.edge_reloads {
            let Some(&slot) = slot_of.get(&v) else { continue };
            if !seen_edge.insert((v, block, idx)) {
                continue;
            }
            let pred = func.dfg.block_preds(block)[idx];
            let anchor = func
                .layout
                .last_inst(pred)
                .expect("empty predecessor block");
            let (reload, new_v) = func.dfg.make_reload(slot, self.class, frame);
            func.layout.insert_before(reload, anchor);
            new_defs.entry(v).or_default().push(new_v);
        }

        for &v in &spilled {
            if let Some(defs) = new_defs.get(&v) {
                rewrite_uses(func, v, defs);
            }
        }
    }
}

/// The instruction a spill of the result of `def` goes after: past the phi
/// prefix for phis, past the projection cluster for projections, so the
/// adjacency assumptions of the other passes stay intact.
fn spill_anchor(func: &Function, def: Inst) -> Inst {
    let kind = &func.dfg.insts[def].kind;
    if kind.is_phi() {
        let mut anchor = def;
        let mut next = func.layout.next_inst(def);
        while let Some(inst) = next {
            if !func.dfg.insts[inst].kind.is_phi() {
                break;
            }
            anchor = inst;
            next = func.layout.next_inst(inst);
        }
        anchor
    } else if kind.is_proj() {
        let mut anchor = def;
        let mut next = func.layout.next_inst(def);
        while let Some(inst) = next {
            if !func.dfg.insts[inst].kind.is_proj() {
                break;
            }
            anchor = inst;
            next = func.layout.next_inst(inst);
        }
        anchor
    } else {
        def
    }
}

/// Rewire every use of `old` to its reaching definition, where the
/// definitions are `old` itself plus `new_defs` (values that carry the
/// same content, typically reloads or permutation projections).
///
/// Uses in blocks where several definitions meet get fresh phis; trivial
/// phis are cleaned up again. Phi arguments count as uses at the end of
/// the corresponding predecessor.
pub(crate) fn rewrite_uses(func: &mut Function, old: Value, new_defs: &[Value]) {
    let class = func
        .dfg
        .value_class(old)
        .expect("rewiring a classless value");

    let mut defs_by_block: FxHashMap<Block, Vec<(Inst, Value)>> = FxHashMap::default();
    let orig_def = func.dfg.value_def(old);
    if let Some(block) = func.layout.inst_block(orig_def) {
        defs_by_block.entry(block).or_default().push((orig_def, old));
    }
    for &d in new_defs {
        let def = func.dfg.value_def(d);
        let block = func
            .layout
            .inst_block(def)
            .expect("new definition not in layout");
        defs_by_block.entry(block).or_default().push((def, d));
    }
    for defs in defs_by_block.values_mut() {
        defs.sort_by(|a, b| func.layout.cmp(a.0, b.0));
    }

    // Snapshot the uses before rewiring: every argument slot naming `old`,
    // except the arguments of the new definitions' own instructions.
    let mut uses: Vec<(Inst, usize)> = Vec::new();
    let blocks: Vec<Block> = func.layout.blocks().collect();
    for &block in &blocks {
        for inst in func.layout.block_insts(block) {
            for (idx, &arg) in func.dfg.args(inst).iter().enumerate() {
                if arg == old {
                    uses.push((inst, idx));
                }
            }
        }
    }

    let mut repair = Repair {
        func,
        class,
        defs_by_block,
        entry_def: FxHashMap::default(),
        created_phis: Vec::new(),
    };

    for (inst, idx) in uses {
        let new = if repair.func.dfg.insts[inst].kind.is_phi() {
            let block = repair.func.inst_block(inst);
            let pred = repair.func.dfg.block_preds(block)[idx];
            repair.def_at_exit(pred)
        } else {
            let block = repair.func.inst_block(inst);
            repair.def_before(block, inst)
        };
        repair.func.dfg.replace_arg(inst, idx, new);
    }

    repair.cleanup();
}

/// Reaching-definition search with phi placement at joins.
struct Repair<'a> {
    func: &'a mut Function,
    class: RegClassIndex,
    defs_by_block: FxHashMap<Block, Vec<(Inst, Value)>>,
    entry_def: FxHashMap<Block, Value>,
    created_phis: Vec<(Inst, Value)>,
}

impl<'a> Repair<'a> {
    /// The definition reaching the program point just before `inst`.
    fn def_before(&mut self, block: Block, inst: Inst) -> Value {
        if let Some(defs) = self.defs_by_block.get(&block) {
            let mut best = None;
            for &(def_inst, def_val) in defs {
                if self.func.layout.cmp(def_inst, inst) == Ordering::Less {
                    best = Some(def_val);
                } else {
                    break;
                }
            }
            if let Some(v) = best {
                return v;
            }
        }
        self.def_at_entry(block)
    }

    /// The definition reaching the end of `block`.
    fn def_at_exit(&mut self, block: Block) -> Value {
        if let Some(defs) = self.defs_by_block.get(&block) {
            if let Some(&(_, def_val)) = defs.last() {
                return def_val;
            }
        }
        self.def_at_entry(block)
    }

    /// The definition live at the entry of `block`, inserting a phi when
    /// the predecessors disagree. The phi is memoized before its arguments
    /// are computed, which terminates loops.
    fn def_at_entry(&mut self, block: Block) -> Value {
        if let Some(&v) = self.entry_def.get(&block) {
            return v;
        }
        let preds: SmallVec<[Block; 4]> = SmallVec::from_slice(self.func.dfg.block_preds(block));
        assert!(
            !preds.is_empty(),
            "use in {} not dominated by any definition",
            block
        );

        if preds.len() == 1 {
            let v = self.def_at_exit(preds[0]);
            self.entry_def.insert(block, v);
            return v;
        }

        // Join: place a phi first so that back edges resolve to it. The
        // arguments start out as reserved placeholders and are filled in
        // below.
        let args: SmallVec<[Value; 4]> = preds.iter().map(|_| Value::reserved_value()).collect();
        let (phi_inst, phi_val) = self.func.dfg.make_phi(self.class, &args);
        match self.func.layout.first_inst(block) {
            Some(first) => self.func.layout.insert_before(phi_inst, first),
            None => self.func.layout.append_inst(phi_inst, block),
        }
        self.entry_def.insert(block, phi_val);
        self.created_phis.push((phi_inst, phi_val));

        for (idx, &pred) in preds.iter().enumerate() {
            let def = self.def_at_exit(pred);
            self.func.dfg.replace_arg(phi_inst, idx, def);
        }
        phi_val
    }

    /// Remove phis all of whose arguments agree (ignoring self
    /// references), replacing their uses with the unique argument.
    fn cleanup(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for i in 0..self.created_phis.len() {
                let (phi_inst, phi_val) = self.created_phis[i];
                if self.func.layout.inst_block(phi_inst).is_none() {
                    continue;
                }
                let mut unique = None;
                let mut trivial = true;
                for &arg in self.func.dfg.args(phi_inst) {
                    if arg == phi_val {
                        continue;
                    }
                    match unique {
                        None => unique = Some(arg),
                        Some(u) if u == arg => {}
                        Some(_) => {
                            trivial = false;
                            break;
                        }
                    }
                }
                if !trivial {
                    continue;
                }
                if let Some(replacement) = unique {
                    let blocks: Vec<Block> = self.func.layout.blocks().collect();
                    for block in blocks {
                        let insts: Vec<Inst> = self.func.layout.block_insts(block).collect();
                        for inst in insts {
                            let n = self.func.dfg.args(inst).len();
                            for idx in 0..n {
                                if self.func.dfg.args(inst)[idx] == phi_val {
                                    self.func.dfg.replace_arg(inst, idx, replacement);
                                }
                            }
                        }
                    }
                    self.func.layout.remove_inst(phi_inst);
                    changed = true;
                }
            }
        }
    }
}

/// Drop allocator-created instructions whose results became unused:
/// copies, reloads, phis, projections, and permutations once all of
/// their projections are gone. Runs to a fix point.
pub fn remove_dead_code(func: &mut Function) {
    loop {
        let mut used: FxHashSet<Value> = FxHashSet::default();
        let blocks: Vec<Block> = func.layout.blocks().collect();
        for &block in &blocks {
            for inst in func.layout.block_insts(block) {
                for &arg in func.dfg.args(inst) {
                    used.insert(arg);
                }
            }
        }

        let mut removed = false;
        for &block in &blocks {
            let insts: Vec<Inst> = func.layout.block_insts(block).collect();
            for inst in insts {
                let removable = matches!(
                    func.dfg.insts[inst].kind,
                    InstKind::Copy
                        | InstKind::Reload { .. }
                        | InstKind::Proj { .. }
                        | InstKind::Perm
                        | InstKind::Phi
                );
                if !removable {
                    continue;
                }
                if func
                    .dfg
                    .inst_results(inst)
                    .iter()
                    .all(|r| !used.contains(r))
                {
                    trace!("removing dead {}", inst);
                    func.layout.remove_inst(inst);
                    removed = true;
                }
            }
        }
        if !removed {
            break;
        }
    }
}
