//! Shared helpers for the integration tests: tiny function builders and
//! checkers for the allocator's guarantees.
#![allow(dead_code)]

use regalloc_chordal::dominator_tree::{DominatorTree, DominatorTreePreorder};
use regalloc_chordal::flowgraph::ControlFlowGraph;
use regalloc_chordal::ir::{Function, Inst, InstKind, Value};
use regalloc_chordal::regalloc::Liveness;
use regalloc_chordal::registers::{RegClassIndex, RegInfo};

/// A register description with one three-register class, as used by most
/// scenarios.
pub fn reg3() -> (RegInfo, RegClassIndex) {
    let mut reginfo = RegInfo::new();
    let gpr = reginfo.make_class("gpr", 3);
    (reginfo, gpr)
}

/// Recompute the analyses for checking purposes.
pub fn analyses(func: &Function) -> (ControlFlowGraph, DominatorTreePreorder, Liveness) {
    let cfg = ControlFlowGraph::with_function(func);
    let domtree = DominatorTree::with_function(func, &cfg);
    let mut dtpo = DominatorTreePreorder::new();
    dtpo.compute(&domtree);
    let mut liveness = Liveness::new();
    liveness.compute(func, &cfg);
    (cfg, dtpo, liveness)
}

/// All instructions of `func` in layout order.
pub fn all_insts(func: &Function) -> Vec<Inst> {
    let mut insts = Vec::new();
    for block in func.layout.blocks() {
        insts.extend(func.layout.block_insts(block));
    }
    insts
}

/// Count the instructions whose kind matches `pred`.
pub fn count_insts(func: &Function, pred: impl Fn(&InstKind) -> bool) -> usize {
    all_insts(func)
        .into_iter()
        .filter(|&inst| pred(&func.dfg.insts[inst].kind))
        .count()
}

/// Every pair of interfering values of the class must have distinct
/// registers, and every value of the class defined by a scheduled
/// instruction must have one at all.
pub fn check_coloring(func: &Function, reginfo: &RegInfo, class: RegClassIndex) {
    let (_cfg, dtpo, liveness) = analyses(func);
    let n_regs = reginfo.classes[class].n_regs;

    let mut colored: Vec<Value> = Vec::new();
    for v in func.dfg.values.keys() {
        if !func.dfg.consider_in_alloc(v, class) {
            continue;
        }
        if func.layout.inst_block(func.dfg.value_def(v)).is_none() {
            continue;
        }
        let reg = func
            .reg(v)
            .unwrap_or_else(|| panic!("{} has no register", v));
        assert!(reg < n_regs, "{} got a register outside its class", v);
        colored.push(v);
    }

    for (i, &a) in colored.iter().enumerate() {
        for &b in &colored[i + 1..] {
            if liveness.values_interfere(func, &dtpo, a, b) {
                assert_ne!(
                    func.reg(a),
                    func.reg(b),
                    "interfering values {} and {} share a register",
                    a,
                    b
                );
            }
        }
    }
}

/// Every limited operand must be satisfied by the assigned register.
pub fn check_constraints(func: &Function, class: RegClassIndex) {
    for inst in all_insts(func) {
        for (idx, &arg) in func.dfg.args(inst).iter().enumerate() {
            if !func.dfg.consider_in_alloc(arg, class) {
                continue;
            }
            if let Some(mask) = func.dfg.in_req(inst, idx).limited {
                let reg = func.reg(arg).expect("constrained operand uncolored");
                assert!(
                    mask.contains(reg),
                    "operand {} of {} violates its constraint",
                    arg,
                    inst
                );
            }
        }
        for &r in func.dfg.inst_results(inst) {
            if !func.dfg.consider_in_alloc(r, class) {
                continue;
            }
            if let Some(mask) = func.dfg.values[r].req.limited {
                let reg = func.reg(r).expect("constrained result uncolored");
                assert!(
                    mask.contains(reg),
                    "result {} of {} violates its constraint",
                    r,
                    inst
                );
            }
            if let Some(fixed) = func.dfg.values[r].fixed {
                assert_eq!(func.reg(r), Some(fixed), "{} lost its pre-assignment", r);
            }
        }
    }
}

/// At every program point, no more than `k` values of the class may be
/// live.
pub fn check_pressure(func: &Function, reginfo: &RegInfo, class: RegClassIndex) {
    let (cfg, _dtpo, mut liveness) = analyses(func);
    liveness.compute(func, &cfg);
    let k = reginfo.classes[class].n_allocatable();
    let considered = |v: Value| func.dfg.consider_in_alloc(v, class);

    for block in func.layout.blocks() {
        let mut live: Vec<Value> = liveness
            .live_out(block)
            .iter()
            .copied()
            .filter(|&v| considered(v))
            .collect();
        assert!(
            live.len() <= k,
            "{} values of class live out of {}",
            live.len(),
            block
        );

        let insts: Vec<Inst> = func.layout.block_insts(block).collect();
        for &inst in insts.iter().rev() {
            for &r in func.dfg.inst_results(inst) {
                live.retain(|&v| v != r);
            }
            if !func.dfg.insts[inst].kind.is_phi() {
                for &a in func.dfg.args(inst) {
                    if considered(a) && !live.contains(&a) {
                        live.push(a);
                    }
                }
            }
            assert!(
                live.len() <= k,
                "{} values of class live before {}",
                live.len(),
                inst
            );
        }
    }
}

/// Every operand defined in the same block must be scheduled before its
/// user.
pub fn check_schedule_dag(func: &Function) {
    for block in func.layout.blocks() {
        for inst in func.layout.block_insts(block) {
            if func.dfg.insts[inst].kind.is_phi() {
                continue;
            }
            for &arg in func.dfg.args(inst) {
                let def = func.dfg.value_def(arg);
                if func.layout.inst_block(def) == Some(block) {
                    assert_eq!(
                        func.layout.cmp(def, inst),
                        std::cmp::Ordering::Less,
                        "{} scheduled before its operand {}",
                        inst,
                        def
                    );
                }
            }
        }
    }
}

/// The function must be in valid SSA form: every use is dominated by its
/// definition; phi arguments by the end of the matching predecessor.
pub fn check_ssa(func: &Function) {
    let (_cfg, dtpo, _liveness) = analyses(func);
    for block in func.layout.blocks() {
        for inst in func.layout.block_insts(block) {
            let is_phi = func.dfg.insts[inst].kind.is_phi();
            for (idx, &arg) in func.dfg.args(inst).iter().enumerate() {
                let def = func.dfg.value_def(arg);
                let def_block = match func.layout.inst_block(def) {
                    Some(b) => b,
                    // Floating placeholders dominate everything.
                    None => continue,
                };
                if is_phi {
                    let pred = func.dfg.block_preds(block)[idx];
                    assert!(
                        dtpo.dominates(def_block, pred),
                        "phi argument {} of {} does not reach its edge",
                        arg,
                        inst
                    );
                } else if def_block == block {
                    assert_eq!(
                        func.layout.cmp(def, inst),
                        std::cmp::Ordering::Less,
                        "use of {} before its definition",
                        arg
                    );
                } else {
                    assert!(
                        dtpo.dominates(def_block, block),
                        "use of {} in {} not dominated by its definition",
                        arg,
                        block
                    );
                }
            }
        }
    }
}

/// Every reload must be dominated by a spill of the same slot.
pub fn check_reload_positions(func: &Function) {
    let (_cfg, dtpo, _liveness) = analyses(func);

    let mut spills: Vec<(Inst, regalloc_chordal::ir::SpillSlot)> = Vec::new();
    for inst in all_insts(func) {
        if let InstKind::Spill { slot } = func.dfg.insts[inst].kind {
            spills.push((inst, slot));
        }
    }

    for inst in all_insts(func) {
        if let InstKind::Reload { slot } = func.dfg.insts[inst].kind {
            let reload_block = func.layout.inst_block(inst).unwrap();
            let dominated = spills.iter().any(|&(spill, spill_slot)| {
                if spill_slot != slot {
                    return false;
                }
                let spill_block = func.layout.inst_block(spill).unwrap();
                if spill_block == reload_block {
                    func.layout.cmp(spill, inst) == std::cmp::Ordering::Less
                } else {
                    dtpo.dominates(spill_block, reload_block)
                }
            });
            assert!(dominated, "{} is not dominated by a spill of its slot", inst);
        }
    }
}

/// Run the full set of structural checks after an allocation.
pub fn check_all(func: &Function, reginfo: &RegInfo, class: RegClassIndex) {
    check_schedule_dag(func);
    check_ssa(func);
    check_pressure(func, reginfo, class);
    check_coloring(func, reginfo, class);
    check_constraints(func, class);
    check_reload_positions(func);
}
