//! Register constraint handling.
//!
//! Before the coloring walk can run greedily, every instruction with
//! restricted operands must have its register choices fixed. For such an
//! instruction a `Perm` over all values live in front of it is inserted:
//! every live range is split there, so the colors chosen at the
//! instruction are independent of anything chosen elsewhere. Constrained
//! operands that live on behind the instruction additionally get a `Copy`
//! that dies at the instruction and takes the constraint upon itself.
//! Definitions are then paired with dying uses that may share their
//! register, and a bipartite matching assigns a distinct register to every
//! participating value. Unconstrained permutation outputs pick from the
//! remaining free registers.

use crate::fx::FxHashSet;
use crate::ir::{Block, Inst, InstKind, Value};
use crate::regalloc::coloring::ChordalEnv;
use crate::regalloc::insn::{decisive_regs, pair_up_operands, scan_insn};
use crate::regalloc::solver::make_solver;
use crate::regalloc::spill::rewrite_uses;
use crate::registers::{RegMask, RegReq};
use crate::result::{RegallocError, RegallocResult};
use cranelift_entity::EntityRef;
use log::{debug, trace};

/// Handle the register constraints of every instruction of `block`, in
/// schedule order.
pub(crate) fn handle_block_constraints(env: &mut ChordalEnv, block: Block) -> RegallocResult<()> {
    let insts: Vec<Inst> = env.func.layout.block_insts(block).collect();
    for inst in insts {
        handle_constraints(env, inst)?;
    }
    Ok(())
}

fn handle_constraints(env: &mut ChordalEnv, inst: Inst) -> RegallocResult<()> {
    // Phis carry no constraints of their own, and Perms that already
    // exist at this point (inserted by the calling-convention lowering)
    // are considered correctly pre-colored.
    if matches!(
        env.func.dfg.insts[inst].kind,
        InstKind::Phi | InstKind::Perm | InstKind::Proj { .. }
    ) {
        return Ok(());
    }
    if !scan_insn(env.func, env.class, env.allocatable, inst).has_constraints {
        return Ok(());
    }
    debug!("constraints at {}", inst);

    // Earlier splits invalidate the liveness this instruction is judged
    // with; refresh lazily.
    if env.liveness_dirty {
        env.liveness.compute(env.func, env.cfg);
        env.liveness_dirty = false;
    }

    let consider = |env: &ChordalEnv, v: Value| env.func.dfg.consider_in_alloc(v, env.class);

    // Everything of the class that is in a register just before the
    // instruction, and the subset that survives it.
    let mut live_before: Vec<Value> = env
        .liveness
        .live_before_inst(env.func, inst)
        .into_iter()
        .filter(|&v| consider(env, v))
        .collect();
    live_before.sort_unstable_by_key(|v| v.index());
    let live_across: FxHashSet<Value> = env
        .liveness
        .live_across_inst(env.func, inst)
        .into_iter()
        .filter(|&v| consider(env, v))
        .collect();

    // Split every live range at the instruction: Perm over the live set,
    // one fresh projection per value, uses behind the split renamed.
    let mut projs: Vec<(Value, Value, bool)> = Vec::new();
    let perm_inserted = !live_before.is_empty();
    if perm_inserted {
        let (perm_inst, tuple) = env.func.dfg.make_perm(env.class, &live_before);
        env.func.layout.insert_before(perm_inst, inst);
        trace!("  perm over {} live values", live_before.len());
        for (index, &v) in live_before.iter().enumerate() {
            let (proj_inst, proj) =
                env.func
                    .dfg
                    .make_proj(tuple, index as u8, RegReq::class(env.class));
            env.func.layout.insert_before(proj_inst, inst);
            projs.push((v, proj, live_across.contains(&v)));
        }
        for &(v, proj, _) in &projs {
            rewrite_uses(env.func, v, &[proj]);
        }
        env.liveness_dirty = true;
    }

    // Constrained operands that live across the instruction get a copy
    // that dies here; the through value itself stays unconstrained.
    let through: FxHashSet<Value> = projs
        .iter()
        .filter(|&&(_, _, through)| through)
        .map(|&(_, proj, _)| proj)
        .collect();
    for idx in 0..env.func.dfg.args(inst).len() {
        let arg = env.func.dfg.args(inst)[idx];
        if !consider(env, arg) || !through.contains(&arg) {
            continue;
        }
        if !env.func.dfg.in_req(inst, idx).is_limited() {
            continue;
        }
        let (copy_inst, copy) = env.func.dfg.make_copy(arg);
        env.func.layout.insert_before(copy_inst, inst);
        env.func.dfg.replace_arg(inst, idx, copy);
        env.liveness_dirty = true;
        trace!("  copy for constrained through operand {}", arg);
    }

    // Scan the rewritten instruction and find uses that may share an
    // output register.
    let mut insn = scan_insn(env.func, env.class, env.allocatable, inst);
    pair_up_operands(&mut insn, |v| through.contains(&v));

    // One bipartite node per distinct operand value (partners share a
    // node); edges go to the decisive register set.
    let class_name = env.reginfo.classes[env.class].name;
    let n_regs = env.reginfo.classes[env.class].n_regs as usize;
    let mut solver = make_solver(env.opts.matcher, n_regs, n_regs);
    let mut nodes: Vec<(Value, Option<Value>)> = Vec::new();
    let mut in_instance: FxHashSet<Value> = FxHashSet::default();
    for idx in 0..insn.ops.len() {
        let op = &insn.ops[idx];
        let partner = op.partner.map(|p| insn.ops[p].value);
        if partner.map_or(false, |p| in_instance.contains(&p)) {
            continue;
        }
        if !in_instance.insert(op.value) {
            continue;
        }
        if let Some(p) = partner {
            in_instance.insert(p);
        }
        assert!(nodes.len() < n_regs, "bipartite instance overflow at {}", inst);
        let node = nodes.len();
        match decisive_regs(&insn, idx) {
            Some(regs) => {
                trace!("  {} admits {:?}", op.value, regs);
                for reg in regs.iter() {
                    solver.add_edge(node, reg as usize);
                }
            }
            None => trace!("  {} admits no register", op.value),
        }
        nodes.push((op.value, partner));
    }

    // Values permuted through the instruction fill the instance as
    // unconstrained nodes.
    for &(_, proj, through_flag) in &projs {
        if !through_flag || in_instance.contains(&proj) {
            continue;
        }
        assert!(nodes.len() < n_regs, "bipartite instance overflow at {}", inst);
        let node = nodes.len();
        for reg in env.allocatable.iter() {
            solver.add_edge(node, reg as usize);
        }
        in_instance.insert(proj);
        nodes.push((proj, None));
    }

    // A maximum matching must be perfect on the left side here; a left
    // node without a register means the operands demand more than the
    // class can give.
    let assignment = solver.solve();
    for (node, &(value, partner)) in nodes.iter().enumerate() {
        let reg = assignment[node].ok_or(RegallocError::OverConstrained {
            inst,
            value,
            class: class_name,
        })? as u8;
        env.func.set_reg(value, reg);
        trace!("  {} -> r{}", value, reg);
        if let Some(partner) = partner {
            env.func.set_reg(partner, reg);
            trace!("  {} -> r{} (partner)", partner, reg);
        }
    }

    // The remaining permutation outputs take any register not already
    // used by a sibling.
    let mut used = RegMask::EMPTY;
    for &(_, proj, _) in &projs {
        if let Some(reg) = env.func.reg(proj) {
            used.set(reg);
        }
    }
    for &(_, proj, _) in &projs {
        if env.func.reg(proj).is_some() {
            continue;
        }
        let reg = used
            .complement_in(env.allocatable)
            .first()
            .ok_or(RegallocError::OutOfRegisters {
                value: proj,
                class: class_name,
            })?;
        used.set(reg);
        env.func.set_reg(proj, reg);
        trace!("  {} -> r{} (free)", proj, reg);
    }

    Ok(())
}
