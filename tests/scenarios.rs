//! End-to-end scenarios driving the full scheduling, spilling and
//! coloring pipeline on small hand-built functions.

mod common;

use common::*;
use regalloc_chordal::ir::{Function, InstKind};
use regalloc_chordal::regalloc::{Context, TrivialSelector};
use regalloc_chordal::registers::{RegMask, RegReq};
use regalloc_chordal::{ChordalOptions, RegallocError};

fn run(func: &mut Function, reginfo: &regalloc_chordal::registers::RegInfo) {
    let opts = ChordalOptions::default();
    Context::new()
        .run(func, reginfo, &opts, &mut TrivialSelector)
        .expect("allocation must succeed");
}

/// Straight line, no pressure: two values live at once in a three
/// register class. First fit colors them r0 and r1; nothing is spilled
/// and no permutation is needed.
#[test]
fn straight_line_no_pressure() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (reginfo, gpr) = reg3();

    let mut func = Function::new();
    let b0 = func.dfg.make_block();
    func.layout.append_block(b0);
    let (i_a, a) = func.dfg.make_op("a", gpr, &[]);
    let (i_b, b) = func.dfg.make_op("b", gpr, &[]);
    let (i_use, _) = func.dfg.make_op("use", gpr, &[a, b]);
    for i in [i_a, i_b, i_use] {
        func.layout.append_inst(i, b0);
    }

    run(&mut func, &reginfo);

    assert_eq!(func.reg(a), Some(0));
    assert_eq!(func.reg(b), Some(1));
    assert_eq!(count_insts(&func, |k| matches!(k, InstKind::Spill { .. })), 0);
    assert_eq!(count_insts(&func, |k| matches!(k, InstKind::Reload { .. })), 0);
    assert_eq!(count_insts(&func, |k| matches!(k, InstKind::Perm)), 0);
    check_all(&func, &reginfo, gpr);
}

/// Pressure exactly k: three simultaneously live values fit into three
/// registers with three distinct colors and no spill.
#[test]
fn pressure_equals_k() {
    let (reginfo, gpr) = reg3();

    let mut func = Function::new();
    let b0 = func.dfg.make_block();
    func.layout.append_block(b0);
    let (i_a, a) = func.dfg.make_op("a", gpr, &[]);
    let (i_b, b) = func.dfg.make_op("b", gpr, &[]);
    let (i_c, c) = func.dfg.make_op("c", gpr, &[]);
    let (i_use, _) = func.dfg.make_op("use", gpr, &[c, b, a]);
    for i in [i_a, i_b, i_c, i_use] {
        func.layout.append_inst(i, b0);
    }

    run(&mut func, &reginfo);

    let mut regs = [func.reg(a).unwrap(), func.reg(b).unwrap(), func.reg(c).unwrap()];
    regs.sort_unstable();
    assert_eq!(regs, [0, 1, 2]);
    assert_eq!(count_insts(&func, |k| matches!(k, InstKind::Spill { .. })), 0);
    check_all(&func, &reginfo, gpr);
}

/// Pressure above k: four values around one instruction. The value with
/// the farthest next use is evicted and reloaded once before its use.
#[test]
fn pressure_above_k_spills_farthest() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (reginfo, gpr) = reg3();

    let mut func = Function::new();
    let b0 = func.dfg.make_block();
    func.layout.append_block(b0);
    let (i_d, d) = func.dfg.make_op("d", gpr, &[]);
    let (i_a, a) = func.dfg.make_op("a", gpr, &[]);
    let (i_b, b) = func.dfg.make_op("b", gpr, &[]);
    let (i_c, c) = func.dfg.make_op("c", gpr, &[]);
    let (i_near, nr) = func.dfg.make_op("near", gpr, &[a, b, c]);
    let (i_far, _) = func.dfg.make_op("far", gpr, &[d, nr]);
    for i in [i_d, i_a, i_b, i_c, i_near, i_far] {
        func.layout.append_inst(i, b0);
    }

    run(&mut func, &reginfo);

    // d was pushed out and comes back exactly once, right before its use.
    assert_eq!(count_insts(&func, |k| matches!(k, InstKind::Reload { .. })), 1);
    assert_eq!(count_insts(&func, |k| matches!(k, InstKind::Spill { .. })), 1);
    let spill = all_insts(&func)
        .into_iter()
        .find(|&i| matches!(func.dfg.insts[i].kind, InstKind::Spill { .. }))
        .unwrap();
    assert_eq!(func.dfg.args(spill)[0], d);
    // The use of d now consumes the reloaded value.
    let far_arg = func.dfg.args(i_far)[0];
    assert_ne!(far_arg, d);
    assert!(matches!(
        func.dfg.insts[func.dfg.value_def(far_arg)].kind,
        InstKind::Reload { .. }
    ));
    check_all(&func, &reginfo, gpr);
}

/// Two-operand constraint: output and input both demand r0. They are
/// paired and share the register.
#[test]
fn two_operand_constraint_pairs() {
    let (reginfo, gpr) = reg3();

    let mut func = Function::new();
    let b0 = func.dfg.make_block();
    func.layout.append_block(b0);
    let (i_a, a) = func.dfg.make_op("a", gpr, &[]);
    let (i_op, o) = func.dfg.make_op("two_addr", gpr, &[a]);
    let (i_end, _) = func.dfg.make_op("end", gpr, &[o]);
    for i in [i_a, i_op, i_end] {
        func.layout.append_inst(i, b0);
    }
    func.dfg.set_in_req(i_op, 0, RegReq::fixed(gpr, 0));
    func.dfg.values[o].req = RegReq::fixed(gpr, 0);

    run(&mut func, &reginfo);

    assert_eq!(func.reg(o), Some(0));
    let input = func.dfg.args(i_op)[0];
    assert_eq!(func.reg(input), Some(0));
    // The live range of a was split in front of the constrained
    // instruction.
    assert_eq!(count_insts(&func, |k| matches!(k, InstKind::Perm)), 1);
    check_all(&func, &reginfo, gpr);
}

/// A constrained instruction with another live value also wanting r0:
/// the permutation moves the bystander out of the way.
#[test]
fn constraint_with_competing_live_value() {
    let (reginfo, gpr) = reg3();

    let mut func = Function::new();
    let b0 = func.dfg.make_block();
    func.layout.append_block(b0);
    // w is defined first so the greedy walk gives it r0, then lives
    // across the constrained instruction, which also demands r0.
    let (i_w, w) = func.dfg.make_op("w", gpr, &[]);
    let (i_a, a) = func.dfg.make_op("a", gpr, &[]);
    let (i_op, o) = func.dfg.make_op("two_addr", gpr, &[a]);
    let (i_end, _) = func.dfg.make_op("end", gpr, &[o, w]);
    for i in [i_w, i_a, i_op, i_end] {
        func.layout.append_inst(i, b0);
    }
    func.dfg.set_in_req(i_op, 0, RegReq::fixed(gpr, 0));
    func.dfg.values[o].req = RegReq::fixed(gpr, 0);

    run(&mut func, &reginfo);

    assert_eq!(func.reg(o), Some(0));
    assert_eq!(count_insts(&func, |k| matches!(k, InstKind::Perm)), 1);
    // w survives the instruction under a different name and register.
    let w_after = func.dfg.args(i_end)[1];
    assert_ne!(func.reg(w_after), Some(0));
    check_all(&func, &reginfo, gpr);
}

/// Phi at a join where only one predecessor still has the argument in a
/// register: the other edge gets a reload.
#[test]
fn phi_join_edge_reload() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (reginfo, gpr) = reg3();

    let mut func = Function::new();
    let b0 = func.dfg.make_block();
    let b1 = func.dfg.make_block(); // defines x, keeps everything resident
    let b2 = func.dfg.make_block(); // high pressure, evicts y
    let b3 = func.dfg.make_block(); // join with the phi
    func.dfg.append_pred(b1, b0);
    func.dfg.append_pred(b2, b0);
    func.dfg.append_pred(b3, b1);
    func.dfg.append_pred(b3, b2);
    for b in [b0, b1, b2, b3] {
        func.layout.append_block(b);
    }

    let (i_y, y) = func.dfg.make_op("y", gpr, &[]);
    let (i_br, _) = func.dfg.make_op("branch", gpr, &[]);
    func.layout.append_inst(i_y, b0);
    func.layout.append_inst(i_br, b0);

    let (i_x, x) = func.dfg.make_op("x", gpr, &[]);
    let (i_j1, _) = func.dfg.make_op("jump", gpr, &[]);
    func.layout.append_inst(i_x, b1);
    func.layout.append_inst(i_j1, b1);

    // Three locally busy values push y out of the working set of b2.
    let (i_t1, t1) = func.dfg.make_op("t1", gpr, &[]);
    let (i_t2, t2) = func.dfg.make_op("t2", gpr, &[]);
    let (i_t3, t3) = func.dfg.make_op("t3", gpr, &[]);
    let (i_sum, _) = func.dfg.make_op("sum", gpr, &[t1, t2, t3]);
    let (i_j2, _) = func.dfg.make_op("jump", gpr, &[]);
    for i in [i_t1, i_t2, i_t3, i_sum, i_j2] {
        func.layout.append_inst(i, b2);
    }

    let (i_phi, p) = func.dfg.make_phi(gpr, &[x, y]);
    let (i_ret, _) = func.dfg.make_op("ret", gpr, &[p]);
    func.layout.append_inst(i_phi, b3);
    func.layout.append_inst(i_ret, b3);

    run(&mut func, &reginfo);

    // y comes back through a reload at the end of the pressured
    // predecessor, feeding the phi.
    let reloads: Vec<_> = all_insts(&func)
        .into_iter()
        .filter(|&i| matches!(func.dfg.insts[i].kind, InstKind::Reload { .. }))
        .collect();
    assert_eq!(reloads.len(), 1);
    assert_eq!(func.layout.inst_block(reloads[0]), Some(b2));
    let reloaded = func.dfg.inst_results(reloads[0])[0];
    assert_eq!(func.dfg.args(i_phi)[1], reloaded);
    assert_eq!(func.dfg.args(i_phi)[0], x);
    check_all(&func, &reginfo, gpr);
}

/// Two values pinned to the same single register at one instruction
/// cannot be matched; the allocator reports the infeasibility.
#[test]
fn over_constrained_aborts() {
    let (reginfo, gpr) = reg3();

    let mut func = Function::new();
    let b0 = func.dfg.make_block();
    func.layout.append_block(b0);
    let (i_a, a) = func.dfg.make_op("a", gpr, &[]);
    let (i_b, b) = func.dfg.make_op("b", gpr, &[]);
    let (i_op, _) = func.dfg.make_op("both_r0", gpr, &[a, b]);
    for i in [i_a, i_b, i_op] {
        func.layout.append_inst(i, b0);
    }
    func.dfg.set_in_req(i_op, 0, RegReq::fixed(gpr, 0));
    func.dfg.set_in_req(i_op, 1, RegReq::fixed(gpr, 0));

    let opts = ChordalOptions::default();
    let err = Context::new()
        .run(&mut func, &reginfo, &opts, &mut TrivialSelector)
        .unwrap_err();
    assert!(matches!(err, RegallocError::OverConstrained { inst, .. } if inst == i_op));
}

/// A class without allocatable registers refuses to spill as soon as it
/// has values.
#[test]
fn empty_class_is_refused() {
    let mut reginfo = regalloc_chordal::registers::RegInfo::new();
    let cls = reginfo.make_class_with("flags", 1, RegMask::EMPTY);

    let mut func = Function::new();
    let b0 = func.dfg.make_block();
    func.layout.append_block(b0);
    let (i_a, _a) = func.dfg.make_op("a", cls, &[]);
    func.layout.append_inst(i_a, b0);

    let opts = ChordalOptions::default();
    let err = Context::new()
        .run(&mut func, &reginfo, &opts, &mut TrivialSelector)
        .unwrap_err();
    assert_eq!(err, RegallocError::EmptyRegisterClass { class: "flags" });
}
