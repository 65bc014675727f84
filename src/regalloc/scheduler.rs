//! List scheduling with pluggable node selectors.
//!
//! Each block's instructions form a DAG of data dependencies. The
//! scheduler rebuilds the block's schedule from a ready set: an
//! instruction becomes ready once all of its operands defined in the same
//! block are scheduled. Phis only move data across edges and are scheduled
//! immediately, the entry pseudo instruction always comes first, and keep
//! markers as well as projections are taken as soon as they are ready so
//! they stay adjacent to their operands. All remaining choice is delegated
//! to a [`Selector`].

use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Block, Function, Inst, InstKind, Value};
use cranelift_entity::SecondaryMap;
use log::{debug, trace};

/// A scheduling policy.
///
/// The scheduler tells the selector about every instruction that becomes
/// ready and about every final choice; `select` must return one member of
/// `ready`. Selectors are plain values and may carry their own state.
pub trait Selector {
    /// Called once before the first block of a function is scheduled.
    fn init_graph(&mut self, _func: &Function) {}

    /// Called before scheduling of `block` begins.
    fn init_block(&mut self, _func: &Function, _block: Block) {}

    /// `node` just became ready; `pred` is the scheduled instruction that
    /// unlocked it, if any.
    fn node_ready(&mut self, _func: &Function, _node: Inst, _pred: Option<Inst>) {}

    /// Pick the next instruction to schedule out of `ready`. `live` holds
    /// the instructions whose results are live at the current schedule
    /// position.
    fn select(&mut self, func: &Function, ready: &[Inst], live: &FxHashSet<Inst>) -> Inst;

    /// `node` was scheduled.
    fn node_selected(&mut self, _func: &Function, _node: Inst) {}

    /// Called after the schedule of `block` is complete.
    fn finish_block(&mut self, _func: &Function, _block: Block) {}

    /// Called once after the whole function is scheduled.
    fn finish_graph(&mut self, _func: &Function) {}
}

/// Rebuild the schedule of every block of `func`.
///
/// Use counts are recomputed from the instruction arguments on every run,
/// so the pass may be repeated after IR surgery; with a deterministic
/// selector, rescheduling an already scheduled function reproduces the
/// same order.
pub fn schedule_graph(func: &mut Function, selector: &mut dyn Selector) {
    // The number of argument references to each instruction's results
    // (projections count towards their tuple instruction), across all
    // blocks. Values that stay in use after the block end keep their
    // definition live until the end of its block.
    let mut global_users: SecondaryMap<Inst, u32> = SecondaryMap::new();
    let blocks: Vec<Block> = func.layout.blocks().collect();
    for &block in &blocks {
        for inst in func.layout.block_insts(block) {
            if func.dfg.insts[inst].kind.is_proj() {
                continue;
            }
            for &arg in func.dfg.args(inst) {
                let owner = sched_owner(func, func.dfg.value_def(arg));
                global_users[owner] += 1;
            }
        }
    }

    selector.init_graph(func);
    for &block in &blocks {
        schedule_block(func, selector, block, &global_users);
    }
    selector.finish_graph(func);
}

/// The instruction that carries scheduling liveness for `inst`:
/// projections delegate to the instruction producing their tuple.
fn sched_owner(func: &Function, inst: Inst) -> Inst {
    if func.dfg.insts[inst].kind.is_proj() {
        func.dfg.value_def(func.dfg.args(inst)[0])
    } else {
        inst
    }
}

struct BlockScheduler<'a, 's> {
    func: &'a mut Function,
    selector: &'s mut dyn Selector,
    block: Block,
    /// All instructions of the block before rescheduling.
    members: FxHashSet<Inst>,
    /// In-block users of each member, in member order.
    users: FxHashMap<Inst, Vec<Inst>>,
    /// Instructions scheduled so far.
    scheduled: FxHashSet<Inst>,
    /// The candidate set the selector picks from.
    ready: Vec<Inst>,
    /// Simple liveness during scheduling: instructions with unscheduled
    /// users.
    live: FxHashSet<Inst>,
    /// Remaining user counts for the members of `live`.
    users_left: FxHashMap<Inst, i32>,
    global_users: &'a SecondaryMap<Inst, u32>,
}

fn schedule_block(
    func: &mut Function,
    selector: &mut dyn Selector,
    block: Block,
    global_users: &SecondaryMap<Inst, u32>,
) {
    let order: Vec<Inst> = func.layout.block_insts(block).collect();
    debug!("scheduling {} with {} instructions", block, order.len());

    // In-block user lists, in deterministic member order.
    let members: FxHashSet<Inst> = order.iter().copied().collect();
    let mut users: FxHashMap<Inst, Vec<Inst>> = FxHashMap::default();
    for &inst in &order {
        if func.dfg.insts[inst].kind.is_phi() {
            continue;
        }
        for &arg in func.dfg.args(inst) {
            let def = func.dfg.value_def(arg);
            if members.contains(&def) {
                users.entry(def).or_default().push(inst);
            }
        }
    }

    // Empty the block; the schedule is rebuilt by appending.
    for &inst in &order {
        func.layout.remove_inst(inst);
    }

    let mut sched = BlockScheduler {
        func,
        selector,
        block,
        members,
        users,
        scheduled: FxHashSet::default(),
        ready: Vec::new(),
        live: FxHashSet::default(),
        users_left: FxHashMap::default(),
        global_users,
    };
    sched.selector.init_block(sched.func, block);

    // The entry pseudo instruction is scheduled first, phis immediately
    // afterwards: they only transfer data flow from the predecessors.
    for &inst in &order {
        if matches!(sched.func.dfg.insts[inst].kind, InstKind::Start) {
            sched.add_to_sched(inst);
        }
    }
    for &inst in &order {
        if sched.func.dfg.insts[inst].kind.is_phi() {
            sched.add_to_sched(inst);
        }
    }

    // Instructions whose operands all live in other blocks are ready from
    // the start; each such operand increases register pressure here.
    for &inst in &order {
        if sched.scheduled.contains(&inst) || sched.ready.contains(&inst) {
            continue;
        }
        let mut all_foreign = true;
        for &arg in sched.func.dfg.args(inst) {
            let def = sched.func.dfg.value_def(arg);
            if sched.members.contains(&def) {
                all_foreign = false;
                break;
            }
        }
        if all_foreign {
            for idx in 0..sched.func.dfg.args(inst).len() {
                let arg = sched.func.dfg.args(inst)[idx];
                let owner = sched_owner(sched.func, sched.func.dfg.value_def(arg));
                sched.live.insert(owner);
            }
            sched.make_ready(None, inst);
        }
    }

    // Drain the ready set. Projections and keep markers are grabbed
    // before the selector sees anything.
    while !sched.ready.is_empty() {
        let forced = sched.ready.iter().copied().find(|&inst| {
            let kind = &sched.func.dfg.insts[inst].kind;
            kind.is_proj() || kind.must_stay_adjacent()
        });
        let pick = match forced {
            Some(inst) => inst,
            None => {
                let choice = sched.selector.select(sched.func, &sched.ready, &sched.live);
                debug_assert!(sched.ready.contains(&choice), "selector returned a non-ready node");
                choice
            }
        };
        trace!("    picked {}", pick);
        sched.add_to_sched(pick);
    }

    debug_assert_eq!(
        sched.scheduled.len(),
        order.len(),
        "dependency cycle in block {}",
        block
    );
    sched.selector.finish_block(sched.func, block);
}

impl<'a, 's> BlockScheduler<'a, 's> {
    /// Append `inst` to the schedule, maintain scheduling liveness, and
    /// promote any users that just became ready.
    fn add_to_sched(&mut self, inst: Inst) {
        if self.func.dfg.insts[inst].kind.appears_in_schedule() {
            self.update_liveness(inst);
            self.func.layout.append_inst(inst, self.block);
            if let Some(pos) = self.ready.iter().position(|&r| r == inst) {
                self.ready.remove(pos);
            }
        }
        self.selector.node_selected(self.func, inst);
        self.scheduled.insert(inst);
        self.make_users_ready(inst);
    }

    /// Scheduling `inst` consumes one pending use of each of its operands
    /// and makes its own results live. Cross-block users keep a value live
    /// until the block ends, which is exactly the register pressure they
    /// cause.
    fn update_liveness(&mut self, inst: Inst) {
        if self.func.dfg.insts[inst].kind.is_proj() {
            return;
        }
        for idx in 0..self.func.dfg.args(inst).len() {
            let arg = self.func.dfg.args(inst)[idx];
            let owner = sched_owner(self.func, self.func.dfg.value_def(arg));
            if self.live.contains(&owner) {
                let left = self.users_left.entry(owner).or_insert(0);
                *left -= 1;
                if *left <= 0 {
                    self.live.remove(&owner);
                }
            }
        }
        let total = self.global_users[inst] as i32;
        if total > 0 {
            self.users_left.insert(inst, total);
            self.live.insert(inst);
        }
    }

    fn make_users_ready(&mut self, inst: Inst) {
        let users = match self.users.get(&inst) {
            Some(users) => users.clone(),
            None => return,
        };
        for user in users {
            self.make_ready(Some(inst), user);
        }
    }

    /// Try to put `user` into the ready set; it must live in this block
    /// and all of its in-block operands must be scheduled.
    fn make_ready(&mut self, pred: Option<Inst>, user: Inst) {
        if self.scheduled.contains(&user) || self.ready.contains(&user) {
            return;
        }
        if self.func.dfg.insts[user].kind.is_phi() {
            return;
        }
        for &arg in self.func.dfg.args(user) {
            let def = self.func.dfg.value_def(arg);
            if self.members.contains(&def) && !self.scheduled.contains(&def) {
                return;
            }
        }
        trace!("    ready: {}", user);
        self.ready.push(user);
        self.selector.node_ready(self.func, user, pred);
    }
}

/// The simplest deterministic policy: always take the instruction that has
/// been ready the longest.
pub struct TrivialSelector;

impl Selector for TrivialSelector {
    fn select(&mut self, _func: &Function, ready: &[Inst], _live: &FxHashSet<Inst>) -> Inst {
        ready[0]
    }
}

/// A policy that keeps register pressure down: prefer instructions that
/// release more operands than they define.
pub struct RegPressureSelector;

impl RegPressureSelector {
    fn benefit(func: &Function, live: &FxHashSet<Inst>, inst: Inst) -> i32 {
        let mut freed = 0;
        let mut seen: Vec<Value> = Vec::new();
        for &arg in func.dfg.args(inst) {
            if seen.contains(&arg) {
                continue;
            }
            seen.push(arg);
            let owner = sched_owner(func, func.dfg.value_def(arg));
            if live.contains(&owner) {
                freed += 1;
            }
        }
        let defines = if func.dfg.inst_results(inst).is_empty() {
            0
        } else {
            1
        };
        freed - defines
    }
}

impl Selector for RegPressureSelector {
    fn select(&mut self, func: &Function, ready: &[Inst], live: &FxHashSet<Inst>) -> Inst {
        let mut best = ready[0];
        let mut best_benefit = Self::benefit(func, live, best);
        for &cand in &ready[1..] {
            let benefit = Self::benefit(func, live, cand);
            if benefit > best_benefit {
                best = cand;
                best_benefit = benefit;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::ControlFlowGraph;
    use crate::regalloc::Liveness;
    use crate::registers::RegInfo;

    /// Build a block whose layout order violates the data dependencies and
    /// check that scheduling repairs it.
    #[test]
    fn repairs_dependency_order() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 4);

        let mut func = Function::new();
        let b0 = func.dfg.make_block();
        func.layout.append_block(b0);
        let (i_a, a) = func.dfg.make_op("a", gpr, &[]);
        let (i_b, b) = func.dfg.make_op("b", gpr, &[a]);
        let (i_c, _) = func.dfg.make_op("c", gpr, &[a, b]);
        // Deliberately append in a wrong order.
        func.layout.append_inst(i_c, b0);
        func.layout.append_inst(i_b, b0);
        func.layout.append_inst(i_a, b0);

        schedule_graph(&mut func, &mut TrivialSelector);
        let order: Vec<Inst> = func.layout.block_insts(b0).collect();
        assert_eq!(order, vec![i_a, i_b, i_c]);
    }

    #[test]
    fn start_and_phis_first_keeps_adjacent() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 4);

        let mut func = Function::new();
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        func.dfg.append_pred(b1, b0);
        func.layout.append_block(b0);
        func.layout.append_block(b1);

        let start = func.dfg.make_start();
        let p0 = func.dfg.append_result(start, crate::registers::RegReq::class(gpr));
        let (i_x, x) = func.dfg.make_op("x", gpr, &[p0]);
        let keep = func.dfg.make_keep(&[x]);
        let (i_j, _) = func.dfg.make_op("jmp", gpr, &[]);
        // Shuffled layout; keep must end up right behind its operand.
        func.layout.append_inst(keep, b0);
        func.layout.append_inst(i_j, b0);
        func.layout.append_inst(i_x, b0);
        func.layout.append_inst(start, b0);

        let (i_p, pv) = func.dfg.make_phi(gpr, &[x]);
        let (i_u, _) = func.dfg.make_op("use", gpr, &[pv]);
        func.layout.append_inst(i_u, b1);
        func.layout.append_inst(i_p, b1);

        schedule_graph(&mut func, &mut TrivialSelector);

        let order0: Vec<Inst> = func.layout.block_insts(b0).collect();
        assert_eq!(order0[0], start);
        let x_pos = order0.iter().position(|&i| i == i_x).unwrap();
        assert_eq!(order0[x_pos + 1], keep);

        let order1: Vec<Inst> = func.layout.block_insts(b1).collect();
        assert_eq!(order1, vec![i_p, i_u]);
    }

    #[test]
    fn deterministic_and_idempotent() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 4);

        let mut func = Function::new();
        let b0 = func.dfg.make_block();
        func.layout.append_block(b0);
        let (i0, a) = func.dfg.make_op("a", gpr, &[]);
        let (i1, b) = func.dfg.make_op("b", gpr, &[]);
        let (i2, c) = func.dfg.make_op("c", gpr, &[a, b]);
        let (i3, _) = func.dfg.make_op("d", gpr, &[c, a]);
        for i in [i0, i1, i2, i3] {
            func.layout.append_inst(i, b0);
        }

        schedule_graph(&mut func, &mut RegPressureSelector);
        let first: Vec<Inst> = func.layout.block_insts(b0).collect();
        schedule_graph(&mut func, &mut RegPressureSelector);
        let second: Vec<Inst> = func.layout.block_insts(b0).collect();
        assert_eq!(first, second);

        // The result still respects every data dependency.
        let cfg = ControlFlowGraph::with_function(&func);
        let mut liveness = Liveness::new();
        liveness.compute(&func, &cfg);
        for inst in func.layout.block_insts(b0) {
            for &arg in func.dfg.args(inst) {
                let def = func.dfg.value_def(arg);
                assert_eq!(func.layout.cmp(def, inst), core::cmp::Ordering::Less);
            }
        }
    }

    #[test]
    fn tuple_projections_stay_adjacent() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 4);

        let mut func = Function::new();
        let b0 = func.dfg.make_block();
        func.layout.append_block(b0);
        let (i_perm_in0, v0) = func.dfg.make_op("v0", gpr, &[]);
        let (i_perm_in1, v1) = func.dfg.make_op("v1", gpr, &[]);
        let (perm, tuple) = func.dfg.make_perm(gpr, &[v0, v1]);
        let (pj0, w0) = func.dfg.make_proj(tuple, 0, crate::registers::RegReq::class(gpr));
        let (pj1, w1) = func.dfg.make_proj(tuple, 1, crate::registers::RegReq::class(gpr));
        let (i_use, _) = func.dfg.make_op("use", gpr, &[w0, w1]);
        // Interleave other work with the projections in the initial order.
        let (i_pad, _) = func.dfg.make_op("pad", gpr, &[]);
        for i in [i_perm_in0, i_perm_in1, perm, i_pad, pj0, pj1, i_use] {
            func.layout.append_inst(i, b0);
        }

        schedule_graph(&mut func, &mut TrivialSelector);
        let order: Vec<Inst> = func.layout.block_insts(b0).collect();
        let perm_pos = order.iter().position(|&i| i == perm).unwrap();
        assert_eq!(order[perm_pos + 1], pj0);
        assert_eq!(order[perm_pos + 2], pj1);
    }
}
