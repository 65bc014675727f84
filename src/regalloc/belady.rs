//! Belady spill choice.
//!
//! For one register class with `k` allocatable registers, walk the blocks
//! in dominator pre-order keeping a working set of at most `k` resident
//! values. A value that is used while not resident gets a reload; when the
//! set overflows, the values with the farthest next use are evicted.
//! Block boundaries are fixed up afterwards: a value that starts a block
//! resident but does not end some predecessor resident is reloaded on that
//! edge.
//!
//! The walk itself only records decisions in a [`SpillEnv`]; the actual
//! `Spill`/`Reload` instructions are materialised at the very end.

use crate::dominator_tree::DominatorTreePreorder;
use crate::flowgraph::ControlFlowGraph;
use crate::fx::FxHashSet;
use crate::ir::{Block, Function, Inst, InstKind, Value};
use crate::regalloc::spill::{remove_dead_code, SpillEnv};
use crate::regalloc::uses::{Distance, NextUses};
use crate::regalloc::workset::{Loc, Workset};
use crate::regalloc::Liveness;
use crate::registers::{RegClassIndex, RegInfo};
use crate::result::{RegallocError, RegallocResult};
use cranelift_entity::{EntityRef, SecondaryMap};
use log::{debug, trace};
use smallvec::SmallVec;

/// Working sets at the borders of one block.
#[derive(Clone, Default)]
struct BlockInfo {
    ws_start: Option<Workset>,
    ws_end: Option<Workset>,
}

struct Belady<'a> {
    func: &'a Function,
    liveness: &'a Liveness,
    class: RegClassIndex,
    /// Number of allocatable registers of the class.
    k: usize,
    /// The working set of the block currently being walked.
    ws: Workset,
    /// The instruction currently being displaced for.
    instr: Inst,
    /// Step number of `instr` relative to its block start.
    instr_nr: u32,
    /// Values used so far in the current block.
    used: FxHashSet<Value>,
    uses: NextUses<'a>,
    senv: SpillEnv,
    infos: SecondaryMap<Block, BlockInfo>,
}

/// Insert spills and reloads for one register class so that at every
/// program point at most `k` values of the class are live, where `k` is
/// the number of allocatable registers.
///
/// Must run after scheduling and before [`chordal_color`] for the same
/// class. Fails if the class has values but no allocatable registers.
///
/// [`chordal_color`]: crate::regalloc::chordal_color
pub fn spill_belady(
    func: &mut Function,
    class: RegClassIndex,
    reginfo: &RegInfo,
    cfg: &ControlFlowGraph,
    dtpo: &DominatorTreePreorder,
    liveness: &Liveness,
) -> RegallocResult<()> {
    let data = &reginfo.classes[class];
    let k = data.n_allocatable();
    debug!("belady spilling, class {} with {} registers", data.name, k);
    if k == 0 {
        let in_use = func
            .dfg
            .values
            .keys()
            .any(|v| func.dfg.consider_in_alloc(v, class));
        if in_use {
            return Err(RegallocError::EmptyRegisterClass { class: data.name });
        }
        return Ok(());
    }

    let senv = {
        let func_ref: &Function = func;
        let mut env = Belady {
            func: func_ref,
            liveness,
            class,
            k,
            ws: Workset::new(),
            instr: Inst::new(0),
            instr_nr: 0,
            used: FxHashSet::default(),
            uses: NextUses::new(func_ref, cfg, liveness),
            senv: SpillEnv::new(class),
            infos: SecondaryMap::new(),
        };
        for &block in dtpo.blocks() {
            env.process_block(block);
        }
        for &block in dtpo.blocks() {
            env.fix_block_borders(block);
        }
        env.senv
    };

    senv.insert_spills_reloads(func);
    remove_dead_code(func);
    Ok(())
}

impl<'a> Belady<'a> {
    /// Next-use distance as the eviction rank: no-spill values pin at
    /// zero, everything else asks the oracle.
    fn distance(&mut self, from: Inst, step: u32, value: Value, skip_from_uses: bool) -> Distance {
        self.uses.next_use(from, step, value, skip_from_uses)
    }

    /// Is `value` a phi defined in `block`?
    fn is_local_phi(&self, value: Value, block: Block) -> bool {
        self.func.dfg.is_phi(value)
            && self.func.layout.inst_block(self.func.dfg.value_def(value)) == Some(block)
    }

    /// Decide, for each value in `block`, whether it is used from a
    /// register or reloaded before the use.
    fn process_block(&mut self, block: Block) {
        // Don't do a block twice.
        if self.infos[block].ws_end.is_some() {
            return;
        }
        self.compute_start_info(block);

        let start = self.infos[block]
            .ws_start
            .clone()
            .expect("start set just computed");
        self.ws.copy_from(&start);
        debug!("deciding for {}, {} resident at entry", block, self.ws.len());

        self.used.clear();
        self.instr_nr = 0;

        let func = self.func;
        let mut next = func.layout.first_inst(block);
        while let Some(inst) = next {
            next = func.layout.next_inst(inst);
            let kind = &func.dfg.insts[inst].kind;
            // Projections ride with their tuple instruction and phis are
            // no real instructions; the step counter does not advance.
            if kind.is_phi() || kind.is_proj() {
                continue;
            }
            debug_assert!(self.ws.len() <= self.k, "working set overflow");
            self.instr = inst;

            // Make room for everything this instruction uses, reloading
            // what is not resident.
            let mut new_vals = Workset::new();
            for &arg in func.dfg.args(inst) {
                new_vals.insert(func, self.class, arg);
            }
            self.displace(block, &new_vals, true);

            // Then for everything it defines. Tuple results materialise
            // through the projections immediately following in the
            // schedule.
            let mut new_vals = Workset::new();
            let results = func.dfg.inst_results(inst);
            if results.len() == 1 && func.dfg.values[results[0]].is_tuple {
                let mut p = func.layout.next_inst(inst);
                while let Some(proj) = p {
                    if !func.dfg.insts[proj].kind.is_proj() {
                        break;
                    }
                    for &r in func.dfg.inst_results(proj) {
                        new_vals.insert(func, self.class, r);
                    }
                    p = func.layout.next_inst(proj);
                }
            } else {
                for &r in results {
                    new_vals.insert(func, self.class, r);
                }
            }
            self.displace(block, &new_vals, false);

            self.instr_nr += 1;
        }

        self.infos[block].ws_end = Some(self.ws.clone());
    }

    /// Grant that `new_vals` can be held in registers, disposing as few
    /// and as distant other values as possible. For uses (`is_usage`),
    /// missing values are reloaded at the current instruction.
    fn displace(&mut self, block: Block, new_vals: &Workset, is_usage: bool) {
        let func = self.func;

        // 1. Identify the needed slots and the values to reload.
        let mut to_insert: SmallVec<[Value; 8]> = SmallVec::new();
        for loc in new_vals.iter() {
            let val = loc.value;
            if is_usage {
                self.used.insert(val);
            }
            if !self.ws.contains(val) {
                trace!("    insert {}", val);
                to_insert.push(val);
                if is_usage {
                    self.senv.add_reload(val, self.instr);
                }
            } else {
                debug_assert!(is_usage, "defined value already in workset");
                trace!("    skip {}", val);
            }
        }
        let demand = to_insert.len();
        debug_assert!(
            demand <= self.k,
            "one instruction touches more values than the class has registers"
        );

        // 2. Make room for at least `demand` slots.
        let len = self.ws.len();
        let max_allowed = self.k.saturating_sub(demand);
        if len > max_allowed {
            for i in 0..len {
                let val = self.ws.value(i);
                let time = self.distance(self.instr, self.instr_nr, val, !is_usage);
                self.ws.set_time(i, time);
            }
            self.ws.sort();

            // A value disposed before its first use in this block should
            // never have been resident at entry: prune it from the start
            // set, and make pruned phis of this block spill.
            for i in max_allowed..len {
                let val = self.ws.value(i);
                if !self.used.contains(&val) {
                    if let Some(start) = self.infos[block].ws_start.as_mut() {
                        start.remove(val);
                    }
                    if self.is_local_phi(val, block) {
                        self.senv.spill_phi(val);
                    }
                    trace!("    dispose {} dumb", val);
                } else {
                    trace!("    dispose {}", val);
                }
            }
            self.ws.truncate(max_allowed);
        }

        // 3. Insert the new values.
        for val in to_insert {
            self.ws.insert(func, self.class, val);
        }
    }

    /// Compute the working set at the entry of `block`.
    ///
    /// A block with a single predecessor continues with whatever the
    /// predecessor ended with. At joins and at the entry, the candidates
    /// (live-ins plus local phis) with the nearest next uses win; phis
    /// that do not make the cut are marked for spilling so that their
    /// arguments can share one spill slot.
    fn compute_start_info(&mut self, block: Block) {
        if self.infos[block].ws_start.is_some() {
            return;
        }
        let func = self.func;
        let preds = func.dfg.block_preds(block);
        let single_pred = if preds.len() == 1 && Some(block) != func.layout.entry_block() {
            Some(preds[0])
        } else {
            None
        };

        if let Some(pred) = single_pred {
            if self.infos[pred].ws_end.is_none() {
                self.process_block(pred);
            }
            let ws_start = self.infos[pred]
                .ws_end
                .clone()
                .expect("predecessor must have an end set");
            self.infos[block].ws_start = Some(ws_start);
            return;
        }

        let first = func
            .layout
            .first_inst(block)
            .expect("cannot spill for an empty block");
        let mut starters: Vec<Loc> = Vec::new();

        for inst in func.layout.block_insts(block) {
            if !func.dfg.insts[inst].kind.is_phi() {
                continue;
            }
            for &r in func.dfg.inst_results(inst) {
                if func.dfg.consider_in_alloc(r, self.class) {
                    let time = self.distance(first, 0, r, false);
                    starters.push(Loc { value: r, time });
                }
            }
        }

        let mut live: Vec<Value> = self
            .liveness
            .live_in(block)
            .iter()
            .copied()
            .filter(|&v| func.dfg.consider_in_alloc(v, self.class))
            .collect();
        live.sort_unstable_by_key(|v| v.index());
        for v in live {
            let time = self.distance(first, 0, v, false);
            starters.push(Loc { value: v, time });
        }

        starters.sort_by_key(|loc| (loc.time, loc.value.index()));
        let take = starters.len().min(self.k);
        debug!(
            "start set for {}: keeping {} of {} candidates",
            block,
            take,
            starters.len()
        );

        let mut ws_start = Workset::new();
        ws_start.bulk_fill(&starters[..take]);
        for loc in &starters[take..] {
            if self.is_local_phi(loc.value, block) {
                self.senv.spill_phi(loc.value);
            }
        }
        self.infos[block].ws_start = Some(ws_start);
    }

    /// The block walk is local and assumes its start set; adapt every
    /// predecessor whose end set disagrees by reloading on the edge.
    fn fix_block_borders(&mut self, block: Block) {
        let func = self.func;
        let start = match self.infos[block].ws_start.clone() {
            Some(start) => start,
            None => return,
        };
        trace!("fixing {}", block);

        for (i, &pred) in func.dfg.block_preds(block).iter().enumerate() {
            let end = match &self.infos[pred].ws_end {
                Some(end) => end,
                None => continue,
            };
            for loc in start.iter() {
                let mut val = loc.value;
                // A phi of this block is satisfied by reloading its
                // argument on the corresponding edge.
                if self.is_local_phi(val, block) {
                    val = func.dfg.args(func.dfg.value_def(val))[i];
                }
                // Unknowns are available everywhere.
                if matches!(func.dfg.insts[func.dfg.value_def(val)].kind, InstKind::Unknown) {
                    continue;
                }
                if !end.contains(val) {
                    trace!("    reload {} on edge {} -> {}", val, pred, block);
                    self.senv.add_reload_on_edge(val, block, i);
                }
            }
        }
    }
}
