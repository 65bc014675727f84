//! Chordal graph coloring.
//!
//! SSA interference graphs are chordal: the definitions of a block, read
//! back to front and preceded by the block's live-ins, form a perfect
//! elimination order. Walking the dominator tree in pre-order and
//! assigning the lowest free register to every definition is therefore an
//! optimal coloring; a conflict is impossible as long as the program is
//! register pressure faithful, which the spilling pass established.

use crate::dominator_tree::DominatorTreePreorder;
use crate::dump::{ChordalOptions, DumpFlags};
use crate::flowgraph::ControlFlowGraph;
use crate::fx::FxHashSet;
use crate::ir::{Block, Function, InstKind, Value};
use crate::regalloc::constraints::handle_block_constraints;
use crate::regalloc::Liveness;
use crate::registers::{RegClassIndex, RegInfo, RegMask};
use crate::result::{RegallocError, RegallocResult};
use cranelift_entity::EntityRef;
use log::{debug, trace};

/// Shared state of the two allocator sub-phases.
pub(crate) struct ChordalEnv<'a> {
    pub func: &'a mut Function,
    pub reginfo: &'a RegInfo,
    pub class: RegClassIndex,
    pub allocatable: RegMask,
    pub cfg: &'a ControlFlowGraph,
    pub dtpo: &'a DominatorTreePreorder,
    pub liveness: &'a mut Liveness,
    pub opts: &'a ChordalOptions,
    /// Set when a live range was split and the liveness no longer matches
    /// the program.
    pub liveness_dirty: bool,
}

/// Assign a register to every value of `class`.
///
/// Runs the constraint handling sub-pass (which may splice `Perm` and
/// `Copy` instructions into the schedule), then colors the program along
/// the perfect elimination order. Must be called after
/// [`spill_belady`](crate::regalloc::spill_belady) for the same class.
pub fn chordal_color(
    func: &mut Function,
    class: RegClassIndex,
    reginfo: &RegInfo,
    cfg: &ControlFlowGraph,
    dtpo: &DominatorTreePreorder,
    liveness: &mut Liveness,
    opts: &ChordalOptions,
) -> RegallocResult<()> {
    let data = &reginfo.classes[class];
    debug!("chordal coloring, class {}", data.name);

    liveness.compute(func, cfg);
    crate::dump::dump_function(opts, DumpFlags::SPLIT, data.name, "split", func);

    let mut env = ChordalEnv {
        func,
        reginfo,
        class,
        allocatable: data.allocatable,
        cfg,
        dtpo,
        liveness,
        opts,
        liveness_dirty: false,
    };

    // Handle register targeting constraints.
    for &block in dtpo.blocks() {
        handle_block_constraints(&mut env, block)?;
    }
    crate::dump::dump_function(opts, DumpFlags::CONSTR, data.name, "constr", env.func);

    // The constraint phase moved live ranges around; the coloring walk
    // needs exact borders.
    env.liveness.compute(env.func, env.cfg);

    for &block in dtpo.blocks() {
        assign(&mut env, block)?;
    }

    crate::dump::dump_intervals(env.opts, data.name, env.func, env.liveness, env.dtpo, env.class);
    Ok(())
}

/// Color one block: mark the registers of the live-ins as occupied, then
/// walk the border list. Uses free their register, definitions take the
/// lowest free one; pre-assigned definitions only assert feasibility.
fn assign(env: &mut ChordalEnv, block: Block) -> RegallocResult<()> {
    let class_name = env.reginfo.classes[env.class].name;
    let mut colors = RegMask::EMPTY;
    let mut live: FxHashSet<Value> = FxHashSet::default();
    debug!("assigning colors for {}", block);

    // The dominators were allocated before us, so every live-in value
    // already has its register; it only has to be marked occupied.
    let mut live_ins: Vec<Value> = env
        .liveness
        .live_in(block)
        .iter()
        .copied()
        .filter(|&v| env.func.dfg.consider_in_alloc(v, env.class))
        .collect();
    live_ins.sort_unstable_by_key(|v| v.index());
    for v in live_ins {
        let reg = match env.func.reg(v) {
            Some(reg) => reg,
            None => {
                // Floating placeholders have no defining walk that could
                // have colored them; give them a register at first sight.
                let def = env.func.dfg.value_def(v);
                assert!(
                    matches!(env.func.dfg.insts[def].kind, InstKind::Unknown),
                    "live-in {} has no register",
                    v
                );
                let reg = colors.complement_in(env.allocatable).first().ok_or(
                    RegallocError::OutOfRegisters {
                        value: v,
                        class: class_name,
                    },
                )?;
                env.func.set_reg(v, reg);
                reg
            }
        };
        colors.set(reg);
        live.insert(v);
    }

    // The definitions from back to front form a perfect elimination
    // order, so coloring them front to back cannot conflict.
    for border in env.liveness.border_list(env.func, block, env.class) {
        let v = border.value;
        if !border.is_def {
            let reg = env.func.reg(v).expect("use of an uncolored value");
            colors.clear(reg);
            live.remove(&v);
        } else if !env.liveness.is_live_in(block, v) {
            let reg = match env.func.reg(v) {
                Some(reg) => {
                    // Pre-colored, either by hand or by the constraint
                    // phase; it must still be available.
                    if colors.contains(reg) {
                        return Err(RegallocError::PreColoredConflict {
                            value: v,
                            reg,
                            class: class_name,
                        });
                    }
                    reg
                }
                None => {
                    let reg = colors.complement_in(env.allocatable).first().ok_or(
                        RegallocError::OutOfRegisters {
                            value: v,
                            class: class_name,
                        },
                    )?;
                    env.func.set_reg(v, reg);
                    reg
                }
            };
            colors.set(reg);
            trace!("  {} -> r{}", v, reg);
            debug_assert!(!live.contains(&v), "definition encountered twice");
            live.insert(v);
        }
    }
    Ok(())
}
