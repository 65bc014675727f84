//! Register allocator context.
//!
//! The `Context` struct owns the analysis data structures that should be
//! preserved across invocations of the allocator. Nothing is carried over
//! between functions; reusing the context merely avoids reallocating the
//! analyses for every function being compiled.

use crate::dominator_tree::{DominatorTree, DominatorTreePreorder};
use crate::dump::ChordalOptions;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::Function;
use crate::regalloc::{chordal_color, schedule_graph, spill_belady, Liveness, Selector};
use crate::registers::{RegClassIndex, RegInfo};
use crate::result::RegallocResult;

/// Persistent memory allocations for register allocation.
pub struct Context {
    cfg: ControlFlowGraph,
    domtree: DominatorTree,
    dtpo: DominatorTreePreorder,
    liveness: Liveness,
}

impl Context {
    /// Create a new context for register allocation.
    pub fn new() -> Self {
        Self {
            cfg: ControlFlowGraph::new(),
            domtree: DominatorTree::new(),
            dtpo: DominatorTreePreorder::new(),
            liveness: Liveness::new(),
        }
    }

    /// Clear all data structures in this context.
    pub fn clear(&mut self) {
        self.cfg.clear();
        self.domtree.clear();
        self.liveness.clear();
    }

    /// Current liveness state.
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// The control flow graph of the last processed function.
    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }

    /// The dominator tree of the last processed function.
    pub fn domtree(&self) -> &DominatorTree {
        &self.domtree
    }

    /// Allocate registers in `func`.
    ///
    /// Schedules every block once with `selector`, then runs the Belady
    /// spill chooser followed by the chordal allocator for each register
    /// class in turn. Afterwards every value carries a register of its
    /// class consistent with all operand constraints.
    pub fn run(
        &mut self,
        func: &mut Function,
        reginfo: &RegInfo,
        opts: &ChordalOptions,
        selector: &mut dyn Selector,
    ) -> RegallocResult<()> {
        schedule_graph(func, selector);

        self.cfg.compute(func);
        self.domtree.compute(func, &self.cfg);
        self.dtpo.compute(&self.domtree);

        let classes: Vec<RegClassIndex> = reginfo.classes.keys().collect();
        for class in classes {
            // Spilling inserts instructions but keeps the block structure,
            // so the dominator tree stays valid; liveness does not.
            self.liveness.compute(func, &self.cfg);
            spill_belady(func, class, reginfo, &self.cfg, &self.dtpo, &self.liveness)?;
            chordal_color(
                func,
                class,
                reginfo,
                &self.cfg,
                &self.dtpo,
                &mut self.liveness,
                opts,
            )?;
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
