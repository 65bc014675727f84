//! A control flow graph represented as per-block successor lists.
//!
//! Predecessors are stored in the data flow graph itself, because phi
//! arguments and spill edge indices are defined in terms of the
//! predecessor order. The `ControlFlowGraph` only derives the inverse
//! direction: for every block, the blocks it feeds and the edge index it
//! occupies in each of them.

use crate::ir::{Block, Function};
use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;

/// One outgoing edge: the successor block and the index this edge has in
/// the successor's predecessor list (and thus in its phis).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuccEdge {
    /// The successor block.
    pub block: Block,
    /// The edge index in the successor's predecessor vector.
    pub pred_idx: u32,
}

/// The control flow graph of a function.
pub struct ControlFlowGraph {
    succs: SecondaryMap<Block, SmallVec<[SuccEdge; 4]>>,
    valid: bool,
}

impl ControlFlowGraph {
    /// Allocate a new blank control flow graph.
    pub fn new() -> Self {
        Self {
            succs: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Allocate and compute the control flow graph of `func`.
    pub fn with_function(func: &Function) -> Self {
        let mut cfg = Self::new();
        cfg.compute(func);
        cfg
    }

    /// Clear all data structures in this control flow graph.
    pub fn clear(&mut self) {
        self.succs.clear();
        self.valid = false;
    }

    /// Compute the control flow graph of `func`, overwriting any previous
    /// contents.
    pub fn compute(&mut self, func: &Function) {
        self.clear();
        self.succs.resize(func.dfg.num_blocks());
        for block in func.layout.blocks() {
            for (idx, &pred) in func.dfg.block_preds(block).iter().enumerate() {
                self.succs[pred].push(SuccEdge {
                    block,
                    pred_idx: idx as u32,
                });
            }
        }
        self.valid = true;
    }

    /// The outgoing edges of `block`.
    pub fn succs(&self, block: Block) -> &[SuccEdge] {
        debug_assert!(self.valid);
        &self.succs[block]
    }

    /// Check if the control flow graph has been computed.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}
