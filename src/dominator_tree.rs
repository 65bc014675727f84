//! A dominator tree represented as mappings of blocks to their immediate
//! dominator, plus a pre-order view used to drive the allocation walks.

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function};
use core::cmp::Ordering;
use core::mem;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::SecondaryMap;

/// RPO numbers are assigned as multiples of `STRIDE` to leave room for
/// local modifications of the tree.
const STRIDE: u32 = 4;

/// Special RPO numbers used during `compute_postorder`.
const DONE: u32 = 1;
const SEEN: u32 = 2;

/// Dominator tree node. We keep one of these per block.
#[derive(Clone, Default)]
struct DomNode {
    /// Number of this block in a reverse post-order traversal of the CFG,
    /// starting from 2. Unreachable blocks get number 0.
    rpo_number: u32,

    /// The immediate dominator of this block. `None` for the entry block
    /// and for unreachable blocks.
    idom: PackedOption<Block>,
}

/// The dominator tree for a single function.
pub struct DominatorTree {
    nodes: SecondaryMap<Block, DomNode>,

    /// CFG post-order of all reachable blocks.
    postorder: Vec<Block>,

    /// Scratch memory used by `compute_postorder()`.
    stack: Vec<Block>,

    valid: bool,
}

impl DominatorTree {
    /// Allocate a new blank dominator tree. Use `compute` to compute the
    /// dominator tree for a function.
    pub fn new() -> Self {
        Self {
            nodes: SecondaryMap::new(),
            postorder: Vec::new(),
            stack: Vec::new(),
            valid: false,
        }
    }

    /// Allocate and compute a dominator tree.
    pub fn with_function(func: &Function, cfg: &ControlFlowGraph) -> Self {
        let mut domtree = Self::new();
        domtree.compute(func, cfg);
        domtree
    }

    /// Reset and compute a CFG post-order and dominator tree.
    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        debug_assert!(cfg.is_valid());
        self.compute_postorder(func, cfg);
        self.compute_domtree(func, cfg);
        self.valid = true;
    }

    /// Clear the data structures used to represent the dominator tree.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.postorder.clear();
        debug_assert!(self.stack.is_empty());
        self.valid = false;
    }

    /// Check if the dominator tree has been computed.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Is `block` reachable from the entry block?
    pub fn is_reachable(&self, block: Block) -> bool {
        self.nodes[block].rpo_number != 0
    }

    /// Get the CFG post-order of blocks that was used to compute the
    /// dominator tree.
    pub fn cfg_postorder(&self) -> &[Block] {
        debug_assert!(self.valid);
        &self.postorder
    }

    /// Returns the immediate dominator of `block`, or `None` for the entry
    /// block and unreachable blocks.
    pub fn idom(&self, block: Block) -> Option<Block> {
        self.nodes[block].idom.into()
    }

    /// Compare two blocks relative to the reverse post-order.
    pub fn rpo_cmp_block(&self, a: Block, b: Block) -> Ordering {
        self.nodes[a].rpo_number.cmp(&self.nodes[b].rpo_number)
    }

    /// Reset all internal data structures and compute a post-order of the
    /// control flow graph.
    fn compute_postorder(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        self.clear();
        self.nodes.resize(func.dfg.num_blocks());

        // Depth-first traversal keeping edges to blocks the first time the
        // source side of the edge is seen. During the traversal only,
        // `rpo_number` holds: 0 = not reached, SEEN = pushed, DONE =
        // successors pushed.
        match func.layout.entry_block() {
            Some(block) => {
                self.stack.push(block);
                self.nodes[block].rpo_number = SEEN;
            }
            None => return,
        }

        while let Some(block) = self.stack.pop() {
            match self.nodes[block].rpo_number {
                SEEN => {
                    // First pop: push back, then push unseen successors so
                    // they complete before this block does.
                    self.nodes[block].rpo_number = DONE;
                    self.stack.push(block);
                    for edge in cfg.succs(block) {
                        let succ = edge.block;
                        if self.nodes[succ].rpo_number == 0 {
                            self.nodes[succ].rpo_number = SEEN;
                            self.stack.push(succ);
                        }
                    }
                }
                DONE => self.postorder.push(block),
                _ => unreachable!(),
            }
        }
    }

    /// Build the dominator tree using Keith D. Cooper's "Simple, Fast
    /// Dominator Algorithm."
    fn compute_domtree(&mut self, func: &Function, _cfg: &ControlFlowGraph) {
        // Iterate over a reverse post-order of the CFG, skipping the entry
        // block.
        let (entry_block, postorder) = match self.postorder.as_slice().split_last() {
            Some((&eb, rest)) => (eb, rest),
            None => return,
        };
        debug_assert_eq!(Some(entry_block), func.layout.entry_block());

        // First pass: assign RPO numbers and initial idom estimates. Due
        // to the nature of the traversal, every block we visit has at
        // least one predecessor that was visited before it.
        self.nodes[entry_block].rpo_number = 2 * STRIDE;
        for (rpo_idx, &block) in postorder.iter().rev().enumerate() {
            // Compute the idom while this block still has its traversal
            // number, so self edges are filtered out.
            let idom = self.compute_idom(func, block).into();
            self.nodes[block] = DomNode {
                idom,
                rpo_number: (rpo_idx as u32 + 3) * STRIDE,
            };
        }

        // Iterate until convergence. Reducible control flow converges
        // after the first pass.
        let mut changed = true;
        while changed {
            changed = false;
            for &block in postorder.iter().rev() {
                let idom = self.compute_idom(func, block).into();
                if self.nodes[block].idom != idom {
                    self.nodes[block].idom = idom;
                    changed = true;
                }
            }
        }
    }

    /// Compute the immediate dominator of `block` from the current idom
    /// states of its reachable, already numbered predecessors.
    fn compute_idom(&self, func: &Function, block: Block) -> Block {
        let mut reachable_preds = func
            .dfg
            .block_preds(block)
            .iter()
            .copied()
            .filter(|&pred| self.nodes[pred].rpo_number > DONE);

        let mut idom = reachable_preds
            .next()
            .expect("block must have one reachable predecessor");

        for pred in reachable_preds {
            idom = self.common_dominator(idom, pred);
        }

        idom
    }

    /// Compute the common dominator of two blocks, both assumed reachable.
    pub fn common_dominator(&self, mut a: Block, mut b: Block) -> Block {
        loop {
            match self.rpo_cmp_block(a, b) {
                Ordering::Less => {
                    b = self.nodes[b].idom.expand().expect("unreachable block?");
                }
                Ordering::Greater => {
                    a = self.nodes[a].idom.expand().expect("unreachable block?");
                }
                Ordering::Equal => return a,
            }
        }
    }
}

impl Default for DominatorTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-order information computed from a dominator tree.
///
/// Provides a forward traversable dominator tree, the pre-order of blocks
/// that drives all allocation walks, and constant time dominance checks at
/// block granularity.
pub struct DominatorTreePreorder {
    nodes: SecondaryMap<Block, ExtraNode>,

    /// Blocks in dominator tree pre-order.
    preorder: Vec<Block>,

    /// Scratch memory used by `compute()`.
    stack: Vec<Block>,
}

#[derive(Default, Clone)]
struct ExtraNode {
    /// First child node in the domtree.
    child: PackedOption<Block>,

    /// Next sibling node in the domtree, ordered according to the CFG
    /// reverse post-order.
    sibling: PackedOption<Block>,

    /// Sequence number in a pre-order traversal of the dominator tree.
    /// Unreachable blocks have number 0, the entry block is 1.
    pre_number: u32,

    /// Maximum `pre_number` in the sub-tree rooted at this node.
    pre_max: u32,
}

impl DominatorTreePreorder {
    /// Create a new blank `DominatorTreePreorder`.
    pub fn new() -> Self {
        Self {
            nodes: SecondaryMap::new(),
            preorder: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Recompute this data structure to match `domtree`.
    pub fn compute(&mut self, domtree: &DominatorTree) {
        self.nodes.clear();
        self.preorder.clear();
        debug_assert_eq!(self.stack.len(), 0);

        // Step 1: Populate the child and sibling links. Following the CFG
        // post-order and pushing to the front of the lists gives sibling
        // lists ordered according to the CFG reverse post-order.
        for &block in domtree.cfg_postorder() {
            if let Some(idom) = domtree.idom(block) {
                let sib = mem::replace(&mut self.nodes[idom].child, block.into());
                self.nodes[block].sibling = sib;
            } else {
                // The only block without an immediate dominator is the
                // entry.
                self.stack.push(block);
            }
        }

        // Step 2: Assign pre-order numbers from a DFS of the dominator
        // tree and record the traversal itself.
        debug_assert!(self.stack.len() <= 1);
        let mut n = 0;
        while let Some(block) = self.stack.pop() {
            n += 1;
            let node = &mut self.nodes[block];
            node.pre_number = n;
            node.pre_max = n;
            self.preorder.push(block);
            if let Some(n) = node.sibling.expand() {
                self.stack.push(n);
            }
            if let Some(n) = node.child.expand() {
                self.stack.push(n);
            }
        }

        // Step 3: Propagate the `pre_max` numbers up the tree. The CFG
        // post-order is topologically ordered w.r.t. dominance, so a block
        // comes after all its dominator tree children.
        for &block in domtree.cfg_postorder() {
            if let Some(idom) = domtree.idom(block) {
                let pre_max = self.nodes[block].pre_max.max(self.nodes[idom].pre_max);
                self.nodes[idom].pre_max = pre_max;
            }
        }
    }

    /// The reachable blocks in dominator tree pre-order. A block is
    /// visited after its immediate dominator; this is the order every
    /// allocation walk uses.
    pub fn blocks(&self) -> &[Block] {
        &self.preorder
    }

    /// Get an iterator over the direct children of `block` in the
    /// dominator tree, ordered according to the CFG reverse post-order.
    pub fn children(&self, block: Block) -> ChildIter {
        ChildIter {
            dtpo: self,
            next: self.nodes[block].child,
        }
    }

    /// Fast, constant time dominance check with block granularity. A block
    /// is considered to dominate itself.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        let na = &self.nodes[a];
        let nb = &self.nodes[b];
        na.pre_number <= nb.pre_number && na.pre_max >= nb.pre_max
    }

    /// Compare two blocks according to the dominator pre-order.
    pub fn pre_cmp_block(&self, a: Block, b: Block) -> Ordering {
        self.nodes[a].pre_number.cmp(&self.nodes[b].pre_number)
    }
}

impl Default for DominatorTreePreorder {
    fn default() -> Self {
        Self::new()
    }
}

/// An iterator that enumerates the direct children of a block in the
/// dominator tree.
pub struct ChildIter<'a> {
    dtpo: &'a DominatorTreePreorder,
    next: PackedOption<Block>,
}

impl<'a> Iterator for ChildIter<'a> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let n = self.next.expand();
        if let Some(block) = n {
            self.next = self.dtpo.nodes[block].sibling;
        }
        n
    }
}
