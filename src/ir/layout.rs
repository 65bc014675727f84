//! Function layout.
//!
//! The `Layout` determines the order of blocks in a function and the order
//! of instructions within each block, i.e. the schedule the allocation
//! passes operate on. It contains no instruction definitions, only linked
//! list nodes keyed by the `Inst` and `Block` entities.
//!
//! Instructions carry BASIC-style sequence numbers (10, 20, 30, ...) so
//! that the relative program order of two instructions in the same block
//! is a constant-time comparison. Inserting in the middle picks a midpoint
//! number; when the gap is exhausted the block is renumbered.

use crate::ir::{Block, Inst};
use core::cmp::Ordering;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::SecondaryMap;

/// Initial stride between instruction sequence numbers.
const MAJOR_STRIDE: u32 = 10;

#[derive(Clone, Default)]
struct BlockNode {
    prev: PackedOption<Block>,
    next: PackedOption<Block>,
    first_inst: PackedOption<Inst>,
    last_inst: PackedOption<Inst>,
    inserted: bool,
}

#[derive(Clone, Default)]
struct InstNode {
    block: PackedOption<Block>,
    prev: PackedOption<Inst>,
    next: PackedOption<Inst>,
    seq: u32,
}

/// Block and instruction ordering of one function.
#[derive(Clone)]
pub struct Layout {
    blocks: SecondaryMap<Block, BlockNode>,
    insts: SecondaryMap<Inst, InstNode>,
    first_block: Option<Block>,
    last_block: Option<Block>,
}

impl Layout {
    /// Create an empty layout.
    pub fn new() -> Self {
        Self {
            blocks: SecondaryMap::new(),
            insts: SecondaryMap::new(),
            first_block: None,
            last_block: None,
        }
    }

    // Block order.

    /// Append `block` to the end of the function.
    pub fn append_block(&mut self, block: Block) {
        debug_assert!(!self.blocks[block].inserted, "block already in layout");
        self.blocks[block].inserted = true;
        self.blocks[block].prev = self.last_block.into();
        self.blocks[block].next = None.into();
        match self.last_block {
            Some(last) => self.blocks[last].next = block.into(),
            None => self.first_block = Some(block),
        }
        self.last_block = Some(block);
    }

    /// The entry block: the first block in the layout.
    pub fn entry_block(&self) -> Option<Block> {
        self.first_block
    }

    /// Iterate over the blocks in layout order.
    pub fn blocks(&self) -> Blocks {
        Blocks {
            layout: self,
            next: self.first_block,
        }
    }

    // Instruction order.

    /// The block containing `inst`, if it has been laid out.
    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.insts[inst].block.expand()
    }

    /// The first instruction of `block`.
    pub fn first_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].first_inst.expand()
    }

    /// The last instruction of `block`.
    pub fn last_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].last_inst.expand()
    }

    /// The instruction following `inst` in its block.
    pub fn next_inst(&self, inst: Inst) -> Option<Inst> {
        self.insts[inst].next.expand()
    }

    /// The instruction preceding `inst` in its block.
    pub fn prev_inst(&self, inst: Inst) -> Option<Inst> {
        self.insts[inst].prev.expand()
    }

    /// Iterate over the instructions of `block` in schedule order.
    pub fn block_insts(&self, block: Block) -> Insts {
        Insts {
            layout: self,
            next: self.first_inst(block),
        }
    }

    /// Append `inst` to the end of `block`.
    pub fn append_inst(&mut self, inst: Inst, block: Block) {
        debug_assert!(self.inst_block(inst).is_none(), "instruction already in layout");
        let seq = match self.blocks[block].last_inst.expand() {
            Some(last) => self.insts[last].seq.saturating_add(MAJOR_STRIDE),
            None => MAJOR_STRIDE,
        };
        let last = self.blocks[block].last_inst;
        self.insts[inst] = InstNode {
            block: block.into(),
            prev: last,
            next: None.into(),
            seq,
        };
        match last.expand() {
            Some(last) => self.insts[last].next = inst.into(),
            None => self.blocks[block].first_inst = inst.into(),
        }
        self.blocks[block].last_inst = inst.into();
        if seq == u32::MAX {
            self.renumber_block(block);
        }
    }

    /// Insert `inst` just before `anchor`, in the anchor's block.
    pub fn insert_before(&mut self, inst: Inst, anchor: Inst) {
        debug_assert!(self.inst_block(inst).is_none(), "instruction already in layout");
        let block = self.inst_block(anchor).expect("anchor not in layout");
        let prev = self.insts[anchor].prev;
        self.insts[inst] = InstNode {
            block: block.into(),
            prev,
            next: anchor.into(),
            seq: 0,
        };
        self.insts[anchor].prev = inst.into();
        match prev.expand() {
            Some(prev) => self.insts[prev].next = inst.into(),
            None => self.blocks[block].first_inst = inst.into(),
        }
        self.assign_midpoint_seq(inst, block);
    }

    /// Insert `inst` just after `anchor`, in the anchor's block.
    pub fn insert_after(&mut self, inst: Inst, anchor: Inst) {
        debug_assert!(self.inst_block(inst).is_none(), "instruction already in layout");
        let block = self.inst_block(anchor).expect("anchor not in layout");
        let next = self.insts[anchor].next;
        self.insts[inst] = InstNode {
            block: block.into(),
            prev: anchor.into(),
            next,
            seq: 0,
        };
        self.insts[anchor].next = inst.into();
        match next.expand() {
            Some(next) => self.insts[next].prev = inst.into(),
            None => self.blocks[block].last_inst = inst.into(),
        }
        self.assign_midpoint_seq(inst, block);
    }

    /// Remove `inst` from its block. The instruction itself stays in the
    /// data flow graph and may be re-inserted.
    pub fn remove_inst(&mut self, inst: Inst) {
        let block = self.inst_block(inst).expect("instruction not in layout");
        let prev = self.insts[inst].prev;
        let next = self.insts[inst].next;
        match prev.expand() {
            Some(prev) => self.insts[prev].next = next,
            None => self.blocks[block].first_inst = next,
        }
        match next.expand() {
            Some(next) => self.insts[next].prev = prev,
            None => self.blocks[block].last_inst = prev,
        }
        self.insts[inst] = InstNode::default();
    }

    /// Compare the schedule positions of two instructions in the same
    /// block.
    pub fn cmp(&self, a: Inst, b: Inst) -> Ordering {
        debug_assert_eq!(
            self.inst_block(a),
            self.inst_block(b),
            "program order comparison across blocks"
        );
        self.insts[a].seq.cmp(&self.insts[b].seq)
    }

    /// Pick a sequence number between the neighbours of a freshly linked
    /// instruction, renumbering the block when the gap is exhausted.
    fn assign_midpoint_seq(&mut self, inst: Inst, block: Block) {
        let lo = match self.insts[inst].prev.expand() {
            Some(prev) => self.insts[prev].seq,
            None => 0,
        };
        let hi = match self.insts[inst].next.expand() {
            Some(next) => self.insts[next].seq,
            None => lo.saturating_add(2 * MAJOR_STRIDE),
        };
        debug_assert!(lo < hi);
        let mid = lo + (hi - lo) / 2;
        if mid > lo && mid < hi {
            self.insts[inst].seq = mid;
        } else {
            self.renumber_block(block);
        }
    }

    /// Reassign fresh sequence numbers to every instruction of `block`.
    fn renumber_block(&mut self, block: Block) {
        let mut seq = MAJOR_STRIDE;
        let mut next = self.blocks[block].first_inst.expand();
        while let Some(inst) = next {
            self.insts[inst].seq = seq;
            seq += MAJOR_STRIDE;
            next = self.insts[inst].next.expand();
        }
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the blocks of a layout.
pub struct Blocks<'a> {
    layout: &'a Layout,
    next: Option<Block>,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let block = self.next?;
        self.next = self.layout.blocks[block].next.expand();
        Some(block)
    }
}

/// Iterator over the instructions of one block in schedule order.
pub struct Insts<'a> {
    layout: &'a Layout,
    next: Option<Inst>,
}

impl<'a> Iterator for Insts<'a> {
    type Item = Inst;

    fn next(&mut self) -> Option<Inst> {
        let inst = self.next?;
        self.next = self.layout.insts[inst].next.expand();
        Some(inst)
    }
}
