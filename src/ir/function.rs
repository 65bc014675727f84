//! A function: data flow graph, layout, spill slots and register
//! assignments.

use crate::ir::{Block, DataFlowGraph, Inst, Layout, SpillSlot, Value};
use crate::registers::RegClassIndex;
use crate::write::write_function;
use core::fmt;
use cranelift_entity::{PrimaryMap, SecondaryMap};

/// Per-slot data. Frame offsets are assigned by a later frame layout pass;
/// the allocator only distributes slots.
#[derive(Clone, Debug)]
pub struct SpillSlotData {
    /// The register class of the values stored in this slot.
    pub class: RegClassIndex,
}

/// A function in scheduled SSA form, ready for register allocation.
pub struct Function {
    /// Instructions, values and blocks.
    pub dfg: DataFlowGraph,
    /// Block and instruction order.
    pub layout: Layout,
    /// Spill slots created by the spiller.
    pub slots: PrimaryMap<SpillSlot, SpillSlotData>,
    /// The register assigned to each value, filled in by the allocator and
    /// by pre-assignments.
    pub locations: SecondaryMap<Value, Option<u8>>,
    /// The frame pointer value spills and reloads address through, if the
    /// producer provides one. Typically an ignored value defined by the
    /// entry instruction.
    pub frame_ptr: Option<Value>,
}

impl Function {
    /// Create an empty function.
    pub fn new() -> Self {
        Self {
            dfg: DataFlowGraph::new(),
            layout: Layout::new(),
            slots: PrimaryMap::new(),
            locations: SecondaryMap::new(),
            frame_ptr: None,
        }
    }

    /// Create a new spill slot for values of `class`.
    pub fn make_slot(&mut self, class: RegClassIndex) -> SpillSlot {
        self.slots.push(SpillSlotData { class })
    }

    /// The register assigned to `value`, if any.
    pub fn reg(&self, value: Value) -> Option<u8> {
        self.locations[value]
    }

    /// Assign a register to `value`.
    pub fn set_reg(&mut self, value: Value, reg: u8) {
        self.locations[value] = Some(reg);
    }

    /// Pre-assign a register to `value`. The allocator will keep it and
    /// only check feasibility.
    pub fn set_fixed_reg(&mut self, value: Value, reg: u8) {
        self.dfg.values[value].fixed = Some(reg);
        self.locations[value] = Some(reg);
    }

    /// The pre-assigned register of `value`, if it has one.
    pub fn pre_assigned(&self, value: Value) -> Option<u8> {
        self.dfg.values[value].fixed
    }

    /// The block a laid-out instruction lives in.
    ///
    /// Panics for instructions that are not in the layout; use
    /// `layout.inst_block` to probe.
    pub fn inst_block(&self, inst: Inst) -> Block {
        self.layout.inst_block(inst).expect("instruction not in layout")
    }
}

impl Default for Function {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_function(f, self)
    }
}
