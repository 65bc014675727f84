//! Data flow graph: the arenas for instructions, values and blocks, plus
//! the constructors for the backend node family.

use crate::ir::{Block, Inst, InstData, InstKind, SpillSlot, Value};
use crate::registers::{RegClassIndex, RegReq};
use smallvec::{smallvec, SmallVec};

use cranelift_entity::{PrimaryMap, SecondaryMap};

/// Per-value data.
#[derive(Clone, Debug)]
pub struct ValueData {
    /// The output requirement the value was defined with. Its class is the
    /// value's register class; `None` for tuple results.
    pub req: RegReq,
    /// The defining instruction.
    pub def: Inst,
    /// Pre-assigned register, if any. The allocator never overrides it.
    pub fixed: Option<u8>,
    /// Never register-allocated (stack pointer and friends). Ignored
    /// values neither consume colors nor enter spill working sets.
    pub is_ignore: bool,
    /// Must never be spilled; pins the value into the working set.
    pub is_no_spill: bool,
    /// A tuple carrier produced by a multi-result instruction, unpacked by
    /// `Proj` instructions.
    pub is_tuple: bool,
}

/// Per-block data.
///
/// Predecessors are stored explicitly; phi arguments are parallel to this
/// vector, and edge indices used by the spiller refer to positions in it.
#[derive(Clone, Debug, Default)]
pub struct BlockData {
    /// Predecessor blocks in edge order.
    pub preds: SmallVec<[Block; 4]>,
}

/// The data flow graph owns every instruction, value and block of a
/// function. Schedule positions live in the `Layout` instead.
pub struct DataFlowGraph {
    /// All instructions.
    pub insts: PrimaryMap<Inst, InstData>,
    /// Result values per instruction, in result order.
    results: SecondaryMap<Inst, SmallVec<[Value; 2]>>,
    /// All values.
    pub values: PrimaryMap<Value, ValueData>,
    /// All blocks.
    pub blocks: PrimaryMap<Block, BlockData>,
}

impl DataFlowGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            insts: PrimaryMap::new(),
            results: SecondaryMap::new(),
            values: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
        }
    }

    /// The number of blocks created so far.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// The number of values created so far.
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    // Blocks.

    /// Create a new block with no predecessors.
    pub fn make_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    /// Append a predecessor to `block` and return its edge index.
    pub fn append_pred(&mut self, block: Block, pred: Block) -> usize {
        let preds = &mut self.blocks[block].preds;
        preds.push(pred);
        preds.len() - 1
    }

    /// The predecessors of `block` in edge order.
    pub fn block_preds(&self, block: Block) -> &[Block] {
        &self.blocks[block].preds
    }

    // Instructions and results.

    /// Create an instruction from raw parts. No results are attached yet.
    pub fn make_inst(&mut self, data: InstData) -> Inst {
        self.insts.push(data)
    }

    /// Attach a result with the given output requirement to `inst`.
    pub fn append_result(&mut self, inst: Inst, req: RegReq) -> Value {
        let value = self.values.push(ValueData {
            req,
            def: inst,
            fixed: None,
            is_ignore: false,
            is_no_spill: false,
            is_tuple: false,
        });
        self.results[inst].push(value);
        value
    }

    /// Attach the tuple carrier result to a multi-result instruction.
    pub fn append_tuple_result(&mut self, inst: Inst) -> Value {
        let value = self.append_result(inst, RegReq::none());
        self.values[value].is_tuple = true;
        value
    }

    /// The results of `inst` in result order.
    pub fn inst_results(&self, inst: Inst) -> &[Value] {
        &self.results[inst]
    }

    /// The arguments of `inst` in operand order.
    pub fn args(&self, inst: Inst) -> &[Value] {
        &self.insts[inst].args
    }

    /// Replace argument `idx` of `inst`.
    pub fn replace_arg(&mut self, inst: Inst, idx: usize, value: Value) {
        self.insts[inst].args[idx] = value;
    }

    /// The input requirement of argument `idx` of `inst`.
    pub fn in_req(&self, inst: Inst, idx: usize) -> RegReq {
        self.insts[inst].in_reqs[idx]
    }

    /// Overwrite the input requirement of argument `idx` of `inst`.
    pub fn set_in_req(&mut self, inst: Inst, idx: usize, req: RegReq) {
        self.insts[inst].in_reqs[idx] = req;
    }

    // Value queries.

    /// The instruction defining `value`.
    pub fn value_def(&self, value: Value) -> Inst {
        self.values[value].def
    }

    /// The register class of `value`, or `None` for tuple carriers.
    pub fn value_class(&self, value: Value) -> Option<RegClassIndex> {
        self.values[value].req.class.expand()
    }

    /// Is `value` the result of a phi?
    pub fn is_phi(&self, value: Value) -> bool {
        self.insts[self.values[value].def].kind.is_phi()
    }

    /// Does `value` take part in the allocation of class `class`?
    ///
    /// Ignored values and values of other classes are invisible to both
    /// the spiller and the allocator.
    pub fn consider_in_alloc(&self, value: Value, class: RegClassIndex) -> bool {
        let data = &self.values[value];
        data.req.class.expand() == Some(class) && !data.is_ignore
    }

    // Constructors for the backend node family.

    /// Create an ordinary single-result operation whose operands and
    /// result all live in `class`.
    pub fn make_op(&mut self, opcode: &'static str, class: RegClassIndex, args: &[Value]) -> (Inst, Value) {
        let in_reqs = args.iter().map(|_| RegReq::class(class)).collect();
        let inst = self.make_inst(InstData::new(
            InstKind::Op { opcode },
            SmallVec::from_slice(args),
            in_reqs,
        ));
        let result = self.append_result(inst, RegReq::class(class));
        (inst, result)
    }

    /// Create the entry pseudo instruction. Results are appended by the
    /// caller, typically with pre-assigned registers.
    pub fn make_start(&mut self) -> Inst {
        self.make_inst(InstData::new(InstKind::Start, smallvec![], smallvec![]))
    }

    /// Create a phi in `class`. The arguments must be parallel to the
    /// predecessors of the block the phi is placed in.
    pub fn make_phi(&mut self, class: RegClassIndex, args: &[Value]) -> (Inst, Value) {
        let in_reqs = args.iter().map(|_| RegReq::class(class)).collect();
        let inst = self.make_inst(InstData::new(
            InstKind::Phi,
            SmallVec::from_slice(args),
            in_reqs,
        ));
        let result = self.append_result(inst, RegReq::class(class));
        (inst, result)
    }

    /// Create an `Unknown` placeholder value of `class`. The instruction
    /// is never laid out; the value is available everywhere.
    pub fn make_unknown(&mut self, class: RegClassIndex) -> Value {
        let inst = self.make_inst(InstData::new(InstKind::Unknown, smallvec![], smallvec![]));
        self.append_result(inst, RegReq::class(class))
    }

    /// Create a register-to-register copy of `value`.
    pub fn make_copy(&mut self, value: Value) -> (Inst, Value) {
        let req = self.values[value].req;
        let inst = self.make_inst(InstData::new(
            InstKind::Copy,
            smallvec![value],
            smallvec![RegReq::class(req.class.expand().expect("copy of classless value"))],
        ));
        let result = self.append_result(inst, req);
        (inst, result)
    }

    /// Create a copy of `value` that also keeps `keeps` alive.
    pub fn make_copy_keep(&mut self, value: Value, keeps: &[Value]) -> (Inst, Value) {
        let req = self.values[value].req;
        let mut args: SmallVec<[Value; 4]> = smallvec![value];
        args.extend_from_slice(keeps);
        let in_reqs = args.iter().map(|&a| self.arg_req(a)).collect();
        let inst = self.make_inst(InstData::new(InstKind::CopyKeep, args, in_reqs));
        let result = self.append_result(inst, req);
        (inst, result)
    }

    /// Create a keep marker for `args`.
    pub fn make_keep(&mut self, args: &[Value]) -> Inst {
        let in_reqs = args.iter().map(|&a| self.arg_req(a)).collect();
        self.make_inst(InstData::new(
            InstKind::Keep,
            SmallVec::from_slice(args),
            in_reqs,
        ))
    }

    /// Create a permutation of `args`, all of class `class`. Returns the
    /// instruction and its tuple carrier; the permuted values must be
    /// projected out with [`DataFlowGraph::make_proj`].
    pub fn make_perm(&mut self, class: RegClassIndex, args: &[Value]) -> (Inst, Value) {
        let in_reqs = args.iter().map(|_| RegReq::class(class)).collect();
        let inst = self.make_inst(InstData::new(
            InstKind::Perm,
            SmallVec::from_slice(args),
            in_reqs,
        ));
        let tuple = self.append_tuple_result(inst);
        (inst, tuple)
    }

    /// Project result `index` out of the tuple carrier `tuple`.
    pub fn make_proj(&mut self, tuple: Value, index: u8, req: RegReq) -> (Inst, Value) {
        debug_assert!(self.values[tuple].is_tuple);
        let inst = self.make_inst(InstData::new(
            InstKind::Proj { index },
            smallvec![tuple],
            smallvec![RegReq::none()],
        ));
        let result = self.append_result(inst, req);
        (inst, result)
    }

    /// Create a spill of `value` into `slot`.
    ///
    /// The optional `frame` input is the frame or stack pointer the store
    /// addresses through. Its requirement is deliberately "none", so any
    /// register satisfies it; some targets need this for their spill
    /// addressing modes.
    // TODO: investigate whether frame inputs really must stay completely
    // unconstrained here, or whether requiring the frame pointer's own
    // class would do.
    pub fn make_spill(&mut self, value: Value, slot: SpillSlot, frame: Option<Value>) -> Inst {
        let class = self
            .value_class(value)
            .expect("spill of classless value");
        let mut args: SmallVec<[Value; 4]> = smallvec![value];
        let mut in_reqs: SmallVec<[RegReq; 4]> = smallvec![RegReq::class(class)];
        if let Some(frame) = frame {
            args.push(frame);
            in_reqs.push(RegReq::none());
        }
        self.make_inst(InstData::new(InstKind::Spill { slot }, args, in_reqs))
    }

    /// Create a reload from `slot` producing a fresh value of `class`.
    /// The `frame` input follows the same rules as for spills.
    pub fn make_reload(
        &mut self,
        slot: SpillSlot,
        class: RegClassIndex,
        frame: Option<Value>,
    ) -> (Inst, Value) {
        let mut args: SmallVec<[Value; 4]> = smallvec![];
        let mut in_reqs: SmallVec<[RegReq; 4]> = smallvec![];
        if let Some(frame) = frame {
            args.push(frame);
            in_reqs.push(RegReq::none());
        }
        let inst = self.make_inst(InstData::new(InstKind::Reload { slot }, args, in_reqs));
        let result = self.append_result(inst, RegReq::class(class));
        (inst, result)
    }

    /// Create a call to `callee`. Argument requirements carry the calling
    /// convention; results are projected out of the returned tuple
    /// carrier with the convention's output requirements.
    pub fn make_call(
        &mut self,
        callee: &'static str,
        args: &[Value],
        in_reqs: &[RegReq],
    ) -> (Inst, Value) {
        let inst = self.make_inst(InstData::new(
            InstKind::Call { callee },
            SmallVec::from_slice(args),
            SmallVec::from_slice(in_reqs),
        ));
        let tuple = self.append_tuple_result(inst);
        (inst, tuple)
    }

    /// Create a return whose arguments carry the return value
    /// requirements.
    pub fn make_return(&mut self, args: &[Value], in_reqs: &[RegReq]) -> Inst {
        self.make_inst(InstData::new(
            InstKind::Return,
            SmallVec::from_slice(args),
            SmallVec::from_slice(in_reqs),
        ))
    }

    /// Create a scheduling barrier over `args`.
    pub fn make_sync(&mut self, args: &[Value]) -> Inst {
        let in_reqs = args.iter().map(|&a| self.arg_req(a)).collect();
        self.make_inst(InstData::new(
            InstKind::Sync,
            SmallVec::from_slice(args),
            in_reqs,
        ))
    }

    /// The input requirement matching the class of `arg`, or none for
    /// classless arguments.
    fn arg_req(&self, arg: Value) -> RegReq {
        match self.value_class(arg) {
            Some(class) => RegReq::class(class),
            None => RegReq::none(),
        }
    }
}

impl Default for DataFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}
