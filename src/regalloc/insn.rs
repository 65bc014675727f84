//! Operand view of one instruction for constraint handling.
//!
//! The allocator looks at an instruction as a flat list of operands:
//! definitions first, then uses, each with the set of admissible registers
//! of the current class. Tuple instructions contribute their projection
//! cluster as the definitions. Partner links between operands are
//! established later by the pairing step; they start out empty.

use crate::ir::{Function, Inst, Value};
use crate::registers::{RegClassIndex, RegMask};
use smallvec::SmallVec;

/// One operand of a scanned instruction.
pub(crate) struct InsnOp {
    /// The value the operand carries.
    pub value: Value,
    /// The registers that may satisfy the operand.
    pub regs: RegMask,
    /// Index of the partner operand, once paired. Partners must receive
    /// the same register.
    pub partner: Option<usize>,
}

/// A scanned instruction: definitions, then uses.
pub(crate) struct Insn {
    /// The scanned instruction.
    pub inst: Inst,
    /// Definitions at indices `0..use_start`, uses from `use_start` on.
    pub ops: Vec<InsnOp>,
    /// First use operand index.
    pub use_start: usize,
    /// Does any operand restrict the register choice?
    pub has_constraints: bool,
}

/// Scan `inst`, collecting the operands of `class`. Ignored values and
/// values of other classes do not participate.
pub(crate) fn scan_insn(
    func: &Function,
    class: RegClassIndex,
    allocatable: RegMask,
    inst: Inst,
) -> Insn {
    let mut ops = Vec::new();
    let mut has_constraints = false;

    // Definitions: the results, or the projection cluster for tuples.
    let results = func.dfg.inst_results(inst);
    let mut outs: SmallVec<[Value; 4]> = SmallVec::new();
    if results.len() == 1 && func.dfg.values[results[0]].is_tuple {
        let mut next = func.layout.next_inst(inst);
        while let Some(proj) = next {
            if !func.dfg.insts[proj].kind.is_proj() {
                break;
            }
            outs.extend_from_slice(func.dfg.inst_results(proj));
            next = func.layout.next_inst(proj);
        }
    } else {
        outs.extend_from_slice(results);
    }

    for v in outs {
        if !func.dfg.consider_in_alloc(v, class) {
            continue;
        }
        let data = &func.dfg.values[v];
        let regs = match (data.fixed, data.req.limited) {
            (Some(reg), _) => RegMask::single(reg),
            (None, Some(mask)) => mask,
            (None, None) => allocatable,
        };
        has_constraints |= data.fixed.is_some() || data.req.limited.is_some();
        ops.push(InsnOp {
            value: v,
            regs,
            partner: None,
        });
    }
    let use_start = ops.len();

    for (idx, &arg) in func.dfg.args(inst).iter().enumerate() {
        if !func.dfg.consider_in_alloc(arg, class) {
            continue;
        }
        let req = func.dfg.in_req(inst, idx);
        let regs = req.limited.unwrap_or(allocatable);
        has_constraints |= req.is_limited();
        ops.push(InsnOp {
            value: arg,
            regs,
            partner: None,
        });
    }

    Insn {
        inst,
        ops,
        use_start,
        has_constraints,
    }
}

/// The register set that decides the color of the operand at `idx`: its
/// own admissible set without a partner, the tighter of the two when one
/// is a subset of the other, and nothing at all when the partners are
/// mutually over-constrained (matching will fail for the node).
pub(crate) fn decisive_regs(insn: &Insn, idx: usize) -> Option<RegMask> {
    let op = &insn.ops[idx];
    match op.partner {
        None => Some(op.regs),
        Some(p) => {
            let other = insn.ops[p].regs;
            if op.regs.is_subset_of(other) {
                Some(op.regs)
            } else if other.is_subset_of(op.regs) {
                Some(other)
            } else {
                None
            }
        }
    }
}

/// For each definition, find a use that may share its register: it must be
/// unpaired, must die at the instruction, and must have a non-empty
/// intersection with the definition's admissible set. Among the
/// candidates, the most constrained one wins. All operands carrying the
/// chosen value are linked to the same partner.
pub(crate) fn pair_up_operands(insn: &mut Insn, lives_across: impl Fn(Value) -> bool) {
    for j in 0..insn.use_start {
        let out_regs = insn.ops[j].regs;
        let mut smallest: Option<usize> = None;
        let mut smallest_n_regs = usize::MAX;
        for i in insn.use_start..insn.ops.len() {
            let op = &insn.ops[i];
            if op.partner.is_some() || lives_across(op.value) {
                continue;
            }
            let n_total = op.regs.len();
            if !(op.regs & out_regs).is_empty() && n_total < smallest_n_regs {
                smallest = Some(i);
                smallest_n_regs = n_total;
            }
        }

        if let Some(i) = smallest {
            let carrier = insn.ops[i].value;
            for i2 in insn.use_start..insn.ops.len() {
                if insn.ops[i2].value == carrier {
                    insn.ops[i2].partner = Some(j);
                }
            }
            insn.ops[j].partner = Some(i);
            insn.ops[i].partner = Some(j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{RegInfo, RegReq};

    #[test]
    fn pairing_prefers_tightest_constraint() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 4);
        let allocatable = reginfo.classes[gpr].allocatable;

        let mut func = Function::new();
        let (_ia, a) = func.dfg.make_op("a", gpr, &[]);
        let (_ib, b) = func.dfg.make_op("b", gpr, &[]);
        let (inst, _o) = func.dfg.make_op("two_addr", gpr, &[a, b]);
        // Output restricted to r0/r1, first input fixed to r0.
        let out = func.dfg.inst_results(inst)[0];
        func.dfg.values[out].req = RegReq::limited(gpr, RegMask::single(0) | RegMask::single(1));
        func.dfg.set_in_req(inst, 0, RegReq::fixed(gpr, 0));

        let mut insn = scan_insn(&func, gpr, allocatable, inst);
        assert!(insn.has_constraints);
        assert_eq!(insn.use_start, 1);
        assert_eq!(insn.ops.len(), 3);

        pair_up_operands(&mut insn, |_| false);
        // The fixed input is the tighter candidate.
        assert_eq!(insn.ops[0].partner, Some(1));
        assert_eq!(insn.ops[1].partner, Some(0));
        assert_eq!(insn.ops[2].partner, None);

        // The decisive set of the pair is the single register.
        assert_eq!(decisive_regs(&insn, 0), Some(RegMask::single(0)));
    }

    #[test]
    fn over_constrained_partners_have_no_decisive_set() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 4);
        let allocatable = reginfo.classes[gpr].allocatable;

        let mut func = Function::new();
        let (_ia, a) = func.dfg.make_op("a", gpr, &[]);
        let (inst, _o) = func.dfg.make_op("op", gpr, &[a]);
        let out = func.dfg.inst_results(inst)[0];
        // Overlapping sets where neither contains the other: the pair
        // forms, but no side may decide.
        func.dfg.values[out].req = RegReq::limited(gpr, RegMask::single(0) | RegMask::single(1));
        func.dfg.set_in_req(inst, 0, RegReq::limited(gpr, RegMask::single(1) | RegMask::single(2)));

        let mut insn = scan_insn(&func, gpr, allocatable, inst);
        pair_up_operands(&mut insn, |_| false);
        assert_eq!(insn.ops[0].partner, Some(1));
        assert_eq!(decisive_regs(&insn, 0), None);
    }
}
