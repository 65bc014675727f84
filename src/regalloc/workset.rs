//! The bounded set of values assumed resident in registers.
//!
//! The spill chooser maintains one of these per block walk: at most `k`
//! values, each annotated with its next-use distance. Sorting is ascending
//! by distance, so the tail of the set is what gets evicted.

use crate::ir::{Function, Value};
use crate::regalloc::uses::Distance;
use crate::registers::RegClassIndex;
use cranelift_entity::EntityRef;
use smallvec::SmallVec;

/// One resident value and its next-use distance.
#[derive(Clone, Copy, Debug)]
pub struct Loc {
    /// The resident value.
    pub value: Value,
    /// Distance to its next use, relative to the current instruction.
    pub time: Distance,
}

/// An ordered collection of at most `k` resident values.
#[derive(Clone, Debug, Default)]
pub struct Workset {
    vals: SmallVec<[Loc; 8]>,
}

impl Workset {
    /// Create an empty working set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of resident values.
    pub fn len(&self) -> usize {
        self.vals.len()
    }

    /// Is the set empty?
    pub fn is_empty(&self) -> bool {
        self.vals.is_empty()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.vals.clear();
    }

    /// Is `value` resident?
    pub fn contains(&self, value: Value) -> bool {
        self.vals.iter().any(|loc| loc.value == value)
    }

    /// Insert `value` if it belongs to `class` and is not ignored; values
    /// outside the class are silently dropped, duplicates are kept once.
    pub fn insert(&mut self, func: &Function, class: RegClassIndex, value: Value) {
        if !func.dfg.consider_in_alloc(value, class) {
            log::trace!("workset: dropped {}", value);
            return;
        }
        if self.contains(value) {
            return;
        }
        self.vals.push(Loc { value, time: 0 });
    }

    /// Remove `value` if present.
    pub fn remove(&mut self, value: Value) {
        if let Some(pos) = self.vals.iter().position(|loc| loc.value == value) {
            self.vals.swap_remove(pos);
        }
    }

    /// The value at position `idx`.
    pub fn value(&self, idx: usize) -> Value {
        self.vals[idx].value
    }

    /// Set the next-use distance of the entry at `idx`.
    pub fn set_time(&mut self, idx: usize, time: Distance) {
        self.vals[idx].time = time;
    }

    /// Sort ascending by next-use distance. Ties break on the value index
    /// so the order is deterministic.
    pub fn sort(&mut self) {
        self.vals
            .sort_unstable_by_key(|loc| (loc.time, loc.value.index()));
    }

    /// Keep only the first `len` entries.
    pub fn truncate(&mut self, len: usize) {
        self.vals.truncate(len);
    }

    /// Overwrite the contents with `locs`.
    pub fn bulk_fill(&mut self, locs: &[Loc]) {
        self.vals.clear();
        self.vals.extend_from_slice(locs);
    }

    /// Make `self` equal to `other` without reallocating.
    pub fn copy_from(&mut self, other: &Workset) {
        self.vals.clear();
        self.vals.extend_from_slice(&other.vals);
    }

    /// Iterate over the entries in order.
    pub fn iter(&self) -> impl Iterator<Item = Loc> + '_ {
        self.vals.iter().copied()
    }

    /// Iterate over the resident values in order.
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.vals.iter().map(|loc| loc.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Function;
    use crate::registers::RegInfo;

    #[test]
    fn insert_filters_and_dedups() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 3);
        let fpu = reginfo.make_class("fpu", 3);

        let mut func = Function::new();
        let (_i0, a) = func.dfg.make_op("a", gpr, &[]);
        let (_i1, f) = func.dfg.make_op("f", fpu, &[]);
        let (_i2, sp) = func.dfg.make_op("sp", gpr, &[]);
        func.dfg.values[sp].is_ignore = true;

        let mut ws = Workset::new();
        ws.insert(&func, gpr, a);
        ws.insert(&func, gpr, a);
        ws.insert(&func, gpr, f);
        ws.insert(&func, gpr, sp);
        assert_eq!(ws.len(), 1);
        assert!(ws.contains(a));
        assert!(!ws.contains(f));
    }

    #[test]
    fn sort_and_evict_order() {
        let mut reginfo = RegInfo::new();
        let gpr = reginfo.make_class("gpr", 4);

        let mut func = Function::new();
        let mut vals = Vec::new();
        for name in ["a", "b", "c"] {
            let (_i, v) = func.dfg.make_op(name, gpr, &[]);
            vals.push(v);
        }

        let mut ws = Workset::new();
        for &v in &vals {
            ws.insert(&func, gpr, v);
        }
        ws.set_time(0, 7);
        ws.set_time(1, 2);
        ws.set_time(2, 9);
        ws.sort();
        assert_eq!(ws.value(0), vals[1]);
        assert_eq!(ws.value(2), vals[2]);

        // Eviction drops the farthest next use.
        ws.truncate(2);
        assert!(!ws.contains(vals[2]));
        assert_eq!(ws.len(), 2);
    }
}
