//! Register classes, register masks and operand requirements.
//!
//! While allocating registers we constantly need to track which registers
//! of a class are in use, which ones an operand admits, and which ones the
//! allocator may hand out at all. All three are the same shape: a set of
//! registers of a single class, kept as a bit mask. A class never holds
//! more than [`MAX_REGS_PER_CLASS`] registers, so one `u64` suffices.

use core::fmt;
use core::ops::{BitAnd, BitOr};
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{entity_impl, PrimaryMap};

/// An opaque reference to a register class.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegClassIndex(u32);
entity_impl!(RegClassIndex, "rc");

/// The maximum number of registers a single class may hold.
pub const MAX_REGS_PER_CLASS: usize = 64;

/// A set of registers belonging to one register class, as a bit mask.
///
/// Bit `i` stands for register `i` of the class. The mask does not know
/// which class it belongs to; call sites must not mix masks of different
/// classes.
#[derive(Copy, Clone, PartialEq, Eq, Default, Hash)]
pub struct RegMask(u64);

impl RegMask {
    /// The empty register set.
    pub const EMPTY: Self = Self(0);

    /// A mask containing the first `n` registers of the class.
    pub fn first_n(n: u8) -> Self {
        debug_assert!(n as usize <= MAX_REGS_PER_CLASS);
        if n as usize == MAX_REGS_PER_CLASS {
            Self(!0)
        } else {
            Self((1u64 << n) - 1)
        }
    }

    /// A mask containing exactly one register.
    pub fn single(reg: u8) -> Self {
        debug_assert!((reg as usize) < MAX_REGS_PER_CLASS);
        Self(1u64 << reg)
    }

    /// Is the set empty?
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The number of registers in the set.
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Does the set contain `reg`?
    pub fn contains(self, reg: u8) -> bool {
        debug_assert!((reg as usize) < MAX_REGS_PER_CLASS);
        self.0 & (1u64 << reg) != 0
    }

    /// Add `reg` to the set.
    pub fn set(&mut self, reg: u8) {
        debug_assert!((reg as usize) < MAX_REGS_PER_CLASS);
        self.0 |= 1u64 << reg;
    }

    /// Remove `reg` from the set.
    pub fn clear(&mut self, reg: u8) {
        debug_assert!((reg as usize) < MAX_REGS_PER_CLASS);
        self.0 &= !(1u64 << reg);
    }

    /// The lowest-numbered register in the set, if any.
    pub fn first(self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as u8)
        }
    }

    /// Is every register of `self` also in `other`?
    pub fn is_subset_of(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// The set of registers in `bound` that are *not* in `self`.
    ///
    /// This is the "free register" computation: complementing a mask on its
    /// own would produce bits beyond the class size, so the complement is
    /// always taken relative to a bounding set.
    pub fn complement_in(self, bound: Self) -> Self {
        Self(!self.0 & bound.0)
    }

    /// Iterate over the registers in the set, lowest first.
    pub fn iter(self) -> RegMaskIter {
        RegMaskIter { bits: self.0 }
    }
}

impl BitAnd for RegMask {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for RegMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for RegMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        let mut first = true;
        for reg in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "r{}", reg)?;
            first = false;
        }
        write!(f, "]")
    }
}

/// Iterator over the registers in a `RegMask`.
pub struct RegMaskIter {
    bits: u64,
}

impl Iterator for RegMaskIter {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.bits == 0 {
            return None;
        }
        let reg = self.bits.trailing_zeros() as u8;
        self.bits &= self.bits - 1;
        Some(reg)
    }
}

/// A register class descriptor.
///
/// A class is a set of `n_regs` architecturally interchangeable registers.
/// The `allocatable` subset marks the registers the allocator may choose
/// freely; reserved registers (stack pointer, assembler temporaries) are
/// members of the class but not allocatable. Pre-assigned values may still
/// occupy non-allocatable registers.
pub struct RegClassData {
    /// Human-readable class name, used in diagnostics and dumps.
    pub name: &'static str,
    /// Total number of registers in the class.
    pub n_regs: u8,
    /// The registers the allocator may choose from.
    pub allocatable: RegMask,
}

impl RegClassData {
    /// The number of registers the allocator may choose from. This is the
    /// working-set bound `k` of the spilling pass.
    pub fn n_allocatable(&self) -> usize {
        self.allocatable.len()
    }
}

impl fmt::Display for RegClassData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The register classes of a target.
pub struct RegInfo {
    /// All classes, indexed by `RegClassIndex`.
    pub classes: PrimaryMap<RegClassIndex, RegClassData>,
}

impl RegInfo {
    /// Create an empty register description.
    pub fn new() -> Self {
        Self {
            classes: PrimaryMap::new(),
        }
    }

    /// Add a class in which all `n_regs` registers are allocatable.
    pub fn make_class(&mut self, name: &'static str, n_regs: u8) -> RegClassIndex {
        self.make_class_with(name, n_regs, RegMask::first_n(n_regs))
    }

    /// Add a class with an explicit allocatable subset.
    pub fn make_class_with(
        &mut self,
        name: &'static str,
        n_regs: u8,
        allocatable: RegMask,
    ) -> RegClassIndex {
        debug_assert!(n_regs as usize <= MAX_REGS_PER_CLASS);
        debug_assert!(allocatable.is_subset_of(RegMask::first_n(n_regs)));
        self.classes.push(RegClassData {
            name,
            n_regs,
            allocatable,
        })
    }
}

impl Default for RegInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// The register requirement of one instruction operand.
///
/// A requirement names the class the operand's value must live in and,
/// optionally, a `limited` subset of the class that alone may satisfy the
/// operand. An operand with no class at all does not participate in
/// register allocation; spill frame inputs use this.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RegReq {
    /// The register class of the operand, or `None` when the operand is
    /// not register allocated.
    pub class: PackedOption<RegClassIndex>,
    /// If present, the only registers of the class that satisfy the
    /// operand.
    pub limited: Option<RegMask>,
}

impl RegReq {
    /// The "no requirement" descriptor: any register, or none at all.
    pub fn none() -> Self {
        Self {
            class: PackedOption::default(),
            limited: None,
        }
    }

    /// An unconstrained requirement in `class`.
    pub fn class(class: RegClassIndex) -> Self {
        Self {
            class: class.into(),
            limited: None,
        }
    }

    /// A requirement limited to the registers in `mask`.
    pub fn limited(class: RegClassIndex, mask: RegMask) -> Self {
        debug_assert!(!mask.is_empty());
        Self {
            class: class.into(),
            limited: Some(mask),
        }
    }

    /// A requirement for exactly one register.
    pub fn fixed(class: RegClassIndex, reg: u8) -> Self {
        Self::limited(class, RegMask::single(reg))
    }

    /// Does this requirement restrict the choice within its class?
    pub fn is_limited(&self) -> bool {
        self.limited.is_some()
    }
}
