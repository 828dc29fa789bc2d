//! Set of registers as a pair of bit masks, one per register class.
//!
//! Register sets describe the registers live across a safepoint and the registers an
//! allocation touched. Each class has at most 64 registers, numbered from 0.

use crate::ir::RegUnit;
use core::fmt;

/// The mask bit of `reg`, or no bit for a register past the 64th.
pub(crate) fn bit(reg: RegUnit) -> u64 {
    1u64.checked_shl(u32::from(reg)).unwrap_or(0)
}

/// A set of core and floating point registers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RegisterSet {
    core: u64,
    fp: u64,
}

impl RegisterSet {
    /// Create a new empty register set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a set from raw masks.
    pub fn from_masks(core: u64, fp: u64) -> Self {
        Self { core, fp }
    }

    /// Add core register `reg`.
    pub fn add_core(&mut self, reg: RegUnit) {
        debug_assert!(reg < 64, "core register {reg} out of range");
        self.core |= bit(reg);
    }

    /// Add floating point register `reg`.
    pub fn add_fp(&mut self, reg: RegUnit) {
        debug_assert!(reg < 64, "fp register {reg} out of range");
        self.fp |= bit(reg);
    }

    /// Add `reg` to the class selected by `fp`.
    pub fn add(&mut self, reg: RegUnit, fp: bool) {
        if fp { self.add_fp(reg) } else { self.add_core(reg) }
    }

    /// Remove core register `reg`.
    pub fn remove_core(&mut self, reg: RegUnit) {
        self.core &= !bit(reg);
    }

    /// Remove floating point register `reg`.
    pub fn remove_fp(&mut self, reg: RegUnit) {
        self.fp &= !bit(reg);
    }

    /// Returns `true` if core register `reg` is in the set.
    pub fn contains_core(&self, reg: RegUnit) -> bool {
        self.core & bit(reg) != 0
    }

    /// Returns `true` if floating point register `reg` is in the set.
    pub fn contains_fp(&self, reg: RegUnit) -> bool {
        self.fp & bit(reg) != 0
    }

    /// Raw core register mask.
    pub fn core_mask(&self) -> u64 {
        self.core
    }

    /// Raw floating point register mask.
    pub fn fp_mask(&self) -> u64 {
        self.fp
    }

    /// Number of registers in the set, both classes counted.
    pub fn len(&self) -> usize {
        (self.core.count_ones() + self.fp.count_ones()) as usize
    }

    /// Is the set empty?
    pub fn is_empty(&self) -> bool {
        self.core == 0 && self.fp == 0
    }

    /// Add all registers of `other`.
    pub fn union(&mut self, other: &Self) {
        self.core |= other.core;
        self.fp |= other.fp;
    }

    /// Iterate over the core registers in the set, lowest first.
    pub fn core_regs(&self) -> RegSetIter {
        RegSetIter { regs: self.core }
    }

    /// Iterate over the floating point registers in the set, lowest first.
    pub fn fp_regs(&self) -> RegSetIter {
        RegSetIter { regs: self.fp }
    }
}

/// Iterator over the registers of one class in a set.
#[derive(Clone)]
pub struct RegSetIter {
    regs: u64,
}

impl Iterator for RegSetIter {
    type Item = RegUnit;

    fn next(&mut self) -> Option<RegUnit> {
        if self.regs == 0 {
            return None;
        }
        let reg = self.regs.trailing_zeros() as RegUnit;
        // Clear the lowest bit so we won't find it again.
        self.regs &= self.regs - 1;
        Some(reg)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let bits = self.regs.count_ones() as usize;
        (bits, Some(bits))
    }
}

impl ExactSizeIterator for RegSetIter {}

impl fmt::Display for RegisterSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("[")?;
        for reg in self.core_regs() {
            write!(f, " r{reg}")?;
        }
        for reg in self.fp_regs() {
            write!(f, " f{reg}")?;
        }
        f.write_str(" ]")
    }
}
