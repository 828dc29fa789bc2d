//! Target register description.
//!
//! The allocator queries the code generator of the target through [`TargetRegisters`]. The
//! data-driven [`MachineDesc`] implements it for any machine whose register file can be
//! described by counts and masks.

use crate::ir::{RegUnit, Type, VREG_SIZE};
use crate::register_set::{RegisterSet, bit};

/// What the allocator needs to know to size a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameRequest {
    /// Stack slots handed out by the allocator, catch phi slots included.
    pub spill_slots: u32,
    /// Slots reserved for outgoing call arguments and the method context.
    pub reserved_out_slots: u32,
    /// Registers written by allocated code.
    pub allocated_registers: RegisterSet,
    /// Most core registers live at a slow-path safepoint.
    pub max_safepoint_live_core: u32,
    /// Most FP registers live at a slow-path safepoint.
    pub max_safepoint_live_fp: u32,
}

/// Register file and frame queries answered by the code generator.
pub trait TargetRegisters {
    /// Number of core registers. At most 64.
    fn num_core_registers(&self) -> usize;

    /// Number of floating point registers. At most 64.
    fn num_fp_registers(&self) -> usize;

    /// Core registers reserved by the code generator (stack pointer, thread register...).
    fn is_blocked_core_register(&self, reg: RegUnit) -> bool;

    /// FP registers reserved by the code generator.
    fn is_blocked_fp_register(&self, reg: RegUnit) -> bool;

    /// Is core register `reg` preserved across calls?
    fn is_core_callee_save(&self, reg: RegUnit) -> bool;

    /// Is FP register `reg` preserved across calls?
    fn is_fp_callee_save(&self, reg: RegUnit) -> bool;

    /// Does a value of type `ty` need a register pair?
    fn needs_two_registers(&self, ty: Type) -> bool;

    /// Offset, in the caller's frame, of the stack-passed parameter `index`.
    fn parameter_stack_slot(&self, index: u32) -> i32 {
        index as i32 * VREG_SIZE
    }

    /// Size of a pointer in bytes.
    fn pointer_size(&self) -> u32;

    /// Should moves of 64-bit integers be emitted as two 32-bit moves?
    fn should_split_long_moves(&self) -> bool {
        false
    }

    /// Size of the frame, in bytes.
    ///
    /// The default lays out allocator slots and reserved out slots, one save slot for each
    /// callee-save register used, and a save area for registers live at slow-path calls, then
    /// aligns the result to 16 bytes.
    fn frame_size(&self, request: &FrameRequest) -> u32 {
        let callee_saves = request
            .allocated_registers
            .core_regs()
            .filter(|&r| self.is_core_callee_save(r))
            .count()
            + request
                .allocated_registers
                .fp_regs()
                .filter(|&r| self.is_fp_callee_save(r))
                .count();
        let slots = (request.spill_slots + request.reserved_out_slots) * VREG_SIZE as u32;
        let saves = (callee_saves as u32
            + request.max_safepoint_live_core
            + request.max_safepoint_live_fp)
            * self.pointer_size();
        (slots + saves + 15) & !15
    }

    /// Number of registers in the class selected by `fp`.
    fn num_registers(&self, fp: bool) -> usize {
        if fp { self.num_fp_registers() } else { self.num_core_registers() }
    }

    /// Is `reg` of the class selected by `fp` reserved?
    fn is_blocked(&self, reg: RegUnit, fp: bool) -> bool {
        if fp {
            self.is_blocked_fp_register(reg)
        } else {
            self.is_blocked_core_register(reg)
        }
    }

    /// Is `reg` of the class selected by `fp` preserved across calls?
    fn is_callee_save(&self, reg: RegUnit, fp: bool) -> bool {
        if fp {
            self.is_fp_callee_save(reg)
        } else {
            self.is_core_callee_save(reg)
        }
    }
}

/// A target described by register counts and masks.
#[derive(Clone, Debug)]
pub struct MachineDesc {
    num_core: usize,
    num_fp: usize,
    blocked_core: u64,
    blocked_fp: u64,
    callee_save_core: u64,
    callee_save_fp: u64,
    pair_int64: bool,
    pair_float64: bool,
    pointer_size: u32,
    split_long_moves: bool,
}

impl MachineDesc {
    /// A 64-bit machine with `num_core` core and `num_fp` FP registers, none reserved, all
    /// caller-save.
    pub fn new(num_core: usize, num_fp: usize) -> Self {
        debug_assert!(num_core <= 64 && num_fp <= 64);
        Self {
            num_core,
            num_fp,
            blocked_core: 0,
            blocked_fp: 0,
            callee_save_core: 0,
            callee_save_fp: 0,
            pair_int64: false,
            pair_float64: false,
            pointer_size: 8,
            split_long_moves: false,
        }
    }

    /// A 32-bit machine where 64-bit integers live in core register pairs and doubles in FP
    /// register pairs.
    pub fn new_paired(num_core: usize, num_fp: usize) -> Self {
        Self {
            pair_int64: true,
            pair_float64: true,
            pointer_size: 4,
            ..Self::new(num_core, num_fp)
        }
    }

    /// Reserve core registers.
    pub fn with_blocked_core(mut self, regs: &[RegUnit]) -> Self {
        self.blocked_core |= mask_of(regs);
        self
    }

    /// Reserve FP registers.
    pub fn with_blocked_fp(mut self, regs: &[RegUnit]) -> Self {
        self.blocked_fp |= mask_of(regs);
        self
    }

    /// Mark core registers as callee-save.
    pub fn with_core_callee_saves(mut self, regs: &[RegUnit]) -> Self {
        self.callee_save_core |= mask_of(regs);
        self
    }

    /// Mark FP registers as callee-save.
    pub fn with_fp_callee_saves(mut self, regs: &[RegUnit]) -> Self {
        self.callee_save_fp |= mask_of(regs);
        self
    }

    /// Emit 64-bit integer moves as two 32-bit moves.
    pub fn with_split_long_moves(mut self, split: bool) -> Self {
        self.split_long_moves = split;
        self
    }
}

fn mask_of(regs: &[RegUnit]) -> u64 {
    regs.iter().fold(0, |mask, &r| mask | bit(r))
}

impl TargetRegisters for MachineDesc {
    fn num_core_registers(&self) -> usize {
        self.num_core
    }

    fn num_fp_registers(&self) -> usize {
        self.num_fp
    }

    fn is_blocked_core_register(&self, reg: RegUnit) -> bool {
        self.blocked_core & bit(reg) != 0
    }

    fn is_blocked_fp_register(&self, reg: RegUnit) -> bool {
        self.blocked_fp & bit(reg) != 0
    }

    fn is_core_callee_save(&self, reg: RegUnit) -> bool {
        self.callee_save_core & bit(reg) != 0
    }

    fn is_fp_callee_save(&self, reg: RegUnit) -> bool {
        self.callee_save_fp & bit(reg) != 0
    }

    fn needs_two_registers(&self, ty: Type) -> bool {
        match ty {
            Type::Int64 => self.pair_int64,
            Type::Float64 => self.pair_float64,
            _ => false,
        }
    }

    fn pointer_size(&self) -> u32 {
        self.pointer_size
    }

    fn should_split_long_moves(&self) -> bool {
        self.split_long_moves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_desc_queries() {
        let m = MachineDesc::new_paired(8, 4)
            .with_blocked_core(&[7])
            .with_core_callee_saves(&[4, 5]);
        assert!(m.is_blocked(7, false));
        assert!(!m.is_blocked(7, true));
        assert!(m.is_callee_save(4, false));
        assert!(m.needs_two_registers(Type::Int64));
        assert!(!m.needs_two_registers(Type::Int32));
        assert_eq!(m.num_registers(true), 4);
        assert_eq!(m.parameter_stack_slot(2), 8);
    }

    #[test]
    fn default_frame_size() {
        let m = MachineDesc::new(4, 4).with_core_callee_saves(&[3]);
        let mut allocated = RegisterSet::empty();
        allocated.add_core(3);
        allocated.add_core(0);
        let request = FrameRequest {
            spill_slots: 3,
            reserved_out_slots: 2,
            allocated_registers: allocated,
            ..Default::default()
        };
        // 5 slots of 4 bytes plus one 8-byte callee save, rounded up to 16.
        assert_eq!(m.frame_size(&request), 32);
    }
}
