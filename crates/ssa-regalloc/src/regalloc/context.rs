//! Register allocator context.
//!
//! The `Context` struct contains data structures that should be preserved across invocations of
//! the register allocator. No data is preserved between functions, but reusing a context avoids
//! allocating the analysis tables again for each function being compiled.

use super::graph_color;
use super::interval::IntervalPool;
use super::linear_scan;
use super::liveness::Liveness;
use super::resolver::{self, FrameLayout};
use super::validate::validate_intervals;
use crate::ir::Function;
use crate::isa::TargetRegisters;
use crate::register_set::RegisterSet;
use crate::result::RegallocResult;
use crate::settings::{Flags, RegallocAlgorithm};
use crate::timing;
use log::debug;

/// What register allocation reports besides the rewritten function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationOutput {
    /// Layout of the stack frame.
    pub frame: FrameLayout,
    /// Registers written by the allocated code, for saving callee-save registers.
    pub allocated_registers: RegisterSet,
}

/// Persistent memory allocations for register allocation.
#[derive(Default)]
pub struct Context {
    liveness: Liveness,
    pool: IntervalPool,
}

impl Context {
    /// Create a new context for register allocation.
    ///
    /// This context should be reused for multiple functions in order to avoid repeated memory
    /// allocations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data structures in this context.
    pub fn clear(&mut self) {
        self.liveness.clear();
        self.pool.clear();
    }

    /// Liveness of the last function allocated.
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Final intervals of the last function allocated.
    pub fn intervals(&self) -> &IntervalPool {
        &self.pool
    }

    /// Allocate registers in `func`.
    ///
    /// After register allocation, every input, output, temp and environment location of `func`
    /// is a register, a stack slot or a constant, and the moves connecting them are spliced in
    /// as parallel moves.
    pub fn run(
        &mut self,
        target: &dyn TargetRegisters,
        func: &mut Function,
        flags: &Flags,
    ) -> RegallocResult<AllocationOutput> {
        let _tt = timing::regalloc();
        self.clear();

        // Pass: Liveness analysis.
        self.liveness.compute(func, &mut self.pool, flags.debuggable());

        // Pass: Allocation.
        let algorithm = flags.regalloc_algorithm();
        debug!("allocating {} intervals with {algorithm}", self.pool.len());
        let allocation = match algorithm {
            RegallocAlgorithm::LinearScan => {
                linear_scan::run(func, &self.liveness, &mut self.pool, target)?
            }
            RegallocAlgorithm::GraphColor => graph_color::run(
                func,
                &self.liveness,
                &mut self.pool,
                target,
                flags.max_coloring_attempts(),
                flags.enable_coalescing(),
            )?,
        };

        // Pass: SSA deconstruction.
        let frame = resolver::run(func, &self.liveness, &mut self.pool, target, &allocation);

        if flags.enable_verifier() {
            self.validate(func, target, &frame)?;
        }

        Ok(AllocationOutput {
            frame,
            allocated_registers: allocation.allocated,
        })
    }

    /// Check the intervals of the last allocation for register and spill slot conflicts.
    pub fn validate(
        &self,
        func: &Function,
        target: &dyn TargetRegisters,
        frame: &FrameLayout,
    ) -> RegallocResult<()> {
        validate_intervals(func, &self.liveness, &self.pool, target, frame)?;
        Ok(())
    }
}
