//! Register allocation for an SSA compiler backend.
//!
//! The allocator consumes a [`ir::Function`] whose instructions carry location summaries
//! produced by instruction selection, and rewrites every operand, temporary and environment
//! location to a concrete register or stack slot. Data movement introduced by interval splitting
//! and phi resolution is materialized as parallel-move pseudo-instructions spliced into the
//! function.
//!
//! The pipeline is:
//!
//! 1. Liveness analysis: linear block order, lifetime positions and live intervals.
//! 2. Allocation, either by linear scan or by graph coloring.
//! 3. Resolution (SSA deconstruction): location rewriting and move insertion.
//! 4. Optional validation of the final intervals.
//!
//! Use [`Context`] as the entry point.

#![deny(missing_docs)]

pub use cranelift_entity as entity;

pub mod dominator_tree;
pub mod ir;
pub mod isa;
pub mod loop_analysis;
pub mod regalloc;
pub mod register_set;
pub mod settings;
pub mod timing;
pub mod verifier;

mod result;

pub use crate::regalloc::{AllocationOutput, Context, FrameLayout};
pub use crate::result::{RegallocError, RegallocResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
