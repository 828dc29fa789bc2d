//! Representation of the functions the allocator works on.

pub mod entities;
mod function;
mod locations;
mod types;

pub use crate::ir::entities::{AnyEntity, Block, Inst};
pub use crate::ir::function::{BlockData, Function, InstData, InstKind};
pub use crate::ir::locations::{
    CallKind, Location, LocationSummary, MoveOperands, ParallelMove, Policy, RegUnit,
    SafepointInfo, VREG_SIZE,
};
pub use crate::ir::types::Type;
