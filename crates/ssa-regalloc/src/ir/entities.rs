//! Function entities.
//!
//! Instructions and blocks are referenced by small opaque indexes into the tables of a
//! [`Function`](super::Function). The live intervals created by the allocator are referenced the
//! same way, by [`IntervalId`](crate::regalloc::IntervalId).

use crate::entity::entity_impl;
use crate::regalloc::IntervalId;
use core::fmt;

#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};

/// An opaque reference to a basic block in a [`Function`](super::Function).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to an instruction in a [`Function`](super::Function).
///
/// Phis, parameters, constants and the parallel moves inserted by the resolver are all
/// instructions.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// A reference to any of the entities defined in this module, used for error reporting.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum AnyEntity {
    /// The whole function.
    Function,
    /// A basic block.
    Block(Block),
    /// An instruction.
    Inst(Inst),
    /// A live interval.
    Interval(IntervalId),
}

impl fmt::Display for AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Function => write!(f, "function"),
            Self::Block(r) => r.fmt(f),
            Self::Inst(r) => r.fmt(f),
            Self::Interval(r) => r.fmt(f),
        }
    }
}

impl From<Block> for AnyEntity {
    fn from(r: Block) -> Self {
        Self::Block(r)
    }
}

impl From<Inst> for AnyEntity {
    fn from(r: Inst) -> Self {
        Self::Inst(r)
    }
}

impl From<IntervalId> for AnyEntity {
    fn from(r: IntervalId) -> Self {
        Self::Interval(r)
    }
}
