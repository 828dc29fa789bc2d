//! Register allocation.
//!
//! This module contains the liveness analysis, the two allocation strategies and the resolver
//! turning their results into locations and moves.

pub mod interval;
pub mod liverange;
pub mod liveness;

mod allocator;
mod context;
mod graph_color;
mod linear_scan;
mod resolver;
mod validate;

#[cfg(test)]
mod testing;

pub use self::allocator::SlotCounts;
pub use self::context::{AllocationOutput, Context};
pub use self::interval::{IntervalId, IntervalPool, LiveInterval};
pub use self::liverange::{LiveRange, Position};
pub use self::liveness::Liveness;
pub use self::resolver::FrameLayout;
pub use self::validate::validate_intervals;
