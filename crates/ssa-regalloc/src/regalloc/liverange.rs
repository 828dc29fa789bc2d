//! Building blocks of live intervals: ranges, use positions and safepoint positions.
//!
//! # Lifetime positions
//!
//! The allocator numbers the instructions of a function along a linear block order. Each
//! instruction takes two positions: an even one, where its inputs are read, and the following
//! odd one, where its output is written. Every block starts with an even position reserved as a
//! block marker; phis are numbered at that position.
//!
//! A value is live over a set of half-open `[start, end)` ranges. Gaps between the ranges of an
//! interval are *lifetime holes*: the value is not needed there, and its register can be used
//! by another value.

use crate::ir::Inst;
use core::fmt;

/// A lifetime position.
pub type Position = u32;

/// Position returned by queries that found nothing, when a position is still needed for
/// comparisons (e.g. "free until the end of the function").
pub const MAX_LIFETIME_POSITION: Position = Position::MAX;

/// A half-open range `[start, end)` of lifetime positions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LiveRange {
    /// First covered position.
    pub start: Position,
    /// First position after the range.
    pub end: Position,
}

impl LiveRange {
    /// Create a range. `start` must be before `end`.
    pub fn new(start: Position, end: Position) -> Self {
        debug_assert!(start < end, "empty range [{start}, {end})");
        Self { start, end }
    }

    /// Does the range contain `position`?
    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position < self.end
    }

    /// Do the two ranges share a position?
    pub fn intersects(&self, other: &Self) -> bool {
        (self.start >= other.start && self.start < other.end)
            || (other.start >= self.start && other.start < self.end)
    }

    /// Does this range end before `other` starts?
    pub fn is_before(&self, other: &Self) -> bool {
        self.end <= other.start
    }

    /// Number of positions covered.
    pub fn len(&self) -> Position {
        self.end - self.start
    }
}

impl fmt::Display for LiveRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.end)
    }
}

/// A use of a value as an input of an instruction.
///
/// For phis, `input_index` is the predecessor index and `position` the end of that predecessor.
/// For temps, `input_index` is the temp index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UsePosition {
    /// The using instruction.
    pub user: Inst,
    /// Input (or temp) index in the user.
    pub input_index: u32,
    /// Where the use happens.
    pub position: Position,
    /// The user demands a register for this input.
    pub requires_register: bool,
    /// The user is a phi.
    pub is_phi: bool,
}

/// A use of a value by the environment of an instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EnvUsePosition {
    /// The instruction holding the environment.
    pub holder: Inst,
    /// Index in the environment.
    pub index: u32,
    /// Where the use happens.
    pub position: Position,
}

/// A GC safepoint an interval is live across.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SafepointPosition {
    /// The safepoint instruction.
    pub inst: Inst,
    /// Lifetime position of the instruction.
    pub position: Position,
    /// The instruction always calls, clobbering caller-save registers.
    pub will_call: bool,
}

/// Anything ordered by lifetime position.
pub(crate) trait Positioned {
    fn position(&self) -> Position;
}

impl Positioned for UsePosition {
    fn position(&self) -> Position {
        self.position
    }
}

impl Positioned for EnvUsePosition {
    fn position(&self) -> Position {
        self.position
    }
}

impl Positioned for SafepointPosition {
    fn position(&self) -> Position {
        self.position
    }
}

/// Insert `item` in the ascending list `list`, after any item at the same position.
pub(crate) fn insert_sorted<T: Positioned>(list: &mut std::vec::Vec<T>, item: T) {
    let at = list.partition_point(|x| x.position() <= item.position());
    list.insert(at, item);
}

/// The items of an ascending list with positions in the closed interval `[from, to]`.
pub(crate) fn in_span<T: Positioned>(list: &[T], from: Position, to: Position) -> &[T] {
    let lo = list.partition_point(|x| x.position() < from);
    let hi = list.partition_point(|x| x.position() <= to);
    &list[lo..hi.max(lo)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    #[test]
    fn range_relations() {
        let a = LiveRange::new(2, 6);
        let b = LiveRange::new(6, 9);
        let c = LiveRange::new(4, 7);
        assert!(a.contains(2));
        assert!(!a.contains(6));
        assert!(!a.intersects(&b));
        assert!(a.is_before(&b));
        assert!(a.intersects(&c));
        assert!(c.intersects(&b));
        assert_eq!(c.len(), 3);
        assert_eq!(a.to_string(), "[2,6)");
    }

    #[test]
    fn sorted_lists() {
        let use_at = |position| UsePosition {
            user: Inst::new(0),
            input_index: position,
            position,
            requires_register: false,
            is_phi: false,
        };
        let mut uses = std::vec::Vec::new();
        for p in [9, 3, 5, 3] {
            insert_sorted(&mut uses, use_at(p));
        }
        let positions: std::vec::Vec<_> = uses.iter().map(|u| u.position).collect();
        assert_eq!(positions, [3, 3, 5, 9]);
        assert_eq!(in_span(&uses, 3, 5).len(), 3);
        assert_eq!(in_span(&uses, 4, 8).len(), 1);
        assert!(in_span(&uses, 10, 12).is_empty());
    }
}
