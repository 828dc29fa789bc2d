//! Live intervals and the per-function pool owning them.
//!
//! A [`LiveInterval`] describes where one value is live. Allocation may split it into a chain of
//! *siblings*, each owning its own register; the first of them, the *parent*, owns the spill slot
//! shared by the chain. Use positions are kept on the parent too, and each sibling sees those
//! within its own span.
//!
//! Double-width values allocated to register pairs get a second, *high* interval mirroring the
//! ranges and uses of the low one. The two are linked through their `paired` field and are split
//! and assigned together.
//!
//! Intervals refer to each other by [`IntervalId`]. Ids are handed out in creation order and
//! used to break ties deterministically.

use super::liverange::{
    EnvUsePosition, LiveRange, Position, SafepointPosition, UsePosition, in_span, insert_sorted,
};
use crate::entity::packed_option::PackedOption;
use crate::entity::{PrimaryMap, entity_impl};
use crate::ir::{Inst, Location, RegUnit, Type};
use core::fmt;
use core::ops::{Index, IndexMut};
use smallvec::SmallVec;
use std::vec::Vec;

/// An opaque reference to a live interval in an [`IntervalPool`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalId(u32);
entity_impl!(IntervalId, "li");

/// What an interval stands for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IntervalKind {
    /// An SSA value.
    Value,
    /// The ranges where a physical register is unavailable.
    Fixed,
    /// A scratch register of a single instruction.
    Temp,
    /// Marks a slow-path call, where live registers must be saved.
    SlowPathSafepoint,
}

/// The lifetime of a value, or of one split piece of it.
#[derive(Clone, Debug)]
pub struct LiveInterval {
    ranges: SmallVec<[LiveRange; 2]>,
    uses: Vec<UsePosition>,
    env_uses: Vec<EnvUsePosition>,
    safepoints: Vec<SafepointPosition>,
    ty: Type,
    kind: IntervalKind,
    parent: PackedOption<IntervalId>,
    next_sibling: PackedOption<IntervalId>,
    paired: PackedOption<IntervalId>,
    is_high: bool,
    register: Option<RegUnit>,
    spill_slot: Option<i32>,
    defined_by: PackedOption<Inst>,
    is_constant: bool,
    definition_requires_register: bool,
}

impl LiveInterval {
    fn new(ty: Type, kind: IntervalKind) -> Self {
        Self {
            ranges: SmallVec::new(),
            uses: Vec::new(),
            env_uses: Vec::new(),
            safepoints: Vec::new(),
            ty,
            kind,
            parent: None.into(),
            next_sibling: None.into(),
            paired: None.into(),
            is_high: false,
            register: None,
            spill_slot: None,
            defined_by: None.into(),
            is_constant: false,
            definition_requires_register: false,
        }
    }

    /// The type of the value.
    pub fn ty(&self) -> Type {
        self.ty
    }

    /// What the interval stands for.
    pub fn kind(&self) -> IntervalKind {
        self.kind
    }

    /// Does this interval model a physical register?
    pub fn is_fixed(&self) -> bool {
        self.kind == IntervalKind::Fixed
    }

    /// Is this a temp?
    pub fn is_temp(&self) -> bool {
        self.kind == IntervalKind::Temp
    }

    /// Is this a slow-path safepoint marker?
    pub fn is_slow_path_safepoint(&self) -> bool {
        self.kind == IntervalKind::SlowPathSafepoint
    }

    /// Is the value allocated from the floating point registers?
    pub fn is_floating_point(&self) -> bool {
        self.ty.is_float()
    }

    /// Are both intervals allocated from the same register class?
    pub fn same_register_kind(&self, other: &Self) -> bool {
        self.is_floating_point() == other.is_floating_point()
    }

    /// Does a spilled value take two stack slots?
    pub fn needs_two_spill_slots(&self) -> bool {
        self.ty.is_wide()
    }

    /// The ranges, ascending.
    pub fn ranges(&self) -> &[LiveRange] {
        &self.ranges
    }

    /// First covered position. Zero for an interval without ranges.
    pub fn start(&self) -> Position {
        self.ranges.first().map_or(0, |r| r.start)
    }

    /// First position after the last range. Zero for an interval without ranges.
    pub fn end(&self) -> Position {
        self.ranges.last().map_or(0, |r| r.end)
    }

    /// Distance from start to end, holes included.
    pub fn length(&self) -> Position {
        self.end() - self.start()
    }

    /// Is there no range at or after `position`?
    pub fn is_dead_at(&self, position: Position) -> bool {
        position >= self.end()
    }

    /// Does the interval span `position`, hole or not?
    pub fn is_defined_at(&self, position: Position) -> bool {
        self.start() <= position && !self.is_dead_at(position)
    }

    /// Does a range contain `position`?
    pub fn covers(&self, position: Position) -> bool {
        let at = self.ranges.partition_point(|r| r.end <= position);
        self.ranges.get(at).is_some_and(|r| r.contains(position))
    }

    /// First position covered by both intervals.
    pub fn first_intersection_with(&self, other: &Self) -> Option<Position> {
        let (mut mine, mut theirs) = (self.ranges.iter().peekable(), other.ranges.iter().peekable());
        while let (Some(a), Some(b)) = (mine.peek(), theirs.peek()) {
            if a.intersects(b) {
                return Some(a.start.max(b.start));
            } else if a.is_before(b) {
                mine.next();
            } else {
                theirs.next();
            }
        }
        None
    }

    /// The register assigned to this sibling.
    pub fn register(&self) -> Option<RegUnit> {
        self.register
    }

    /// Has this sibling been assigned a register?
    pub fn has_register(&self) -> bool {
        self.register.is_some()
    }

    /// Assign a register to this sibling.
    pub fn set_register(&mut self, reg: RegUnit) {
        self.register = Some(reg);
    }

    /// Remove the register of this sibling.
    pub fn clear_register(&mut self) {
        self.register = None;
    }

    /// The instruction defining the value.
    pub fn defined_by(&self) -> Option<Inst> {
        self.defined_by.expand()
    }

    /// Does the value come from a constant?
    pub fn is_constant(&self) -> bool {
        self.is_constant
    }

    /// Does the defining instruction write its output to a register?
    pub fn definition_requires_register(&self) -> bool {
        self.definition_requires_register
    }

    /// Is this the high half of a pair?
    pub fn is_high(&self) -> bool {
        self.is_high
    }

    /// The high half of a low interval.
    pub fn high(&self) -> Option<IntervalId> {
        if self.is_high { None } else { self.paired.expand() }
    }

    /// The low half of a high interval.
    pub fn low(&self) -> Option<IntervalId> {
        if self.is_high { self.paired.expand() } else { None }
    }

    /// The other half of a pair.
    pub fn paired(&self) -> Option<IntervalId> {
        self.paired.expand()
    }

    /// The next sibling.
    pub fn next_sibling(&self) -> Option<IntervalId> {
        self.next_sibling.expand()
    }

    /// Is this a split piece rather than a parent?
    pub fn is_split(&self) -> bool {
        self.parent.is_some()
    }

    /// Safepoints this sibling is live across, ascending.
    pub fn safepoints(&self) -> &[SafepointPosition] {
        &self.safepoints
    }

    /// Is any safepoint of this sibling a call clobbering caller-save registers?
    pub fn has_will_call_safepoint(&self) -> bool {
        self.safepoints.iter().any(|s| s.will_call)
    }

    /// Add the range `[start, end)` during the backward liveness scan.
    ///
    /// Ranges are expected to arrive in descending order: a range ending where the first range
    /// starts extends it. Fixed intervals may receive the same range more than once, and ranges
    /// overlapping existing ones are merged.
    pub fn add_range(&mut self, start: Position, end: Position) {
        match self.ranges.first_mut() {
            None => self.ranges.push(LiveRange::new(start, end)),
            Some(first) if first.start == end => first.start = start,
            Some(first) if end < first.start => self.ranges.insert(0, LiveRange::new(start, end)),
            Some(_) => self.merge_range(start, end),
        }
    }

    fn merge_range(&mut self, mut start: Position, mut end: Position) {
        let lo = self.ranges.partition_point(|r| r.end < start);
        let hi = self.ranges.partition_point(|r| r.start <= end);
        if lo < hi {
            start = start.min(self.ranges[lo].start);
            end = end.max(self.ranges[hi - 1].end);
            self.ranges.drain(lo..hi);
        }
        self.ranges.insert(lo, LiveRange::new(start, end));
    }

    /// Make the value live over the whole loop `[start, end)`, absorbing the ranges inside it.
    pub fn add_loop_range(&mut self, start: Position, end: Position) {
        debug_assert!(!self.ranges.is_empty());
        debug_assert!(start <= self.start());
        // Find the range that covers the positions after the loop.
        let after_loop = self.ranges.iter().position(|r| r.end >= end);
        match after_loop {
            None => {
                // Uses are only in the loop.
                self.ranges.clear();
                self.ranges.push(LiveRange::new(start, end));
            }
            Some(i) if self.ranges[i].start <= end => {
                // There are uses after the loop.
                self.ranges.drain(..i);
                self.ranges[0].start = start;
            }
            Some(i) => {
                // The use after the loop is after a lifetime hole.
                debug_assert!(i > 0);
                self.ranges.drain(..i - 1);
                self.ranges[0] = LiveRange::new(start, end);
            }
        }
    }

    /// Start the interval at its definition `from`.
    ///
    /// A value without uses gets the range `[from, from + 2)`.
    pub fn set_from(&mut self, from: Position) {
        match self.ranges.first_mut() {
            Some(first) => first.start = from,
            None => self.ranges.push(LiveRange::new(from, from + 2)),
        }
    }

    /// Record a use by `user` at `position`.
    ///
    /// Unless the use is an environment use that does not keep the value alive, the value
    /// becomes live from `block_start`, the start of the user's block, to `position`.
    pub fn add_use(&mut self, use_pos: UsePosition, block_start: Position) {
        let position = use_pos.position;
        if let Some(front) = self.uses.first() {
            if front.user == use_pos.user && front.position < position {
                // The user reads the value twice, and one use dies before the other.
                let front_position = front.position;
                insert_sorted(&mut self.uses, use_pos);
                if let Some(first) = self.ranges.first_mut() {
                    if first.end == front_position {
                        first.end = position;
                    }
                }
                return;
            }
        }
        insert_sorted(&mut self.uses, use_pos);
        self.extend_to_use(position, block_start);
    }

    /// Record an environment use. `keep_alive` extends the value's lifetime to the use.
    pub fn add_env_use(&mut self, env_use: EnvUsePosition, block_start: Position, keep_alive: bool) {
        let position = env_use.position;
        insert_sorted(&mut self.env_uses, env_use);
        if keep_alive {
            self.extend_to_use(position, block_start);
        }
    }

    fn extend_to_use(&mut self, position: Position, block_start: Position) {
        match self.ranges.first_mut() {
            None => self.ranges.push(LiveRange::new(block_start, position)),
            // A later use in this block, or a use in a following block, was seen first.
            Some(first) if first.start == block_start => {
                if first.end < position {
                    first.end = position;
                }
            }
            Some(first) if first.start == position => first.start = block_start,
            Some(first) => {
                debug_assert!(first.start > position);
                self.ranges.insert(0, LiveRange::new(block_start, position));
            }
        }
    }

    /// Record the use of the value as input of a phi, at the end of the matching predecessor.
    pub fn add_phi_use(&mut self, phi: Inst, input_index: u32, position: Position) {
        insert_sorted(
            &mut self.uses,
            UsePosition {
                user: phi,
                input_index,
                position,
                requires_register: false,
                is_phi: true,
            },
        );
    }

    /// Make this temp live for the instruction at `position`.
    pub fn add_temp_use(&mut self, user: Inst, temp_index: u32, position: Position) {
        debug_assert!(self.is_temp());
        debug_assert!(self.uses.is_empty(), "a temporary can only have one user");
        self.uses.push(UsePosition {
            user,
            input_index: temp_index,
            position,
            requires_register: true,
            is_phi: false,
        });
        self.add_range(position, position + 1);
    }

    /// Record a safepoint. Safepoints must be added in ascending order.
    pub fn add_safepoint(&mut self, inst: Inst, position: Position, will_call: bool) {
        debug_assert!(self.safepoints.last().is_none_or(|s| s.position <= position));
        self.safepoints.push(SafepointPosition {
            inst,
            position,
            will_call,
        });
    }

    /// The instruction and temp index of a temp interval.
    pub fn temp_user(&self) -> Option<(Inst, u32)> {
        debug_assert!(self.is_temp());
        self.uses.first().map(|u| (u.user, u.input_index))
    }
}

/// All intervals of one function.
#[derive(Default)]
pub struct IntervalPool {
    intervals: PrimaryMap<IntervalId, LiveInterval>,
}

impl Index<IntervalId> for IntervalPool {
    type Output = LiveInterval;
    fn index(&self, id: IntervalId) -> &LiveInterval {
        &self.intervals[id]
    }
}

impl IndexMut<IntervalId> for IntervalPool {
    fn index_mut(&mut self, id: IntervalId) -> &mut LiveInterval {
        &mut self.intervals[id]
    }
}

impl IntervalPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all intervals.
    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    /// Number of intervals, siblings included.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Is the pool empty?
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Iterate over all intervals.
    pub fn iter(&self) -> impl Iterator<Item = (IntervalId, &LiveInterval)> {
        self.intervals.iter()
    }

    /// Create the interval of a value defined by `defined_by`.
    pub fn new_value(
        &mut self,
        ty: Type,
        defined_by: Inst,
        is_constant: bool,
        definition_requires_register: bool,
    ) -> IntervalId {
        let mut interval = LiveInterval::new(ty, IntervalKind::Value);
        interval.defined_by = defined_by.into();
        interval.is_constant = is_constant;
        interval.definition_requires_register = definition_requires_register;
        self.intervals.push(interval)
    }

    /// Create the fixed interval of physical register `reg`.
    pub fn new_fixed(&mut self, reg: RegUnit, fp: bool) -> IntervalId {
        let ty = if fp { Type::Float64 } else { Type::Int32 };
        let mut interval = LiveInterval::new(ty, IntervalKind::Fixed);
        interval.register = Some(reg);
        self.intervals.push(interval)
    }

    /// Create a temp interval.
    pub fn new_temp(&mut self, ty: Type) -> IntervalId {
        self.intervals.push(LiveInterval::new(ty, IntervalKind::Temp))
    }

    /// Create a slow-path safepoint marker for `inst` at `position`.
    pub fn new_slow_path_safepoint(&mut self, inst: Inst, position: Position) -> IntervalId {
        let mut interval = LiveInterval::new(Type::Void, IntervalKind::SlowPathSafepoint);
        interval.defined_by = inst.into();
        interval.add_range(position, position + 1);
        self.intervals.push(interval)
    }

    /// Give the parent interval `low` a high half with the same ranges and uses.
    pub fn add_high_interval(&mut self, low: IntervalId) -> IntervalId {
        let source = &self.intervals[low];
        debug_assert!(!source.is_split() && source.paired.is_none());
        let mut high = LiveInterval::new(source.ty, source.kind);
        high.ranges = source.ranges.clone();
        high.uses = source.uses.clone();
        high.env_uses = source.env_uses.clone();
        high.defined_by = source.defined_by;
        high.is_constant = source.is_constant;
        high.definition_requires_register = source.definition_requires_register;
        high.is_high = true;
        high.paired = low.into();
        let high = self.intervals.push(high);
        self.intervals[low].paired = high.into();
        high
    }

    /// The parent of the sibling chain `id` belongs to.
    pub fn parent(&self, id: IntervalId) -> IntervalId {
        self.intervals[id].parent.expand().unwrap_or(id)
    }

    /// Iterate over the sibling chain starting at `id`.
    pub fn siblings(&self, id: IntervalId) -> impl Iterator<Item = IntervalId> + '_ {
        core::iter::successors(Some(id), move |&s| self.intervals[s].next_sibling.expand())
    }

    /// The last sibling of the chain containing `id`.
    pub fn last_sibling(&self, id: IntervalId) -> IntervalId {
        self.siblings(id).last().unwrap_or(id)
    }

    /// The sibling, starting from `id`, whose span contains `position`.
    pub fn sibling_at(&self, id: IntervalId, position: Position) -> Option<IntervalId> {
        self.siblings(id)
            .find(|&s| self.intervals[s].is_defined_at(position))
    }

    /// The spill slot of the chain `id` belongs to.
    pub fn spill_slot(&self, id: IntervalId) -> Option<i32> {
        self.intervals[self.parent(id)].spill_slot
    }

    /// Set the spill slot of the chain `id` belongs to.
    pub fn set_spill_slot(&mut self, id: IntervalId, slot: i32) {
        let parent = self.parent(id);
        self.intervals[parent].spill_slot = Some(slot);
    }

    /// Use positions of the sibling `id`, ascending.
    pub fn uses(&self, id: IntervalId) -> &[UsePosition] {
        let interval = &self.intervals[id];
        let parent = &self.intervals[self.parent(id)];
        in_span(&parent.uses, interval.start(), interval.end())
    }

    /// Environment use positions of the sibling `id`, ascending.
    pub fn env_uses(&self, id: IntervalId) -> &[EnvUsePosition] {
        let interval = &self.intervals[id];
        let parent = &self.intervals[self.parent(id)];
        in_span(&parent.env_uses, interval.start(), interval.end())
    }

    /// Every use of the value `id` belongs to, across all siblings.
    pub fn all_uses(&self, id: IntervalId) -> &[UsePosition] {
        &self.intervals[self.parent(id)].uses
    }

    /// Every environment use of the value `id` belongs to.
    pub fn all_env_uses(&self, id: IntervalId) -> &[EnvUsePosition] {
        &self.intervals[self.parent(id)].env_uses
    }

    fn is_defining_position(&self, id: IntervalId, position: Position) -> bool {
        let interval = &self.intervals[id];
        !interval.is_split() && position == interval.start()
    }

    /// First position after `position` where the sibling `id` must be in a register. The
    /// definition counts when `position` is the start of a parent whose output needs a
    /// register.
    pub fn first_register_use_after(&self, id: IntervalId, position: Position) -> Option<Position> {
        let interval = &self.intervals[id];
        if interval.is_temp() {
            return (position == interval.start()).then_some(position);
        }
        if self.is_defining_position(id, position) && interval.definition_requires_register {
            return Some(position);
        }
        self.uses(id)
            .iter()
            .find(|u| u.position > position && u.requires_register)
            .map(|u| u.position)
    }

    /// First register use of the sibling `id`.
    pub fn first_register_use(&self, id: IntervalId) -> Option<Position> {
        self.first_register_use_after(id, self.intervals[id].start())
    }

    /// First use of any kind after `position`.
    pub fn first_use_after(&self, id: IntervalId, position: Position) -> Option<Position> {
        let interval = &self.intervals[id];
        if interval.is_temp() {
            return (position == interval.start()).then_some(position);
        }
        if self.is_defining_position(id, position) {
            return Some(position);
        }
        self.uses(id)
            .iter()
            .find(|u| u.position > position)
            .map(|u| u.position)
    }

    /// Does the sibling `id` need a register somewhere?
    pub fn requires_register(&self, id: IntervalId) -> bool {
        self.first_register_use(id).is_some()
    }

    /// The location of the sibling `id`: its register, else the parent's slot or constant.
    pub fn location(&self, id: IntervalId) -> Location {
        let interval = &self.intervals[id];
        debug_assert!(!interval.is_high);
        if let Some(reg) = interval.register {
            let high = interval
                .high()
                .and_then(|h| self.intervals[h].register);
            return match (interval.is_floating_point(), high) {
                (true, Some(high)) => Location::FpuRegisterPair { low: reg, high },
                (true, None) => Location::FpuRegister(reg),
                (false, Some(high)) => Location::RegisterPair { low: reg, high },
                (false, None) => Location::Register(reg),
            };
        }
        let parent = &self.intervals[self.parent(id)];
        match (parent.is_constant, parent.defined_by.expand(), parent.spill_slot) {
            (true, Some(inst), _) => Location::Constant(inst),
            (_, _, Some(slot)) if interval.needs_two_spill_slots() => Location::DoubleStackSlot(slot),
            (_, _, Some(slot)) => Location::StackSlot(slot),
            _ => Location::Invalid,
        }
    }

    /// The location of the value at `position`.
    pub fn location_at(&self, id: IntervalId, position: Position) -> Location {
        self.sibling_at(id, position)
            .map_or(Location::Invalid, |s| self.location(s))
    }

    /// Split the sibling `id` at `position`, returning the new sibling owning everything at and
    /// after it. Returns `None` if the interval is already dead at `position`.
    ///
    /// A range covering `position` is cut in two; a `position` inside a hole only cuts the list
    /// of ranges. Safepoints before `position` stay with `id`.
    pub fn split_at(&mut self, id: IntervalId, position: Position) -> Option<IntervalId> {
        let interval = &mut self.intervals[id];
        debug_assert!(!interval.is_temp() && !interval.is_fixed());
        debug_assert!(position > interval.start());
        if interval.end() <= position {
            return None;
        }

        let mut new_interval = LiveInterval::new(interval.ty, interval.kind);
        let cut = interval.ranges.partition_point(|r| r.end <= position);
        let mut tail: SmallVec<[LiveRange; 2]> = interval.ranges.drain(cut..).collect();
        if tail[0].start < position {
            // This range covers `position`: keep its head.
            interval.ranges.push(LiveRange::new(tail[0].start, position));
            tail[0].start = position;
        }
        new_interval.ranges = tail;

        let keep = interval.safepoints.partition_point(|s| s.position < position);
        new_interval.safepoints = interval.safepoints.split_off(keep);

        let parent = interval.parent.expand().unwrap_or(id);
        new_interval.parent = parent.into();
        new_interval.next_sibling = interval.next_sibling;
        new_interval.is_high = interval.is_high;
        new_interval.defined_by = interval.defined_by;
        new_interval.is_constant = interval.is_constant;
        new_interval.definition_requires_register = interval.definition_requires_register;

        let new_id = self.intervals.push(new_interval);
        self.intervals[id].next_sibling = new_id.into();
        Some(new_id)
    }

    /// Link `low` and `high` as the two halves of a pair.
    pub(crate) fn link_pair(&mut self, low: IntervalId, high: IntervalId) {
        self.intervals[low].paired = high.into();
        self.intervals[low].is_high = false;
        self.intervals[high].paired = low.into();
        self.intervals[high].is_high = true;
    }

    /// Display adapter for the sibling `id`.
    pub fn display(&self, id: IntervalId) -> DisplayInterval<'_> {
        DisplayInterval { pool: self, id }
    }
}

/// Displays an interval with its ranges and location.
pub struct DisplayInterval<'a> {
    pool: &'a IntervalPool,
    id: IntervalId,
}

impl fmt::Display for DisplayInterval<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let interval = &self.pool[self.id];
        write!(f, "{} {}", self.id, interval.ty)?;
        for range in &interval.ranges {
            write!(f, " {range}")?;
        }
        if let Some(reg) = interval.register {
            write!(f, " reg={reg}")?;
        }
        if let Some(slot) = self.pool.spill_slot(self.id) {
            write!(f, " slot={slot}")?;
        }
        if interval.is_split() {
            write!(f, " parent={}", self.pool.parent(self.id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use proptest::prelude::*;

    fn use_at(user: usize, position: Position, requires_register: bool) -> UsePosition {
        UsePosition {
            user: Inst::new(user),
            input_index: 0,
            position,
            requires_register,
            is_phi: false,
        }
    }

    fn value(pool: &mut IntervalPool, ranges: &[(Position, Position)]) -> IntervalId {
        let id = pool.new_value(Type::Int32, Inst::new(0), false, true);
        for &(start, end) in ranges.iter().rev() {
            pool[id].add_range(start, end);
        }
        id
    }

    #[test]
    fn ranges_from_backward_scan() {
        let mut pool = IntervalPool::new();
        let id = pool.new_value(Type::Int32, Inst::new(0), false, false);
        // Block [10, 20) with a use at 15, then an adjacent predecessor block [4, 10).
        pool[id].add_use(use_at(1, 15, true), 10);
        pool[id].add_range(4, 10);
        pool[id].set_from(6);
        assert_eq!(pool[id].ranges(), &[LiveRange::new(6, 15)]);
        assert!(pool[id].covers(6));
        assert!(!pool[id].covers(15));
        assert_eq!(pool.first_register_use(id), Some(15));
    }

    #[test]
    fn use_in_earlier_block_leaves_hole() {
        let mut pool = IntervalPool::new();
        let id = pool.new_value(Type::Int32, Inst::new(0), false, false);
        pool[id].add_use(use_at(2, 31, false), 30);
        pool[id].add_use(use_at(1, 13, false), 10);
        pool[id].set_from(4);
        assert_eq!(
            pool[id].ranges(),
            &[LiveRange::new(4, 13), LiveRange::new(30, 31)]
        );
        assert!(!pool[id].covers(20));
        assert!(pool[id].is_defined_at(20));
    }

    #[test]
    fn fixed_ranges_merge() {
        let mut pool = IntervalPool::new();
        let id = pool.new_fixed(0, false);
        pool[id].add_range(10, 11);
        pool[id].add_range(10, 11);
        pool[id].add_range(4, 5);
        pool[id].add_range(0, 40);
        assert_eq!(pool[id].ranges(), &[LiveRange::new(0, 40)]);
    }

    #[test]
    fn loop_range_absorbs_inner_ranges() {
        let mut pool = IntervalPool::new();
        let id = value(&mut pool, &[(12, 14), (16, 18), (30, 34)]);
        pool[id].add_loop_range(10, 20);
        assert_eq!(
            pool[id].ranges(),
            &[LiveRange::new(10, 20), LiveRange::new(30, 34)]
        );

        let id = value(&mut pool, &[(12, 14), (18, 26)]);
        pool[id].add_loop_range(10, 20);
        assert_eq!(pool[id].ranges(), &[LiveRange::new(10, 26)]);

        let id = value(&mut pool, &[(12, 14)]);
        pool[id].add_loop_range(10, 20);
        assert_eq!(pool[id].ranges(), &[LiveRange::new(10, 20)]);
    }

    #[test]
    fn intersections() {
        let mut pool = IntervalPool::new();
        let a = value(&mut pool, &[(0, 4), (10, 14)]);
        let b = value(&mut pool, &[(4, 8), (12, 20)]);
        let c = value(&mut pool, &[(14, 16)]);
        assert_eq!(pool[a].first_intersection_with(&pool[b]), Some(12));
        assert_eq!(pool[a].first_intersection_with(&pool[c]), None);
        assert_eq!(pool[c].first_intersection_with(&pool[b]), Some(14));
    }

    #[test]
    fn split_in_range_and_in_hole() {
        let mut pool = IntervalPool::new();
        let id = value(&mut pool, &[(2, 10), (20, 30)]);
        pool[id].add_safepoint(Inst::new(5), 6, true);
        pool[id].add_safepoint(Inst::new(7), 24, false);

        let second = pool.split_at(id, 6).unwrap();
        assert_eq!(pool[id].ranges(), &[LiveRange::new(2, 6)]);
        assert_eq!(
            pool[second].ranges(),
            &[LiveRange::new(6, 10), LiveRange::new(20, 30)]
        );
        assert!(pool[id].safepoints().is_empty());
        assert_eq!(pool[second].safepoints().len(), 2);
        assert!(pool[second].has_will_call_safepoint());

        let third = pool.split_at(second, 14).unwrap();
        assert_eq!(pool[second].ranges(), &[LiveRange::new(6, 10)]);
        assert_eq!(pool[third].ranges(), &[LiveRange::new(20, 30)]);
        assert_eq!(pool.parent(third), id);
        assert_eq!(pool.siblings(id).collect::<Vec<_>>(), [id, second, third]);
        assert_eq!(pool.sibling_at(id, 12), Some(second));
        assert_eq!(pool.sibling_at(id, 30), None);
        assert_eq!(pool.split_at(third, 30), None);
    }

    #[test]
    fn locations() {
        let mut pool = IntervalPool::new();
        let id = value(&mut pool, &[(2, 10)]);
        assert_eq!(pool.location(id), Location::Invalid);
        pool.set_spill_slot(id, 3);
        assert_eq!(pool.location(id), Location::StackSlot(3));
        pool[id].set_register(2);
        assert_eq!(pool.location(id), Location::Register(2));

        let wide = pool.new_value(Type::Float64, Inst::new(1), false, true);
        pool[wide].add_range(2, 8);
        let high = pool.add_high_interval(wide);
        pool[wide].set_register(4);
        pool[high].set_register(5);
        assert_eq!(pool.location(wide), Location::FpuRegisterPair { low: 4, high: 5 });
        pool[wide].clear_register();
        pool.set_spill_slot(wide, 6);
        assert_eq!(pool.location(wide), Location::DoubleStackSlot(6));

        let constant = pool.new_value(Type::Int32, Inst::new(2), true, false);
        pool[constant].add_range(0, 4);
        assert_eq!(pool.location(constant), Location::Constant(Inst::new(2)));
    }

    proptest! {
        #[test]
        fn split_preserves_ranges_and_uses(
            gaps in proptest::collection::vec((1u32..6, 1u32..8), 1..6),
            split_offset in 1u32..60,
        ) {
            let mut pool = IntervalPool::new();
            let mut ranges = Vec::new();
            let mut cursor = 0;
            for (gap, len) in gaps {
                ranges.push((cursor + gap, cursor + gap + len));
                cursor += gap + len;
            }
            let id = value(&mut pool, &ranges);
            let uses: Vec<Position> = ranges.iter().map(|&(_, end)| end).collect();
            for (i, &position) in uses.iter().enumerate() {
                insert_sorted(&mut pool[id].uses, use_at(i, position, true));
            }
            let start = pool[id].start();
            let end = pool[id].end();
            let position = start + 1 + split_offset % (end - start - 1).max(1);
            prop_assume!(position > start && position < end);

            let before: Vec<Position> = (start..end).filter(|&p| pool[id].covers(p)).collect();
            let new = pool.split_at(id, position).unwrap();
            prop_assert!(pool[id].end() <= position);
            prop_assert!(pool[new].start() >= position);
            for p in start..end {
                let covered = pool[id].covers(p) || pool[new].covers(p);
                prop_assert_eq!(covered, before.contains(&p));
                prop_assert!(!(pool[id].covers(p) && pool[new].covers(p)));
            }
            let mut seen: Vec<Position> = pool.uses(id).iter().map(|u| u.position).collect();
            seen.extend(pool.uses(new).iter().map(|u| u.position).filter(|&p| p != pool[id].end()));
            seen.dedup();
            prop_assert_eq!(seen, uses);
        }
    }
}
