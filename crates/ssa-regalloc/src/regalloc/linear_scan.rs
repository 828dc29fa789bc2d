//! Linear scan register allocation.
//!
//! Intervals are handled in increasing order of their start. At each start, the intervals
//! allocated so far are sorted into *active* (covering the position), *inactive* (in a
//! lifetime hole) and *handled* (dead). The current interval takes a register that is free for
//! as long as possible; when none is free for its first register use, either the current
//! interval or the holders of the register whose next use is the furthest are split and
//! spilled.
//!
//! Core and floating point registers are allocated by two independent scans.

use super::allocator::{AllocState, Allocation, Work};
use super::interval::{IntervalId, IntervalPool};
use super::liverange::{MAX_LIFETIME_POSITION, Position};
use super::liveness::Liveness;
use crate::ir::{Function, Location, Policy, RegUnit};
use crate::isa::TargetRegisters;
use crate::result::{RegallocError, RegallocResult};
use crate::timing;
use log::{debug, trace};
use std::vec::Vec;

/// Allocate every interval of `func` by linear scan.
pub(crate) fn run(
    func: &Function,
    liveness: &Liveness,
    pool: &mut IntervalPool,
    target: &dyn TargetRegisters,
) -> RegallocResult<Allocation> {
    let _tt = timing::linear_scan();
    let mut state = AllocState::new(func, liveness, pool, target, true);

    let mut core = Vec::new();
    let mut fp = Vec::new();
    for work in state.process_instructions() {
        match work {
            Work::Push(id) => {
                if state.pool[id].is_floating_point() {
                    fp.push(id);
                } else {
                    core.push(id);
                }
            }
            Work::Insert(id) => {
                let list = if state.pool[id].is_floating_point() {
                    &mut fp
                } else {
                    &mut core
                };
                add_sorted(state.pool, list, id);
            }
            Work::SlowPathSafepoint(id) => {
                add_sorted(state.pool, &mut core, id);
                add_sorted(state.pool, &mut fp, id);
            }
        }
    }

    let mut max_safepoint_live = [0, 0];
    for (is_fp, unhandled) in [(false, core), (true, fp)] {
        let mut scan = LinearScan::new(&mut state, is_fp, unhandled);
        scan.run()?;
        debug!(
            "{} scan done, {} intervals handled",
            if is_fp { "fp" } else { "core" },
            scan.handled.len()
        );
        max_safepoint_live[is_fp as usize] = scan.max_safepoint_live;
    }

    state.enforce_spilled_live_ins();
    Ok(state.finish(max_safepoint_live[0], max_safepoint_live[1]))
}

/// Insert `id` into `list`, kept sorted by decreasing start, so that it is popped before the
/// intervals starting after it. A pair is inserted with its high half first so that the low
/// half is popped first.
fn add_sorted(pool: &IntervalPool, list: &mut Vec<IntervalId>, id: IntervalId) {
    let start = pool[id].start();
    let insert_at = list
        .iter()
        .rposition(|&other| pool[other].start() > start && !pool[other].is_high())
        .map_or(0, |i| i + 1);
    let interval = &pool[id];
    match (interval.high(), interval.low()) {
        (Some(high), _) => {
            list.insert(insert_at, id);
            list.insert(insert_at, high);
        }
        (None, Some(low)) => {
            list.insert(insert_at, low);
            list.insert(insert_at, id);
        }
        (None, None) => list.insert(insert_at, id),
    }
}

/// One scan over the intervals of a register class.
struct LinearScan<'s, 'a> {
    state: &'s mut AllocState<'a>,
    fp: bool,
    num_registers: usize,
    /// Sorted by decreasing start: the next interval is at the back.
    unhandled: Vec<IntervalId>,
    active: Vec<IntervalId>,
    inactive: Vec<IntervalId>,
    handled: Vec<IntervalId>,
    max_safepoint_live: u32,
}

impl<'s, 'a> LinearScan<'s, 'a> {
    fn new(state: &'s mut AllocState<'a>, fp: bool, unhandled: Vec<IntervalId>) -> Self {
        let num_registers = state.target.num_registers(fp);
        // Physical registers start inactive: their ranges may begin anywhere.
        let inactive = state
            .physical_intervals(fp)
            .iter()
            .copied()
            .filter(|&id| !state.pool[id].ranges().is_empty())
            .collect();
        Self {
            state,
            fp,
            num_registers,
            unhandled,
            active: Vec::new(),
            inactive,
            handled: Vec::new(),
            max_safepoint_live: 0,
        }
    }

    fn pool(&self) -> &IntervalPool {
        self.state.pool
    }

    fn is_blocked(&self, reg: usize) -> bool {
        reg >= self.num_registers || self.state.target.is_blocked(reg as RegUnit, self.fp)
    }

    fn run(&mut self) -> RegallocResult<()> {
        while let Some(current) = self.unhandled.pop() {
            let position = self.pool()[current].start();
            trace!("current: {}", self.pool().display(current));

            // Intervals moved from active to inactive below start in a hole at `position`
            // and need no second look.
            let inactive_to_handle = self.inactive.len();

            for id in core::mem::take(&mut self.active) {
                let interval = &self.state.pool[id];
                if interval.is_dead_at(position) {
                    self.handled.push(id);
                } else if !interval.covers(position) {
                    self.inactive.push(id);
                } else {
                    self.active.push(id);
                }
            }

            for (index, id) in core::mem::take(&mut self.inactive).into_iter().enumerate() {
                let interval = &self.state.pool[id];
                if index >= inactive_to_handle {
                    self.inactive.push(id);
                } else if interval.is_dead_at(position) {
                    self.handled.push(id);
                } else if interval.covers(position) {
                    self.active.push(id);
                } else {
                    self.inactive.push(id);
                }
            }

            if self.pool()[current].is_slow_path_safepoint() {
                let live = self
                    .active
                    .iter()
                    .filter(|&&id| !self.state.pool[id].is_fixed())
                    .count() as u32;
                self.max_safepoint_live = self.max_safepoint_live.max(live);
                continue;
            }

            if let Some(low) = self.pool()[current].low() {
                if self.pool()[current].is_high() && !self.pool()[low].has_register() {
                    // The low half was spilled. Its split sibling, with the matching high
                    // half, is queued already.
                    continue;
                }
            }

            let success = self.try_allocate_free_reg(current) || self.allocate_blocked_reg(current)?;
            if success {
                let Some(reg) = self.pool()[current].register() else {
                    continue;
                };
                self.state.mark_allocated(reg, self.fp);
                self.active.push(current);
                if let Some(high) = self.pool()[current].high() {
                    if !self.state.pool[high].has_register() {
                        self.state.pool[high].set_register(reg + 1);
                    }
                }
            }
        }
        Ok(())
    }

    /// Try to give `current` a register that is free at its start. Splits `current` if the
    /// register is taken again before its end.
    fn try_allocate_free_reg(&mut self, current: IntervalId) -> bool {
        let mut free_until = std::vec![MAX_LIFETIME_POSITION; self.num_registers];
        let pool = self.pool();

        for &id in &self.active {
            if let Some(reg) = pool[id].register() {
                free_until[reg as usize] = 0;
            }
        }

        // The output of an unsplit interval may go in the register of an input that dies at
        // the definition.
        let interval = &pool[current];
        if let Some(def) = interval.defined_by().filter(|_| !interval.is_split()) {
            let func = self.state.func;
            let liveness = self.state.liveness;
            if let Some(locations) = func.locations(def) {
                if !locations.output_overlaps && locations.output.is_unallocated() {
                    let position = liveness.position(def);
                    for (index, &input) in func.inst(def).inputs.iter().enumerate() {
                        if !locations.in_at(index).is_valid() {
                            continue;
                        }
                        let Some(sibling) = liveness
                            .interval(input)
                            .and_then(|root| pool.sibling_at(root, position))
                        else {
                            continue;
                        };
                        if pool[sibling].has_register() && pool[sibling].same_register_kind(interval) {
                            free_if_dead_at(pool, sibling, position + 1, &mut free_until);
                        }
                    }
                }
            }
        }

        for &id in &self.inactive {
            let inactive = &pool[id];
            if !interval.is_split() && !inactive.is_fixed() {
                // Two unsplit SSA intervals never intersect when one starts in the hole of
                // the other.
                continue;
            }
            let Some(reg) = inactive.register() else {
                continue;
            };
            let reg = reg as usize;
            if free_until[reg] == 0 {
                continue;
            }
            if let Some(next) = inactive.first_intersection_with(interval) {
                free_until[reg] = free_until[reg].min(next);
            }
        }

        let is_low = interval.high().is_some();
        let reg = if let Some(reg) = interval.register() {
            // A fixed output, or the high half of a pair.
            Some(reg as usize)
        } else {
            let hint = self
                .find_first_register_hint(current, &free_until)
                .filter(|&hint| !(is_low && self.is_blocked(hint + 1)));
            match hint {
                Some(hint) => Some(hint),
                None if is_low => self.find_available_register_pair(&free_until, interval.start()),
                None => self.find_available_register(&free_until, current),
            }
        };
        let Some(reg) = reg else {
            return false;
        };
        let start = interval.start();
        if free_until[reg] <= start {
            return false;
        }
        if let Some(high) = interval.high() {
            let high_reg = pool[high].register().map_or(reg + 1, usize::from);
            if high_reg >= self.num_registers || free_until[high_reg] <= start {
                return false;
            }
        }

        self.state.pool[current].set_register(reg as RegUnit);
        let free = free_until[reg];
        if !self.pool()[current].is_dead_at(free) {
            // The register is only free for a while: the rest goes back to the queue.
            if let Some(split) = self.state.split_between(current, start, free) {
                add_sorted(self.state.pool, &mut self.unhandled, split);
            }
        }
        true
    }

    /// Find a register for `current` by spilling, either `current` up to its first register
    /// use, or the intervals holding the register whose next use is the furthest.
    ///
    /// Returns whether `current` got a register.
    fn allocate_blocked_reg(&mut self, current: IntervalId) -> RegallocResult<bool> {
        let pool = self.pool();
        let interval = &pool[current];
        let first_register_use = match pool.first_register_use(current) {
            Some(position) => position,
            // The high half of a pair with no use left still has to take its register.
            None if interval.has_register() => MAX_LIFETIME_POSITION,
            None => {
                self.state.allocate_spill_slot_for(current);
                return Ok(false);
            }
        };
        let start = interval.start();

        let mut next_use = std::vec![MAX_LIFETIME_POSITION; self.num_registers];
        for &id in &self.active {
            let active = &pool[id];
            let Some(reg) = active.register() else {
                continue;
            };
            if active.is_fixed() {
                next_use[reg as usize] = start;
            } else if let Some(position) = pool.first_register_use_after(id, start) {
                next_use[reg as usize] = position;
            }
        }
        for &id in &self.inactive {
            let inactive = &pool[id];
            if !interval.is_split() && !inactive.is_fixed() {
                continue;
            }
            let Some(reg) = inactive.register() else {
                continue;
            };
            let reg = reg as usize;
            let Some(next) = inactive.first_intersection_with(interval) else {
                continue;
            };
            if inactive.is_fixed() {
                next_use[reg] = next_use[reg].min(next);
            } else if let Some(position) = pool.first_use_after(id, start) {
                next_use[reg] = next_use[reg].min(position);
            }
        }

        let is_low = interval.high().is_some();
        let (reg, should_spill) = if let Some(reg) = interval.register() {
            (Some(reg as usize), false)
        } else if is_low {
            let reg = self.find_available_register_pair(&next_use, first_register_use);
            let spill = reg.is_none_or(|r| {
                first_register_use >= next_use[r] || first_register_use >= next_use[r + 1]
            });
            (reg, spill)
        } else {
            let reg = self.find_available_register(&next_use, current);
            (reg, reg.is_none_or(|r| first_register_use >= next_use[r]))
        };

        let reg = match reg {
            Some(reg) if !should_spill => reg,
            _ => {
                let at_use_site = start >= first_register_use.saturating_sub(1);
                if at_use_site {
                    // The register is needed right here. Only a misaligned pair can still be
                    // helped, by evicting an interval that blocks an aligned pair.
                    if !is_low
                        || !self.try_split_non_pair_or_unaligned_pair_at(
                            start,
                            first_register_use,
                            &next_use,
                        )
                    {
                        return Err(RegallocError::InsufficientRegisters {
                            position: first_register_use,
                        });
                    }
                    self.unhandled.push(current);
                } else {
                    self.state.allocate_spill_slot_for(current);
                    if let Some(split) =
                        self.state
                            .split_between(current, start, first_register_use - 1)
                    {
                        if split != current {
                            add_sorted(self.state.pool, &mut self.unhandled, split);
                        }
                    }
                }
                return Ok(false);
            }
        };

        // Take the register, splitting the intervals holding it.
        self.state.pool[current].set_register(reg as RegUnit);

        let holder = self
            .active
            .iter()
            .position(|&id| self.state.pool[id].register() == Some(reg as RegUnit));
        if let Some(index) = holder {
            let active = self.active[index];
            debug_assert!(!self.state.pool[active].is_fixed());
            let split = self.state.split(active, start);
            if split != Some(active) {
                self.handled.push(active);
            }
            remove_with_other_half(self.state.pool, &mut self.active, index);
            if let Some(split) = split {
                add_sorted(self.state.pool, &mut self.unhandled, split);
            }
        }

        let mut index = 0;
        while index < self.inactive.len() {
            let id = self.inactive[index];
            let pool = &self.state.pool;
            if pool[id].register() != Some(reg as RegUnit)
                || (!pool[current].is_split() && !pool[id].is_fixed())
            {
                index += 1;
                continue;
            }
            let Some(next) = pool[id].first_intersection_with(&pool[current]) else {
                index += 1;
                continue;
            };
            if pool[id].is_fixed() {
                if let Some(split) = self.state.split(current, next) {
                    add_sorted(self.state.pool, &mut self.unhandled, split);
                }
                index += 1;
            } else {
                // Splitting at the start of `current` cuts `id` at the end of its hole.
                let split = self.state.split(id, start);
                index = remove_with_other_half(self.state.pool, &mut self.inactive, index);
                self.handled.push(id);
                if let Some(split) = split {
                    add_sorted(self.state.pool, &mut self.unhandled, split);
                }
            }
        }
        Ok(true)
    }

    /// Evict the first active interval that keeps an aligned pair from being free: a single
    /// register, or a pair whose registers are not `(2n, 2n + 1)`.
    fn try_split_non_pair_or_unaligned_pair_at(
        &mut self,
        position: Position,
        first_register_use: Position,
        next_use: &[Position],
    ) -> bool {
        for index in 0..self.active.len() {
            let id = self.active[index];
            let pool = &self.state.pool;
            let active = &pool[id];
            if active.is_fixed() || active.is_high() || active.is_temp() {
                continue;
            }
            let Some(reg) = active.register() else {
                continue;
            };
            if first_register_use > next_use[reg as usize] {
                continue;
            }
            let unaligned = match active.high() {
                None => true,
                Some(high) => reg % 2 != 0 || pool[high].register() != Some(reg + 1),
            };
            if unaligned {
                let split = self.state.split(id, position);
                if split != Some(id) {
                    self.handled.push(id);
                }
                remove_with_other_half(self.state.pool, &mut self.active, index);
                if let Some(split) = split {
                    add_sorted(self.state.pool, &mut self.unhandled, split);
                }
                return true;
            }
        }
        false
    }

    /// The register that stays free the longest. Registers free until the end are taken
    /// right away, preferring caller-save ones for intervals that do not live across a call.
    fn find_available_register(
        &self,
        next_use: &[Position],
        current: IntervalId,
    ) -> Option<usize> {
        let prefers_caller_save = !self.pool()[current].has_will_call_safepoint();
        let mut candidate: Option<usize> = None;
        for reg in 0..self.num_registers {
            if self.is_blocked(reg) {
                continue;
            }
            if next_use[reg] == MAX_LIFETIME_POSITION {
                let callee_save = self.state.target.is_callee_save(reg as RegUnit, self.fp);
                if prefers_caller_save && callee_save {
                    // Keep looking for a caller-save register, but remember this one unless
                    // a fully free register was found already.
                    if candidate.is_none_or(|c| next_use[c] != MAX_LIFETIME_POSITION) {
                        candidate = Some(reg);
                    }
                    continue;
                }
                return Some(reg);
            }
            match candidate {
                None => candidate = Some(reg),
                Some(c) if next_use[reg] > next_use[c] => candidate = Some(reg),
                Some(_) => {}
            }
        }
        candidate
    }

    /// The aligned pair `(2n, 2n + 1)` that stays free the longest.
    fn find_available_register_pair(
        &self,
        next_use: &[Position],
        starting_at: Position,
    ) -> Option<usize> {
        let mut candidate: Option<usize> = None;
        for low in (0..self.num_registers).step_by(2) {
            let high = low + 1;
            if self.is_blocked(low) || self.is_blocked(high) {
                continue;
            }
            let better = candidate
                .is_none_or(|c| next_use[low] >= next_use[c] && next_use[high] >= next_use[c + 1]);
            if better {
                candidate = Some(low);
                if next_use[low] == MAX_LIFETIME_POSITION && next_use[high] == MAX_LIFETIME_POSITION
                {
                    break;
                }
            } else if let Some(c) = candidate {
                if next_use[c] <= starting_at || next_use[c + 1] <= starting_at {
                    // The current candidate is unusable anyway.
                    candidate = Some(low);
                }
            }
        }
        candidate
    }

    /// A register that would save a move if given to `current`.
    fn find_first_register_hint(
        &self,
        current: IntervalId,
        free_until: &[Position],
    ) -> Option<usize> {
        let pool = self.pool();
        let func = self.state.func;
        let liveness = self.state.liveness;
        let interval = &pool[current];
        if interval.is_temp() {
            return None;
        }
        let start = interval.start();
        let end = interval.end();
        let usable = |location: Location, until: Position| -> Option<usize> {
            let is_fp = location.is_fpu_register() || location.is_fpu_register_pair();
            let reg = location.reg()? as usize;
            (location.is_register_kind()
                && is_fp == self.fp
                && !self.is_blocked(reg)
                && free_until[reg] >= until)
                .then_some(reg)
        };

        if !interval.is_split() {
            if let Some(def) = interval.defined_by() {
                let hint = self.find_hint_at_definition(current, def);
                if let Some(reg) = hint.and_then(|location| usable(location, start + 1)) {
                    return Some(reg);
                }
            }
        }

        if interval.is_split() && liveness.is_at_block_boundary(start) {
            // Take the register the value has at the end of a predecessor, saving a move on
            // that edge.
            if let Some(block) = liveness.block_at(start) {
                let next_register_use = pool
                    .first_register_use(current)
                    .unwrap_or(MAX_LIFETIME_POSITION);
                let parent = pool.parent(current);
                for &pred in &func.block(block).preds {
                    let end = liveness.block_end(pred);
                    if end == 0 || end - 1 >= start {
                        continue;
                    }
                    let Some(existing) = pool.sibling_at(parent, end - 1) else {
                        continue;
                    };
                    if let Some(reg) = pool[existing].register() {
                        let reg = reg as usize;
                        if !self.is_blocked(reg) && free_until[reg] >= next_register_use {
                            return Some(reg);
                        }
                    }
                }
            }
        }

        for use_pos in pool.uses(current) {
            let position = use_pos.position;
            if position < start || position > end {
                continue;
            }
            let user = use_pos.user;
            let input_index = use_pos.input_index as usize;
            if use_pos.is_phi {
                // Share the register of the phi.
                if let Some(phi) = liveness.interval(user) {
                    if let Some(reg) = usable(pool.location(phi), position) {
                        return Some(reg);
                    }
                }
                // Or, when dying at the end of the predecessor, the register of another
                // input of the phi.
                let preds = &func.block(func.inst_block(user)).preds;
                if preds
                    .get(input_index)
                    .is_some_and(|&pred| liveness.block_end(pred) == end)
                {
                    for (index, &input) in func.inst(user).inputs.iter().enumerate() {
                        let (Some(&pred), Some(other)) = (preds.get(index), liveness.interval(input))
                        else {
                            continue;
                        };
                        let pred_end = liveness.block_end(pred);
                        if index == input_index || pred_end == 0 {
                            continue;
                        }
                        let location = pool.location_at(other, pred_end - 1);
                        if let Some(reg) = usable(location, position) {
                            return Some(reg);
                        }
                    }
                }
            } else if let Some(locations) = func.locations(user) {
                // A fixed input is blocked from the start of its user.
                let expected = locations.in_at(input_index);
                let before_user = liveness.position(user).saturating_sub(1);
                if let Some(reg) = usable(expected, before_user) {
                    return Some(reg);
                }
            }
        }
        None
    }

    /// A register hint for the first interval of a value: the register of a phi input that
    /// dies at the end of its predecessor, or of the first input of a same-as-first-input
    /// definition dying there.
    fn find_hint_at_definition(
        &self,
        current: IntervalId,
        def: crate::ir::Inst,
    ) -> Option<Location> {
        let pool = self.pool();
        let func = self.state.func;
        let liveness = self.state.liveness;
        let data = func.inst(def);
        if data.is_phi() {
            let preds = &func.block(func.inst_block(def)).preds;
            for (&input, &pred) in data.inputs.iter().zip(preds.iter()) {
                let end = liveness.block_end(pred);
                let Some(root) = liveness.interval(input) else {
                    continue;
                };
                if end == 0 {
                    continue;
                }
                let Some(sibling) = pool.sibling_at(root, end - 1) else {
                    continue;
                };
                if pool[sibling].end() == end {
                    let location = pool.location(sibling);
                    if location.is_register_kind() {
                        return Some(location);
                    }
                }
            }
        } else if func
            .locations(def)
            .is_some_and(|l| l.output == Location::Unallocated(Policy::SameAsFirstInput))
        {
            let start = pool[current].start();
            let root = data.inputs.first().and_then(|&input| liveness.interval(input))?;
            let sibling = pool.sibling_at(root, start.checked_sub(1)?)?;
            if pool[sibling].end() == start {
                let location = pool.location(sibling);
                if location.is_register_kind() {
                    return Some(location);
                }
            }
        }
        None
    }
}

/// Free the register of `id` for an interval defined at `position - 1` when `id` ends there.
///
/// An input only in a hole at `position` keeps its register: its next range would overlap the
/// new definition.
fn free_if_dead_at(
    pool: &IntervalPool,
    id: IntervalId,
    position: Position,
    free_until: &mut [Position],
) {
    let interval = &pool[id];
    let Some(reg) = interval.register() else {
        return;
    };
    if !interval.is_dead_at(position) {
        return;
    }
    free_until[reg as usize] = MAX_LIFETIME_POSITION;
    if let Some(high_reg) = interval.high().and_then(|h| pool[h].register()) {
        free_until[high_reg as usize] = MAX_LIFETIME_POSITION;
    }
}

/// Remove the interval at `index` and its other pair half from `list`. Returns the index from
/// which the list must be scanned again.
fn remove_with_other_half(pool: &IntervalPool, list: &mut Vec<IntervalId>, index: usize) -> usize {
    let id = list.remove(index);
    let mut next = index;
    if let Some(other) = pool[id].paired() {
        if let Some(other_index) = list.iter().position(|&x| x == other) {
            list.remove(other_index);
            next = next.min(other_index);
        }
    }
    next
}
