//! State and primitives shared by the linear scan and graph coloring allocators.
//!
//! Both allocators walk the function backwards once before allocating: temps and slow-path
//! safepoints are synthesized, registers demanded by fixed operands are blocked through the
//! intervals of the physical registers, and the value intervals are queued for allocation.
//! They then split intervals and hand out spill slots with the primitives below.

use super::interval::{IntervalId, IntervalPool};
use super::liverange::Position;
use super::liveness::Liveness;
use crate::ir::{Function, Inst, InstKind, Location, Policy, RegUnit, Type};
use crate::isa::TargetRegisters;
use crate::register_set::RegisterSet;
use log::trace;
use std::vec::Vec;

/// Number of allocator stack slots of each kind.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotCounts {
    /// 32-bit integer and reference slots.
    pub int: u32,
    /// Slots of 64-bit integers, two per value.
    pub long: u32,
    /// 32-bit float slots.
    pub float: u32,
    /// Slots of 64-bit floats, two per value.
    pub double: u32,
    /// Slots of catch phis.
    pub catch_phis: u32,
}

impl SlotCounts {
    /// All slots.
    pub fn total(&self) -> u32 {
        self.int + self.long + self.float + self.double + self.catch_phis
    }
}

/// Spill slots handed out so far. Each entry is the end of the lifetime of its last owner.
#[derive(Default)]
struct SpillSlots {
    int: Vec<Position>,
    long: Vec<Position>,
    float: Vec<Position>,
    double: Vec<Position>,
    catch_phis: u32,
}

impl SpillSlots {
    fn of_type(&mut self, ty: Type) -> &mut Vec<Position> {
        match ty {
            Type::Float64 => &mut self.double,
            Type::Int64 => &mut self.long,
            Type::Float32 => &mut self.float,
            _ => &mut self.int,
        }
    }

    fn counts(&self) -> SlotCounts {
        SlotCounts {
            int: self.int.len() as u32,
            long: self.long.len() as u32,
            float: self.float.len() as u32,
            double: self.double.len() as u32,
            catch_phis: self.catch_phis,
        }
    }
}

/// What an allocator must do with an interval found by [`AllocState::process_instructions`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Work {
    /// Allocate an interval. Its start is at or before the starts of the intervals queued
    /// before it.
    Push(IntervalId),
    /// Allocate an interval starting anywhere. Used for the pieces of values that only need a
    /// register from some point on.
    Insert(IntervalId),
    /// A slow-path safepoint marker, seen by both register classes.
    SlowPathSafepoint(IntervalId),
}

/// The result of allocation handed to the resolver.
pub(crate) struct Allocation {
    pub temps: Vec<IntervalId>,
    pub slots: SlotCounts,
    pub allocated: RegisterSet,
    pub max_safepoint_live_core: u32,
    pub max_safepoint_live_fp: u32,
}

/// Allocation state shared by both strategies.
pub(crate) struct AllocState<'a> {
    pub func: &'a Function,
    pub liveness: &'a Liveness,
    pub pool: &'a mut IntervalPool,
    pub target: &'a dyn TargetRegisters,
    physical_core: Vec<IntervalId>,
    physical_fp: Vec<IntervalId>,
    temps: Vec<IntervalId>,
    /// Safepoint instructions seen so far, in decreasing position order.
    safepoints: Vec<Inst>,
    slots: SpillSlots,
    allocated: RegisterSet,
    /// Reuse the slot of a value whose lifetime has ended.
    reuse_slots: bool,
}

impl<'a> AllocState<'a> {
    pub fn new(
        func: &'a Function,
        liveness: &'a Liveness,
        pool: &'a mut IntervalPool,
        target: &'a dyn TargetRegisters,
        reuse_slots: bool,
    ) -> Self {
        let max_position = liveness.max_position();
        let mut physical = |fp: bool| -> Vec<IntervalId> {
            (0..target.num_registers(fp))
                .map(|reg| {
                    let reg = reg as RegUnit;
                    let id = pool.new_fixed(reg, fp);
                    // Reserved registers are unavailable for the whole function.
                    if target.is_blocked(reg, fp) && max_position > 0 {
                        pool[id].add_range(0, max_position);
                    }
                    id
                })
                .collect()
        };
        let physical_core = physical(false);
        let physical_fp = physical(true);
        Self {
            func,
            liveness,
            pool,
            target,
            physical_core,
            physical_fp,
            temps: Vec::new(),
            safepoints: Vec::new(),
            slots: SpillSlots::default(),
            allocated: RegisterSet::empty(),
            reuse_slots,
        }
    }

    /// The fixed interval of physical register `reg`.
    pub fn physical(&self, reg: RegUnit, fp: bool) -> IntervalId {
        if fp {
            self.physical_fp[reg as usize]
        } else {
            self.physical_core[reg as usize]
        }
    }

    /// The fixed intervals of a register class, by register.
    pub fn physical_intervals(&self, fp: bool) -> &[IntervalId] {
        if fp { &self.physical_fp } else { &self.physical_core }
    }

    /// Record that `reg` holds a value somewhere in the function.
    pub fn mark_allocated(&mut self, reg: RegUnit, fp: bool) {
        self.allocated.add(reg, fp);
    }

    /// Make the register (or pair) at `location` unavailable over `[start, end)`.
    pub fn block_register(&mut self, location: Location, start: Position, end: Position) {
        let (fp, regs) = match location {
            Location::Register(r) => (false, [Some(r), None]),
            Location::FpuRegister(r) => (true, [Some(r), None]),
            Location::RegisterPair { low, high } => (false, [Some(low), Some(high)]),
            Location::FpuRegisterPair { low, high } => (true, [Some(low), Some(high)]),
            _ => return,
        };
        for reg in regs.into_iter().flatten() {
            if !self.target.is_blocked(reg, fp) {
                let id = self.physical(reg, fp);
                self.pool[id].add_range(start, end);
            }
        }
    }

    /// Make every register, or every caller-save register, unavailable over `[start, end)`.
    pub fn block_registers(&mut self, start: Position, end: Position, caller_save_only: bool) {
        for fp in [false, true] {
            for reg in 0..self.target.num_registers(fp) {
                let reg = reg as RegUnit;
                if caller_save_only && self.target.is_callee_save(reg, fp) {
                    continue;
                }
                let location = if fp {
                    Location::FpuRegister(reg)
                } else {
                    Location::Register(reg)
                };
                self.block_register(location, start, end);
            }
        }
    }

    /// Walk the function backwards, preparing every instruction for allocation.
    ///
    /// The returned work list is in walk order: a later `Push` never starts after an earlier
    /// one.
    pub fn process_instructions(&mut self) -> Vec<Work> {
        let mut work = Vec::new();
        let liveness = self.liveness;
        for &block in liveness.linear_order().iter().rev() {
            let block_data = self.func.block(block);
            for &inst in block_data.insts.iter().rev() {
                self.process_instruction(inst, &mut work);
            }
            for &phi in &block_data.phis {
                self.process_instruction(phi, &mut work);
            }
            if block_data.is_catch || liveness.loops().is_irreducible_header(block) {
                // Values live into a catch block or an irreducible loop must be in their spill
                // slot there: no register is free at the block start.
                let start = liveness.block_start(block);
                self.block_registers(start, start + 1, false);
            }
        }
        work
    }

    fn process_instruction(&mut self, inst: Inst, work: &mut Vec<Work>) {
        let func = self.func;
        let data = func.inst(inst);
        let Some(locations) = data.locations.as_ref() else {
            return;
        };
        let position = self.liveness.position(inst);

        for (index, &temp) in locations.temps.iter().enumerate() {
            match temp {
                Location::Register(_) | Location::FpuRegister(_) => {
                    self.block_register(temp, position, position + 1);
                    if let Some(reg) = temp.reg() {
                        self.allocated.add(reg, temp.is_fpu_register());
                    }
                }
                Location::Unallocated(Policy::RequiresRegister) => {
                    let id = self.pool.new_temp(Type::Int32);
                    self.pool[id].add_temp_use(inst, index as u32, position);
                    self.temps.push(id);
                    work.push(Work::Push(id));
                }
                Location::Unallocated(Policy::RequiresFpuRegister) => {
                    let id = self.pool.new_temp(Type::Float64);
                    self.pool[id].add_temp_use(inst, index as u32, position);
                    self.temps.push(id);
                    if self.target.needs_two_registers(Type::Float64) {
                        let high = self.pool.add_high_interval(id);
                        self.temps.push(high);
                        work.push(Work::Push(high));
                    }
                    work.push(Work::Push(id));
                }
                other => debug_assert!(false, "unexpected temp location {other} in {inst}"),
            }
        }

        if locations.needs_safepoint() {
            self.safepoints.push(inst);
            if locations.only_calls_on_slow_path() {
                // Records the registers live at the call, for sizing the save area.
                let marker = self.pool.new_slow_path_safepoint(inst, position);
                work.push(Work::SlowPathSafepoint(marker));
            }
        }

        if locations.will_call() {
            self.block_registers(position, position + 1, true);
        }

        for &input in &locations.inputs {
            if input.is_register_kind() {
                self.block_register(input, position, position + 1);
            }
        }

        let Some(current) = self.liveness.interval(inst) else {
            return;
        };
        if self.target.needs_two_registers(data.ty) {
            self.pool.add_high_interval(current);
        }
        self.add_safepoints_for(current);

        // Fixed outputs: the register is taken at the instruction, and the value starts just
        // after it.
        let output = locations.output;
        let fixed = match output {
            Location::Unallocated(Policy::SameAsFirstInput) => {
                Some(locations.in_at(0)).filter(|l| l.is_register_kind())
            }
            Location::Register(_)
            | Location::FpuRegister(_)
            | Location::RegisterPair { .. }
            | Location::FpuRegisterPair { .. } => {
                self.block_register(output, position, position + 1);
                Some(output)
            }
            Location::StackSlot(slot) | Location::DoubleStackSlot(slot) => {
                self.pool.set_spill_slot(current, slot);
                None
            }
            _ => None,
        };
        if let Some(fixed) = fixed {
            self.pool[current].set_from(position + 1);
            if let Some(reg) = fixed.reg() {
                self.pool[current].set_register(reg);
            }
            if let (Some(high), Some(high_reg)) = (self.pool[current].high(), fixed.high_reg()) {
                self.pool[high].set_from(position + 1);
                self.pool[high].set_register(high_reg);
            }
        }

        if data.is_phi() && func.block(func.inst_block(inst)).is_catch {
            self.allocate_spill_slot_for_catch_phi(current);
        }

        if self.pool.spill_slot(current).is_some() || data.is_constant() {
            // The value has a home outside registers until its first register use.
            if let Some(first_use) = self.pool.first_register_use(current) {
                let start = self.pool[current].start();
                if let Some(split) = self.split_between(current, start, first_use - 1) {
                    work.push(Work::Insert(split));
                }
            }
        } else {
            if let Some(high) = self.pool[current].high() {
                work.push(Work::Push(high));
            }
            work.push(Work::Push(current));
        }
    }

    /// Record on `current` the safepoints it is live across.
    fn add_safepoints_for(&mut self, current: IntervalId) {
        let start = self.pool[current].start();
        for &safepoint in self.safepoints.iter().rev() {
            let position = self.liveness.position(safepoint);
            let interval = &mut self.pool[current];
            if position == start {
                // The safepoint of the defining instruction does not see the value.
                continue;
            } else if interval.is_dead_at(position) {
                break;
            } else if !interval.covers(position) {
                continue;
            }
            let will_call = self
                .func
                .locations(safepoint)
                .is_some_and(|l| l.will_call());
            interval.add_safepoint(safepoint, position, will_call);
        }
    }

    /// Split `id` at `position`.
    ///
    /// At the start of the interval, the register is cleared and `id` itself is returned.
    /// Otherwise the new sibling owning `[position, end)` is returned; pair halves are split
    /// together. `None` when the interval is dead at `position`.
    pub fn split(&mut self, id: IntervalId, position: Position) -> Option<IntervalId> {
        debug_assert!(position >= self.pool[id].start());
        if position == self.pool[id].start() {
            self.pool[id].clear_register();
            if let Some(other) = self.pool[id].paired() {
                self.pool[other].clear_register();
            }
            return Some(id);
        }
        let new = self.pool.split_at(id, position)?;
        if let Some(other) = self.pool[id].paired() {
            if let Some(other_new) = self.pool.split_at(other, position) {
                if self.pool[id].is_high() {
                    self.pool.link_pair(other_new, new);
                } else {
                    self.pool.link_pair(new, other_new);
                }
            }
        }
        trace!("split {id} at {position}: {}", self.pool.display(new));
        Some(new)
    }

    /// Split `id` somewhere in `(from, to]`, preferring a block boundary where moves are
    /// already needed.
    pub fn split_between(
        &mut self,
        id: IntervalId,
        from: Position,
        to: Position,
    ) -> Option<IntervalId> {
        let liveness = self.liveness;
        let (Some(block_from), Some(mut block_to)) =
            (liveness.block_at(from), liveness.block_at(to))
        else {
            return self.split(id, to);
        };
        if block_from == block_to {
            return self.split(id, to);
        }

        // Splitting at the start of `to`'s block would need a move on every other path into
        // it. A block dominated by `from`'s dominator in between merges those paths.
        let domtree = liveness.domtree();
        if let Some(dominator) = domtree.idom(block_from) {
            for &dominated in domtree.dominated_blocks(dominator) {
                let position = liveness.block_start(dominated);
                if position > from && liveness.block_start(block_to) > position {
                    block_to = dominated;
                }
            }
        }

        // Hoist the split out of the loops that do not contain `from`.
        let outward: Vec<_> = liveness.loops().outward_loops(block_to).collect();
        for lp in outward {
            let header = liveness.loops().loop_header(lp);
            if liveness.block_start(block_from) >= liveness.block_start(header) {
                break;
            }
            block_to = header;
        }

        self.split(id, liveness.block_start(block_to))
    }

    /// Give the value of `id` a spill slot if it has none.
    pub fn allocate_spill_slot_for(&mut self, id: IntervalId) {
        if self.pool[id].is_high() {
            // The low half takes care of the slot.
            return;
        }
        let parent = self.pool.parent(id);
        if self.pool.spill_slot(parent).is_some() {
            return;
        }
        let Some(defined_by) = self.pool[parent].defined_by() else {
            return;
        };
        match self.func.inst(defined_by).kind {
            InstKind::Parameter(index) => {
                let slot = self.target.parameter_stack_slot(index);
                self.pool.set_spill_slot(parent, slot);
                return;
            }
            InstKind::CurrentMethod => {
                self.pool.set_spill_slot(parent, 0);
                return;
            }
            InstKind::Constant(_) => return,
            _ => {}
        }

        let parent_start = self.pool[parent].start();
        let end = self.pool[self.pool.last_sibling(id)].end();
        let needed = if self.pool[parent].needs_two_spill_slots() { 2 } else { 1 };
        let reuse = self.reuse_slots;
        let slots = self.slots.of_type(self.pool[parent].ty());
        let slot = if reuse {
            (0..slots.len())
                .find(|&slot| {
                    slots[slot..(slot + needed).min(slots.len())]
                        .iter()
                        .all(|&owner_end| owner_end <= parent_start)
                })
                .unwrap_or(slots.len())
        } else {
            slots.len()
        };
        for s in slot..slot + needed {
            if s == slots.len() {
                slots.push(end);
            } else {
                slots[s] = end;
            }
        }
        trace!("{parent} gets spill slot {slot}");
        self.pool.set_spill_slot(parent, slot as i32);
    }

    fn allocate_spill_slot_for_catch_phi(&mut self, id: IntervalId) {
        let slot = self.slots.catch_phis;
        self.pool.set_spill_slot(id, slot as i32);
        self.slots.catch_phis += if self.pool[id].needs_two_spill_slots() { 2 } else { 1 };
    }

    /// Make sure every value live into a catch block or an irreducible loop header is in its
    /// spill slot at the block start. A sibling still holding a register there is cut around
    /// the block start: the piece at the start is spilled and the rest keeps the register.
    pub fn enforce_spilled_live_ins(&mut self) {
        let liveness = self.liveness;
        for &block in liveness.linear_order() {
            if !self.func.block(block).is_catch && !liveness.loops().is_irreducible_header(block) {
                continue;
            }
            let start = liveness.block_start(block);
            for ssa in liveness.live_in(block).iter() {
                let inst = liveness.ssa_values()[ssa];
                if self.func.inst(inst).is_constant() {
                    continue;
                }
                let Some(root) = liveness.interval(inst) else {
                    continue;
                };
                let Some(sibling) = self.pool.sibling_at(root, start) else {
                    continue;
                };
                let Some(reg) = self.pool[sibling].register() else {
                    continue;
                };
                let high_reg = self.pool[sibling].high().and_then(|h| self.pool[h].register());
                trace!("spilling {sibling} at the entry of {block}");
                self.allocate_spill_slot_for(sibling);
                let piece = if self.pool[sibling].start() < start {
                    match self.split(sibling, start) {
                        Some(piece) => piece,
                        None => continue,
                    }
                } else {
                    sibling
                };
                let rest = self.split(piece, start + 1);
                self.pool[piece].clear_register();
                if let Some(high) = self.pool[piece].high() {
                    self.pool[high].clear_register();
                }
                if let Some(rest) = rest.filter(|&r| r != piece) {
                    self.pool[rest].set_register(reg);
                    if let (Some(high), Some(high_reg)) = (self.pool[rest].high(), high_reg) {
                        self.pool[high].set_register(high_reg);
                    }
                }
            }
        }
    }

    /// Finish allocation, handing the results to the resolver.
    pub fn finish(self, max_safepoint_live_core: u32, max_safepoint_live_fp: u32) -> Allocation {
        Allocation {
            temps: self.temps,
            slots: self.slots.counts(),
            allocated: self.allocated,
            max_safepoint_live_core,
            max_safepoint_live_fp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, CallKind, LocationSummary};
    use crate::isa::MachineDesc;
    use crate::regalloc::testing::{goto, op, ret, summary};

    fn analyze(func: &Function) -> (Liveness, IntervalPool) {
        let mut pool = IntervalPool::new();
        let mut liveness = Liveness::new();
        liveness.compute(func, &mut pool, false);
        (liveness, pool)
    }

    #[test]
    fn fixed_operands_block_registers() {
        let mut func = Function::new();
        let b0 = func.create_block();
        let a = op(&mut func, b0, &[]);
        let call = func.append_inst(
            b0,
            InstKind::Op("call"),
            Type::Int32,
            &[a],
            {
                let mut l = summary(&[Location::Register(1)], Location::Register(0));
                l.call_kind = CallKind::CallOnMainOnly;
                l
            },
        );
        ret(&mut func, b0, &[call]);

        let target = MachineDesc::new(4, 2).with_core_callee_saves(&[3]);
        let (liveness, mut pool) = analyze(&func);
        let mut state = AllocState::new(&func, &liveness, &mut pool, &target, true);
        let work = state.process_instructions();

        let p = liveness.position(call);
        for reg in 0..3 {
            assert!(state.pool[state.physical(reg, false)].covers(p), "r{reg}");
        }
        assert!(!state.pool[state.physical(3, false)].covers(p));
        assert!(state.pool[state.physical(0, true)].covers(p));

        let call_interval = liveness.interval(call).unwrap();
        assert_eq!(state.pool[call_interval].start(), p + 1);
        assert_eq!(state.pool[call_interval].register(), Some(0));
        // Walk order: the call's value comes before `a`.
        let a_interval = liveness.interval(a).unwrap();
        let position = |id| work.iter().position(|&w| w == Work::Push(id)).unwrap();
        assert!(position(call_interval) < position(a_interval));
    }

    #[test]
    fn safepoints_and_temps() {
        let mut func = Function::new();
        let b0 = func.create_block();
        let a = op(&mut func, b0, &[]);
        let mut locations = LocationSummary::new(0, CallKind::CallOnSlowPath);
        locations.add_temp(Location::requires_register());
        let check = func.append_inst(b0, InstKind::Op("check"), Type::Void, &[], locations);
        ret(&mut func, b0, &[a]);

        let target = MachineDesc::new(4, 2);
        let (liveness, mut pool) = analyze(&func);
        let mut state = AllocState::new(&func, &liveness, &mut pool, &target, true);
        let work = state.process_instructions();

        let a_interval = liveness.interval(a).unwrap();
        let safepoints = state.pool[a_interval].safepoints();
        assert_eq!(safepoints.len(), 1);
        assert_eq!(safepoints[0].inst, check);
        assert!(!safepoints[0].will_call);
        assert!(work.iter().any(|w| matches!(w, Work::SlowPathSafepoint(_))));
        assert_eq!(state.temps.len(), 1);
        let temp = state.temps[0];
        assert_eq!(state.pool[temp].start(), liveness.position(check));
        assert_eq!(state.pool[temp].temp_user(), Some((check, 0)));
    }

    #[test]
    fn split_between_prefers_merge_points() {
        // b0 -> b1 | b2 -> b3
        let mut func = Function::new();
        let blocks: Vec<Block> = (0..4).map(|_| func.create_block()).collect();
        func.add_edge(blocks[0], blocks[1]);
        func.add_edge(blocks[0], blocks[2]);
        func.add_edge(blocks[1], blocks[3]);
        func.add_edge(blocks[2], blocks[3]);
        let v = op(&mut func, blocks[0], &[]);
        goto(&mut func, blocks[0]);
        goto(&mut func, blocks[1]);
        goto(&mut func, blocks[2]);
        op(&mut func, blocks[3], &[v]);
        ret(&mut func, blocks[3], &[]);

        let target = MachineDesc::new(4, 2);
        let (liveness, mut pool) = analyze(&func);
        let mut state = AllocState::new(&func, &liveness, &mut pool, &target, true);
        let id = liveness.interval(v).unwrap();
        // Linear order is b0 b2 b1 b3. Splitting from b2 towards the use in b3 picks b1,
        // the other arm, rather than b3.
        let from = liveness.block_start(blocks[2]) + 1;
        let to = liveness.position(func.block(blocks[3]).insts[0]);
        let split = state.split_between(id, from, to).unwrap();
        assert_eq!(state.pool[split].start(), liveness.block_start(blocks[1]));
    }

    #[test]
    fn spill_slots_are_reused_by_kind() {
        let mut func = Function::new();
        let b0 = func.create_block();
        let a = op(&mut func, b0, &[]);
        let b = op(&mut func, b0, &[a]);
        let c = op(&mut func, b0, &[b]);
        ret(&mut func, b0, &[c]);

        let target = MachineDesc::new(4, 2);
        for (reuse, expected) in [(true, 0), (false, 2)] {
            let (liveness, mut pool) = analyze(&func);
            let mut state = AllocState::new(&func, &liveness, &mut pool, &target, reuse);
            for value in [a, b, c] {
                let id = liveness.interval(value).unwrap();
                state.allocate_spill_slot_for(id);
            }
            let c_interval = liveness.interval(c).unwrap();
            assert_eq!(state.pool.spill_slot(c_interval), Some(expected));
        }
    }
}
