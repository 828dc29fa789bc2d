//! SSA deconstruction: turning allocated intervals into locations and moves.
//!
//! Once every sibling of every value has a register or a stack home, the resolver:
//!
//! - fixes the stack offsets of spill slots now that the frame size is known,
//! - rewrites the input, output, temp and environment locations of every instruction,
//! - records the live registers and references of every safepoint,
//! - inserts parallel moves where a value changes location: between adjacent siblings, across
//!   control flow edges where the sibling differs on both sides, and for phi inputs.
//!
//! Moves are grouped into one [`ParallelMove`](crate::ir::ParallelMove) instruction per anchor
//! and lifetime position, so that all moves at one point happen simultaneously.

use super::allocator::{Allocation, SlotCounts};
use super::interval::{IntervalId, IntervalPool};
use super::liverange::{Position, UsePosition};
use super::liveness::Liveness;
use crate::ir::{Block, Function, Inst, Location, Policy, Type, VREG_SIZE};
use crate::isa::{FrameRequest, TargetRegisters};
use crate::timing;
use log::{debug, trace};

/// Stack frame of an allocated function.
///
/// From the top of the frame down, the layout is:
///
/// ```text
/// [parameters passed on the stack]   (caller's frame)
/// [catch phi slots]
/// [double slots]
/// [long slots]
/// [float slots]
/// [int and reference slots]
/// [outgoing call arguments]
/// [method context]                   <- offset 0
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameLayout {
    /// Size of the frame in bytes, as computed by the target.
    pub frame_size: u32,
    /// Allocator slots of each kind.
    pub slots: SlotCounts,
    /// Slots for outgoing call arguments and the method context.
    pub reserved_out_slots: u32,
    /// Most core registers live at one slow-path safepoint.
    pub max_safepoint_live_core: u32,
    /// Most FP registers live at one slow-path safepoint.
    pub max_safepoint_live_fp: u32,
}

impl FrameLayout {
    /// Number of slots handed out by the allocator.
    pub fn spill_slots(&self) -> u32 {
        self.slots.total()
    }

    /// Byte offset of the allocator slot `slot` holding a value of type `ty`.
    fn typed_slot_offset(&self, slot: i32, ty: Type) -> i32 {
        let counts = &self.slots;
        let mut slot = slot as u32 + self.reserved_out_slots;
        match ty {
            Type::Float64 => slot += counts.long + counts.float + counts.int,
            Type::Int64 => slot += counts.float + counts.int,
            Type::Float32 => slot += counts.int,
            Type::Int32 | Type::Reference => {}
            Type::Void => debug_assert!(false, "void values have no slot"),
        }
        slot as i32 * VREG_SIZE
    }

    /// Byte offset of the catch phi slot `slot`.
    fn catch_phi_offset(&self, slot: i32) -> i32 {
        let slot = slot as u32 + self.slots.total() - self.slots.catch_phis + self.reserved_out_slots;
        slot as i32 * VREG_SIZE
    }
}

/// Resolve the allocation of `func`, rewriting its locations and inserting moves.
pub(crate) fn run(
    func: &mut Function,
    liveness: &Liveness,
    pool: &mut IntervalPool,
    target: &dyn TargetRegisters,
    allocation: &Allocation,
) -> FrameLayout {
    let _tt = timing::resolve();
    let reserved_out_slots = target.pointer_size() / VREG_SIZE as u32 + func.max_out_vregs();
    let request = FrameRequest {
        spill_slots: allocation.slots.total(),
        reserved_out_slots,
        allocated_registers: allocation.allocated,
        max_safepoint_live_core: allocation.max_safepoint_live_core,
        max_safepoint_live_fp: allocation.max_safepoint_live_fp,
    };
    let frame = FrameLayout {
        frame_size: target.frame_size(&request),
        slots: allocation.slots,
        reserved_out_slots,
        max_safepoint_live_core: allocation.max_safepoint_live_core,
        max_safepoint_live_fp: allocation.max_safepoint_live_fp,
    };

    assign_frame_offsets(func, liveness, pool, &frame);

    let has_irreducible_loops = liveness
        .loops()
        .loops()
        .any(|lp| liveness.loops().is_irreducible(lp));
    let mut resolver = Resolver {
        func,
        liveness,
        pool,
        target,
        has_irreducible_loops,
        inserted: 0,
    };
    for &value in liveness.ssa_values() {
        if let Some(interval) = liveness.interval(value) {
            resolver.connect_siblings(interval);
        }
    }
    resolver.resolve_control_flow();
    resolver.resolve_phi_inputs();
    resolver.resolve_temps(&allocation.temps);

    debug!(
        "resolved {} values: {} moves, frame size {}, {} spill slots",
        liveness.ssa_values().len(),
        resolver.inserted,
        frame.frame_size,
        frame.spill_slots()
    );
    frame
}

/// Turn allocator slot numbers into frame offsets and give unallocated outputs their location.
fn assign_frame_offsets(
    func: &mut Function,
    liveness: &Liveness,
    pool: &mut IntervalPool,
    frame: &FrameLayout,
) {
    let frame_size = frame.frame_size as i32;
    for &inst in liveness.ssa_values() {
        let Some(interval) = liveness.interval(inst) else {
            continue;
        };
        let data = func.inst(inst);
        let Some(mut output) = data.locations.as_ref().map(|l| l.output) else {
            continue;
        };
        let slot = pool.spill_slot(interval);

        if data.is_parameter() {
            // Stack-passed parameters live in the caller's frame, above ours.
            output = match output {
                Location::StackSlot(offset) => Location::StackSlot(offset + frame_size),
                Location::DoubleStackSlot(offset) => Location::DoubleStackSlot(offset + frame_size),
                other => other,
            };
            if let Some(offset) = output.stack_index() {
                pool.set_spill_slot(interval, offset);
            } else if let Some(slot) = slot {
                pool.set_spill_slot(interval, slot + frame_size);
            }
            if let Some(locations) = func.locations_mut(inst) {
                locations.output = output;
            }
        } else if data.is_current_method() {
            debug_assert!(slot.is_none_or(|s| s == 0));
        } else if data.is_phi() && func.block(func.inst_block(inst)).is_catch {
            debug_assert!(slot.is_some(), "catch phi {inst} has no slot");
            if let Some(slot) = slot {
                pool.set_spill_slot(interval, frame.catch_phi_offset(slot));
            }
        } else if let (Some(slot), false) = (slot, output.is_stack()) {
            pool.set_spill_slot(interval, frame.typed_slot_offset(slot, data.ty));
        }

        let source = pool.location(interval);
        if let Some(policy) = output.policy() {
            let Some(locations) = func.locations_mut(inst) else {
                continue;
            };
            if policy == Policy::SameAsFirstInput {
                if locations.in_at(0).is_unallocated() {
                    locations.set_in_at(0, source);
                } else {
                    debug_assert_eq!(locations.in_at(0), source);
                }
            }
            locations.output = source;
        }
    }
}

struct Resolver<'a> {
    func: &'a mut Function,
    liveness: &'a Liveness,
    pool: &'a IntervalPool,
    target: &'a dyn TargetRegisters,
    has_irreducible_loops: bool,
    inserted: usize,
}

impl<'a> Resolver<'a> {
    /// Rewrite the locations of every use of the value of `interval` and connect adjacent
    /// siblings.
    fn connect_siblings(&mut self, interval: IntervalId) {
        let pool = self.pool;
        let Some(defined_by) = pool[interval].defined_by() else {
            return;
        };
        let ty = pool[interval].ty();

        if let Some(slot) = pool.spill_slot(interval) {
            if pool[interval].has_register() && !self.func.inst(defined_by).is_current_method() {
                // Spill at the definition: siblings without a register read the slot.
                let destination = if pool[interval].needs_two_spill_slots() {
                    Location::DoubleStackSlot(slot)
                } else {
                    Location::StackSlot(slot)
                };
                self.insert_move_after(defined_by, pool.location(interval), destination);
            }
        }

        let uses = pool.all_uses(interval);
        let env_uses = pool.all_env_uses(interval);
        let mut next_use = 0;
        let mut next_env_use = 0;
        for current in pool.siblings(interval) {
            let source = pool.location(current);

            for range in pool[current].ranges() {
                while uses.get(next_use).is_some_and(|u| u.position < range.start) {
                    next_use += 1;
                }
                while let Some(use_pos) = uses.get(next_use).filter(|u| u.position <= range.end) {
                    // Phi inputs are resolved at the predecessor's exit.
                    if !use_pos.is_phi {
                        self.rewrite_input(use_pos, ty, source);
                    }
                    next_use += 1;
                }

                while env_uses.get(next_env_use).is_some_and(|u| u.position < range.start) {
                    next_env_use += 1;
                }
                while let Some(env_use) = env_uses
                    .get(next_env_use)
                    .filter(|u| u.position <= range.end)
                {
                    let holder = self.func.inst_mut(env_use.holder);
                    if let Some(location) = holder.env_locations.get_mut(env_use.index as usize) {
                        *location = source;
                    }
                    next_env_use += 1;
                }
            }

            if let Some(next) = pool[current].next_sibling() {
                let end = pool[current].end();
                if pool[next].has_register() && pool[next].start() == end {
                    self.insert_parallel_move_at(end, defined_by, source, pool.location(next));
                }
            }

            self.record_safepoints(current, source);
        }
    }

    fn rewrite_input(&mut self, use_pos: &UsePosition, ty: Type, source: Location) {
        let index = use_pos.input_index as usize;
        let Some(locations) = self.func.locations_mut(use_pos.user) else {
            return;
        };
        let expected = locations.in_at(index);
        if !expected.is_valid() {
            debug_assert!(
                locations.intrinsified,
                "input {index} of {} has no location",
                use_pos.user
            );
        } else if expected.is_unallocated() {
            locations.set_in_at(index, source);
        } else if !expected.is_constant() {
            self.add_input_move_for(ty, use_pos.user, source, expected);
        }
    }

    /// Report the location of the sibling `current` to the safepoints it is live across.
    fn record_safepoints(&mut self, current: IntervalId, source: Location) {
        let pool = self.pool;
        let is_reference = pool[current].ty() == Type::Reference;
        let slot = pool.spill_slot(current);
        for safepoint in pool[current].safepoints() {
            let Some(locations) = self.func.locations_mut(safepoint.inst) else {
                continue;
            };
            let info = &mut locations.safepoint;
            if let (true, Some(slot)) = (is_reference, slot) {
                info.set_stack_bit((slot / VREG_SIZE) as usize);
            }
            match source {
                Location::Register(reg) => {
                    info.live_registers.add_core(reg);
                    if is_reference {
                        info.set_register_bit(reg);
                    }
                }
                Location::FpuRegister(reg) => info.live_registers.add_fp(reg),
                Location::RegisterPair { low, high } => {
                    info.live_registers.add_core(low);
                    info.live_registers.add_core(high);
                }
                Location::FpuRegisterPair { low, high } => {
                    info.live_registers.add_fp(low);
                    info.live_registers.add_fp(high);
                }
                _ => {}
            }
        }
    }

    /// Insert moves on the control flow edges where a value changes sibling.
    fn resolve_control_flow(&mut self) {
        let liveness = self.liveness;
        for &block in liveness.linear_order() {
            if self.func.block(block).is_catch || liveness.loops().is_irreducible_header(block) {
                // Live values were forced into their slots at the block start.
                if cfg!(debug_assertions) {
                    self.check_spilled_live_ins(block);
                }
                continue;
            }
            let preds = self.func.block(block).preds.clone();
            for ssa in liveness.live_in(block).iter() {
                let Some(interval) = liveness.interval(liveness.ssa_values()[ssa]) else {
                    continue;
                };
                for &pred in &preds {
                    self.connect_split_siblings(interval, pred, block);
                }
            }
        }
    }

    fn check_spilled_live_ins(&self, block: Block) {
        let liveness = self.liveness;
        let start = liveness.block_start(block);
        for ssa in liveness.live_in(block).iter() {
            let Some(interval) = liveness.interval(liveness.ssa_values()[ssa]) else {
                continue;
            };
            if let Some(sibling) = self.pool.sibling_at(interval, start) {
                debug_assert!(
                    !self.pool[sibling].covers(start) || !self.pool[sibling].has_register(),
                    "{sibling} holds a register at the start of {block}"
                );
            }
        }
    }

    /// Connect the siblings of `interval` live at the end of `from` and at the start of `to`.
    fn connect_split_siblings(&mut self, interval: IntervalId, from: Block, to: Block) {
        let pool = self.pool;
        if pool[interval].next_sibling().is_none() {
            return;
        }
        let destination_position = self.liveness.block_start(to);
        let source_position = self.liveness.block_end(from) - 1;
        let destination = pool.sibling_at(interval, destination_position);
        let source = pool.sibling_at(interval, source_position);
        if destination == source {
            return;
        }
        let Some(defined_by) = pool[interval].defined_by() else {
            return;
        };

        let Some(destination) = destination.filter(|&d| pool[d].covers(destination_position))
        else {
            // Only values rematerialized inside an irreducible loop are live-in without a
            // sibling there.
            debug_assert!(self.has_irreducible_loops && self.is_materializable(defined_by));
            return;
        };
        if !pool[destination].has_register() {
            // The slot was written at the definition.
            return;
        }

        let location_source = match source.filter(|&s| pool[s].covers(source_position)) {
            Some(source) => pool.location(source),
            None => {
                debug_assert!(self.has_irreducible_loops && self.is_materializable(defined_by));
                if self.func.inst(defined_by).is_constant() {
                    Location::Constant(defined_by)
                } else {
                    match pool.spill_slot(interval) {
                        Some(slot) => Location::StackSlot(slot),
                        None => return,
                    }
                }
            }
        };

        let location_destination = pool.location(destination);
        if self.func.block(from).succs.len() == 1 {
            self.insert_parallel_move_at_exit_of(from, defined_by, location_source, location_destination);
        } else {
            debug_assert_eq!(self.func.block(to).preds.len(), 1, "critical edge {from} -> {to}");
            self.insert_parallel_move_at_entry_of(to, defined_by, location_source, location_destination);
        }
    }

    fn is_materializable(&self, inst: Inst) -> bool {
        let data = self.func.inst(inst);
        data.is_constant() || data.is_current_method()
    }

    /// Move every phi input into the phi's location at the end of its predecessor.
    fn resolve_phi_inputs(&mut self) {
        let liveness = self.liveness;
        let pool = self.pool;
        for &block in liveness.linear_order() {
            let block_data = self.func.block(block);
            if block_data.is_catch {
                // Catch phis are written by the exception delivery.
                continue;
            }
            let preds = block_data.preds.clone();
            let phis = block_data.phis.clone();
            for phi in phis {
                let Some(phi_interval) = liveness.interval(phi) else {
                    continue;
                };
                let destination = pool.location(phi_interval);
                for (index, &pred) in preds.iter().enumerate() {
                    debug_assert_eq!(self.func.block(pred).succs.len(), 1, "critical edge into {block}");
                    let Some(input) = self.func.inst(phi).inputs.get(index).copied() else {
                        debug_assert!(false, "{phi} misses input {index}");
                        continue;
                    };
                    let Some(input_interval) = liveness.interval(input) else {
                        continue;
                    };
                    let source = pool.location_at(input_interval, liveness.block_end(pred) - 1);
                    if let Some(locations) = self.func.locations_mut(phi) {
                        locations.set_in_at(index, source);
                    }
                    self.insert_parallel_move_at_exit_of(pred, phi, source, destination);
                }
            }
        }
    }

    /// Write the registers of temps into their instructions.
    fn resolve_temps(&mut self, temps: &[IntervalId]) {
        let pool = self.pool;
        for &temp in temps {
            if pool[temp].is_high() {
                // Written with its low half.
                continue;
            }
            let Some((user, index)) = pool[temp].temp_user() else {
                continue;
            };
            debug_assert!(pool[temp].has_register(), "temp {temp} has no register");
            let location = pool.location(temp);
            if let Some(locations) = self.func.locations_mut(user) {
                locations.set_temp(index as usize, location);
            }
        }
    }

    /// Lifetime position of `inst`, inserted moves included.
    fn position_of(&self, inst: Inst) -> Position {
        match self.func.inst(inst).parallel_move() {
            Some(pm) => pm.lifetime_position(),
            None => self.liveness.position(inst),
        }
    }

    /// `inst` if it is a parallel move created for `position`.
    fn move_at(&self, inst: Option<Inst>, position: Position) -> Option<Inst> {
        inst.filter(|&i| {
            self.func
                .inst(i)
                .parallel_move()
                .is_some_and(|pm| pm.lifetime_position() == position)
        })
    }

    fn new_move(&mut self, block: Block, index: usize, position: Position) -> Inst {
        trace!("new parallel move at {position} in {block}");
        self.func.insert_parallel_move(block, index, position)
    }

    /// Add a move to the parallel move `pm`, as two 32-bit moves for a 64-bit integer when the
    /// target asks for it.
    fn add_move(
        &mut self,
        pm: Inst,
        source: Location,
        destination: Location,
        ty: Type,
        instruction: Option<Inst>,
    ) {
        debug_assert!(
            destination.is_register_kind() || destination.is_stack(),
            "cannot move into {destination}"
        );
        let split = ty == Type::Int64 && self.target.should_split_long_moves() && !source.is_constant();
        let Some(moves) = self.func.parallel_move_mut(pm) else {
            debug_assert!(false, "{pm} is not a parallel move");
            return;
        };
        trace!("move {source} -> {destination} at {}", moves.lifetime_position());
        if split {
            moves.add_move(source.to_low(), destination.to_low(), Type::Int32, instruction);
            moves.add_move(source.to_high(), destination.to_high(), Type::Int32, None);
            self.inserted += 2;
        } else {
            moves.add_move(source, destination, ty, instruction);
            self.inserted += 1;
        }
    }

    /// Move an input into the fixed location its user expects, just before the user.
    fn add_input_move_for(&mut self, ty: Type, user: Inst, source: Location, destination: Location) {
        if source == destination {
            return;
        }
        debug_assert!(!self.func.inst(user).is_phi());
        let position = self.liveness.position(user);
        let pm = match self.move_at(self.func.prev_inst(user), position) {
            Some(pm) => pm,
            None => {
                let block = self.func.inst_block(user);
                let index = self.func.inst_index(user).unwrap_or_default();
                self.new_move(block, index, position)
            }
        };
        self.add_move(pm, source, destination, ty, None);
    }

    /// Insert a move at `position` between two siblings of the value of `instruction`.
    ///
    /// Moves at a block start are left to the connection of control flow edges.
    fn insert_parallel_move_at(
        &mut self,
        position: Position,
        instruction: Inst,
        source: Location,
        destination: Location,
    ) {
        let ty = self.func.inst(instruction).ty;
        let pm = match self.liveness.inst_at(position) {
            None if position % 2 == 0 => return,
            None => {
                // Just after a block start: before the first instruction, after the moves
                // already placed for the block start itself.
                let Some(block) = self.liveness.block_at(position) else {
                    return;
                };
                let insts = &self.func.block(block).insts;
                let index = insts.partition_point(|&i| self.position_of(i) < position);
                match self.move_at(insts.get(index).copied(), position) {
                    Some(pm) => pm,
                    None => self.new_move(block, index, position),
                }
            }
            Some(at) if position % 2 == 1 => {
                // After `at`.
                debug_assert!(!self.func.inst(at).is_control_flow());
                let next = self
                    .func
                    .next_inst(at)
                    .filter(|&n| self.func.inst(n).parallel_move().is_some());
                match next.filter(|&n| self.position_of(n) <= position) {
                    Some(pm) => pm,
                    None => {
                        let block = self.func.inst_block(at);
                        let index = self.func.inst_index(at).unwrap_or_default() + 1;
                        self.new_move(block, index, position)
                    }
                }
            }
            Some(at) => {
                // Before `at`.
                match self.move_at(self.func.prev_inst(at), position) {
                    Some(pm) => pm,
                    None => {
                        let block = self.func.inst_block(at);
                        let index = self.func.inst_index(at).unwrap_or_default();
                        self.new_move(block, index, position)
                    }
                }
            }
        };
        self.add_move(pm, source, destination, ty, Some(instruction));
    }

    /// Insert a move before the control flow instruction ending `block`.
    fn insert_parallel_move_at_exit_of(
        &mut self,
        block: Block,
        instruction: Inst,
        source: Location,
        destination: Location,
    ) {
        if source == destination {
            return;
        }
        let Some(last) = self.func.block(block).last_inst() else {
            debug_assert!(false, "{block} is empty");
            return;
        };
        let position = self.liveness.position(last);
        let pm = match self.move_at(self.func.prev_inst(last), position) {
            Some(pm) => pm,
            None => {
                let index = self.func.inst_index(last).unwrap_or_default();
                self.new_move(block, index, position)
            }
        };
        let ty = self.func.inst(instruction).ty;
        self.add_move(pm, source, destination, ty, Some(instruction));
    }

    /// Insert a move at the start of `block`, before any other instruction.
    fn insert_parallel_move_at_entry_of(
        &mut self,
        block: Block,
        instruction: Inst,
        source: Location,
        destination: Location,
    ) {
        if source == destination {
            return;
        }
        let position = self.liveness.block_start(block);
        let first = self.func.block(block).first_inst();
        let pm = match self.move_at(first, position) {
            Some(pm) => pm,
            None => self.new_move(block, 0, position),
        };
        let ty = self.func.inst(instruction).ty;
        self.add_move(pm, source, destination, ty, Some(instruction));
    }

    /// Insert a move of the output of `instruction` right after it.
    fn insert_move_after(&mut self, instruction: Inst, source: Location, destination: Location) {
        if source == destination {
            return;
        }
        if self.func.inst(instruction).is_phi() {
            let block = self.func.inst_block(instruction);
            self.insert_parallel_move_at_entry_of(block, instruction, source, destination);
            return;
        }
        let position = self.liveness.position(instruction) + 1;
        let pm = match self.move_at(self.func.next_inst(instruction), position) {
            Some(pm) => pm,
            None => {
                let block = self.func.inst_block(instruction);
                let index = self.func.inst_index(instruction).unwrap_or_default() + 1;
                self.new_move(block, index, position)
            }
        };
        let ty = self.func.inst(instruction).ty;
        self.add_move(pm, source, destination, ty, Some(instruction));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstKind, LocationSummary, MoveOperands, RegUnit};
    use crate::isa::MachineDesc;
    use crate::regalloc::allocator::Allocation;
    use crate::regalloc::linear_scan;
    use crate::regalloc::testing::{constant, goto, op, ret, summary};
    use crate::register_set::RegisterSet;
    use std::vec::Vec;

    fn allocate_and_resolve(func: &mut Function, target: &dyn TargetRegisters) -> FrameLayout {
        let mut pool = IntervalPool::new();
        let mut liveness = Liveness::new();
        liveness.compute(func, &mut pool, false);
        let allocation = linear_scan::run(func, &liveness, &mut pool, target).unwrap();
        run(func, &liveness, &mut pool, target, &allocation)
    }

    fn moves(func: &Function, block: Block) -> Vec<(Position, MoveOperands)> {
        func.parallel_moves(block)
            .flat_map(|(_, pm)| pm.moves().iter().map(move |m| (pm.lifetime_position(), *m)))
            .collect()
    }

    #[test]
    fn slot_offsets_follow_the_frame_layout() {
        let frame = FrameLayout {
            frame_size: 64,
            slots: SlotCounts {
                int: 2,
                long: 2,
                float: 1,
                double: 4,
                catch_phis: 1,
            },
            reserved_out_slots: 3,
            ..Default::default()
        };
        assert_eq!(frame.spill_slots(), 10);
        assert_eq!(frame.typed_slot_offset(1, Type::Int32), 4 * 4);
        assert_eq!(frame.typed_slot_offset(0, Type::Float32), 5 * 4);
        assert_eq!(frame.typed_slot_offset(0, Type::Int64), 6 * 4);
        assert_eq!(frame.typed_slot_offset(2, Type::Float64), 10 * 4);
        assert_eq!(frame.catch_phi_offset(0), 12 * 4);
    }

    #[test]
    fn locations_are_rewritten() {
        let _ = env_logger::try_init();
        let mut func = Function::new();
        let b0 = func.create_block();
        let a = op(&mut func, b0, &[]);
        let b = op(&mut func, b0, &[a]);
        let r = ret(&mut func, b0, &[b]);

        let frame = allocate_and_resolve(&mut func, &MachineDesc::new(4, 0));
        assert_eq!(frame.spill_slots(), 0);
        assert_eq!(frame.reserved_out_slots, 2);
        let out_a = func.locations(a).unwrap().output;
        assert!(out_a.is_register());
        assert_eq!(func.locations(b).unwrap().in_at(0), out_a);
        let out_b = func.locations(b).unwrap().output;
        assert_eq!(func.locations(r).unwrap().in_at(0), out_b);
        assert_eq!(func.parallel_moves(b0).count(), 0);
    }

    #[test]
    fn fixed_inputs_get_a_move_before_the_user() {
        let mut func = Function::new();
        let b0 = func.create_block();
        let a = func.append_inst(
            b0,
            InstKind::Op("def"),
            Type::Int32,
            &[],
            summary(&[], Location::Register(1)),
        );
        let user = func.append_inst(
            b0,
            InstKind::Op("shift"),
            Type::Void,
            &[a],
            summary(&[Location::Register(3)], Location::Invalid),
        );
        let r = ret(&mut func, b0, &[a]);

        allocate_and_resolve(&mut func, &MachineDesc::new(4, 0));
        assert_eq!(func.locations(a).unwrap().output, Location::Register(1));
        assert_eq!(func.locations(r).unwrap().in_at(0), Location::Register(1));
        let moves = moves(&func, b0);
        assert_eq!(moves.len(), 1);
        let (position, m) = moves[0];
        assert_eq!(m.source, Location::Register(1));
        assert_eq!(m.destination, Location::Register(3));
        assert_eq!(m.instruction, None);
        let pm = func.prev_inst(user).unwrap();
        assert!(func.inst(pm).parallel_move().is_some());
        assert_eq!(position % 2, 0);
    }

    #[test]
    fn phi_inputs_move_at_predecessor_exits() {
        let _ = env_logger::try_init();
        let mut func = Function::new();
        let b0 = func.create_block();
        let b1 = func.create_block();
        let b2 = func.create_block();
        let b3 = func.create_block();
        func.add_edge(b0, b1);
        func.add_edge(b0, b2);
        func.add_edge(b1, b3);
        func.add_edge(b2, b3);
        let c1 = constant(&mut func, b0, 1);
        let c2 = constant(&mut func, b0, 2);
        func.append_inst(
            b0,
            InstKind::Branch("if"),
            Type::Void,
            &[],
            LocationSummary::default(),
        );
        goto(&mut func, b1);
        goto(&mut func, b2);
        let phi = func.append_phi(b3, Type::Int32, &[c1, c2]);
        ret(&mut func, b3, &[phi]);

        allocate_and_resolve(&mut func, &MachineDesc::new(4, 0));
        let destination = func.locations(phi).unwrap().output;
        assert!(destination.is_register());
        for (pred, c) in [(b1, c1), (b2, c2)] {
            let moves = moves(&func, pred);
            assert_eq!(moves.len(), 1);
            assert_eq!(moves[0].1.source, Location::Constant(c));
            assert_eq!(moves[0].1.destination, destination);
            assert_eq!(moves[0].1.instruction, Some(phi));
        }
        assert!(moves(&func, b3).is_empty());
    }

    #[test]
    fn long_moves_split_in_halves() {
        let mut func = Function::new();
        let b0 = func.create_block();
        let a = func.append_inst(
            b0,
            InstKind::Op("wide"),
            Type::Int64,
            &[],
            summary(&[], Location::RegisterPair { low: 0, high: 1 }),
        );
        let user = func.append_inst(
            b0,
            InstKind::Op("use"),
            Type::Void,
            &[a],
            summary(&[Location::RegisterPair { low: 2, high: 3 }], Location::Invalid),
        );
        ret(&mut func, b0, &[]);

        let target = MachineDesc::new_paired(4, 0).with_split_long_moves(true);
        allocate_and_resolve(&mut func, &target);
        let pm = func.prev_inst(user).unwrap();
        let moves = func.inst(pm).parallel_move().unwrap().moves();
        assert_eq!(moves.len(), 2);
        assert!(moves.iter().all(|m| m.ty == Type::Int32));
        assert_eq!(moves[0].source, Location::Register(0));
        assert_eq!(moves[0].destination, Location::Register(2));
        assert_eq!(moves[1].source, Location::Register(1));
        assert_eq!(moves[1].destination, Location::Register(3));
    }

    /// A value used twice, split by hand before the second use.
    fn split_by_hand(first: RegUnit, second: RegUnit) -> (Function, Block, Position) {
        let mut func = Function::new();
        let b0 = func.create_block();
        let a = op(&mut func, b0, &[]);
        let sink = |func: &mut Function| {
            func.append_inst(
                b0,
                InstKind::Op("sink"),
                Type::Void,
                &[a],
                summary(&[Location::requires_register()], Location::Invalid),
            )
        };
        sink(&mut func);
        let second_use = sink(&mut func);
        ret(&mut func, b0, &[]);

        let mut pool = IntervalPool::new();
        let mut liveness = Liveness::new();
        liveness.compute(&func, &mut pool, false);
        let at = liveness.position(second_use);
        let parent = liveness.interval(a).unwrap();
        let sibling = pool.split_at(parent, at).unwrap();
        pool[parent].set_register(first);
        pool[sibling].set_register(second);

        let mut allocated = RegisterSet::empty();
        allocated.add_core(first);
        allocated.add_core(second);
        let allocation = Allocation {
            temps: Vec::new(),
            slots: SlotCounts::default(),
            allocated,
            max_safepoint_live_core: 0,
            max_safepoint_live_fp: 0,
        };
        run(&mut func, &liveness, &mut pool, &MachineDesc::new(4, 0), &allocation);
        (func, b0, at)
    }

    #[test]
    fn split_siblings_are_joined_by_one_move() {
        let _ = env_logger::try_init();
        for (first, second) in [(0, 1), (2, 2)] {
            let (func, b0, at) = split_by_hand(first, second);
            let moves = moves(&func, b0);
            assert_eq!(moves.len(), 1, "r{first} -> r{second}");
            let (position, m) = moves[0];
            assert_eq!(position, at);
            assert_eq!(m.source, Location::Register(first));
            assert_eq!(m.destination, Location::Register(second));
        }
    }

    #[test]
    fn split_at_a_block_start_moves_at_the_predecessor_exit() {
        let _ = env_logger::try_init();
        let mut func = Function::new();
        let b0 = func.create_block();
        let b1 = func.create_block();
        func.add_edge(b0, b1);
        let a = op(&mut func, b0, &[]);
        let jump = goto(&mut func, b0);
        let user = func.append_inst(
            b1,
            InstKind::Op("sink"),
            Type::Void,
            &[a],
            summary(&[Location::requires_register()], Location::Invalid),
        );
        ret(&mut func, b1, &[]);

        let mut pool = IntervalPool::new();
        let mut liveness = Liveness::new();
        liveness.compute(&func, &mut pool, false);
        let parent = liveness.interval(a).unwrap();
        let sibling = pool.split_at(parent, liveness.block_start(b1)).unwrap();
        pool[parent].set_register(0);
        pool[sibling].set_register(1);
        let mut allocated = RegisterSet::empty();
        allocated.add_core(0);
        allocated.add_core(1);
        let allocation = Allocation {
            temps: Vec::new(),
            slots: SlotCounts::default(),
            allocated,
            max_safepoint_live_core: 0,
            max_safepoint_live_fp: 0,
        };
        run(&mut func, &liveness, &mut pool, &MachineDesc::new(4, 0), &allocation);

        let exit = moves(&func, b0);
        assert_eq!(exit.len(), 1);
        assert_eq!(exit[0].1.source, Location::Register(0));
        assert_eq!(exit[0].1.destination, Location::Register(1));
        let pm = func.prev_inst(jump).unwrap();
        assert!(func.inst(pm).parallel_move().is_some());
        assert!(moves(&func, b1).is_empty());
        assert_eq!(func.locations(user).unwrap().in_at(0), Location::Register(1));
    }
}
