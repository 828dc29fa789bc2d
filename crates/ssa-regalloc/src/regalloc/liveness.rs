//! Liveness analysis.
//!
//! The analysis orders the blocks linearly, numbers every instruction with a lifetime position
//! and builds one live interval per value. Live-in and live-out sets are computed over dense SSA
//! indexes, which the allocators and the resolver use to find the values live at block
//! boundaries.

use super::interval::{IntervalId, IntervalPool};
use super::liverange::{EnvUsePosition, Position, UsePosition};
use crate::dominator_tree::DominatorTree;
use crate::entity::packed_option::PackedOption;
use crate::entity::SecondaryMap;
use crate::ir::{Block, Function, Inst, InstData, Location, LocationSummary, Policy, Type};
use crate::loop_analysis::{Loop, LoopAnalysis};
use crate::timing;
use cranelift_bitset::CompoundBitSet;
use log::{debug, trace};
use std::vec::Vec;

#[derive(Clone, Debug, Default)]
struct BlockInfo {
    live_in: CompoundBitSet,
    live_out: CompoundBitSet,
    kill: CompoundBitSet,
    start: Position,
    end: Position,
}

/// Liveness information of a function.
pub struct Liveness {
    domtree: DominatorTree,
    loops: LoopAnalysis,
    linear_order: Vec<Block>,
    blocks: SecondaryMap<Block, BlockInfo>,
    /// Instruction at each even position. `None` marks a block start.
    position_insts: Vec<Option<Inst>>,
    position_blocks: Vec<Block>,
    inst_positions: SecondaryMap<Inst, Position>,
    ssa_values: Vec<Inst>,
    ssa_indexes: SecondaryMap<Inst, Option<u32>>,
    intervals: SecondaryMap<Inst, PackedOption<IntervalId>>,
    debuggable: bool,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    /// Create an empty analysis.
    pub fn new() -> Self {
        Self {
            domtree: DominatorTree::new(),
            loops: LoopAnalysis::new(),
            linear_order: Vec::new(),
            blocks: SecondaryMap::new(),
            position_insts: Vec::new(),
            position_blocks: Vec::new(),
            inst_positions: SecondaryMap::new(),
            ssa_values: Vec::new(),
            ssa_indexes: SecondaryMap::new(),
            intervals: SecondaryMap::new(),
            debuggable: false,
        }
    }

    /// Clear all data structures in this liveness analysis.
    pub fn clear(&mut self) {
        self.domtree.clear();
        self.loops.clear();
        self.linear_order.clear();
        self.blocks.clear();
        self.position_insts.clear();
        self.position_blocks.clear();
        self.inst_positions.clear();
        self.ssa_values.clear();
        self.ssa_indexes.clear();
        self.intervals.clear();
    }

    /// Analyze `func`, creating the interval of every value in `pool`.
    ///
    /// With `debuggable`, every environment use keeps its value alive.
    pub fn compute(&mut self, func: &Function, pool: &mut IntervalPool, debuggable: bool) {
        let _tt = timing::liveness();
        self.clear();
        self.debuggable = debuggable;
        self.domtree.compute(func);
        self.loops.compute(func, &self.domtree);
        self.linearize(func);
        self.number_instructions(func, pool);
        self.compute_live_ranges(func, pool);
        self.compute_live_in_and_live_out(func);
        debug!(
            "liveness: {} blocks, {} values, {} positions",
            self.linear_order.len(),
            self.ssa_values.len(),
            self.max_position()
        );
    }

    /// Order the reachable blocks so that dominators come before the blocks they dominate and
    /// the blocks of a loop are contiguous.
    fn linearize(&mut self, func: &Function) {
        let _tt = timing::linearize();
        let Some(entry) = func.entry() else {
            return;
        };

        // Number of forward predecessors not placed yet.
        let mut forward_preds: SecondaryMap<Block, u32> = SecondaryMap::new();
        for &block in self.domtree.cfg_postorder() {
            let mut count = func
                .block(block)
                .preds
                .iter()
                .filter(|&&p| self.domtree.is_reachable(p))
                .count();
            if let Some(lp) = self.loops.is_loop_header(block) {
                count -= self.loops.back_edges(lp).len();
            }
            forward_preds[block] = count as u32;
        }

        let mut worklist = Vec::new();
        worklist.push(entry);
        while let Some(current) = worklist.pop() {
            self.linear_order.push(current);
            for &succ in &func.block(current).succs {
                let remaining = forward_preds[succ];
                if remaining == 1 {
                    self.add_to_linearization_list(&mut worklist, succ);
                }
                forward_preds[succ] = remaining.saturating_sub(1);
            }
        }
        trace!("linear order: {:?}", self.linear_order);
    }

    /// Insert a ready block in the worklist, below the blocks of any loop it is not part of.
    /// The top of the worklist is popped first.
    fn add_to_linearization_list(&self, worklist: &mut Vec<Block>, block: Block) {
        let block_loop = self.loops.innermost_loop(block);
        let mut insert_at = 0;
        for (index, &current) in worklist.iter().enumerate().rev() {
            let current_loop = self.loops.innermost_loop(current);
            let can_go_above = match (current_loop, block_loop) {
                _ if current_loop == block_loop => true,
                (None, _) => true,
                (Some(outer), Some(inner)) => self.loops.is_child_loop(inner, outer),
                (Some(_), None) => false,
            };
            if can_go_above {
                insert_at = index + 1;
                break;
            }
        }
        worklist.insert(insert_at, block);
    }

    fn number_instructions(&mut self, func: &Function, pool: &mut IntervalPool) {
        let mut position: Position = 0;
        for &block in &self.linear_order {
            let block_data = func.block(block);
            self.blocks[block].start = position;
            for &phi in &block_data.phis {
                self.inst_positions[phi] = position;
                Self::add_value(
                    func,
                    pool,
                    phi,
                    &mut self.ssa_values,
                    &mut self.ssa_indexes,
                    &mut self.intervals,
                );
            }
            self.position_insts.push(None);
            self.position_blocks.push(block);
            position += 2;

            for &inst in &block_data.insts {
                self.inst_positions[inst] = position;
                self.position_insts.push(Some(inst));
                self.position_blocks.push(block);
                Self::add_value(
                    func,
                    pool,
                    inst,
                    &mut self.ssa_values,
                    &mut self.ssa_indexes,
                    &mut self.intervals,
                );
                position += 2;
            }
            self.blocks[block].end = position;
        }
    }

    fn add_value(
        func: &Function,
        pool: &mut IntervalPool,
        inst: Inst,
        ssa_values: &mut Vec<Inst>,
        ssa_indexes: &mut SecondaryMap<Inst, Option<u32>>,
        intervals: &mut SecondaryMap<Inst, PackedOption<IntervalId>>,
    ) {
        let data = func.inst(inst);
        let Some(locations) = data.locations.as_ref() else {
            return;
        };
        if !data.has_value() || !locations.output.is_valid() {
            return;
        }
        ssa_indexes[inst] = Some(ssa_values.len() as u32);
        ssa_values.push(inst);
        let interval = pool.new_value(
            data.ty,
            inst,
            data.is_constant(),
            definition_requires_register(locations),
        );
        intervals[inst] = interval.into();
    }

    fn compute_live_ranges(&mut self, func: &Function, pool: &mut IntervalPool) {
        for index in (0..self.linear_order.len()).rev() {
            let block = self.linear_order[index];
            let block_data = func.block(block);
            let (block_start, block_end) = (self.blocks[block].start, self.blocks[block].end);
            let mut live = CompoundBitSet::new();
            let mut kill = CompoundBitSet::new();

            for &succ in &block_data.succs {
                for value in self.blocks[succ].live_in.iter() {
                    live.insert(value);
                }
                let succ_data = func.block(succ);
                if succ_data.is_catch {
                    // Catch phi inputs are kept alive through the environments of throwing
                    // instructions instead.
                    continue;
                }
                let Some(pred_index) = func.predecessor_index(succ, block) else {
                    continue;
                };
                for &phi in &succ_data.phis {
                    let Some(&input) = func.inst(phi).inputs.get(pred_index) else {
                        debug_assert!(false, "{phi} misses the input for {block}");
                        continue;
                    };
                    if let (Some(interval), Some(ssa)) = (self.interval(input), self.ssa_index(input)) {
                        pool[interval].add_phi_use(phi, pred_index as u32, block_end);
                        live.insert(ssa as usize);
                    }
                }
            }

            for value in live.iter() {
                if let Some(interval) = self.intervals[self.ssa_values[value]].expand() {
                    pool[interval].add_range(block_start, block_end);
                }
            }

            for &inst in block_data.insts.iter().rev() {
                let position = self.inst_positions[inst];
                if let Some(ssa) = self.ssa_index(inst) {
                    kill.insert(ssa as usize);
                    live.remove(ssa as usize);
                    if let Some(interval) = self.interval(inst) {
                        pool[interval].set_from(position);
                    }
                }
                let data = func.inst(inst);
                // Environment uses come at or after input uses.
                self.process_environment(data, inst, position, block_start, pool, &mut live);
                self.process_inputs(data, inst, position, block_start, pool, &mut live);
            }

            for &phi in &block_data.phis {
                if let Some(ssa) = self.ssa_index(phi) {
                    kill.insert(ssa as usize);
                    live.remove(ssa as usize);
                    if let Some(interval) = self.interval(phi) {
                        pool[interval].set_from(block_start);
                    }
                }
            }

            if let Some(lp) = self.loops.is_loop_header(block) {
                let loop_end = self.loop_end(lp);
                for value in live.iter() {
                    if let Some(interval) = self.intervals[self.ssa_values[value]].expand() {
                        pool[interval].add_loop_range(block_start, loop_end);
                    }
                }
            }

            let info = &mut self.blocks[block];
            info.live_in = live;
            info.kill = kill;
        }
    }

    fn process_environment(
        &self,
        data: &InstData,
        holder: Inst,
        position: Position,
        block_start: Position,
        pool: &mut IntervalPool,
        live: &mut CompoundBitSet,
    ) {
        for (index, value) in data.env.iter().enumerate() {
            let Some(value) = *value else { continue };
            let (Some(interval), Some(ssa)) = (self.interval(value), self.ssa_index(value)) else {
                continue;
            };
            let keep_alive = self.debuggable
                || data.throws_into_catch
                || pool[interval].ty() == Type::Reference;
            let env_use = EnvUsePosition {
                holder,
                index: index as u32,
                position: position + 1,
            };
            pool[interval].add_env_use(env_use, block_start, keep_alive);
            if keep_alive {
                live.insert(ssa as usize);
            }
        }
    }

    fn process_inputs(
        &self,
        data: &InstData,
        user: Inst,
        position: Position,
        block_start: Position,
        pool: &mut IntervalPool,
        live: &mut CompoundBitSet,
    ) {
        let Some(locations) = data.locations.as_ref() else {
            return;
        };
        for (index, &input) in data.inputs.iter().enumerate() {
            let expected = locations.in_at(index);
            if !expected.is_valid() {
                // Not read by this instruction, or left to a best-effort calling convention.
                continue;
            }
            let (Some(interval), Some(ssa)) = (self.interval(input), self.ssa_index(input)) else {
                continue;
            };
            // Fixed inputs and inputs reused by the output die at the instruction, so that the
            // moves feeding them read the location before the instruction.
            let dies_at_user =
                locations.is_fixed_input(index) || locations.output_uses_same_as(index);
            let use_pos = UsePosition {
                user,
                input_index: index as u32,
                position: if dies_at_user { position } else { position + 1 },
                requires_register: expected.requires_register_kind(),
                is_phi: false,
            };
            pool[interval].add_use(use_pos, block_start);
            live.insert(ssa as usize);
        }
    }

    /// Iterate to the fixed point of `live_out(B) = ∪ live_in(S)` and
    /// `live_in(B) = (live_out(B) \ kill(B)) ∪ live_in(B)`.
    fn compute_live_in_and_live_out(&mut self, func: &Function) {
        let mut changed = true;
        let mut rounds = 0;
        while changed {
            changed = false;
            rounds += 1;
            for index in (0..self.linear_order.len()).rev() {
                let block = self.linear_order[index];
                if self.update_live_out(func, block) && self.update_live_in(block) {
                    changed = true;
                }
            }
        }
        trace!("live sets stable after {rounds} rounds");
    }

    fn update_live_out(&mut self, func: &Function, block: Block) -> bool {
        let additions: Vec<usize> = func
            .block(block)
            .succs
            .iter()
            .flat_map(|&succ| self.blocks[succ].live_in.iter())
            .filter(|&value| !self.blocks[block].live_out.contains(value))
            .collect();
        let live_out = &mut self.blocks[block].live_out;
        for &value in &additions {
            live_out.insert(value);
        }
        !additions.is_empty()
    }

    fn update_live_in(&mut self, block: Block) -> bool {
        let info = &mut self.blocks[block];
        let mut changed = false;
        for value in info.live_out.iter() {
            if !info.kill.contains(value) {
                changed |= info.live_in.insert(value);
            }
        }
        changed
    }

    /// The blocks in linear order.
    pub fn linear_order(&self) -> &[Block] {
        &self.linear_order
    }

    /// The dominator tree computed for the function.
    pub fn domtree(&self) -> &DominatorTree {
        &self.domtree
    }

    /// The loops of the function.
    pub fn loops(&self) -> &LoopAnalysis {
        &self.loops
    }

    /// Position of the block start marker.
    pub fn block_start(&self, block: Block) -> Position {
        self.blocks[block].start
    }

    /// First position after the last instruction of the block.
    pub fn block_end(&self, block: Block) -> Position {
        self.blocks[block].end
    }

    /// First position after the last instruction of the function.
    pub fn max_position(&self) -> Position {
        (self.position_insts.len() as Position) * 2
    }

    /// First position after the last block of `lp` with a back edge.
    pub fn loop_end(&self, lp: Loop) -> Position {
        self.loops
            .back_edges(lp)
            .iter()
            .map(|&b| self.blocks[b].end)
            .max()
            .unwrap_or_else(|| self.blocks[self.loops.loop_header(lp)].end)
    }

    /// The lifetime position of `inst`. Phis are at their block start.
    pub fn position(&self, inst: Inst) -> Position {
        self.inst_positions[inst]
    }

    /// The instruction numbered at `position` (rounded down to even). `None` at block starts.
    pub fn inst_at(&self, position: Position) -> Option<Inst> {
        self.position_insts
            .get((position / 2) as usize)
            .copied()
            .flatten()
    }

    /// The block containing `position`.
    pub fn block_at(&self, position: Position) -> Option<Block> {
        self.position_blocks.get((position / 2) as usize).copied()
    }

    /// Is `position` at the start marker of a block?
    pub fn is_at_block_boundary(&self, position: Position) -> bool {
        self.position_insts
            .get((position / 2) as usize)
            .is_some_and(Option::is_none)
    }

    /// The interval of the value defined by `inst`.
    pub fn interval(&self, inst: Inst) -> Option<IntervalId> {
        self.intervals[inst].expand()
    }

    /// Dense index of the value defined by `inst`.
    pub fn ssa_index(&self, inst: Inst) -> Option<u32> {
        self.ssa_indexes[inst]
    }

    /// All values, by SSA index.
    pub fn ssa_values(&self) -> &[Inst] {
        &self.ssa_values
    }

    /// Values live at the start of `block`, by SSA index.
    pub fn live_in(&self, block: Block) -> &CompoundBitSet {
        &self.blocks[block].live_in
    }

    /// Values live at the end of `block`, by SSA index.
    pub fn live_out(&self, block: Block) -> &CompoundBitSet {
        &self.blocks[block].live_out
    }

    /// Values defined in `block`, by SSA index.
    pub fn kill(&self, block: Block) -> &CompoundBitSet {
        &self.blocks[block].kill
    }
}

/// Does the defining instruction need its output in a register?
fn definition_requires_register(locations: &LocationSummary) -> bool {
    match locations.output {
        Location::Unallocated(Policy::RequiresRegister | Policy::RequiresFpuRegister) => true,
        Location::Unallocated(Policy::SameAsFirstInput) => {
            let first = locations.in_at(0);
            first.is_register_kind() || first.requires_register_kind()
        }
        Location::Register(_) | Location::RegisterPair { .. } => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regalloc::liverange::LiveRange;
    use crate::regalloc::testing::{goto, op, ret};

    #[test]
    fn diamond() {
        let mut func = Function::new();
        let b0 = func.create_block();
        let b1 = func.create_block();
        let b2 = func.create_block();
        let b3 = func.create_block();
        func.add_edge(b0, b1);
        func.add_edge(b0, b2);
        func.add_edge(b1, b3);
        func.add_edge(b2, b3);
        let v = op(&mut func, b0, &[]);
        goto(&mut func, b0);
        goto(&mut func, b1);
        goto(&mut func, b2);
        let user = op(&mut func, b3, &[v]);
        ret(&mut func, b3, &[]);

        let mut pool = IntervalPool::new();
        let mut liveness = Liveness::new();
        liveness.compute(&func, &mut pool, false);

        assert_eq!(liveness.linear_order(), [b0, b2, b1, b3]);
        assert_eq!(liveness.position(v), 2);
        assert_eq!(liveness.position(user), 16);
        let interval = liveness.interval(v).unwrap();
        assert_eq!(pool[interval].ranges(), &[LiveRange::new(2, 17)]);
        for block in [b1, b2] {
            assert!(pool[interval].covers(liveness.block_start(block)));
        }

        let ssa = liveness.ssa_index(v).unwrap() as usize;
        assert!(liveness.live_in(b3).contains(ssa));
        assert!(liveness.live_out(b0).contains(ssa));
        assert!(liveness.kill(b0).contains(ssa));
        assert!(!liveness.live_in(b0).contains(ssa));
        assert!(liveness.is_at_block_boundary(6));
        assert_eq!(liveness.inst_at(16), Some(user));
        assert_eq!(liveness.block_at(17), Some(b3));
    }

    #[test]
    fn loop_carried_value() {
        let mut func = Function::new();
        let b0 = func.create_block();
        let b1 = func.create_block();
        let b2 = func.create_block();
        let b3 = func.create_block();
        func.add_edge(b0, b1);
        func.add_edge(b1, b2);
        func.add_edge(b1, b3);
        func.add_edge(b2, b1);
        let v = op(&mut func, b0, &[]);
        goto(&mut func, b0);
        goto(&mut func, b1);
        op(&mut func, b2, &[v]);
        goto(&mut func, b2);
        ret(&mut func, b3, &[]);

        let mut pool = IntervalPool::new();
        let mut liveness = Liveness::new();
        liveness.compute(&func, &mut pool, false);

        assert_eq!(liveness.linear_order(), [b0, b1, b2, b3]);
        let interval = liveness.interval(v).unwrap();
        assert_eq!(pool[interval].ranges(), &[LiveRange::new(2, 16)]);
        assert_eq!(liveness.block_start(b3), 16);
        let ssa = liveness.ssa_index(v).unwrap() as usize;
        assert!(liveness.live_out(b2).contains(ssa));
        assert!(liveness.live_in(b1).contains(ssa));
        assert!(!liveness.live_in(b3).contains(ssa));
    }

    #[test]
    fn live_sets_reach_fixed_point() {
        let mut func = Function::new();
        let blocks: Vec<Block> = (0..5).map(|_| func.create_block()).collect();
        func.add_edge(blocks[0], blocks[1]);
        func.add_edge(blocks[1], blocks[2]);
        func.add_edge(blocks[2], blocks[3]);
        func.add_edge(blocks[3], blocks[1]);
        func.add_edge(blocks[3], blocks[4]);
        func.add_edge(blocks[2], blocks[4]);
        let a = op(&mut func, blocks[0], &[]);
        let b = op(&mut func, blocks[0], &[]);
        goto(&mut func, blocks[0]);
        let phi = func.append_phi(blocks[1], Type::Int32, &[a, b]);
        goto(&mut func, blocks[1]);
        let c = op(&mut func, blocks[2], &[phi]);
        goto(&mut func, blocks[2]);
        op(&mut func, blocks[3], &[c, b]);
        goto(&mut func, blocks[3]);
        ret(&mut func, blocks[4], &[c]);

        let mut pool = IntervalPool::new();
        let mut liveness = Liveness::new();
        liveness.compute(&func, &mut pool, false);

        for &block in liveness.linear_order() {
            for &succ in &func.block(block).succs {
                for value in liveness.live_in(succ).iter() {
                    assert!(liveness.live_out(block).contains(value));
                }
            }
            for value in liveness.live_out(block).iter() {
                if !liveness.kill(block).contains(value) {
                    assert!(liveness.live_in(block).contains(value));
                }
            }
        }
        let b_ssa = liveness.ssa_index(b).unwrap() as usize;
        assert!(liveness.live_in(blocks[1]).contains(b_ssa));
        assert!(liveness.live_out(blocks[3]).contains(b_ssa));
    }

    #[test]
    fn environment_uses() {
        let mut func = Function::new();
        let b0 = func.create_block();
        let plain = op(&mut func, b0, &[]);
        let reference = func.append_inst(
            b0,
            crate::ir::InstKind::Op("new"),
            Type::Reference,
            &[],
            crate::regalloc::testing::summary(&[], Location::requires_register()),
        );
        let holder = op(&mut func, b0, &[]);
        func.set_environment(holder, &[Some(plain), Some(reference), None]);
        ret(&mut func, b0, &[]);

        let mut pool = IntervalPool::new();
        let mut liveness = Liveness::new();
        liveness.compute(&func, &mut pool, false);
        let plain_interval = liveness.interval(plain).unwrap();
        let reference_interval = liveness.interval(reference).unwrap();
        // Only references stay alive for the environment.
        assert_eq!(pool[plain_interval].end(), liveness.position(plain) + 2);
        assert_eq!(pool[reference_interval].end(), liveness.position(holder) + 1);
        assert_eq!(pool.env_uses(reference_interval).len(), 1);

        let mut pool = IntervalPool::new();
        liveness.compute(&func, &mut pool, true);
        let plain_interval = liveness.interval(plain).unwrap();
        assert_eq!(pool[plain_interval].end(), liveness.position(holder) + 1);
    }
}
