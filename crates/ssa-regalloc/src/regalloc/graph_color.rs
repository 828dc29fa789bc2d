//! Graph coloring register allocation.
//!
//! Each register class is colored separately. An attempt builds the interference graph of every
//! sibling of the class, prunes it Chaitin-style onto a stack and colors the nodes in reverse
//! pruning order. When a node needing a register finds no color, its interval is split around
//! its register uses and the whole attempt starts over with the sparser graph.
//!
//! An attempt only reads the intervals. Colors and spill slots are written once an attempt
//! succeeds, and a failed attempt is dropped with its graph.

use super::allocator::{AllocState, Allocation, Work};
use super::interval::{IntervalId, IntervalPool};
use super::liverange::Position;
use super::liveness::Liveness;
use crate::entity::packed_option::PackedOption;
use crate::entity::{PrimaryMap, SecondaryMap, entity_impl};
use crate::ir::{Function, RegUnit};
use crate::isa::TargetRegisters;
use crate::result::{RegallocError, RegallocResult};
use crate::timing;
use cranelift_bitset::CompoundBitSet;
use log::{debug, trace};
use smallvec::SmallVec;
use std::collections::{BinaryHeap, VecDeque};
use std::vec::Vec;

/// Allocate every interval of `func` by graph coloring.
pub(crate) fn run(
    func: &Function,
    liveness: &Liveness,
    pool: &mut IntervalPool,
    target: &dyn TargetRegisters,
    max_attempts: u32,
    coalesce: bool,
) -> RegallocResult<Allocation> {
    let _tt = timing::graph_color();
    let mut state = AllocState::new(func, liveness, pool, target, false);

    let mut core = Vec::new();
    let mut fp = Vec::new();
    for work in state.process_instructions() {
        match work {
            Work::Push(id) | Work::Insert(id) => {
                if state.pool[id].is_high() {
                    // Colored with its low half.
                    continue;
                }
                if state.pool[id].is_floating_point() {
                    fp.push(id);
                } else {
                    core.push(id);
                }
            }
            Work::SlowPathSafepoint(id) => {
                core.push(id);
                fp.push(id);
            }
        }
    }

    let mut max_safepoint_live = [0, 0];
    for (is_fp, intervals) in [(false, core), (true, fp)] {
        // A fixed output only pins its register at the definition.
        for &id in &intervals {
            let interval = &state.pool[id];
            if interval.has_register() && !interval.is_temp() {
                let start = interval.start();
                state.split(id, start + 1);
            }
        }

        let physical = state.physical_intervals(is_fp).to_vec();
        let mut attempts = 0;
        let coloring = loop {
            attempts += 1;
            if attempts > max_attempts {
                return Err(RegallocError::ColoringAttemptsExhausted {
                    attempts: max_attempts,
                });
            }
            let graph = InterferenceGraph::build(&state, is_fp, &intervals, &physical);
            match graph.attempt(coalesce) {
                Attempt::Colored(coloring) => break coloring,
                Attempt::NeedsSplit(failed) => {
                    trace!("attempt {attempts}: splitting {} intervals", failed.len());
                    for id in failed {
                        split_at_register_uses(&mut state, id);
                    }
                }
            }
        };
        debug!(
            "{} registers colored after {attempts} attempts",
            if is_fp { "fp" } else { "core" }
        );

        for &(id, reg) in &coloring.colors {
            state.pool[id].set_register(reg);
            state.mark_allocated(reg, is_fp);
            if let Some(high) = state.pool[id].high() {
                state.pool[high].set_register(reg + 1);
                state.mark_allocated(reg + 1, is_fp);
            }
        }
        for &id in &coloring.spilled {
            state.allocate_spill_slot_for(id);
        }
        max_safepoint_live[is_fp as usize] = coloring.max_safepoint_live;
    }

    state.enforce_spilled_live_ins();
    Ok(state.finish(max_safepoint_live[0], max_safepoint_live[1]))
}

/// Split `id` right after a definition needing a register and around each register use, so
/// that the pieces holding a register are as short as possible.
fn split_at_register_uses(state: &mut AllocState<'_>, id: IntervalId) {
    fn try_split(
        state: &mut AllocState<'_>,
        interval: IntervalId,
        position: Position,
    ) -> IntervalId {
        let current = &state.pool[interval];
        if current.start() < position && position < current.end() {
            state.split(interval, position).unwrap_or(interval)
        } else {
            interval
        }
    }

    let mut interval = id;
    if !state.pool[interval].is_split() && state.pool[interval].definition_requires_register() {
        let start = state.pool[interval].start();
        interval = try_split(state, interval, start + 1);
    }

    let register_uses: SmallVec<[Position; 8]> = state
        .pool
        .uses(interval)
        .iter()
        .filter(|u| u.requires_register)
        .map(|u| u.position)
        .collect();
    for position in register_uses {
        interval = try_split(state, interval, position - 1);
        let at_control_flow = state
            .liveness
            .inst_at(position)
            .is_some_and(|inst| state.func.inst(inst).is_control_flow());
        // A use at the end of a block cannot be split off at the use itself.
        let after = if at_control_flow { position + 1 } else { position };
        interval = try_split(state, interval, after);
    }
}

/// A node of the interference graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Node(u32);
entity_impl!(Node, "node");

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Stage {
    /// The canonical node of a physical register.
    Precolored,
    /// A slow-path safepoint marker: only its outgoing edges matter.
    Safepoint,
    Simplify,
    Spill,
    Pruned,
}

struct NodeData {
    interval: IntervalId,
    stage: Stage,
    adjacent: SmallVec<[Node; 8]>,
    degree: u32,
    is_pair: bool,
    requires_register: bool,
    length: Position,
}

/// Order of the spill worklist: the top is pruned first.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct SpillPriority {
    no_register_use: bool,
    length: Position,
    interval: IntervalId,
    node: Node,
}

/// A successful attempt.
struct Coloring {
    colors: Vec<(IntervalId, RegUnit)>,
    spilled: Vec<IntervalId>,
    max_safepoint_live: u32,
}

enum Attempt {
    Colored(Coloring),
    /// Intervals that needed a register and found none.
    NeedsSplit(Vec<IntervalId>),
}

struct InterferenceGraph<'s, 'a> {
    state: &'s AllocState<'a>,
    fp: bool,
    num_registers: usize,
    nodes: PrimaryMap<Node, NodeData>,
    /// The node of each uncolored sibling.
    by_interval: SecondaryMap<IntervalId, PackedOption<Node>>,
    /// Canonical node per physical register. Every pre-colored sibling stands for it.
    physical: Vec<Node>,
    safepoints: Vec<Node>,
    prunable: Vec<Node>,
}

impl<'s, 'a> InterferenceGraph<'s, 'a> {
    fn build(
        state: &'s AllocState<'a>,
        fp: bool,
        intervals: &[IntervalId],
        physical_intervals: &[IntervalId],
    ) -> Self {
        let pool = &*state.pool;
        let mut graph = Self {
            state,
            fp,
            num_registers: state.target.num_registers(fp),
            nodes: PrimaryMap::new(),
            by_interval: SecondaryMap::new(),
            physical: Vec::new(),
            safepoints: Vec::new(),
            prunable: Vec::new(),
        };

        // Range endpoints as (position, is_start, interval, node). Ends sort before starts at
        // the same position, so touching ranges do not interfere.
        let mut endpoints: Vec<(Position, bool, IntervalId, Node)> = Vec::new();
        let add_ranges = |endpoints: &mut Vec<_>, id: IntervalId, node: Node| {
            for range in pool[id].ranges() {
                endpoints.push((range.start, true, id, node));
                endpoints.push((range.end, false, id, node));
            }
        };

        for &id in physical_intervals {
            let node = graph.nodes.push(NodeData::new(id, Stage::Precolored, false, false, 0));
            graph.physical.push(node);
            add_ranges(&mut endpoints, id, node);
        }

        for &start in intervals {
            for sibling in pool.siblings(start) {
                let interval = &pool[sibling];
                if interval.ranges().is_empty() {
                    continue;
                }
                if let Some(reg) = interval.register() {
                    add_ranges(&mut endpoints, sibling, graph.physical[reg as usize]);
                    if let Some(high_reg) = interval.high().and_then(|h| pool[h].register()) {
                        add_ranges(&mut endpoints, sibling, graph.physical[high_reg as usize]);
                    }
                    continue;
                }
                let stage = if interval.is_slow_path_safepoint() {
                    Stage::Safepoint
                } else {
                    Stage::Simplify
                };
                let node = graph.nodes.push(NodeData::new(
                    sibling,
                    stage,
                    interval.high().is_some(),
                    pool.requires_register(sibling),
                    interval.length(),
                ));
                if stage == Stage::Safepoint {
                    graph.safepoints.push(node);
                } else {
                    graph.by_interval[sibling] = node.into();
                    graph.prunable.push(node);
                }
                add_ranges(&mut endpoints, sibling, node);
            }
        }

        endpoints.sort_unstable();
        let mut live: Vec<(IntervalId, Node)> = Vec::new();
        for (_, is_start, id, node) in endpoints {
            if is_start {
                for index in 0..live.len() {
                    let other = live[index].1;
                    graph.add_interference(node, other);
                    graph.add_interference(other, node);
                }
                live.push((id, node));
            } else if let Some(index) = live.iter().position(|&entry| entry == (id, node)) {
                live.swap_remove(index);
            }
        }
        graph
    }

    fn add_interference(&mut self, from: Node, to: Node) {
        if from == to
            || self.nodes[from].stage == Stage::Precolored
            || self.nodes[to].stage == Stage::Safepoint
            || self.nodes[from].adjacent.contains(&to)
        {
            return;
        }
        let weight = self.edge_weight(from, to);
        let data = &mut self.nodes[from];
        data.adjacent.push(to);
        data.degree += weight;
    }

    fn edge_weight(&self, a: Node, b: Node) -> u32 {
        if self.nodes[a].is_pair || self.nodes[b].is_pair {
            2
        } else {
            1
        }
    }

    fn attempt(mut self, coalesce: bool) -> Attempt {
        let stack = self.prune();
        self.color(stack, coalesce)
    }

    /// Remove every prunable node from the graph, returning them in pruning order.
    fn prune(&mut self) -> Vec<Node> {
        let num_registers = self.num_registers as u32;
        let mut simplify = VecDeque::new();
        let mut spill = BinaryHeap::new();
        for &node in &self.prunable {
            let data = &mut self.nodes[node];
            if data.degree < num_registers {
                data.stage = Stage::Simplify;
                simplify.push_back(node);
            } else {
                data.stage = Stage::Spill;
                spill.push(SpillPriority {
                    no_register_use: !data.requires_register,
                    length: data.length,
                    interval: data.interval,
                    node,
                });
            }
        }

        let mut stack = Vec::with_capacity(self.prunable.len());
        loop {
            let node = if let Some(node) = simplify.pop_front() {
                node
            } else if let Some(candidate) = spill.pop() {
                if self.nodes[candidate.node].stage != Stage::Spill {
                    // Moved to the simplify worklist since.
                    continue;
                }
                candidate.node
            } else {
                break;
            };
            if self.nodes[node].stage == Stage::Pruned {
                continue;
            }
            self.nodes[node].stage = Stage::Pruned;
            stack.push(node);

            for index in 0..self.nodes[node].adjacent.len() {
                let adjacent = self.nodes[node].adjacent[index];
                let weight = self.edge_weight(node, adjacent);
                let data = &mut self.nodes[adjacent];
                if matches!(data.stage, Stage::Precolored | Stage::Pruned) {
                    continue;
                }
                let was_high = data.degree >= num_registers;
                data.degree -= weight.min(data.degree);
                if was_high && data.degree < num_registers && data.stage == Stage::Spill {
                    data.stage = Stage::Simplify;
                    simplify.push_back(adjacent);
                }
            }
        }
        stack
    }

    /// The register of a node in this attempt.
    fn node_color(&self, node: Node, colors: &SecondaryMap<Node, Option<RegUnit>>) -> Option<RegUnit> {
        match self.nodes[node].stage {
            Stage::Precolored => self.state.pool[self.nodes[node].interval].register(),
            _ => colors[node],
        }
    }

    /// The register of any sibling of this class in this attempt.
    fn interval_color(
        &self,
        id: IntervalId,
        colors: &SecondaryMap<Node, Option<RegUnit>>,
    ) -> Option<RegUnit> {
        self.state.pool[id]
            .register()
            .or_else(|| self.by_interval[id].expand().and_then(|node| colors[node]))
    }

    /// Registers taken by the colored neighbors of `node`.
    fn conflicts(&self, node: Node, colors: &SecondaryMap<Node, Option<RegUnit>>) -> CompoundBitSet {
        let mut taken = CompoundBitSet::with_capacity(self.num_registers + 1);
        for &adjacent in &self.nodes[node].adjacent {
            if let Some(reg) = self.node_color(adjacent, colors) {
                taken.insert(reg as usize);
                if self.nodes[adjacent].is_pair {
                    taken.insert(reg as usize + 1);
                }
            }
        }
        taken
    }

    fn color(self, mut stack: Vec<Node>, coalesce: bool) -> Attempt {
        let mut colors: SecondaryMap<Node, Option<RegUnit>> = SecondaryMap::new();
        let mut colored = Vec::new();
        let mut spilled = Vec::new();
        let mut failed = Vec::new();

        while let Some(node) = stack.pop() {
            let data = &self.nodes[node];
            let taken = self.conflicts(node, &colors);
            let is_pair = data.is_pair;
            let step = if is_pair { 2 } else { 1 };
            let free = |reg: usize| {
                reg + step <= self.num_registers
                    && (!is_pair || reg % 2 == 0)
                    && (reg..reg + step).all(|r| {
                        !taken.contains(r) && !self.state.target.is_blocked(r as RegUnit, self.fp)
                    })
            };

            let mut choice = (0..self.num_registers).step_by(step).find(|&reg| free(reg));
            if coalesce && choice.is_some() {
                let hint = self
                    .coalesce_hints(node, &colors)
                    .into_iter()
                    .find(|&reg| free(reg as usize));
                if let Some(hint) = hint {
                    choice = Some(hint as usize);
                }
            }

            match choice {
                Some(reg) => {
                    let reg = reg as RegUnit;
                    colors[node] = Some(reg);
                    colored.push((data.interval, reg));
                }
                None if data.requires_register => failed.push(data.interval),
                None => spilled.push(data.interval),
            }
        }

        if !failed.is_empty() {
            return Attempt::NeedsSplit(failed);
        }

        let mut max_safepoint_live = 0;
        for &safepoint in &self.safepoints {
            let taken = self.conflicts(safepoint, &colors);
            let live = (0..self.num_registers)
                .filter(|&r| taken.contains(r))
                .filter(|&r| !self.state.target.is_blocked(r as RegUnit, self.fp))
                .count() as u32;
            max_safepoint_live = max_safepoint_live.max(live);
        }

        Attempt::Colored(Coloring {
            colors: colored,
            spilled,
            max_safepoint_live,
        })
    }

    /// Registers that would save a move: those of the siblings touching this one, of phi
    /// partners, and of the siblings at the end of the predecessors when this one starts a
    /// block.
    fn coalesce_hints(
        &self,
        node: Node,
        colors: &SecondaryMap<Node, Option<RegUnit>>,
    ) -> SmallVec<[RegUnit; 4]> {
        let pool = &*self.state.pool;
        let liveness = self.state.liveness;
        let func = self.state.func;
        let id = self.nodes[node].interval;
        let interval = &pool[id];
        let (start, end) = (interval.start(), interval.end());
        let parent = pool.parent(id);
        let mut hints = SmallVec::new();
        let mut push = |reg: Option<RegUnit>| hints.extend(reg);

        for sibling in pool.siblings(parent) {
            if sibling != id && (pool[sibling].end() == start || pool[sibling].start() == end) {
                push(self.interval_color(sibling, colors));
            }
        }

        if let Some(def) = interval.defined_by().filter(|_| !interval.is_split()) {
            if func.inst(def).is_phi() {
                let preds = &func.block(func.inst_block(def)).preds;
                for (&input, &pred) in func.inst(def).inputs.iter().zip(preds.iter()) {
                    let pred_end = liveness.block_end(pred);
                    let sibling = liveness
                        .interval(input)
                        .filter(|_| pred_end > 0)
                        .and_then(|root| pool.sibling_at(root, pred_end - 1));
                    push(sibling.and_then(|s| self.interval_color(s, colors)));
                }
            }
        }
        for use_pos in pool.uses(id).iter().filter(|u| u.is_phi) {
            if let Some(phi) = liveness.interval(use_pos.user) {
                push(self.interval_color(phi, colors));
            }
        }

        if interval.is_split() && liveness.is_at_block_boundary(start) {
            if let Some(block) = liveness.block_at(start) {
                for &pred in &func.block(block).preds {
                    let pred_end = liveness.block_end(pred);
                    if pred_end == 0 || pred_end - 1 >= start {
                        continue;
                    }
                    let sibling = pool.sibling_at(parent, pred_end - 1);
                    push(sibling.and_then(|s| self.interval_color(s, colors)));
                }
            }
        }
        hints
    }
}

impl NodeData {
    fn new(
        interval: IntervalId,
        stage: Stage,
        is_pair: bool,
        requires_register: bool,
        length: Position,
    ) -> Self {
        Self {
            interval,
            stage,
            adjacent: SmallVec::new(),
            degree: 0,
            is_pair,
            requires_register,
            length,
        }
    }
}
