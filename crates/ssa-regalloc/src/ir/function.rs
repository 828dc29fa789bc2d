//! Intermediate representation of a function.
//!
//! A [`Function`] is a control flow graph of blocks. Each block holds its phis and an ordered
//! list of instructions ending with a control flow instruction. Instructions reference the
//! values they use by the instruction producing them (SSA form); instructions that may be
//! inspected by a deoptimizer or a debugger also carry an environment of values.

use crate::entity::packed_option::PackedOption;
use crate::entity::{Keys, PrimaryMap};
use crate::ir::{Block, Inst, Location, LocationSummary, ParallelMove, Type};
use core::fmt;
use smallvec::SmallVec;
use std::vec::Vec;

/// The operation performed by an instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstKind {
    /// Merges one input per predecessor, in predecessor order.
    Phi,
    /// The incoming parameter with the given index.
    Parameter(u32),
    /// The method context passed to every compiled method.
    CurrentMethod,
    /// An integer constant. Constants are rematerialized, never spilled.
    Constant(i64),
    /// Any other operation, named for display.
    Op(&'static str),
    /// A control flow instruction, ending its block.
    Branch(&'static str),
    /// Moves inserted by the allocator.
    ParallelMove(ParallelMove),
}

/// Contents of an instruction.
#[derive(Clone, Debug)]
pub struct InstData {
    /// What the instruction does.
    pub kind: InstKind,
    /// The type of the produced value, `Void` if none.
    pub ty: Type,
    /// Used values.
    pub inputs: SmallVec<[Inst; 4]>,
    /// Values observed by a deoptimizer or debugger at this instruction.
    pub env: Vec<Option<Inst>>,
    /// Locations of `env` entries, filled in by the allocator.
    pub env_locations: Vec<Location>,
    /// Operand constraints. Parallel moves have none.
    pub locations: Option<LocationSummary>,
    /// The instruction may throw into a catch block of this function.
    pub throws_into_catch: bool,
    block: PackedOption<Block>,
}

impl InstData {
    fn new(kind: InstKind, ty: Type, inputs: &[Inst], locations: Option<LocationSummary>) -> Self {
        Self {
            kind,
            ty,
            inputs: inputs.iter().copied().collect(),
            env: Vec::new(),
            env_locations: Vec::new(),
            locations,
            throws_into_catch: false,
            block: None.into(),
        }
    }

    /// The block containing this instruction.
    pub fn block(&self) -> Option<Block> {
        self.block.expand()
    }

    /// Does this instruction produce a value?
    pub fn has_value(&self) -> bool {
        self.ty != Type::Void
    }

    /// Is this a phi?
    pub fn is_phi(&self) -> bool {
        self.kind == InstKind::Phi
    }

    /// Is this a constant?
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, InstKind::Constant(_))
    }

    /// Is this an incoming parameter?
    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, InstKind::Parameter(_))
    }

    /// Is this the method context?
    pub fn is_current_method(&self) -> bool {
        self.kind == InstKind::CurrentMethod
    }

    /// Is this a control flow instruction?
    pub fn is_control_flow(&self) -> bool {
        matches!(self.kind, InstKind::Branch(_))
    }

    /// The parallel move carried by this instruction.
    pub fn parallel_move(&self) -> Option<&ParallelMove> {
        match &self.kind {
            InstKind::ParallelMove(pm) => Some(pm),
            _ => None,
        }
    }
}

/// Contents of a basic block.
#[derive(Clone, Debug, Default)]
pub struct BlockData {
    /// Predecessor blocks, in the order of phi inputs.
    pub preds: SmallVec<[Block; 2]>,
    /// Successor blocks.
    pub succs: SmallVec<[Block; 2]>,
    /// Phis of the block.
    pub phis: Vec<Inst>,
    /// Instructions of the block, in order.
    pub insts: Vec<Inst>,
    /// Is this an exception handler entry?
    pub is_catch: bool,
}

impl BlockData {
    /// The last instruction of the block.
    pub fn last_inst(&self) -> Option<Inst> {
        self.insts.last().copied()
    }

    /// The first instruction of the block, phis excluded.
    pub fn first_inst(&self) -> Option<Inst> {
        self.insts.first().copied()
    }
}

/// A function: its blocks and the instructions in them.
#[derive(Clone, Debug, Default)]
pub struct Function {
    blocks: PrimaryMap<Block, BlockData>,
    insts: PrimaryMap<Inst, InstData>,
    entry: PackedOption<Block>,
    max_out_vregs: u32,
}

impl Function {
    /// Create an empty function.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new block. The first block created is the entry block.
    pub fn create_block(&mut self) -> Block {
        let block = self.blocks.push(BlockData::default());
        if self.entry.is_none() {
            self.entry = block.into();
        }
        block
    }

    /// Mark `block` as an exception handler entry.
    pub fn set_catch(&mut self, block: Block) {
        self.blocks[block].is_catch = true;
    }

    /// Add a control flow edge. Predecessor order defines phi input order.
    pub fn add_edge(&mut self, from: Block, to: Block) {
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }

    /// Append an instruction to `block`.
    pub fn append_inst(
        &mut self,
        block: Block,
        kind: InstKind,
        ty: Type,
        inputs: &[Inst],
        locations: LocationSummary,
    ) -> Inst {
        let inst = self.make_inst(InstData::new(kind, ty, inputs, Some(locations)), block);
        self.blocks[block].insts.push(inst);
        inst
    }

    /// Append a phi to `block`, with one input per predecessor.
    pub fn append_phi(&mut self, block: Block, ty: Type, inputs: &[Inst]) -> Inst {
        let mut locations = LocationSummary::new(inputs.len(), Default::default());
        locations.output = Location::any();
        let inst = self.make_inst(
            InstData::new(InstKind::Phi, ty, inputs, Some(locations)),
            block,
        );
        self.blocks[block].phis.push(inst);
        inst
    }

    /// Set the environment of `inst`.
    pub fn set_environment(&mut self, inst: Inst, env: &[Option<Inst>]) {
        let data = &mut self.insts[inst];
        data.env = env.to_vec();
        data.env_locations = std::vec![Location::Invalid; env.len()];
    }

    /// Set the largest number of stack slots used for outgoing call arguments.
    pub fn set_max_out_vregs(&mut self, count: u32) {
        self.max_out_vregs = count;
    }

    /// Largest number of stack slots used for outgoing call arguments.
    pub fn max_out_vregs(&self) -> u32 {
        self.max_out_vregs
    }

    /// The entry block.
    pub fn entry(&self) -> Option<Block> {
        self.entry.expand()
    }

    /// All blocks, in creation order.
    pub fn blocks(&self) -> Keys<Block> {
        self.blocks.keys()
    }

    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of instructions, including phis and moves.
    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    /// Contents of `block`.
    pub fn block(&self, block: Block) -> &BlockData {
        &self.blocks[block]
    }

    /// Contents of `inst`.
    pub fn inst(&self, inst: Inst) -> &InstData {
        &self.insts[inst]
    }

    /// Mutable contents of `inst`.
    pub fn inst_mut(&mut self, inst: Inst) -> &mut InstData {
        &mut self.insts[inst]
    }

    /// The block containing `inst`.
    ///
    /// Every instruction is created inside a block, so this never fails for instructions of this
    /// function.
    pub fn inst_block(&self, inst: Inst) -> Block {
        self.insts[inst]
            .block
            .expand()
            .unwrap_or_else(|| panic!("{inst} is not in a block"))
    }

    /// Location summary of `inst`.
    pub fn locations(&self, inst: Inst) -> Option<&LocationSummary> {
        self.insts[inst].locations.as_ref()
    }

    /// Mutable location summary of `inst`.
    pub fn locations_mut(&mut self, inst: Inst) -> Option<&mut LocationSummary> {
        self.insts[inst].locations.as_mut()
    }

    /// Index of `pred` in the predecessor list of `block`.
    pub fn predecessor_index(&self, block: Block, pred: Block) -> Option<usize> {
        self.blocks[block].preds.iter().position(|&p| p == pred)
    }

    /// Index of `inst` in its block's instruction list. `None` for phis.
    pub fn inst_index(&self, inst: Inst) -> Option<usize> {
        let block = self.inst_block(inst);
        self.blocks[block].insts.iter().position(|&i| i == inst)
    }

    /// The instruction preceding `inst` in its block.
    pub fn prev_inst(&self, inst: Inst) -> Option<Inst> {
        let index = self.inst_index(inst)?;
        let block = self.inst_block(inst);
        index.checked_sub(1).map(|i| self.blocks[block].insts[i])
    }

    /// The instruction following `inst` in its block.
    pub fn next_inst(&self, inst: Inst) -> Option<Inst> {
        let index = self.inst_index(inst)?;
        let block = self.inst_block(inst);
        self.blocks[block].insts.get(index + 1).copied()
    }

    /// Insert an empty parallel move at `index` in the instructions of `block`.
    pub fn insert_parallel_move(&mut self, block: Block, index: usize, position: u32) -> Inst {
        let data = InstData::new(
            InstKind::ParallelMove(ParallelMove::new(position)),
            Type::Void,
            &[],
            None,
        );
        let inst = self.make_inst(data, block);
        self.blocks[block].insts.insert(index, inst);
        inst
    }

    /// The parallel move carried by `inst`, for modification.
    pub fn parallel_move_mut(&mut self, inst: Inst) -> Option<&mut ParallelMove> {
        match &mut self.insts[inst].kind {
            InstKind::ParallelMove(pm) => Some(pm),
            _ => None,
        }
    }

    /// The parallel moves in `block`, in order.
    pub fn parallel_moves(&self, block: Block) -> impl Iterator<Item = (Inst, &ParallelMove)> + '_ {
        self.blocks[block]
            .insts
            .iter()
            .filter_map(|&inst| self.insts[inst].parallel_move().map(|pm| (inst, pm)))
    }

    fn make_inst(&mut self, mut data: InstData, block: Block) -> Inst {
        data.block = block.into();
        self.insts.push(data)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (block, data) in self.blocks.iter() {
            write!(f, "{block}")?;
            if data.is_catch {
                f.write_str(" (catch)")?;
            }
            writeln!(f, ":")?;
            for &inst in data.phis.iter().chain(&data.insts) {
                let inst_data = &self.insts[inst];
                write!(f, "    {inst}")?;
                match &inst_data.kind {
                    InstKind::ParallelMove(pm) => write!(f, " = {pm}")?,
                    kind => {
                        let out = inst_data.locations.as_ref().map(|l| l.output).unwrap_or_default();
                        write!(f, " [{out}] = {kind:?}")?;
                        for (i, input) in inst_data.inputs.iter().enumerate() {
                            let loc = inst_data
                                .locations
                                .as_ref()
                                .map(|l| l.in_at(i))
                                .unwrap_or_default();
                            write!(f, " {input}[{loc}]")?;
                        }
                    }
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::CallKind;

    #[test]
    fn build_and_splice() {
        let mut func = Function::new();
        let b0 = func.create_block();
        let b1 = func.create_block();
        func.add_edge(b0, b1);
        assert_eq!(func.entry(), Some(b0));

        let c = func.append_inst(
            b0,
            InstKind::Constant(4),
            Type::Int32,
            &[],
            LocationSummary::default(),
        );
        let goto = func.append_inst(
            b0,
            InstKind::Branch("goto"),
            Type::Void,
            &[],
            LocationSummary::new(0, CallKind::NoCall),
        );
        assert_eq!(func.next_inst(c), Some(goto));

        let pm = func.insert_parallel_move(b0, 1, 3);
        assert_eq!(func.prev_inst(goto), Some(pm));
        assert_eq!(func.parallel_moves(b0).count(), 1);
        assert_eq!(func.predecessor_index(b1, b0), Some(0));
        assert!(func.inst(goto).is_control_flow());
        assert_eq!(func.inst_block(pm), b0);
    }
}
