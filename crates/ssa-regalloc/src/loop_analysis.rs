//! A loop analysis represented as mappings of loops to their header Block
//! and parent in the loop tree.
//!
//! Loops are found from the retreating edges of a depth-first traversal, so irreducible loops
//! (whose header does not dominate all of the loop) are detected too. Loops sharing a header are
//! merged.

use crate::dominator_tree::DominatorTree;
use crate::entity::packed_option::PackedOption;
use crate::entity::{EntityRef, Keys, PrimaryMap, SecondaryMap, entity_impl};
use crate::ir::{Block, Function};
use cranelift_bitset::CompoundBitSet;
use smallvec::SmallVec;
use std::vec::Vec;

/// A opaque reference to a code loop.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Loop(u32);
entity_impl!(Loop, "loop");

/// Loop tree information for a single function.
///
/// Loops are referenced by the Loop object, and for each loop you can access its header block,
/// its eventual parent in the loop tree and all the block belonging to the loop.
pub struct LoopAnalysis {
    loops: PrimaryMap<Loop, LoopData>,
    block_loop_map: SecondaryMap<Block, PackedOption<Loop>>,
    valid: bool,
}

struct LoopData {
    header: Block,
    parent: PackedOption<Loop>,
    back_edges: SmallVec<[Block; 2]>,
    blocks: CompoundBitSet,
    num_blocks: usize,
    irreducible: bool,
    level: u32,
}

impl LoopAnalysis {
    /// Allocate a new blank loop analysis struct. Use `compute` to compute the loop analysis for
    /// a function.
    pub fn new() -> Self {
        Self {
            loops: PrimaryMap::new(),
            block_loop_map: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Returns all the loops contained in a function.
    pub fn loops(&self) -> Keys<Loop> {
        self.loops.keys()
    }

    /// Returns the header block of a particular loop.
    pub fn loop_header(&self, lp: Loop) -> Block {
        self.loops[lp].header
    }

    /// Return the eventual parent of a loop in the loop tree.
    pub fn loop_parent(&self, lp: Loop) -> Option<Loop> {
        self.loops[lp].parent.expand()
    }

    /// Sources of the edges going back to the header of `lp`.
    pub fn back_edges(&self, lp: Loop) -> &[Block] {
        &self.loops[lp].back_edges
    }

    /// Is `lp` entered other than through its header?
    pub fn is_irreducible(&self, lp: Loop) -> bool {
        self.loops[lp].irreducible
    }

    /// Return the innermost loop for a given block.
    pub fn innermost_loop(&self, block: Block) -> Option<Loop> {
        self.block_loop_map[block].expand()
    }

    /// Determine if a Block is a loop header. If so, return the loop.
    pub fn is_loop_header(&self, block: Block) -> Option<Loop> {
        self.innermost_loop(block)
            .filter(|&lp| self.loop_header(lp) == block)
    }

    /// Is `block` the header of an irreducible loop?
    pub fn is_irreducible_header(&self, block: Block) -> bool {
        self.is_loop_header(block)
            .is_some_and(|lp| self.is_irreducible(lp))
    }

    /// Returns `true` if `block` is in loop `lp` or one of its inner loops.
    pub fn is_in_loop(&self, block: Block, lp: Loop) -> bool {
        self.loops[lp].blocks.contains(block.index())
    }

    /// Is loop `inner` nested in `outer`? A loop is nested in itself.
    pub fn is_child_loop(&self, inner: Loop, outer: Loop) -> bool {
        let mut finger = Some(inner);
        while let Some(lp) = finger {
            if lp == outer {
                return true;
            }
            finger = self.loop_parent(lp);
        }
        false
    }

    /// Loop nesting depth of `block`. Zero outside of loops.
    pub fn loop_level(&self, block: Block) -> u32 {
        self.innermost_loop(block)
            .map_or(0, |lp| self.loops[lp].level)
    }

    /// Blocks of `lp`, including those of inner loops.
    pub fn loop_blocks(&self, lp: Loop) -> impl Iterator<Item = Block> + '_ {
        self.loops[lp].blocks.iter().map(Block::new)
    }

    /// Iterate from the innermost loop containing `block` outwards.
    pub fn outward_loops(&self, block: Block) -> impl Iterator<Item = Loop> + '_ {
        core::iter::successors(self.innermost_loop(block), move |&lp| self.loop_parent(lp))
    }
}

impl LoopAnalysis {
    /// Detects the loops in a function. Needs the dominator tree.
    pub fn compute(&mut self, func: &Function, domtree: &DominatorTree) {
        self.clear();
        self.block_loop_map.resize(func.num_blocks());
        self.find_back_edges(func, domtree);
        self.discover_loop_blocks(func, domtree);
        self.build_loop_tree(func, domtree);
        self.valid = true;
    }

    /// Check if the loop analysis is in a valid state.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Clear all the data structures contained in the loop analysis.
    pub fn clear(&mut self) {
        self.loops.clear();
        self.block_loop_map.clear();
        self.valid = false;
    }

    // Depth-first traversal marking every edge to a block still on the stack. Each target of
    // such an edge becomes a loop header, with one loop per header.
    fn find_back_edges(&mut self, func: &Function, domtree: &DominatorTree) {
        let Some(entry) = func.entry() else {
            return;
        };
        #[derive(Clone, Copy, PartialEq, Default)]
        enum State {
            #[default]
            New,
            OnStack,
            Done,
        }
        let mut state: SecondaryMap<Block, State> = SecondaryMap::new();
        let mut header_loop: SecondaryMap<Block, PackedOption<Loop>> = SecondaryMap::new();
        let mut edges: Vec<(Block, Block)> = Vec::new();
        let mut stack: Vec<(Block, usize)> = std::vec![(entry, 0)];
        state[entry] = State::OnStack;
        while let Some(top) = stack.last_mut() {
            let (block, next) = *top;
            top.1 += 1;
            match func.block(block).succs.get(next) {
                Some(&succ) => match state[succ] {
                    State::New => {
                        state[succ] = State::OnStack;
                        stack.push((succ, 0));
                    }
                    State::OnStack => edges.push((block, succ)),
                    State::Done => {}
                },
                None => {
                    state[block] = State::Done;
                    stack.pop();
                }
            }
        }

        // Create loops in reverse post-order of their headers so outer loops come first.
        edges.sort_by(|a, b| domtree.rpo_cmp(a.1, b.1).then(a.0.cmp(&b.0)));
        for (latch, header) in edges {
            let lp = match header_loop[header].expand() {
                Some(lp) => lp,
                None => {
                    let lp = self.loops.push(LoopData {
                        header,
                        parent: None.into(),
                        back_edges: SmallVec::new(),
                        blocks: CompoundBitSet::new(),
                        num_blocks: 0,
                        irreducible: false,
                        level: 0,
                    });
                    header_loop[header] = lp.into();
                    lp
                }
            };
            let data = &mut self.loops[lp];
            if !data.back_edges.contains(&latch) {
                data.back_edges.push(latch);
            }
            if !domtree.dominates(header, latch) {
                data.irreducible = true;
            }
        }
    }

    // The body of a loop is its header plus every block reaching a back edge source without
    // going through the header, restricted to blocks reachable from the header.
    fn discover_loop_blocks(&mut self, func: &Function, domtree: &DominatorTree) {
        let mut from_header = CompoundBitSet::new();
        let mut stack: Vec<Block> = Vec::new();
        for data in self.loops.values_mut() {
            from_header.clear();
            stack.push(data.header);
            from_header.insert(data.header.index());
            while let Some(block) = stack.pop() {
                for &succ in &func.block(block).succs {
                    if from_header.insert(succ.index()) {
                        stack.push(succ);
                    }
                }
            }

            data.blocks.insert(data.header.index());
            for &latch in &data.back_edges {
                if data.blocks.insert(latch.index()) {
                    stack.push(latch);
                }
            }
            while let Some(block) = stack.pop() {
                for &pred in &func.block(block).preds {
                    if domtree.is_reachable(pred)
                        && from_header.contains(pred.index())
                        && data.blocks.insert(pred.index())
                    {
                        stack.push(pred);
                    }
                }
            }
            data.num_blocks = data.blocks.iter().count();
        }
    }

    // A loop's parent is the smallest other loop containing its header. Ties in size go to the
    // loop created first, which keeps the relation acyclic.
    fn build_loop_tree(&mut self, func: &Function, domtree: &DominatorTree) {
        let key = |lp: Loop, data: &LoopData| (data.num_blocks, core::cmp::Reverse(lp));
        let parents: Vec<Option<Loop>> = self
            .loops
            .iter()
            .map(|(lp, data)| {
                self.loops
                    .iter()
                    .filter(|&(other, other_data)| {
                        other != lp
                            && other_data.blocks.contains(data.header.index())
                            && key(other, other_data) > key(lp, data)
                    })
                    .min_by_key(|&(other, other_data)| key(other, other_data))
                    .map(|(other, _)| other)
            })
            .collect();
        for (lp, parent) in parents.into_iter().enumerate() {
            self.loops[Loop::new(lp)].parent = parent.into();
        }

        for block in func.blocks().filter(|&b| domtree.is_reachable(b)) {
            let innermost = self
                .loops
                .iter()
                .filter(|(_, data)| data.blocks.contains(block.index()))
                .min_by_key(|&(lp, data)| key(lp, data))
                .map(|(lp, _)| lp);
            self.block_loop_map[block] = innermost.into();
        }

        for lp in self.loops.keys() {
            let depth = self.outward_from(lp).count() as u32;
            self.loops[lp].level = depth;
        }
    }

    fn outward_from(&self, lp: Loop) -> impl Iterator<Item = Loop> + '_ {
        core::iter::successors(Some(lp), move |&lp| self.loop_parent(lp))
    }
}

impl Default for LoopAnalysis {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(num_blocks: usize, edges: &[(usize, usize)]) -> (Vec<Block>, LoopAnalysis) {
        let mut func = Function::new();
        let blocks: Vec<Block> = (0..num_blocks).map(|_| func.create_block()).collect();
        for &(from, to) in edges {
            func.add_edge(blocks[from], blocks[to]);
        }
        let domtree = DominatorTree::with_function(&func);
        let mut loop_analysis = LoopAnalysis::new();
        loop_analysis.compute(&func, &domtree);
        (blocks, loop_analysis)
    }

    #[test]
    fn nested_loops_detection() {
        let (b, la) = analyze(
            5,
            &[(0, 1), (1, 2), (2, 1), (2, 3), (3, 0), (3, 4)],
        );
        let loops = la.loops().collect::<Vec<Loop>>();
        assert_eq!(loops.len(), 2);
        assert_eq!(la.loop_header(loops[0]), b[0]);
        assert_eq!(la.loop_header(loops[1]), b[1]);
        assert_eq!(la.loop_parent(loops[1]), Some(loops[0]));
        assert_eq!(la.loop_parent(loops[0]), None);
        assert!(la.is_in_loop(b[0], loops[0]));
        assert!(!la.is_in_loop(b[0], loops[1]));
        assert!(la.is_in_loop(b[1], loops[1]));
        assert!(la.is_in_loop(b[2], loops[0]));
        assert!(!la.is_in_loop(b[4], loops[0]));
        assert_eq!(la.loop_level(b[0]), 1);
        assert_eq!(la.loop_level(b[2]), 2);
        assert_eq!(la.loop_level(b[3]), 1);
        assert_eq!(la.loop_level(b[4]), 0);
        assert_eq!(la.innermost_loop(b[2]), Some(loops[1]));
        assert_eq!(la.is_loop_header(b[1]), Some(loops[1]));
        assert_eq!(la.is_loop_header(b[2]), None);
        assert_eq!(la.back_edges(loops[1]), &[b[2]]);
        assert!(la.is_child_loop(loops[1], loops[0]));
        assert_eq!(la.outward_loops(b[2]).collect::<Vec<_>>(), [loops[1], loops[0]]);
        assert!(!la.is_irreducible(loops[0]));
    }

    #[test]
    fn merged_back_edges() {
        // Two latches for the same header make a single loop.
        let (b, la) = analyze(5, &[(0, 1), (1, 2), (1, 3), (2, 1), (3, 1), (1, 4)]);
        let loops = la.loops().collect::<Vec<Loop>>();
        assert_eq!(loops.len(), 1);
        assert_eq!(la.back_edges(loops[0]).len(), 2);
        assert_eq!(
            la.loop_blocks(loops[0]).collect::<Vec<_>>(),
            [b[1], b[2], b[3]]
        );
    }

    #[test]
    fn irreducible_loop() {
        let (b, la) = analyze(4, &[(0, 1), (0, 2), (1, 2), (2, 1), (2, 3)]);
        let loops = la.loops().collect::<Vec<Loop>>();
        assert_eq!(loops.len(), 1);
        assert_eq!(la.loop_header(loops[0]), b[1]);
        assert!(la.is_irreducible(loops[0]));
        assert!(la.is_irreducible_header(b[1]));
        assert!(la.is_in_loop(b[2], loops[0]));
        assert!(!la.is_in_loop(b[0], loops[0]));
    }
}
