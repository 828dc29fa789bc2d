//! A Dominator Tree represented as mappings of Blocks to their immediate dominator.
//!
//! Computed with the iterative algorithm of Cooper, Harvey and Kennedy ("A Simple, Fast
//! Dominance Algorithm") over a reverse post-order of the reachable blocks.

use crate::entity::SecondaryMap;
use crate::entity::packed_option::PackedOption;
use crate::ir::{Block, Function};
use core::cmp::Ordering;
use std::vec::Vec;

/// RPO numbers are offset by one so zero can mean "unreachable".
const NOT_VISITED: u32 = 0;

#[derive(Clone, Default)]
struct DomNode {
    /// Number of this block in a reverse post-order traversal of the CFG, starting from 1.
    rpo_number: u32,
    /// The immediate dominator of this block. `None` for the entry block and unreachable blocks.
    idom: PackedOption<Block>,
    /// Blocks immediately dominated by this one, in block order.
    children: Vec<Block>,
}

/// The dominator tree for a single function.
pub struct DominatorTree {
    nodes: SecondaryMap<Block, DomNode>,
    postorder: Vec<Block>,
    valid: bool,
}

impl DominatorTree {
    /// Allocate a new blank dominator tree. Use `compute` to compute the dominator tree for a
    /// function.
    pub fn new() -> Self {
        Self {
            nodes: SecondaryMap::new(),
            postorder: Vec::new(),
            valid: false,
        }
    }

    /// Allocate and compute a dominator tree.
    pub fn with_function(func: &Function) -> Self {
        let mut domtree = Self::new();
        domtree.compute(func);
        domtree
    }

    /// Reset and compute the dominator tree of `func`.
    pub fn compute(&mut self, func: &Function) {
        self.clear();
        self.nodes.resize(func.num_blocks());
        self.compute_postorder(func);
        self.compute_idoms(func);
        for &block in self.postorder.iter().rev() {
            if let Some(idom) = self.nodes[block].idom.expand() {
                self.nodes[idom].children.push(block);
            }
        }
        for block in func.blocks() {
            self.nodes[block].children.sort();
        }
        self.valid = true;
    }

    /// Clear the data structures used to represent the dominator tree.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.postorder.clear();
        self.valid = false;
    }

    /// Check if the dominator tree is in a valid state.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Is `block` reachable from the entry block?
    pub fn is_reachable(&self, block: Block) -> bool {
        self.nodes[block].rpo_number != NOT_VISITED
    }

    /// Get the CFG post-order of reachable blocks.
    pub fn cfg_postorder(&self) -> &[Block] {
        debug_assert!(self.is_valid());
        &self.postorder
    }

    /// Reverse post-order index of `block`, starting from 1 at the entry.
    pub fn rpo_number(&self, block: Block) -> u32 {
        self.nodes[block].rpo_number
    }

    /// Returns the immediate dominator of `block`.
    pub fn idom(&self, block: Block) -> Option<Block> {
        self.nodes[block].idom.expand()
    }

    /// Blocks whose immediate dominator is `block`.
    pub fn dominated_blocks(&self, block: Block) -> &[Block] {
        &self.nodes[block].children
    }

    /// Returns `true` if `a` dominates `b`. A block dominates itself.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let rpo_a = self.nodes[a].rpo_number;
        let mut finger = b;
        // Dominators always have smaller RPO numbers.
        while rpo_a < self.nodes[finger].rpo_number {
            match self.idom(finger) {
                Some(idom) => finger = idom,
                None => return false,
            }
        }
        finger == a
    }

    /// Compare two blocks by reverse post-order.
    pub fn rpo_cmp(&self, a: Block, b: Block) -> Ordering {
        self.nodes[a].rpo_number.cmp(&self.nodes[b].rpo_number)
    }

    fn compute_postorder(&mut self, func: &Function) {
        let Some(entry) = func.entry() else {
            return;
        };
        // Use the `rpo_number` field as a visited mark until the numbers are assigned.
        const SEEN: u32 = 1;
        let mut stack: Vec<(Block, usize)> = std::vec![(entry, 0)];
        self.nodes[entry].rpo_number = SEEN;
        while let Some(top) = stack.last_mut() {
            let (block, next_succ) = *top;
            top.1 += 1;
            if let Some(&succ) = func.block(block).succs.get(next_succ) {
                if self.nodes[succ].rpo_number == NOT_VISITED {
                    self.nodes[succ].rpo_number = SEEN;
                    stack.push((succ, 0));
                }
            } else {
                stack.pop();
                self.postorder.push(block);
            }
        }
        let n = self.postorder.len() as u32;
        for (i, &block) in self.postorder.iter().enumerate() {
            self.nodes[block].rpo_number = n - i as u32;
        }
    }

    fn compute_idoms(&mut self, func: &Function) {
        let mut changed = true;
        while changed {
            changed = false;
            // Skip the entry block, last in post-order.
            for i in (0..self.postorder.len().saturating_sub(1)).rev() {
                let block = self.postorder[i];
                let mut new_idom: Option<Block> = None;
                for &pred in &func.block(block).preds {
                    if !self.is_reachable(pred) {
                        continue;
                    }
                    // A predecessor without an idom yet is only usable if it is the entry.
                    if self.nodes[pred].idom.is_none() && self.nodes[pred].rpo_number != 1 {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(idom) => self.common_dominator(idom, pred),
                    });
                }
                if let Some(idom) = new_idom {
                    if self.nodes[block].idom.expand() != Some(idom) {
                        self.nodes[block].idom = idom.into();
                        changed = true;
                    }
                }
            }
        }
    }

    fn common_dominator(&self, mut a: Block, mut b: Block) -> Block {
        while a != b {
            while self.nodes[a].rpo_number > self.nodes[b].rpo_number {
                match self.idom(a) {
                    Some(idom) => a = idom,
                    None => return b,
                }
            }
            while self.nodes[b].rpo_number > self.nodes[a].rpo_number {
                match self.idom(b) {
                    Some(idom) => b = idom,
                    None => return a,
                }
            }
        }
        a
    }
}

impl Default for DominatorTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(num_blocks: usize, edges: &[(usize, usize)]) -> (Function, Vec<Block>) {
        let mut func = Function::new();
        let blocks: Vec<Block> = (0..num_blocks).map(|_| func.create_block()).collect();
        for &(from, to) in edges {
            func.add_edge(blocks[from], blocks[to]);
        }
        (func, blocks)
    }

    #[test]
    fn empty() {
        let func = Function::new();
        let dtree = DominatorTree::with_function(&func);
        assert!(dtree.cfg_postorder().is_empty());
    }

    #[test]
    fn diamond() {
        let (func, b) = cfg(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let dt = DominatorTree::with_function(&func);
        assert_eq!(dt.idom(b[0]), None);
        assert_eq!(dt.idom(b[1]), Some(b[0]));
        assert_eq!(dt.idom(b[2]), Some(b[0]));
        assert_eq!(dt.idom(b[3]), Some(b[0]));
        assert_eq!(dt.dominated_blocks(b[0]), &[b[1], b[2], b[3]]);
        assert!(dt.dominates(b[0], b[3]));
        assert!(!dt.dominates(b[1], b[3]));
        assert!(dt.dominates(b[3], b[3]));
        assert_eq!(dt.rpo_number(b[0]), 1);
    }

    #[test]
    fn loop_and_unreachable() {
        let (func, b) = cfg(5, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let dt = DominatorTree::with_function(&func);
        assert_eq!(dt.idom(b[2]), Some(b[1]));
        assert_eq!(dt.idom(b[3]), Some(b[2]));
        assert!(dt.dominates(b[1], b[3]));
        assert!(!dt.is_reachable(b[4]));
        assert!(!dt.dominates(b[0], b[4]));
    }

    #[test]
    fn irreducible() {
        // Both 1 and 2 are entered from 0.
        let (func, b) = cfg(4, &[(0, 1), (0, 2), (1, 2), (2, 1), (2, 3)]);
        let dt = DominatorTree::with_function(&func);
        assert_eq!(dt.idom(b[1]), Some(b[0]));
        assert_eq!(dt.idom(b[2]), Some(b[0]));
        assert_eq!(dt.idom(b[3]), Some(b[2]));
    }
}
