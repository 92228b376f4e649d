use super::{BlockId, Function};

/// The dominator tree of a function's CFG.
///
/// Computed with the iterative dataflow algorithm of Cooper, Harvey and
/// Kennedy over the reverse postorder. Children lists are kept in block
/// creation order, so a preorder walk visits siblings left to right.
#[derive(Debug)]
pub struct DominatorTree {
    entry: BlockId,
    idom: Vec<Option<BlockId>>,
    children: Vec<Vec<BlockId>>,
}

impl DominatorTree {
    /// Computes the dominator tree of `func`.
    pub fn compute(func: &Function) -> Self {
        let entry = func.entry();
        let rpo = func.reverse_postorder();

        // Position of each block in the reverse postorder; unreachable
        // blocks have none and stay out of the tree.
        let mut rpo_index = vec![None; func.block_count()];
        for (i, &block) in rpo.iter().enumerate() {
            rpo_index[block.to_usize()] = Some(i);
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; func.block_count()];
        idom[entry.to_usize()] = Some(entry);

        let intersect = |idom: &[Option<BlockId>], a: BlockId, b: BlockId| -> BlockId {
            let mut a = a;
            let mut b = b;
            while a != b {
                let pos = |x: BlockId| rpo_index[x.to_usize()].expect("block is reachable");
                while pos(a) > pos(b) {
                    a = idom[a.to_usize()].expect("processed block has an idom");
                }
                while pos(b) > pos(a) {
                    b = idom[b.to_usize()].expect("processed block has an idom");
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in func.block(block).predecessors() {
                    if rpo_index[pred.to_usize()].is_none() || idom[pred.to_usize()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, current, pred),
                    });
                }
                let new_idom = new_idom.expect("reachable block has a processed predecessor");
                if idom[block.to_usize()] != Some(new_idom) {
                    idom[block.to_usize()] = Some(new_idom);
                    changed = true;
                }
            }
        }

        let mut children = vec![Vec::new(); func.block_count()];
        for block in func.block_ids() {
            if block == entry {
                continue;
            }
            if let Some(parent) = idom[block.to_usize()] {
                children[parent.to_usize()].push(block);
            }
        }

        Self {
            entry,
            idom,
            children,
        }
    }

    /// The tree's root, the CFG entry block.
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// The immediate dominator of `block`. The entry block is its own
    /// immediate dominator; unreachable blocks have none.
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.idom[block.to_usize()]
    }

    /// The blocks immediately dominated by `block`, in creation order.
    pub fn immediately_dominated(&self, block: BlockId) -> &[BlockId] {
        &self.children[block.to_usize()]
    }

    /// True if `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom[current.to_usize()] {
                Some(parent) if parent != current => current = parent,
                _ => return false,
            }
        }
    }
}
