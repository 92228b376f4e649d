use std::collections::{HashMap, HashSet};

use super::{BlockId, Function, InstId, Value};

/// Per-value liveness information.
///
/// A use inside a block is the *last use* if the value is not live-out of
/// that block and no later statement of the block reads it. Phi operands
/// count as uses at the predecessor's terminator, not as live-in of the
/// phi's block.
#[derive(Debug, Default)]
pub struct LiveRange {
    uses: u32,
    // Statement index of the last use per block, for blocks where the
    // value dies. The terminator counts as index `insts.len()`.
    last_uses: HashMap<BlockId, u32>,
}

impl LiveRange {
    /// True if the statement at `index` in `block` is the last use of the
    /// value.
    pub fn last_use(&self, block: BlockId, index: u32) -> bool {
        self.last_uses.get(&block) == Some(&index)
    }

    /// True if the value is never read.
    pub fn dead(&self) -> bool {
        self.uses == 0
    }
}

/// Liveness analysis over an SSA function.
#[derive(Debug)]
pub struct Liveness {
    live_in: Vec<Vec<InstId>>,
    ranges: Vec<LiveRange>,
}

impl Liveness {
    /// Computes liveness for `func`.
    pub fn compute(func: &Function) -> Self {
        let block_count = func.block_count();

        let mut live_in: Vec<HashSet<InstId>> = vec![HashSet::new(); block_count];
        let mut live_out: Vec<HashSet<InstId>> = vec![HashSet::new(); block_count];

        // Uses a block contributes to the liveness of its predecessors
        // through phi operands: operand `i` of a phi in `succ` is read on
        // the edge from predecessor `i`, i.e. at that predecessor's
        // terminator.
        let mut edge_uses: Vec<Vec<InstId>> = vec![Vec::new(); block_count];
        for block in func.block_ids() {
            let data = func.block(block);
            for (pred_index, &pred) in data.predecessors().iter().enumerate() {
                for &inst in &data.insts()[..data.phi_count(func)] {
                    let Value::Phi { operands } = func.value(inst) else {
                        unreachable!("leading instructions are phis");
                    };
                    edge_uses[pred.to_usize()].push(operands[pred_index]);
                }
            }
        }

        let order = func.reverse_postorder();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in order.iter().rev() {
                let data = func.block(block);

                let mut out = HashSet::new();
                data.terminator().for_each_target(|succ| {
                    out.extend(live_in[succ.to_usize()].iter().copied());
                });
                out.extend(edge_uses[block.to_usize()].iter().copied());

                let mut live = out.clone();
                data.terminator().for_each_operand(|value| {
                    live.insert(value);
                });
                for &inst in data.insts().iter().rev() {
                    live.remove(&inst);
                    func.value(inst).for_each_operand(|operand| {
                        live.insert(operand);
                    });
                }

                if live != live_in[block.to_usize()] {
                    live_in[block.to_usize()] = live;
                    changed = true;
                }
                live_out[block.to_usize()] = out;
            }
        }

        // Last uses: scan each block backwards; the first time a value is
        // seen that is not live-out, that statement is its last use.
        let mut ranges: Vec<LiveRange> = (0..func.inst_count()).map(|_| LiveRange::default()).collect();
        for block in func.block_ids() {
            let data = func.block(block);
            let mut seen = live_out[block.to_usize()].clone();

            let mut record_use = |ranges: &mut Vec<LiveRange>, seen: &mut HashSet<InstId>,
                                  value: InstId,
                                  index: u32| {
                ranges[value.to_usize()].uses += 1;
                if seen.insert(value) {
                    ranges[value.to_usize()].last_uses.insert(block, index);
                }
            };

            let terminator_index = data.insts().len() as u32;
            data.terminator().for_each_operand(|value| {
                record_use(&mut ranges, &mut seen, value, terminator_index);
            });
            for &edge_use in &edge_uses[block.to_usize()] {
                record_use(&mut ranges, &mut seen, edge_use, terminator_index);
            }

            for (index, &inst) in data.insts().iter().enumerate().rev() {
                func.value(inst).for_each_operand(|operand| {
                    record_use(&mut ranges, &mut seen, operand, index as u32);
                });
            }
        }

        let live_in = live_in
            .into_iter()
            .map(|set| {
                let mut values: Vec<_> = set.into_iter().collect();
                values.sort();
                values
            })
            .collect();

        Self { live_in, ranges }
    }

    /// The values live at the start of `block`, in ascending id order.
    pub fn live_in_values(&self, block: BlockId) -> &[InstId] {
        &self.live_in[block.to_usize()]
    }

    /// The live range of the given value.
    pub fn live_range(&self, inst: InstId) -> &LiveRange {
        &self.ranges[inst.to_usize()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, Constant, FunctionKind, Terminator};

    #[test]
    fn straight_line_last_uses() {
        let mut func = Function::new(None, FunctionKind::Normal, 0);
        let entry = func.add_block();
        func.set_entry(entry);

        let a = func.append_inst(entry, Value::Constant(Constant::Int(1)));
        let b = func.append_inst(entry, Value::Constant(Constant::Int(2)));
        let sum = func.append_inst(
            entry,
            Value::BinaryOp {
                op: BinaryOp::Add,
                lhs: a,
                rhs: b,
            },
        );
        func.set_terminator(entry, Terminator::Return { value: sum });

        let liveness = Liveness::compute(&func);
        // a and b die at the addition (statement 2), sum at the terminator.
        assert!(liveness.live_range(a).last_use(entry, 2));
        assert!(liveness.live_range(b).last_use(entry, 2));
        assert!(!liveness.live_range(a).last_use(entry, 1));
        assert!(liveness.live_range(sum).last_use(entry, 3));
        assert!(!liveness.live_range(sum).dead());
        assert!(liveness.live_in_values(entry).is_empty());
    }

    #[test]
    fn unused_value_is_dead() {
        let mut func = Function::new(None, FunctionKind::Normal, 0);
        let entry = func.add_block();
        func.set_entry(entry);

        let unused = func.append_inst(entry, Value::Constant(Constant::Int(1)));
        let ret = func.append_inst(entry, Value::Constant(Constant::Null));
        func.set_terminator(entry, Terminator::Return { value: ret });

        let liveness = Liveness::compute(&func);
        assert!(liveness.live_range(unused).dead());
        assert!(!liveness.live_range(ret).dead());
    }

    #[test]
    fn value_live_across_blocks() {
        let mut func = Function::new(None, FunctionKind::Normal, 0);
        let entry = func.add_block();
        let exit = func.add_block();
        func.set_entry(entry);

        let value = func.append_inst(entry, Value::Constant(Constant::Int(7)));
        func.set_terminator(entry, Terminator::Jump { target: exit });
        func.set_terminator(exit, Terminator::Return { value });

        let liveness = Liveness::compute(&func);
        assert_eq!(liveness.live_in_values(exit), &[value]);
        // Not the last use in the entry block; the value survives the edge.
        assert!(!liveness.live_range(value).last_use(entry, 0));
        assert!(liveness.live_range(value).last_use(exit, 0));
    }

    #[test]
    fn phi_operand_is_used_at_the_predecessor() {
        let mut func = Function::new(None, FunctionKind::Normal, 0);
        let entry = func.add_block();
        let left = func.add_block();
        let right = func.add_block();
        let join = func.add_block();
        func.set_entry(entry);

        let cond = func.append_inst(entry, Value::Constant(Constant::True));
        func.set_terminator(
            entry,
            Terminator::Branch {
                kind: crate::ir::BranchKind::IfTrue,
                condition: cond,
                target: left,
                fallthrough: right,
            },
        );

        let from_left = func.append_inst(left, Value::Constant(Constant::Int(1)));
        func.set_terminator(left, Terminator::Jump { target: join });
        let from_right = func.append_inst(right, Value::Constant(Constant::Int(2)));
        func.set_terminator(right, Terminator::Jump { target: join });

        let phi = func.append_inst(
            join,
            Value::Phi {
                operands: vec![from_left, from_right],
            },
        );
        func.set_terminator(join, Terminator::Return { value: phi });

        let liveness = Liveness::compute(&func);
        // The operands are not live-in to the join block.
        assert_eq!(liveness.live_in_values(join), &[]);
        // They are used at their predecessor's terminator (index 1: one
        // statement plus the terminator slot).
        assert!(liveness.live_range(from_left).last_use(left, 1));
        assert!(liveness.live_range(from_right).last_use(right, 1));
        assert!(!liveness.live_range(phi).dead());
    }
}
