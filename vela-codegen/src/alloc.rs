//! Register allocation for SSA functions.

use std::collections::HashMap;

use tracing::debug;
use vela_types::Register;

use crate::bitset::BitSet;
use crate::ir::{
    Block, BlockId, DominatorTree, Function, InstId, Liveness, SymbolId, Terminator, Value,
};
use crate::locations::{
    aggregate_member_size, aggregate_size, storage_location, Location, LocationTable, RegisterCopy,
};
use crate::parallel_copy;

/// Assigns a physical storage location to every SSA value of `func` and
/// sequentializes all phi operand transfers.
pub fn allocate_locations(func: &Function) -> LocationTable {
    RegisterAllocator::new(func).run()
}

/// The set of occupied registers during coloring.
///
/// The first `preallocated` registers of the function are reserved for
/// observed symbols over the whole function lifetime; the bitset only
/// tracks the registers above them, so reserved slots can neither be
/// handed out nor freed.
#[derive(Debug, Clone)]
struct RegisterContext {
    preallocated: u32,
    occupied: BitSet,
}

impl RegisterContext {
    fn new(preallocated: u32) -> Self {
        Self {
            preallocated,
            occupied: BitSet::new(),
        }
    }

    fn reset(&mut self) {
        self.occupied.clear_all();
    }

    /// Claims the lowest free register.
    fn get_fresh(&mut self) -> Register {
        let index = self.occupied.first_unset();
        self.occupied.set(index);
        Register::new(index + self.preallocated)
    }

    fn set_occupied(&mut self, reg: Register) {
        if reg.to_u32() < self.preallocated {
            return;
        }
        self.occupied.set(reg.to_u32() - self.preallocated);
    }

    fn clear_occupied(&mut self, reg: Register) {
        if reg.to_u32() < self.preallocated {
            return;
        }
        self.occupied.clear(reg.to_u32() - self.preallocated);
    }
}

struct PhiLink {
    pred: BlockId,
    succ: BlockId,
    // The predecessor's allocation context, remembered for the allocation
    // of the spare register.
    ctx: RegisterContext,
}

struct RegisterAllocator<'a> {
    func: &'a Function,
    doms: DominatorTree,
    liveness: Liveness,
    locations: LocationTable,

    // Number of registers reserved for observed symbols before the main
    // pass. Indices `0..preallocated` stay claimed for the entire
    // function.
    preallocated: u32,

    // Depth first traversal of the dominator tree.
    stack: Vec<BlockId>,

    // Predecessor to successor links; the successor receives phi
    // operands. Processed after every block has been colored.
    phi_links: Vec<PhiLink>,

    // Register sizes of phi values, determined at the first operand with
    // a known size. 0 marks an active recursive call and is never a final
    // value.
    phi_sizes: HashMap<InstId, u32>,
}

impl<'a> RegisterAllocator<'a> {
    fn new(func: &'a Function) -> Self {
        Self {
            func,
            doms: DominatorTree::compute(func),
            liveness: Liveness::compute(func),
            locations: LocationTable::new(func.inst_count()),
            preallocated: 0,
            stack: Vec::new(),
            phi_links: Vec::new(),
            phi_sizes: HashMap::new(),
        }
    }

    /// Greedy coloring along the dominator tree, as described by
    ///
    /// > Braun, Mallon, Hack. Preference-Guided Register Assignment.
    /// > CC 2010.
    ///
    /// in its partial form: the traversal order and liveness-driven reuse
    /// are implemented, register preferences are not.
    fn run(mut self) -> LocationTable {
        self.preallocate_registers();

        self.stack.push(self.func.entry());
        {
            let mut ctx = RegisterContext::new(self.preallocated);
            while let Some(block_id) = self.stack.pop() {
                self.color_block(block_id, &mut ctx);
                self.visit_children(block_id);
            }
        }

        for link in std::mem::take(&mut self.phi_links) {
            self.implement_phi_copies(link.pred, link.succ, link.ctx);
        }

        debug!(
            registers = self.locations.total_registers(),
            preallocated = self.preallocated,
            "register allocation finished"
        );
        self.locations
    }

    /// Scans the handler blocks for observed symbols and reserves a
    /// register range at the bottom of the register file for each. These
    /// registers stay claimed for the whole function so that published
    /// values remain addressable from any handler.
    fn preallocate_registers(&mut self) {
        let func = self.func;
        let mut total = 0u32;

        if let Terminator::Entry { handlers, .. } = func.block(func.entry()).terminator() {
            for &handler in handlers {
                for &inst in func.block(handler).insts() {
                    let Value::ObserveAssign { symbol } = func.value(inst) else {
                        continue;
                    };
                    if self.locations.has_preallocated(*symbol) {
                        continue;
                    }

                    let regs = self.allocated_size(inst);
                    let mut buf = [Register::INVALID; Location::MAX_REGISTERS];
                    for slot in buf.iter_mut().take(regs as usize) {
                        *slot = Register::new(total);
                        total += 1;
                    }
                    self.locations
                        .set_preallocated(*symbol, Location::from_slice(&buf[..regs as usize]));
                }
            }
        }

        self.locations.grow_total_registers(total);
        self.preallocated = total;
    }

    fn color_block(&mut self, block_id: BlockId, ctx: &mut RegisterContext) {
        let func = self.func;
        let block = func.block(block_id);
        let phi_count = block.phi_count(func);

        ctx.reset();
        self.occupy_live_in(block_id, ctx);

        // Phi functions first. Their operands are not treated as live
        // here; they are moved over the incoming edges.
        for &inst in &block.insts()[..phi_count] {
            let loc = self.allocate_registers(inst, ctx);
            self.locations.set(inst, loc);
        }

        for (index, &inst) in block.insts().iter().enumerate().skip(phi_count) {
            self.assign_locations(block_id, index as u32, inst, ctx);
        }

        // Phi operand copying is delayed until every block has been
        // colored; remember the predecessor context for the spare
        // register.
        let mut phi_targets = Vec::new();
        block.terminator().for_each_target(|succ| {
            if func.block(succ).phi_count(func) > 0 {
                phi_targets.push(succ);
            }
        });
        for succ in phi_targets {
            debug_assert!(
                matches!(block.terminator(), Terminator::Jump { .. }),
                "phi operands can only move over plain jump edges"
            );
            self.phi_links.push(PhiLink {
                pred: block_id,
                succ,
                ctx: ctx.clone(),
            });
        }
    }

    fn occupy_live_in(&mut self, block_id: BlockId, ctx: &mut RegisterContext) {
        for &inst in self.liveness.live_in_values(block_id) {
            let loc = storage_location(inst, &self.locations, self.func);
            for reg in loc.iter() {
                ctx.set_occupied(reg);
            }
        }
    }

    fn assign_locations(
        &mut self,
        block_id: BlockId,
        index: u32,
        inst: InstId,
        ctx: &mut RegisterContext,
    ) {
        // Values realized by a sequence of bytecode instructions would
        // overwrite their own inputs if the result shared a register with
        // an operand; those allocate the result first and release dying
        // operands afterwards.
        let needs_distinct = matches!(
            self.func.value(inst),
            Value::Format { .. } | Value::Record { .. }
        );

        if !needs_distinct {
            self.reuse_dead_vars(block_id, index, inst, ctx);
        }

        let loc = self.allocate_registers(inst, ctx);
        self.locations.set(inst, loc);

        // Results that are never read free their registers immediately.
        if self.liveness.live_range(inst).dead() {
            self.deallocate_registers(inst, loc, ctx);
        }

        if needs_distinct {
            self.reuse_dead_vars(block_id, index, inst, ctx);
        }
    }

    /// Releases the registers of every operand that dies at this
    /// statement. Repeated releases of one register are harmless.
    fn reuse_dead_vars(
        &mut self,
        block_id: BlockId,
        index: u32,
        inst: InstId,
        ctx: &mut RegisterContext,
    ) {
        let mut operands = Vec::new();
        self.func.value(inst).for_each_operand(|v| operands.push(v));

        for value in operands {
            if self.liveness.live_range(value).last_use(block_id, index) {
                let loc = self.locations.get(value);
                self.deallocate_registers(value, loc, ctx);
            }
        }
    }

    fn implement_phi_copies(&mut self, pred: BlockId, succ: BlockId, mut ctx: RegisterContext) {
        let func = self.func;
        let succ_block: &Block = func.block(succ);
        let phi_count = succ_block.phi_count(func);
        if phi_count == 0 {
            return;
        }

        let index_in_succ = succ_block
            .predecessors()
            .iter()
            .position(|&p| p == pred)
            .expect("failed to find predecessor block in successor");

        let mut copies = Vec::new();
        for &phi_inst in &succ_block.insts()[..phi_count] {
            let Value::Phi { operands } = func.value(phi_inst) else {
                unreachable!("leading instructions are phis");
            };
            let source = operands[index_in_succ];

            let source_loc = storage_location(source, &self.locations, func);
            let dest_loc = storage_location(phi_inst, &self.locations, func);
            assert_eq!(
                source_loc.len(),
                dest_loc.len(),
                "phi operand locations must have the same size"
            );

            // Every involved register must be marked occupied, otherwise
            // the spare register handed to the sequentializer below could
            // alias live data.
            for reg in source_loc.iter().chain(dest_loc.iter()) {
                ctx.set_occupied(reg);
            }

            for i in 0..source_loc.len() as u32 {
                copies.push(RegisterCopy {
                    src: source_loc.get(i),
                    dst: dest_loc.get(i),
                });
            }
        }

        let locations = &mut self.locations;
        parallel_copy::sequentialize(&mut copies, || {
            let reg = ctx.get_fresh();
            locations.grow_total_registers(reg.to_u32() + 1);
            reg
        });
        self.locations.set_phi_copies(pred, copies);
    }

    fn visit_children(&mut self, parent: BlockId) {
        let first_child = self.stack.len();
        self.stack
            .extend_from_slice(self.doms.immediately_dominated(parent));
        // Children are popped off the stack; reversing keeps the
        // left-to-right visit order.
        self.stack[first_child..].reverse();
    }

    fn allocate_registers(&mut self, def: InstId, ctx: &mut RegisterContext) -> Location {
        // Published values live in their symbol's reserved range instead
        // of freshly allocated registers.
        if let Some(symbol) = self.check_preallocated(def) {
            return self.locations.preallocated(symbol);
        }

        let regs = self.allocated_size(def);
        let mut buf = [Register::INVALID; Location::MAX_REGISTERS];
        for slot in buf.iter_mut().take(regs as usize) {
            *slot = self.allocate_register(ctx);
        }
        Location::from_slice(&buf[..regs as usize])
    }

    fn deallocate_registers(&self, def: InstId, loc: Location, ctx: &mut RegisterContext) {
        if self.check_preallocated(def).is_some() {
            return;
        }
        for reg in loc.iter() {
            ctx.clear_occupied(reg);
        }
    }

    // First-free-register strategy; the "register preference" refinement
    // described by Braun et al. is not implemented.
    fn allocate_register(&mut self, ctx: &mut RegisterContext) -> Register {
        let reg = ctx.get_fresh();
        self.locations.grow_total_registers(reg.to_u32() + 1);
        reg
    }

    fn allocated_size(&mut self, inst: InstId) -> u32 {
        self.allocated_size_recursive(inst)
            .expect("register size of instruction could not be computed")
    }

    /// The number of registers to allocate for a value. Aliases need
    /// none, aggregates their static size, phis the common size of their
    /// operands, everything else one.
    fn allocated_size_recursive(&mut self, inst: InstId) -> Option<u32> {
        match self.func.value(inst) {
            Value::Write { .. } => Some(0),
            Value::Aggregate(aggregate) => Some(aggregate_size(aggregate)),
            Value::GetAggregateMember { .. } => Some(0),
            Value::Phi { operands } => {
                if let Some(&size) = self.phi_sizes.get(&inst) {
                    if size != 0 {
                        return Some(size);
                    }
                    // Size 0 marks an active recursive call; breaking the
                    // recursion here terminates phi cycles.
                    return None;
                }

                self.phi_sizes.insert(inst, 0);
                let mut resolved: Option<u32> = None;
                for &operand in operands {
                    if let Some(size) = self.allocated_size_realized(operand) {
                        match resolved {
                            Some(existing) => debug_assert_eq!(
                                existing, size,
                                "phi operands must not resolve to different sizes"
                            ),
                            None => resolved = Some(size),
                        }
                    }
                }

                let size = resolved.expect("register size of phi function could not be resolved");
                self.phi_sizes.insert(inst, size);
                Some(size)
            }
            _ => Some(1),
        }
    }

    /// The size of the storage a value realizes into: aggregate member
    /// accesses alias a slice of their parent, everything else is sized
    /// by `allocated_size_recursive`.
    fn allocated_size_realized(&mut self, inst: InstId) -> Option<u32> {
        if let Value::GetAggregateMember { member, .. } = self.func.value(inst) {
            return Some(aggregate_member_size(*member));
        }
        self.allocated_size_recursive(inst)
    }

    fn check_preallocated(&self, inst: InstId) -> Option<SymbolId> {
        match self.func.value(inst) {
            Value::PublishAssign { symbol, .. } => Some(*symbol),
            _ => None,
        }
    }
}
