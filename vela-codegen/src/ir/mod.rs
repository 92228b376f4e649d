//! The SSA input consumed by the backend.
//!
//! Functions are arena backed: a [`Function`] owns its blocks and
//! instructions in dense vectors, and every reference between nodes is a
//! dense id. Each instruction defines exactly one SSA value; phi
//! instructions sit at the front of their block, one operand per
//! predecessor in predecessor order.

use vela_types::{id_type, Param, Str, StringTable};

pub use vela_bytecode::FunctionKind;

mod dominators;
mod liveness;

pub use dominators::DominatorTree;
pub use liveness::{LiveRange, Liveness};

id_type!(
    /// Index of a basic block within its function.
    BlockId
);

id_type!(
    /// Index of an instruction (an SSA value) within its function.
    InstId
);

id_type!(
    /// Function-local symbol observed by exception handlers.
    SymbolId
);

id_type!(
    /// Index of a member of the IR module.
    IrMemberId
);

/// A compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    /// The null value.
    Null,
    /// The boolean true.
    True,
    /// The boolean false.
    False,
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// An interned string.
    String(Str),
}

/// An assignable location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lvalue {
    /// A function parameter slot.
    Param(Param),
    /// A module-scope member (variable, import, function).
    Module(IrMemberId),
    /// The field `object.name`.
    Field {
        /// The object whose field is accessed.
        object: InstId,
        /// The field name.
        name: Str,
    },
    /// The tuple element `object.index`.
    TupleField {
        /// The tuple.
        object: InstId,
        /// The element index.
        index: u32,
    },
    /// The element `object[index]`.
    Index {
        /// The indexed container.
        object: InstId,
        /// The index value.
        index: InstId,
    },
    /// A slot of a closure environment.
    Env {
        /// The starting environment.
        env: InstId,
        /// Number of parent links to follow.
        level: u32,
        /// Slot index in the target environment.
        index: u32,
    },
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `+value`
    Plus,
    /// `-value`
    Minus,
    /// `~value`
    BitwiseNot,
    /// `!value`
    LogicalNot,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `lhs + rhs`
    Add,
    /// `lhs - rhs`
    Subtract,
    /// `lhs * rhs`
    Multiply,
    /// `lhs / rhs`
    Divide,
    /// `lhs % rhs`
    Modulus,
    /// `lhs ** rhs`
    Power,
    /// `lhs << rhs`
    LeftShift,
    /// `lhs >> rhs`
    RightShift,
    /// `lhs & rhs`
    BitwiseAnd,
    /// `lhs | rhs`
    BitwiseOr,
    /// `lhs ^ rhs`
    BitwiseXor,
    /// `lhs > rhs`
    Greater,
    /// `lhs >= rhs`
    GreaterEquals,
    /// `lhs < rhs`
    Less,
    /// `lhs <= rhs`
    LessEquals,
    /// `lhs == rhs`
    Equals,
    /// `lhs != rhs`
    NotEquals,
}

/// Kinds of container constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// A mutable array.
    Array,
    /// An immutable tuple.
    Tuple,
    /// A set.
    Set,
    /// A map; arguments alternate between keys and values.
    Map,
}

/// A value whose physical representation spans multiple registers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    /// The resolved method `instance.name`, represented as the register
    /// pair `(this, function)`.
    MethodHandle {
        /// The receiver object.
        instance: InstId,
        /// The method name.
        name: Str,
    },
    /// One iteration step, represented as the register pair
    /// `(valid, value)`.
    IteratorNext {
        /// The iterator being advanced.
        iterator: InstId,
    },
}

/// Selects one register of an [`Aggregate`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMember {
    /// The receiver of a method handle.
    MethodInstance,
    /// The function of a method handle.
    MethodFunction,
    /// The valid flag of an iteration step.
    IteratorValid,
    /// The produced element of an iteration step.
    IteratorValue,
}

impl AggregateMember {
    /// Position of the member inside the aggregate's register group.
    pub const fn index(self) -> u32 {
        match self {
            AggregateMember::MethodInstance | AggregateMember::IteratorValid => 0,
            AggregateMember::MethodFunction | AggregateMember::IteratorValue => 1,
        }
    }
}

/// The right hand side of an SSA instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Reads an lvalue.
    Read(Lvalue),
    /// Writes `value` into an lvalue. Defines no register.
    Write {
        /// The written location.
        target: Lvalue,
        /// The stored value.
        value: InstId,
    },
    /// Selects a value based on the incoming edge; one operand per
    /// predecessor, in predecessor order.
    Phi {
        /// The per-predecessor operands.
        operands: Vec<InstId>,
    },
    /// A constant.
    Constant(Constant),
    /// The closure environment of the current function.
    OuterEnvironment,
    /// A binary operation.
    BinaryOp {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: InstId,
        /// Right operand.
        rhs: InstId,
    },
    /// A unary operation.
    UnaryOp {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: InstId,
    },
    /// A function call.
    Call {
        /// The called value.
        function: InstId,
        /// Call arguments, in order.
        args: Vec<InstId>,
    },
    /// A multi-register value.
    Aggregate(Aggregate),
    /// Aliases one register of an aggregate. Defines no register of its
    /// own.
    GetAggregateMember {
        /// The aggregate being accessed.
        aggregate: InstId,
        /// The selected member.
        member: AggregateMember,
    },
    /// A method call through a previously resolved method handle.
    MethodCall {
        /// The method handle aggregate.
        method: InstId,
        /// Call arguments, in order (the receiver is implicit).
        args: Vec<InstId>,
    },
    /// A container constructor.
    Container {
        /// The container kind.
        kind: ContainerKind,
        /// The element values.
        args: Vec<InstId>,
    },
    /// A new closure environment.
    MakeEnvironment {
        /// The lexical parent environment.
        parent: InstId,
        /// Number of value slots.
        size: u32,
    },
    /// A new closure over a function template.
    MakeClosure {
        /// The captured environment.
        env: InstId,
        /// The module member holding the closure function.
        function: IrMemberId,
    },
    /// A new iterator over a container.
    MakeIterator {
        /// The iterated container.
        container: InstId,
    },
    /// A new record instance.
    Record {
        /// Field names with their initial values, in declaration order.
        fields: Vec<(Str, InstId)>,
    },
    /// String formatting of a sequence of values.
    Format {
        /// The formatted values, in order.
        args: Vec<InstId>,
    },
    /// Reads the last published value of `symbol`. Only valid inside
    /// exception handler blocks.
    ObserveAssign {
        /// The observed symbol.
        symbol: SymbolId,
    },
    /// Publishes `value` as the current value of `symbol`, making it
    /// observable by exception handlers.
    PublishAssign {
        /// The published symbol.
        symbol: SymbolId,
        /// The published value.
        value: InstId,
    },
}

impl Value {
    /// Calls `f` for every SSA operand, excluding phi operands (those are
    /// uses on the incoming edges, not in the defining block).
    pub fn for_each_operand(&self, mut f: impl FnMut(InstId)) {
        match self {
            Value::Read(lvalue) => for_each_lvalue_operand(lvalue, &mut f),
            Value::Write { target, value } => {
                f(*value);
                for_each_lvalue_operand(target, &mut f);
            }
            Value::Phi { .. } => {}
            Value::Constant(_) => {}
            Value::OuterEnvironment => {}
            Value::BinaryOp { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            Value::UnaryOp { operand, .. } => f(*operand),
            Value::Call { function, args } => {
                f(*function);
                args.iter().copied().for_each(&mut f);
            }
            Value::Aggregate(Aggregate::MethodHandle { instance, .. }) => f(*instance),
            Value::Aggregate(Aggregate::IteratorNext { iterator }) => f(*iterator),
            Value::GetAggregateMember { aggregate, .. } => f(*aggregate),
            Value::MethodCall { method, args } => {
                f(*method);
                args.iter().copied().for_each(&mut f);
            }
            Value::Container { args, .. } => args.iter().copied().for_each(&mut f),
            Value::MakeEnvironment { parent, .. } => f(*parent),
            Value::MakeClosure { env, .. } => f(*env),
            Value::MakeIterator { container } => f(*container),
            Value::Record { fields } => fields.iter().for_each(|&(_, value)| f(value)),
            Value::Format { args } => args.iter().copied().for_each(&mut f),
            Value::ObserveAssign { .. } => {}
            Value::PublishAssign { value, .. } => f(*value),
        }
    }
}

fn for_each_lvalue_operand(lvalue: &Lvalue, f: &mut impl FnMut(InstId)) {
    match lvalue {
        Lvalue::Param(_) | Lvalue::Module(_) => {}
        Lvalue::Field { object, .. } | Lvalue::TupleField { object, .. } => f(*object),
        Lvalue::Index { object, index } => {
            f(*object);
            f(*index);
        }
        Lvalue::Env { env, .. } => f(*env),
    }
}

/// Predicates deciding which edge of a [`Terminator::Branch`] is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// Take the edge if the condition is true.
    IfTrue,
    /// Take the edge if the condition is false.
    IfFalse,
    /// Take the edge if the condition is null.
    IfNull,
    /// Take the edge if the condition is not null.
    IfNotNull,
}

/// The terminator of a basic block.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum Terminator {
    /// Placeholder of a block under construction. Never present in a
    /// function handed to the backend.
    #[default]
    None,
    /// Terminator of the entry block: control continues at `body`;
    /// `handlers` lists the exception handler blocks of the function,
    /// which are CFG successors of the entry for dominance purposes.
    Entry {
        /// First block of the function body.
        body: BlockId,
        /// All exception handler blocks.
        handlers: Vec<BlockId>,
    },
    /// Unconditional jump. The only edge kind that may carry phi
    /// operands.
    Jump {
        /// The jump target.
        target: BlockId,
    },
    /// Two-way conditional jump.
    Branch {
        /// The predicate applied to `condition`.
        kind: BranchKind,
        /// The tested value.
        condition: InstId,
        /// Taken when the predicate holds.
        target: BlockId,
        /// Taken otherwise.
        fallthrough: BlockId,
    },
    /// Returns `value` to the caller.
    Return {
        /// The returned value.
        value: InstId,
    },
    /// Re-raises the in-flight exception. Only valid in handler blocks.
    Rethrow,
    /// Signals an assertion failure.
    AssertFail {
        /// String form of the failed expression.
        expr: InstId,
        /// User supplied message, or null.
        message: InstId,
    },
}

impl Terminator {
    /// Calls `f` for every successor block.
    pub fn for_each_target(&self, mut f: impl FnMut(BlockId)) {
        match self {
            Terminator::None | Terminator::Return { .. } | Terminator::Rethrow => {}
            Terminator::AssertFail { .. } => {}
            Terminator::Entry { body, handlers } => {
                f(*body);
                handlers.iter().copied().for_each(f);
            }
            Terminator::Jump { target } => f(*target),
            Terminator::Branch {
                target,
                fallthrough,
                ..
            } => {
                f(*target);
                f(*fallthrough);
            }
        }
    }

    /// Calls `f` for every SSA value used by the terminator.
    pub fn for_each_operand(&self, mut f: impl FnMut(InstId)) {
        match self {
            Terminator::None
            | Terminator::Entry { .. }
            | Terminator::Jump { .. }
            | Terminator::Rethrow => {}
            Terminator::Branch { condition, .. } => f(*condition),
            Terminator::Return { value } => f(*value),
            Terminator::AssertFail { expr, message } => {
                f(*expr);
                f(*message);
            }
        }
    }
}

/// A basic block.
#[derive(Debug, Default, Clone)]
pub struct Block {
    insts: Vec<InstId>,
    terminator: Terminator,
    predecessors: Vec<BlockId>,
    handler: Option<BlockId>,
}

impl Block {
    /// The block's instructions, phis first.
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    /// The block's terminator.
    pub fn terminator(&self) -> &Terminator {
        &self.terminator
    }

    /// Predecessor blocks, in edge creation order. Phi operands follow
    /// this order.
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// The exception handler block covering this block's code, if any.
    pub fn handler(&self) -> Option<BlockId> {
        self.handler
    }

    /// Number of phi instructions at the front of the block.
    pub fn phi_count(&self, func: &Function) -> usize {
        self.insts
            .iter()
            .take_while(|&&id| matches!(func.value(id), Value::Phi { .. }))
            .count()
    }
}

/// An SSA function.
#[derive(Debug, Clone)]
pub struct Function {
    name: Option<Str>,
    kind: FunctionKind,
    params: u32,
    entry: Option<BlockId>,
    blocks: Vec<Block>,
    insts: Vec<Value>,
}

impl Function {
    /// Creates an empty function.
    pub fn new(name: Option<Str>, kind: FunctionKind, params: u32) -> Self {
        Self {
            name,
            kind,
            params,
            entry: None,
            blocks: Vec::new(),
            insts: Vec::new(),
        }
    }

    /// The function name, absent for anonymous functions.
    pub fn name(&self) -> Option<Str> {
        self.name
    }

    /// The function kind.
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// Number of parameters.
    pub fn params(&self) -> u32 {
        self.params
    }

    /// The entry block.
    ///
    /// # Panics
    ///
    /// Panics if no entry block was set.
    pub fn entry(&self) -> BlockId {
        self.entry.expect("function has no entry block")
    }

    /// Marks `block` as the entry block.
    pub fn set_entry(&mut self, block: BlockId) {
        self.entry = Some(block);
    }

    /// Appends a new empty block.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    /// Appends an instruction to `block`, returning the new SSA value's
    /// id. Phi instructions must be appended before any non-phi
    /// instruction of the block.
    pub fn append_inst(&mut self, block: BlockId, value: Value) -> InstId {
        if matches!(value, Value::Phi { .. }) {
            debug_assert_eq!(
                self.blocks[block.to_usize()].phi_count_quick(&self.insts),
                self.blocks[block.to_usize()].insts.len(),
                "phi instructions must precede all other instructions"
            );
        }
        let id = InstId::new(self.insts.len() as u32);
        self.insts.push(value);
        self.blocks[block.to_usize()].insts.push(id);
        id
    }

    /// Sets the terminator of `block` and registers the block as a
    /// predecessor of every target.
    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) {
        debug_assert!(
            matches!(self.blocks[block.to_usize()].terminator, Terminator::None),
            "terminator was already set"
        );
        let mut targets = Vec::new();
        terminator.for_each_target(|t| targets.push(t));
        for target in targets {
            self.blocks[target.to_usize()].predecessors.push(block);
        }
        self.blocks[block.to_usize()].terminator = terminator;
    }

    /// Sets the exception handler block covering `block`.
    pub fn set_handler(&mut self, block: BlockId, handler: Option<BlockId>) {
        self.blocks[block.to_usize()].handler = handler;
    }

    /// The block with the given id.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.to_usize()]
    }

    /// The value defined by the given instruction.
    pub fn value(&self, id: InstId) -> &Value {
        &self.insts[id.to_usize()]
    }

    /// Number of blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of instructions.
    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    /// Iterates over all block ids.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId::new)
    }

    /// Blocks in reverse postorder, starting at the entry. Every block
    /// reachable from the entry appears before all blocks it dominates.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut postorder = Vec::with_capacity(self.blocks.len());
        let mut visited = vec![false; self.blocks.len()];
        // (block, next successor index) pairs.
        let mut stack = vec![(self.entry(), 0usize)];
        visited[self.entry().to_usize()] = true;

        while let Some(&(block, next)) = stack.last() {
            let mut successors = Vec::new();
            self.block(block)
                .terminator()
                .for_each_target(|t| successors.push(t));

            if let Some(&succ) = successors.get(next) {
                stack.last_mut().expect("stack is not empty").1 += 1;
                if !visited[succ.to_usize()] {
                    visited[succ.to_usize()] = true;
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
                stack.pop();
            }
        }

        postorder.reverse();
        postorder
    }
}

impl Block {
    fn phi_count_quick(&self, insts: &[Value]) -> usize {
        self.insts
            .iter()
            .take_while(|&&id| matches!(insts[id.to_usize()], Value::Phi { .. }))
            .count()
    }
}

/// A member of the IR module.
#[derive(Debug, Clone)]
pub struct ModuleMember {
    /// The member's name, used for symbol definitions and exports.
    pub name: Str,
    /// True if the member is part of the module's export set.
    pub exported: bool,
    /// The member's payload.
    pub data: ModuleMemberData,
}

/// Payload of a [`ModuleMember`].
#[derive(Debug, Clone)]
pub enum ModuleMemberData {
    /// An import of another module; the member name is the imported
    /// module's name.
    Import,
    /// A mutable module-scope variable.
    Variable,
    /// A function, lowered to bytecode by the backend.
    Function(Function),
}

/// The module-level IR handed to the backend.
#[derive(Debug, Clone)]
pub struct ModuleIr {
    name: Str,
    strings: StringTable,
    init: Option<IrMemberId>,
    members: Vec<ModuleMember>,
}

impl ModuleIr {
    /// Creates an empty module with the given name.
    pub fn new(name: &str) -> Self {
        let mut strings = StringTable::new();
        let name = strings.intern(name);
        Self {
            name,
            strings,
            init: None,
            members: Vec::new(),
        }
    }

    /// The module name.
    pub fn name(&self) -> Str {
        self.name
    }

    /// The module's string table.
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Mutable access to the string table.
    pub fn strings_mut(&mut self) -> &mut StringTable {
        &mut self.strings
    }

    /// The member executed when the module is loaded, if any. Must
    /// reference a normal (non-closure) function member.
    pub fn init(&self) -> Option<IrMemberId> {
        self.init
    }

    /// Sets the module initializer.
    pub fn set_init(&mut self, member: IrMemberId) {
        self.init = Some(member);
    }

    /// Appends a member, returning its id.
    pub fn add_member(&mut self, member: ModuleMember) -> IrMemberId {
        let id = IrMemberId::new(self.members.len() as u32);
        self.members.push(member);
        id
    }

    /// The member with the given id.
    pub fn member(&self, id: IrMemberId) -> &ModuleMember {
        &self.members[id.to_usize()]
    }

    /// Iterates over all members with their ids.
    pub fn members(&self) -> impl Iterator<Item = (IrMemberId, &ModuleMember)> {
        self.members
            .iter()
            .enumerate()
            .map(|(i, m)| (IrMemberId::new(i as u32), m))
    }
}
