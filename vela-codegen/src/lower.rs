//! Lowering of SSA functions to linear bytecode.

use tracing::trace;
use vela_bytecode::{consts::MAX_CONTAINER_ARGS, Function as BcFunction, Instruction};
use vela_types::Register;

use crate::alloc::allocate_locations;
use crate::builder::{FunctionWriter, Label};
use crate::ir::{
    Aggregate, BinaryOp, BlockId, BranchKind, Constant, ContainerKind, Function, InstId, Lvalue,
    Terminator, UnaryOp, Value,
};
use crate::link::{CompiledFunction, LinkObject};
use crate::locations::{storage_location, Location, LocationTable};

/// Lowers one IR function into bytecode, creating member definitions and
/// uses in `object` as it goes.
pub(crate) fn compile_function(func: &Function, object: &mut LinkObject) -> CompiledFunction {
    let locations = allocate_locations(func);
    let writer = FunctionWriter::new(func.block_count());
    FunctionCompiler {
        func,
        object,
        locations,
        writer,
    }
    .run()
}

fn label(block: BlockId) -> Label {
    Label::new(block.to_u32())
}

struct FunctionCompiler<'a, 'o> {
    func: &'a Function,
    object: &'o mut LinkObject,
    locations: LocationTable,
    writer: FunctionWriter,
}

impl<'a, 'o> FunctionCompiler<'a, 'o> {
    fn run(mut self) -> CompiledFunction {
        let func = self.func;
        trace!(
            blocks = func.block_count(),
            insts = func.inst_count(),
            registers = self.locations.total_registers(),
            "lowering function"
        );

        // Any order works for the emitted blocks since labels are patched
        // at the end; reverse postorder keeps jump targets mostly forward.
        for block_id in func.reverse_postorder() {
            let block = func.block(block_id);
            self.writer.define_label(label(block_id));
            self.writer.start_handler(block.handler().map(label));

            let phi_count = block.phi_count(func);
            for &inst in &block.insts()[phi_count..] {
                self.emit_value(inst);
            }

            // Phi operand transfers into successors happen before the
            // jump; the copy schedule is already sequentialized.
            let copies = self.locations.phi_copies(block_id).to_vec();
            for copy in copies {
                self.writer.emit(&Instruction::Copy {
                    source: copy.src,
                    target: copy.dst,
                });
            }

            self.emit_terminator(block.terminator());
        }

        let (code, handlers, refs) = self.writer.finish();

        let mut function = BcFunction::new(func.kind());
        function.set_params(func.params());
        function.set_locals(self.locations.total_registers());
        if let Some(name) = func.name() {
            function.set_name(Some(self.object.define_string(name)));
        }
        *function.code_mut() = code;
        *function.handlers_mut() = handlers;

        CompiledFunction { function, refs }
    }

    /// The registers a value lives in, following aggregate aliases.
    fn loc(&self, inst: InstId) -> Location {
        storage_location(inst, &self.locations, self.func)
    }

    /// The single register of a scalar value.
    fn reg(&self, inst: InstId) -> Register {
        let loc = self.loc(inst);
        debug_assert_eq!(loc.len(), 1, "expected a scalar storage location");
        loc.get(0)
    }

    fn emit_value(&mut self, inst: InstId) {
        let func = self.func;
        match func.value(inst) {
            Value::Read(lvalue) => {
                let target = self.reg(inst);
                let ins = match lvalue {
                    Lvalue::Param(source) => Instruction::LoadParam {
                        source: *source,
                        target,
                    },
                    Lvalue::Module(member) => Instruction::LoadModule {
                        source: self.object.use_member(*member),
                        target,
                    },
                    Lvalue::Field { object, name } => Instruction::LoadMember {
                        object: self.reg(*object),
                        name: self.object.define_symbol(*name),
                        target,
                    },
                    Lvalue::TupleField { object, index } => Instruction::LoadTupleMember {
                        tuple: self.reg(*object),
                        index: *index,
                        target,
                    },
                    Lvalue::Index { object, index } => Instruction::LoadIndex {
                        array: self.reg(*object),
                        index: self.reg(*index),
                        target,
                    },
                    Lvalue::Env { env, level, index } => Instruction::LoadEnv {
                        env: self.reg(*env),
                        level: *level,
                        index: *index,
                        target,
                    },
                };
                self.writer.emit(&ins);
            }

            Value::Write { target, value } => {
                let source = self.reg(*value);
                let ins = match target {
                    Lvalue::Param(target) => Instruction::StoreParam {
                        source,
                        target: *target,
                    },
                    Lvalue::Module(member) => Instruction::StoreModule {
                        source,
                        target: self.object.use_member(*member),
                    },
                    Lvalue::Field { object, name } => Instruction::StoreMember {
                        source,
                        object: self.reg(*object),
                        name: self.object.define_symbol(*name),
                    },
                    Lvalue::TupleField { object, index } => Instruction::StoreTupleMember {
                        source,
                        tuple: self.reg(*object),
                        index: *index,
                    },
                    Lvalue::Index { object, index } => Instruction::StoreIndex {
                        source,
                        array: self.reg(*object),
                        index: self.reg(*index),
                    },
                    Lvalue::Env { env, level, index } => Instruction::StoreEnv {
                        source,
                        env: self.reg(*env),
                        level: *level,
                        index: *index,
                    },
                };
                self.writer.emit(&ins);
            }

            Value::Phi { .. } => unreachable!("phi instructions are realized by edge copies"),

            Value::Constant(constant) => {
                let target = self.reg(inst);
                let ins = match constant {
                    Constant::Null => Instruction::LoadNull { target },
                    Constant::True => Instruction::LoadTrue { target },
                    Constant::False => Instruction::LoadFalse { target },
                    Constant::Int(value) => Instruction::LoadInt {
                        constant: *value,
                        target,
                    },
                    Constant::Float(value) => Instruction::LoadFloat {
                        constant: *value,
                        target,
                    },
                    // Strings are interned as module members and loaded
                    // by reference.
                    Constant::String(value) => Instruction::LoadModule {
                        source: self.object.define_string(*value),
                        target,
                    },
                };
                self.writer.emit(&ins);
            }

            Value::OuterEnvironment => {
                let target = self.reg(inst);
                self.writer.emit(&Instruction::LoadClosure { target });
            }

            Value::BinaryOp { op, lhs, rhs } => {
                let ins = binary_instruction(*op, self.reg(*lhs), self.reg(*rhs), self.reg(inst));
                self.writer.emit(&ins);
            }

            Value::UnaryOp { op, operand } => {
                let value = self.reg(*operand);
                let target = self.reg(inst);
                let ins = match op {
                    UnaryOp::Plus => Instruction::UAdd { value, target },
                    UnaryOp::Minus => Instruction::UNeg { value, target },
                    UnaryOp::BitwiseNot => Instruction::BNot { value, target },
                    UnaryOp::LogicalNot => Instruction::LNot { value, target },
                };
                self.writer.emit(&ins);
            }

            Value::Call { function, args } => {
                self.push_args(args);
                self.writer.emit(&Instruction::Call {
                    function: self.reg(*function),
                    count: args.len() as u32,
                });
                let target = self.reg(inst);
                self.writer.emit(&Instruction::PopTo { target });
            }

            Value::Aggregate(Aggregate::MethodHandle { instance, name }) => {
                let loc = self.locations.get(inst);
                let ins = Instruction::LoadMethod {
                    object: self.reg(*instance),
                    name: self.object.define_symbol(*name),
                    this: loc.get(0),
                    method: loc.get(1),
                };
                self.writer.emit(&ins);
            }

            Value::Aggregate(Aggregate::IteratorNext { iterator }) => {
                let loc = self.locations.get(inst);
                let ins = Instruction::IteratorNext {
                    iterator: self.reg(*iterator),
                    valid: loc.get(0),
                    value: loc.get(1),
                };
                self.writer.emit(&ins);
            }

            // Pure register alias; the parent aggregate holds the value.
            Value::GetAggregateMember { .. } => {}

            Value::MethodCall { method, args } => {
                let handle = self.locations.get(*method);
                self.writer.emit(&Instruction::Push {
                    value: handle.get(0),
                });
                self.push_args(args);
                self.writer.emit(&Instruction::CallMethod {
                    method: handle.get(1),
                    count: args.len() as u32,
                });
                let target = self.reg(inst);
                self.writer.emit(&Instruction::PopTo { target });
            }

            Value::Container { kind, args } => {
                debug_assert!(args.len() as u32 <= MAX_CONTAINER_ARGS);
                self.push_args(args);
                let count = args.len() as u32;
                let target = self.reg(inst);
                let ins = match kind {
                    ContainerKind::Array => Instruction::Array { count, target },
                    ContainerKind::Tuple => Instruction::Tuple { count, target },
                    ContainerKind::Set => Instruction::Set { count, target },
                    ContainerKind::Map => {
                        debug_assert!(count % 2 == 0, "map constructors take key/value pairs");
                        Instruction::Map { count, target }
                    }
                };
                self.writer.emit(&ins);
            }

            Value::MakeEnvironment { parent, size } => {
                let ins = Instruction::Env {
                    parent: self.reg(*parent),
                    size: *size,
                    target: self.reg(inst),
                };
                self.writer.emit(&ins);
            }

            Value::MakeClosure { env, function } => {
                let ins = Instruction::Closure {
                    template: self.object.use_member(*function),
                    env: self.reg(*env),
                    target: self.reg(inst),
                };
                self.writer.emit(&ins);
            }

            Value::MakeIterator { container } => {
                let ins = Instruction::Iterator {
                    container: self.reg(*container),
                    target: self.reg(inst),
                };
                self.writer.emit(&ins);
            }

            Value::Record { fields } => {
                let keys: Vec<_> = fields.iter().map(|&(name, _)| name).collect();
                let template = self.object.define_schema(&keys);
                let target = self.reg(inst);
                self.writer.emit(&Instruction::Record { template, target });

                for &(name, value) in fields {
                    let ins = Instruction::StoreMember {
                        source: self.reg(value),
                        object: target,
                        name: self.object.define_symbol(name),
                    };
                    self.writer.emit(&ins);
                }
            }

            Value::Format { args } => {
                let target = self.reg(inst);
                self.writer.emit(&Instruction::Formatter { target });
                for &arg in args {
                    let ins = Instruction::AppendFormat {
                        value: self.reg(arg),
                        formatter: target,
                    };
                    self.writer.emit(&ins);
                }
                self.writer.emit(&Instruction::FormatResult {
                    formatter: target,
                    target,
                });
            }

            Value::ObserveAssign { symbol } => {
                let source = self.locations.preallocated(*symbol);
                let target = self.locations.get(inst);
                self.emit_location_copy(source, target);
            }

            Value::PublishAssign { symbol, value } => {
                let source = self.loc(*value);
                let target = self.locations.get(inst);
                debug_assert_eq!(target, self.locations.preallocated(*symbol));
                self.emit_location_copy(source, target);
            }
        }
    }

    fn push_args(&mut self, args: &[InstId]) {
        for &arg in args {
            self.writer.emit(&Instruction::Push {
                value: self.reg(arg),
            });
        }
    }

    fn emit_location_copy(&mut self, source: Location, target: Location) {
        debug_assert_eq!(source.len(), target.len());
        for (src, dst) in source.iter().zip(target.iter()) {
            if src != dst {
                self.writer.emit(&Instruction::Copy {
                    source: src,
                    target: dst,
                });
            }
        }
    }

    fn emit_terminator(&mut self, terminator: &Terminator) {
        match terminator {
            Terminator::None => unreachable!("block has no terminator"),

            Terminator::Entry { body, .. } => {
                let offset = self.writer.use_label(label(*body));
                self.writer.emit(&Instruction::Jmp { offset });
            }

            Terminator::Jump { target } => {
                let offset = self.writer.use_label(label(*target));
                self.writer.emit(&Instruction::Jmp { offset });
            }

            Terminator::Branch {
                kind,
                condition,
                target,
                fallthrough,
            } => {
                let condition = self.reg(*condition);
                let offset = self.writer.use_label(label(*target));
                let ins = match kind {
                    BranchKind::IfTrue => Instruction::JmpTrue { condition, offset },
                    BranchKind::IfFalse => Instruction::JmpFalse { condition, offset },
                    BranchKind::IfNull => Instruction::JmpNull { condition, offset },
                    BranchKind::IfNotNull => Instruction::JmpNotNull { condition, offset },
                };
                self.writer.emit(&ins);

                let offset = self.writer.use_label(label(*fallthrough));
                self.writer.emit(&Instruction::Jmp { offset });
            }

            Terminator::Return { value } => {
                let value = self.reg(*value);
                self.writer.emit(&Instruction::Return { value });
            }

            Terminator::Rethrow => self.writer.emit(&Instruction::Rethrow {}),

            Terminator::AssertFail { expr, message } => {
                let ins = Instruction::AssertFail {
                    expr: self.reg(*expr),
                    message: self.reg(*message),
                };
                self.writer.emit(&ins);
            }
        }
    }
}

fn binary_instruction(op: BinaryOp, lhs: Register, rhs: Register, target: Register) -> Instruction {
    match op {
        BinaryOp::Add => Instruction::Add { lhs, rhs, target },
        BinaryOp::Subtract => Instruction::Sub { lhs, rhs, target },
        BinaryOp::Multiply => Instruction::Mul { lhs, rhs, target },
        BinaryOp::Divide => Instruction::Div { lhs, rhs, target },
        BinaryOp::Modulus => Instruction::Mod { lhs, rhs, target },
        BinaryOp::Power => Instruction::Pow { lhs, rhs, target },
        BinaryOp::LeftShift => Instruction::LSh { lhs, rhs, target },
        BinaryOp::RightShift => Instruction::RSh { lhs, rhs, target },
        BinaryOp::BitwiseAnd => Instruction::BAnd { lhs, rhs, target },
        BinaryOp::BitwiseOr => Instruction::BOr { lhs, rhs, target },
        BinaryOp::BitwiseXor => Instruction::BXor { lhs, rhs, target },
        BinaryOp::Greater => Instruction::Gt { lhs, rhs, target },
        BinaryOp::GreaterEquals => Instruction::Gte { lhs, rhs, target },
        BinaryOp::Less => Instruction::Lt { lhs, rhs, target },
        BinaryOp::LessEquals => Instruction::Lte { lhs, rhs, target },
        BinaryOp::Equals => Instruction::Eq { lhs, rhs, target },
        BinaryOp::NotEquals => Instruction::NEq { lhs, rhs, target },
    }
}
