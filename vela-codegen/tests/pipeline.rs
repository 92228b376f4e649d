//! End-to-end tests: IR in, verified bytecode module out.

use vela_bytecode::{
    dump_module, verify_module, BytecodeReader, Function as BcFunction, FunctionKind, Instruction,
    Member, MemberId, MemberKind, Module, Offset, Param, Register,
};
use vela_codegen::ir::{
    self, BinaryOp, BranchKind, Constant, Function, Lvalue, ModuleIr, ModuleMember,
    ModuleMemberData, SymbolId, Terminator, Value,
};
use vela_codegen::{compile_module, link_objects, LinkObject};

fn function_member(module: &Module) -> (MemberId, &BcFunction) {
    module
        .members()
        .find_map(|(id, member)| match member {
            Member::Function(function_id) => Some((id, module.function(*function_id).unwrap())),
            _ => None,
        })
        .expect("module contains a function")
}

fn decode_with_offsets(code: &[u8]) -> Vec<(u32, Instruction)> {
    let mut reader = BytecodeReader::new(code);
    let mut out = Vec::new();
    while reader.remaining() > 0 {
        let pos = reader.pos() as u32;
        out.push((pos, reader.read().unwrap()));
    }
    out
}

/// A single-member module holding one function.
fn module_with_function(build: impl FnOnce(&mut ModuleIr) -> Function) -> ModuleIr {
    let mut module = ModuleIr::new("demo");
    let func = build(&mut module);
    let name = func.name().expect("test functions are named");
    module.add_member(ModuleMember {
        name,
        exported: true,
        data: ModuleMemberData::Function(func),
    });
    module
}

#[test]
fn constant_return_lowers_to_two_instructions() {
    let module = module_with_function(|module| {
        let name = module.strings_mut().intern("answer");
        let mut func = Function::new(Some(name), FunctionKind::Normal, 0);
        let entry = func.add_block();
        func.set_entry(entry);
        let value = func.append_inst(entry, Value::Constant(Constant::Int(42)));
        func.set_terminator(entry, Terminator::Return { value });
        func
    });

    let compiled = compile_module(&module).unwrap();
    verify_module(&compiled).unwrap();

    let (_, function) = function_member(&compiled);
    assert_eq!(function.locals(), 1);
    assert_eq!(
        decode_with_offsets(function.code()),
        vec![
            (
                0,
                Instruction::LoadInt {
                    constant: 42,
                    target: Register::new(0),
                }
            ),
            (
                13,
                Instruction::Return {
                    value: Register::new(0),
                }
            ),
        ]
    );
}

#[test]
fn branch_with_phi_verifies() {
    let module = module_with_function(|module| {
        let name = module.strings_mut().intern("max");
        let mut func = Function::new(Some(name), FunctionKind::Normal, 2);
        let entry = func.add_block();
        let left = func.add_block();
        let right = func.add_block();
        let join = func.add_block();
        func.set_entry(entry);

        let a = func.append_inst(entry, Value::Read(Lvalue::Param(Param::new(0))));
        let b = func.append_inst(entry, Value::Read(Lvalue::Param(Param::new(1))));
        let cond = func.append_inst(
            entry,
            Value::BinaryOp {
                op: BinaryOp::Greater,
                lhs: a,
                rhs: b,
            },
        );
        func.set_terminator(
            entry,
            Terminator::Branch {
                kind: BranchKind::IfTrue,
                condition: cond,
                target: left,
                fallthrough: right,
            },
        );
        func.set_terminator(left, Terminator::Jump { target: join });
        func.set_terminator(right, Terminator::Jump { target: join });

        let winner = func.append_inst(
            join,
            Value::Phi {
                operands: vec![a, b],
            },
        );
        func.set_terminator(join, Terminator::Return { value: winner });
        func
    });

    let compiled = compile_module(&module).unwrap();
    verify_module(&compiled).unwrap();

    // Every decoded jump target is an instruction start (checked by the
    // verifier); the function must end in a halting instruction.
    let (_, function) = function_member(&compiled);
    let decoded = decode_with_offsets(function.code());
    let last = decoded.last().unwrap();
    assert!(last.1.op().is_halting());
}

#[test]
fn handler_blocks_produce_a_handler_table() {
    let symbol = SymbolId::new(0);
    let module = module_with_function(|module| {
        let name = module.strings_mut().intern("guarded");
        let mut func = Function::new(Some(name), FunctionKind::Normal, 0);
        let entry = func.add_block();
        let body = func.add_block();
        let handler = func.add_block();
        func.set_entry(entry);

        func.set_terminator(
            entry,
            Terminator::Entry {
                body,
                handlers: vec![handler],
            },
        );

        let value = func.append_inst(body, Value::Constant(Constant::Int(1)));
        func.append_inst(body, Value::PublishAssign { symbol, value });
        let result = func.append_inst(body, Value::Constant(Constant::Null));
        func.set_terminator(body, Terminator::Return { value: result });
        func.set_handler(body, Some(handler));

        let observed = func.append_inst(handler, Value::ObserveAssign { symbol });
        func.set_terminator(handler, Terminator::Return { value: observed });
        func
    });

    let compiled = compile_module(&module).unwrap();
    verify_module(&compiled).unwrap();

    let (_, function) = function_member(&compiled);
    let handlers = function.handlers();
    assert_eq!(handlers.len(), 1);

    // The covered range spans the body block; the target is the handler
    // block's first instruction.
    let starts: Vec<u32> = decode_with_offsets(function.code())
        .iter()
        .map(|&(pos, _)| pos)
        .collect();
    assert!(starts.contains(&handlers[0].from.to_u32()));
    assert!(starts.contains(&handlers[0].target.to_u32()));
    assert!(handlers[0].from < handlers[0].to);
}

#[test]
fn records_and_strings_become_module_members() {
    let module = module_with_function(|module| {
        let name = module.strings_mut().intern("greet");
        let msg = module.strings_mut().intern("msg");
        let who = module.strings_mut().intern("who");
        let hello = module.strings_mut().intern("hello");

        let mut func = Function::new(Some(name), FunctionKind::Normal, 1);
        let entry = func.add_block();
        func.set_entry(entry);

        let text = func.append_inst(entry, Value::Constant(Constant::String(hello)));
        let person = func.append_inst(entry, Value::Read(Lvalue::Param(Param::new(0))));
        let record = func.append_inst(
            entry,
            Value::Record {
                fields: vec![(msg, text), (who, person)],
            },
        );
        func.set_terminator(entry, Terminator::Return { value: record });
        func
    });

    let compiled = compile_module(&module).unwrap();
    verify_module(&compiled).unwrap();

    // One record schema with two symbol keys in ascending member order.
    assert_eq!(compiled.schema_count(), 1);
    let schema = compiled
        .members()
        .find_map(|(_, member)| match member {
            Member::RecordSchema(id) => compiled.schema(*id),
            _ => None,
        })
        .unwrap();
    assert_eq!(schema.keys().len(), 2);
    assert!(schema.keys().windows(2).all(|w| w[0] < w[1]));
    for &key in schema.keys() {
        assert_eq!(compiled.member(key).unwrap().kind(), MemberKind::Symbol);
    }

    // The "hello" constant was interned into the module string table.
    assert!(compiled
        .members()
        .any(|(_, member)| matches!(member, Member::String(s)
            if compiled.strings().get(*s) == Some("hello"))));
}

#[test]
fn closures_resolve_through_link_items() {
    let mut module = ModuleIr::new("demo");
    let outer_name = module.strings_mut().intern("outer");
    let inner_name = module.strings_mut().intern("inner");

    // The closure body reads its environment.
    let mut inner = Function::new(Some(inner_name), FunctionKind::Closure, 0);
    let entry = inner.add_block();
    inner.set_entry(entry);
    let env = inner.append_inst(entry, Value::OuterEnvironment);
    inner.set_terminator(entry, Terminator::Return { value: env });
    let inner_id = module.add_member(ModuleMember {
        name: inner_name,
        exported: false,
        data: ModuleMemberData::Function(inner),
    });

    // The outer function allocates an environment and closes over it.
    let mut outer = Function::new(Some(outer_name), FunctionKind::Normal, 0);
    let entry = outer.add_block();
    outer.set_entry(entry);
    let parent = outer.append_inst(entry, Value::Constant(Constant::Null));
    let env = outer.append_inst(
        entry,
        Value::MakeEnvironment { parent, size: 1 },
    );
    let closure = outer.append_inst(
        entry,
        Value::MakeClosure {
            env,
            function: inner_id,
        },
    );
    outer.set_terminator(entry, Terminator::Return { value: closure });
    module.add_member(ModuleMember {
        name: outer_name,
        exported: true,
        data: ModuleMemberData::Function(outer),
    });

    let compiled = compile_module(&module).unwrap();
    verify_module(&compiled).unwrap();
}

#[test]
fn linking_is_deterministic() {
    let build = || {
        module_with_function(|module| {
            let name = module.strings_mut().intern("main");
            let alpha = module.strings_mut().intern("alpha");
            let beta = module.strings_mut().intern("beta");

            let mut func = Function::new(Some(name), FunctionKind::Normal, 0);
            let entry = func.add_block();
            func.set_entry(entry);

            let b = func.append_inst(entry, Value::Constant(Constant::String(beta)));
            let a = func.append_inst(entry, Value::Constant(Constant::String(alpha)));
            let pair = func.append_inst(
                entry,
                Value::Container {
                    kind: ir::ContainerKind::Tuple,
                    args: vec![b, a],
                },
            );
            func.set_terminator(entry, Terminator::Return { value: pair });
            func
        })
    };

    let first = compile_module(&build()).unwrap();
    let second = compile_module(&build()).unwrap();

    assert_eq!(dump_module(&first), dump_module(&second));
    let (_, f1) = function_member(&first);
    let (_, f2) = function_member(&second);
    assert_eq!(f1.code(), f2.code());

    // String constants sort by content: "alpha" before "beta".
    let strings: Vec<&str> = first
        .members()
        .filter_map(|(_, member)| match member {
            Member::String(s) => first.strings().get(*s),
            _ => None,
        })
        .collect();
    let mut sorted = strings.clone();
    sorted.sort();
    assert_eq!(strings, sorted);
}

#[test]
fn module_init_is_resolved() {
    let mut module = ModuleIr::new("demo");
    let name = module.strings_mut().intern("start");

    let mut func = Function::new(Some(name), FunctionKind::Normal, 0);
    let entry = func.add_block();
    func.set_entry(entry);
    let value = func.append_inst(entry, Value::Constant(Constant::Null));
    func.set_terminator(entry, Terminator::Return { value });

    let member = module.add_member(ModuleMember {
        name,
        exported: false,
        data: ModuleMemberData::Function(func),
    });
    module.set_init(member);

    let compiled = compile_module(&module).unwrap();
    verify_module(&compiled).unwrap();

    let init = compiled.init().expect("init is set");
    assert_eq!(
        compiled.member(init).unwrap().kind(),
        MemberKind::Function
    );
}

#[test]
fn merged_objects_link_together() {
    let module = ModuleIr::new("demo");

    let mut first = LinkObject::new();
    first.define_integer(7);
    let mut second = LinkObject::new();
    second.define_integer(3);

    let compiled = link_objects([first, second], &module).unwrap();
    let values: Vec<i64> = compiled
        .members()
        .filter_map(|(_, member)| match member {
            Member::Integer(value) => Some(*value),
            _ => None,
        })
        .collect();
    // Canonical order sorts integers by value regardless of the object
    // they came from.
    assert_eq!(values, vec![3, 7]);
}

mod verifier_rejections {
    use super::*;
    use vela_bytecode::{ExceptionHandler, FunctionKind, RecordSchema};

    fn named_module() -> Module {
        let mut module = Module::new();
        let name = module.strings_mut().intern("m");
        module.set_name(name);
        module
    }

    #[test]
    fn forward_references_are_rejected() {
        let mut module = named_module();
        module.push_member(Member::Symbol {
            name: MemberId::new(1),
        });
        let x = module.strings_mut().intern("x");
        module.push_member(Member::String(x));

        let err = verify_module(&module).unwrap_err();
        assert!(err.message().contains("has not been visited yet"), "{err}");
    }

    #[test]
    fn init_must_reference_a_function() {
        let mut module = named_module();
        let id = module.push_member(Member::Integer(1));
        module.set_init(id);

        let err = verify_module(&module).unwrap_err();
        assert!(err.message().contains("is not a function"), "{err}");
    }

    #[test]
    fn init_must_reference_a_normal_function() {
        let mut module = named_module();

        let mut function = BcFunction::new(FunctionKind::Closure);
        function
            .code_mut()
            .extend_from_slice(&Instruction::Rethrow {}.to_bytes());
        let function_id = module.push_function(function);
        let member = module.push_member(Member::Function(function_id));
        module.set_init(member);

        let err = verify_module(&module).unwrap_err();
        assert!(err.message().contains("not a normal function"), "{err}");
    }

    #[test]
    fn functions_must_end_halting() {
        let mut module = named_module();

        let mut function = BcFunction::new(FunctionKind::Normal);
        function.set_locals(1);
        function
            .code_mut()
            .extend_from_slice(&Instruction::LoadNull {
                target: Register::new(0),
            }
            .to_bytes());
        let function_id = module.push_function(function);
        module.push_member(Member::Function(function_id));

        let err = verify_module(&module).unwrap_err();
        assert!(
            err.message().contains("must end with a halting instruction"),
            "{err}"
        );
    }

    #[test]
    fn out_of_bounds_registers_are_rejected() {
        let mut module = named_module();

        let mut function = BcFunction::new(FunctionKind::Normal);
        function.set_locals(1);
        function
            .code_mut()
            .extend_from_slice(&Instruction::Return {
                value: Register::new(1),
            }
            .to_bytes());
        let function_id = module.push_function(function);
        module.push_member(Member::Function(function_id));

        let err = verify_module(&module).unwrap_err();
        assert!(err.message().contains("local index out of bounds"), "{err}");
    }

    #[test]
    fn jumps_must_target_instruction_starts() {
        let mut module = named_module();

        let mut function = BcFunction::new(FunctionKind::Normal);
        function
            .code_mut()
            .extend_from_slice(&Instruction::Jmp {
                offset: Offset::new(3),
            }
            .to_bytes());
        let function_id = module.push_function(function);
        module.push_member(Member::Function(function_id));

        let err = verify_module(&module).unwrap_err();
        assert!(
            err.message()
                .contains("does not point to the start of an instruction"),
            "{err}"
        );
    }

    #[test]
    fn overlapping_handlers_are_rejected() {
        let mut module = named_module();

        let mut function = BcFunction::new(FunctionKind::Normal);
        function.set_locals(1);
        let code = function.code_mut();
        for _ in 0..3 {
            code.extend_from_slice(&Instruction::LoadNull {
                target: Register::new(0),
            }
            .to_bytes());
        }
        code.extend_from_slice(&Instruction::Return {
            value: Register::new(0),
        }
        .to_bytes());
        function.handlers_mut().extend([
            ExceptionHandler::new(Offset::new(0), Offset::new(10), Offset::new(15)),
            ExceptionHandler::new(Offset::new(5), Offset::new(15), Offset::new(15)),
        ]);
        let function_id = module.push_function(function);
        module.push_member(Member::Function(function_id));

        let err = verify_module(&module).unwrap_err();
        assert!(err.message().contains("must be ordered"), "{err}");
    }

    #[test]
    fn record_schema_keys_must_be_symbols() {
        let mut module = named_module();

        let x = module.strings_mut().intern("x");
        let string_id = module.push_member(Member::String(x));
        let schema_id = module.push_schema(RecordSchema::new(vec![string_id]));
        module.push_member(Member::RecordSchema(schema_id));

        let err = verify_module(&module).unwrap_err();
        assert!(err.message().contains("is not a symbol"), "{err}");
    }

    #[test]
    fn exports_of_internal_types_are_rejected() {
        let mut module = named_module();

        let name = module.strings_mut().intern("thing");
        let string_id = module.push_member(Member::String(name));
        let symbol_id = module.push_member(Member::Symbol { name: string_id });
        let import_id = module.push_member(Member::Import {
            module_name: string_id,
        });
        module.add_export(symbol_id, import_id);

        let err = verify_module(&module).unwrap_err();
        assert!(
            err.message().contains("forbidden export of internal type"),
            "{err}"
        );
    }
}
