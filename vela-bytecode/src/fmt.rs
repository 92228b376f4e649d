//! Human-readable listings of functions and modules.
//!
//! These are debugging aids: the disassembly decodes the code stream with
//! the general-purpose [`BytecodeReader`] and prints one instruction per
//! line, prefixed with its byte offset.

use core::fmt::Write;

use crate::{BytecodeReader, Function, Member, Module};

/// Renders a disassembly listing of a single function.
pub fn dump_function(function: &Function) -> String {
    let mut out = String::new();

    let name = match function.name() {
        Some(id) => format!("member {id}"),
        None => "<anonymous>".to_owned(),
    };
    let _ = writeln!(
        out,
        "function {name} ({}, {} params, {} locals, {} bytes)",
        function.kind(),
        function.params(),
        function.locals(),
        function.code().len()
    );

    if !function.handlers().is_empty() {
        let _ = writeln!(out, "  handlers:");
        for handler in function.handlers() {
            let _ = writeln!(
                out,
                "    [{}, {}) -> {}",
                handler.from, handler.to, handler.target
            );
        }
    }

    let mut reader = BytecodeReader::new(function.code());
    loop {
        let pos = reader.pos();
        match reader.read() {
            Ok(ins) => {
                let _ = writeln!(out, "  {pos:>6}: {ins}");
            }
            Err(crate::DecodeError::End) => break,
            Err(err) => {
                let _ = writeln!(out, "  {pos:>6}: <{err}>");
                break;
            }
        }
    }

    out
}

/// Renders a listing of a whole module: members, record schemas, exports
/// and the disassembly of every function.
pub fn dump_module(module: &Module) -> String {
    let mut out = String::new();

    let name = module
        .name()
        .and_then(|n| module.strings().get(n))
        .unwrap_or("<invalid>");
    let _ = writeln!(
        out,
        "module {name:?} ({} members, {} functions, {} schemas)",
        module.member_count(),
        module.function_count(),
        module.schema_count()
    );
    if let Some(init) = module.init() {
        let _ = writeln!(out, "init: member {init}");
    }

    let _ = writeln!(out, "members:");
    for (id, member) in module.members() {
        let _ = write!(out, "  {id}: ");
        let _ = match member {
            Member::Integer(value) => writeln!(out, "Integer({value})"),
            Member::Float(value) => writeln!(out, "Float({value})"),
            Member::String(value) => match module.strings().get(*value) {
                Some(s) => writeln!(out, "String({s:?})"),
                None => writeln!(out, "String(<invalid>)"),
            },
            Member::Symbol { name } => writeln!(out, "Symbol(name: {name})"),
            Member::Import { module_name } => writeln!(out, "Import(module_name: {module_name})"),
            Member::Variable { name } => writeln!(out, "Variable(name: {name})"),
            Member::Function(id) => writeln!(out, "Function({id})"),
            Member::RecordSchema(id) => {
                let keys = module
                    .schema(*id)
                    .map(|schema| {
                        schema
                            .keys()
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_else(|| "<invalid>".to_owned());
                writeln!(out, "RecordSchema(keys: [{keys}])")
            }
        };
    }

    if !module.exports().is_empty() {
        let _ = writeln!(out, "exports:");
        for (symbol, value) in module.exports() {
            let _ = writeln!(out, "  {symbol} -> {value}");
        }
    }

    for (id, member) in module.members() {
        if let Member::Function(function_id) = member {
            if let Some(function) = module.function(*function_id) {
                let _ = write!(out, "\n[member {id}] {}", dump_function(function));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Instruction, Register};

    #[test]
    fn function_dump_lists_offsets() {
        let mut function = Function::default();
        function.set_locals(1);
        for ins in [
            Instruction::LoadInt {
                constant: 42,
                target: Register::new(0),
            },
            Instruction::Return {
                value: Register::new(0),
            },
        ] {
            function.code_mut().extend_from_slice(&ins.to_bytes());
        }

        let dump = dump_function(&function);
        assert!(dump.contains("0: LoadInt 42 0"), "dump was: {dump}");
        assert!(dump.contains("13: Return 0"), "dump was: {dump}");
    }
}
