use thiserror::Error;
use tracing::debug;

use crate::consts::{MAX_CONTAINER_ARGS, MAX_LOCALS, MAX_MODULE_SIZE};
use crate::{
    BytecodeReader, DecodeError, Function, FunctionKind, Instruction, Member, MemberId,
    MemberKind, Module, Offset, Param, Register,
};

/// Failure produced by [`verify_module`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("module '{module}' verification error: {message}")]
pub struct VerifyError {
    module: String,
    member: Option<MemberId>,
    message: String,
}

impl VerifyError {
    /// Name of the module that failed to verify.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// The offending member, when the rule is member-specific.
    pub fn member(&self) -> Option<MemberId> {
        self.member
    }

    /// Description of the violated rule.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Statically validates the structure of a fully linked module.
///
/// A module that passes verification upholds every precondition the
/// interpreter would otherwise have to re-check per instruction: all ids in
/// bounds and correctly typed, all jump targets on instruction starts, all
/// functions ending in a halting instruction, all handler tables well
/// formed.
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    ModuleVerifier::new(module).verify()
}

struct ModuleVerifier<'a> {
    module: &'a Module,
    module_name: String,
    seen_member_ids: u32,
}

impl<'a> ModuleVerifier<'a> {
    fn new(module: &'a Module) -> Self {
        let module_name = module
            .name()
            .and_then(|n| module.strings().get(n))
            .unwrap_or("<invalid>")
            .to_owned();
        Self {
            module,
            module_name,
            seen_member_ids: 0,
        }
    }

    fn fail(&self, member: Option<MemberId>, message: String) -> VerifyError {
        VerifyError {
            module: self.module_name.clone(),
            member,
            message,
        }
    }

    fn verify(&mut self) -> Result<(), VerifyError> {
        debug!(module = %self.module_name, members = self.module.member_count(), "verifying module");

        if self
            .module
            .name()
            .and_then(|n| self.module.strings().get(n))
            .is_none()
        {
            return Err(self.fail(None, "module does not have a valid name".into()));
        }

        if self.module.member_count() > MAX_MODULE_SIZE {
            return Err(self.fail(
                None,
                format!(
                    "module has too many members ({}, maximum is {MAX_MODULE_SIZE})",
                    self.module.member_count()
                ),
            ));
        }

        // Member data first. Cross references must point at members that
        // have already been visited, which rules out forward references.
        for (id, member) in self.module.members() {
            self.verify_member(id, member)?;
            self.seen_member_ids += 1;
        }

        // Function code is verified once every member has been seen, so
        // instructions may reference any member of the module.
        for (id, member) in self.module.members() {
            if let Member::Function(function_id) = member {
                let function = self
                    .module
                    .function(*function_id)
                    .expect("function reference was validated");
                FunctionVerifier::new(id, function, self).verify()?;
            }
        }

        if let Some(init_id) = self.module.init() {
            let init = self.check_reference(init_id, None)?;
            let Member::Function(function_id) = init else {
                return Err(self.fail(
                    Some(init_id),
                    format!("member {init_id} is not a function (required by module init)"),
                ));
            };
            let function = self
                .module
                .function(*function_id)
                .expect("function reference was validated");
            if function.kind() != FunctionKind::Normal {
                return Err(self.fail(
                    Some(init_id),
                    format!("member {init_id} is not a normal function (required by module init)"),
                ));
            }
        }

        for &(symbol_id, value_id) in self.module.exports() {
            let symbol = self.check_reference(symbol_id, None)?;
            if symbol.kind() != MemberKind::Symbol {
                return Err(self.fail(
                    Some(symbol_id),
                    format!("member {symbol_id} is not a symbol (required by usage as export name)"),
                ));
            }

            let value = self.check_reference(value_id, None)?;
            match value {
                Member::Import { .. } | Member::RecordSchema(_) => {
                    return Err(self.fail(
                        Some(value_id),
                        "forbidden export of internal type".into(),
                    ));
                }
                Member::Function(function_id) => {
                    let function = self
                        .module
                        .function(*function_id)
                        .expect("function reference was validated");
                    if function.kind() != FunctionKind::Normal {
                        return Err(self.fail(
                            Some(value_id),
                            format!("member {value_id} is not a normal function (required by export)"),
                        ));
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn verify_member(&self, id: MemberId, member: &Member) -> Result<(), VerifyError> {
        match member {
            Member::Integer(_) | Member::Float(_) | Member::Variable { .. } => Ok(()),
            Member::String(value) => {
                if self.module.strings().get(*value).is_none() {
                    return Err(self.fail(Some(id), format!("invalid string (in member {id})")));
                }
                Ok(())
            }
            Member::Symbol { name } => {
                let name_member = self.check_reference(*name, Some(id))?;
                if name_member.kind() != MemberKind::String {
                    return Err(self.fail(
                        Some(id),
                        format!("member {name} is not a string (required by symbol at {id})"),
                    ));
                }
                Ok(())
            }
            Member::Import { module_name } => {
                let name_member = self.check_reference(*module_name, Some(id))?;
                if name_member.kind() != MemberKind::String {
                    return Err(self.fail(
                        Some(id),
                        format!("member {module_name} is not a string (required by import at {id})"),
                    ));
                }
                Ok(())
            }
            Member::Function(function_id) => {
                let Some(function) = self.module.function(*function_id) else {
                    return Err(
                        self.fail(Some(id), format!("invalid function reference (in member {id})"))
                    );
                };
                if let Some(name_id) = function.name() {
                    let name_member = self.check_reference(name_id, Some(id))?;
                    if name_member.kind() != MemberKind::String {
                        return Err(self.fail(
                            Some(id),
                            format!("member {name_id} is not a string (required by function at {id})"),
                        ));
                    }
                }
                // Code and handlers are verified once all members have been
                // seen (see FunctionVerifier).
                Ok(())
            }
            Member::RecordSchema(schema_id) => {
                let Some(schema) = self.module.schema(*schema_id) else {
                    return Err(self.fail(
                        Some(id),
                        format!("invalid record schema reference (in member {id})"),
                    ));
                };
                for &key_id in schema.keys() {
                    let key = self.check_reference(key_id, Some(id))?;
                    if key.kind() != MemberKind::Symbol {
                        return Err(self.fail(
                            Some(id),
                            format!("member {key_id} is not a symbol (required by record schema at {id})"),
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    /// Bounds-checks a member reference and rejects references to members
    /// that have not been visited yet (forward references).
    fn check_reference(
        &self,
        id: MemberId,
        parent: Option<MemberId>,
    ) -> Result<&'a Member, VerifyError> {
        let context = || match parent {
            Some(parent) => format!("(referenced by member {parent})"),
            None => "(referenced by module)".to_owned(),
        };

        if id == MemberId::INVALID {
            return Err(self.fail(parent, format!("invalid module member id {}", context())));
        }
        if self.module.member(id).is_none() {
            return Err(self.fail(
                parent,
                format!("member id {id} is out of bounds {}", context()),
            ));
        }
        if id.to_u32() >= self.seen_member_ids {
            return Err(self.fail(
                parent,
                format!("member id {id} has not been visited yet {}", context()),
            ));
        }
        Ok(self.module.member(id).expect("bounds were checked"))
    }
}

struct FunctionVerifier<'a, 'm> {
    id: MemberId,
    function: &'a Function,
    parent: &'a ModuleVerifier<'m>,
    // Byte offsets of decoded instruction starts, ascending.
    starts: Vec<u32>,
}

impl<'a, 'm> FunctionVerifier<'a, 'm> {
    fn new(id: MemberId, function: &'a Function, parent: &'a ModuleVerifier<'m>) -> Self {
        Self {
            id,
            function,
            parent,
            starts: Vec::new(),
        }
    }

    fn fail(&self, message: String) -> VerifyError {
        self.parent.fail(
            Some(self.id),
            format!("{message} (in function member {})", self.id),
        )
    }

    fn verify(&mut self) -> Result<(), VerifyError> {
        if self.function.locals() > MAX_LOCALS {
            return Err(self.fail(format!(
                "function uses too many locals ({} locals, maximum is {MAX_LOCALS})",
                self.function.locals()
            )));
        }

        // Name has already been verified together with the member data.
        let instructions = self.read_instructions()?;

        for &(_, ins) in &instructions {
            self.verify_instruction(ins)?;
        }

        if instructions.is_empty() {
            return Err(self.fail("function body must not be empty".into()));
        }

        // Eliminates checking for the end of the bytecode in the
        // interpreter loop.
        let (_, last) = instructions[instructions.len() - 1];
        if !last.op().is_halting() {
            return Err(self.fail("function body must end with a halting instruction".into()));
        }

        self.verify_handlers()
    }

    fn read_instructions(&mut self) -> Result<Vec<(u32, Instruction)>, VerifyError> {
        if self.function.code().len() >= u32::MAX as usize {
            return Err(self.fail("bytecode too long".into()));
        }

        let mut entries = Vec::new();
        let mut reader = BytecodeReader::new(self.function.code());
        while reader.remaining() > 0 {
            let pos = reader.pos() as u32;
            let ins = match reader.read() {
                Ok(ins) => ins,
                Err(err @ (DecodeError::InvalidOpcode(_) | DecodeError::IncompleteInstruction)) => {
                    return Err(self.fail(format!("invalid bytecode: {err}")));
                }
                Err(DecodeError::End) => break,
            };
            entries.push((pos, ins));
            self.starts.push(pos);
        }
        Ok(entries)
    }

    fn verify_handlers(&self) -> Result<(), VerifyError> {
        let handlers = self.function.handlers();
        for (i, current) in handlers.iter().enumerate() {
            let prev = (i > 0).then(|| &handlers[i - 1]);

            if !self.is_instruction_start(current.from) {
                return Err(self.fail("invalid exception handler start instruction".into()));
            }
            if let Some(prev) = prev {
                if current.from.to_u32() < prev.to.to_u32() {
                    return Err(self.fail("exception handler entries must be ordered".into()));
                }
            }

            // `to` is exclusive and may point one past the end of the code.
            let at_end = current.to.to_u32() as usize == self.function.code().len();
            if !(self.is_instruction_start(current.to) || at_end) {
                return Err(self.fail("invalid exception handler end instruction".into()));
            }
            if current.to.to_u32() <= current.from.to_u32() {
                return Err(self.fail("invalid exception handler interval".into()));
            }

            if !self.is_instruction_start(current.target) {
                return Err(self.fail("invalid exception handler target instruction".into()));
            }
        }
        Ok(())
    }

    fn is_instruction_start(&self, offset: Offset) -> bool {
        offset != Offset::INVALID && self.starts.binary_search(&offset.to_u32()).is_ok()
    }

    fn check_register(&self, register: Register) -> Result<(), VerifyError> {
        if register == Register::INVALID {
            return Err(self.fail("invalid local".into()));
        }
        if register.to_u32() >= self.function.locals() {
            return Err(self.fail("local index out of bounds".into()));
        }
        Ok(())
    }

    fn check_param(&self, param: Param) -> Result<(), VerifyError> {
        if param == Param::INVALID {
            return Err(self.fail("invalid parameter".into()));
        }
        if param.to_u32() >= self.function.params() {
            return Err(self.fail("parameter index out of bounds".into()));
        }
        Ok(())
    }

    fn check_offset(&self, target: Offset) -> Result<(), VerifyError> {
        if target == Offset::INVALID {
            return Err(self.fail("invalid jump destination".into()));
        }
        if !self.is_instruction_start(target) {
            return Err(
                self.fail("jump destination does not point to the start of an instruction".into())
            );
        }
        Ok(())
    }

    fn check_member(&self, id: MemberId) -> Result<&'m Member, VerifyError> {
        self.parent.check_reference(id, Some(self.id))
    }

    fn check_container_args(&self, op: &str, count: u32) -> Result<(), VerifyError> {
        if count > MAX_CONTAINER_ARGS {
            return Err(self.fail(format!("too many arguments in {op} construction")));
        }
        Ok(())
    }

    // The per-opcode operand rules. Each register must fit the local count,
    // each parameter the parameter count, each offset an instruction start,
    // each member reference its expected member type.
    fn verify_instruction(&self, ins: Instruction) -> Result<(), VerifyError> {
        use Instruction::*;

        match ins {
            LoadNull { target }
            | LoadFalse { target }
            | LoadTrue { target }
            | LoadInt { target, .. }
            | LoadFloat { target, .. }
            | Formatter { target }
            | PopTo { target } => self.check_register(target),

            LoadClosure { target } => {
                if self.function.kind() != FunctionKind::Closure {
                    return Err(self
                        .fail("only closure functions can use the LoadClosure instruction".into()));
                }
                self.check_register(target)
            }

            LoadParam { source, target } => {
                self.check_param(source)?;
                self.check_register(target)
            }
            StoreParam { source, target } => {
                self.check_register(source)?;
                self.check_param(target)
            }

            LoadModule { source, target } => {
                self.check_member(source)?;
                self.check_register(target)
            }
            StoreModule { source, target } => {
                self.check_register(source)?;
                self.check_member(target)?;
                Ok(())
            }

            LoadMember {
                object,
                name,
                target,
            } => {
                self.check_register(object)?;
                if self.check_member(name)?.kind() != MemberKind::Symbol {
                    return Err(
                        self.fail("name in LoadMember instruction must reference a symbol".into())
                    );
                }
                self.check_register(target)
            }
            StoreMember {
                source,
                object,
                name,
            } => {
                self.check_register(source)?;
                self.check_register(object)?;
                if self.check_member(name)?.kind() != MemberKind::Symbol {
                    return Err(
                        self.fail("name in StoreMember instruction must reference a symbol".into())
                    );
                }
                Ok(())
            }

            LoadTupleMember { tuple, target, .. } => {
                self.check_register(tuple)?;
                self.check_register(target)
            }
            StoreTupleMember { source, tuple, .. } => {
                self.check_register(source)?;
                self.check_register(tuple)
            }

            LoadIndex {
                array,
                index,
                target,
            } => {
                self.check_register(array)?;
                self.check_register(index)?;
                self.check_register(target)
            }
            StoreIndex {
                source,
                array,
                index,
            } => {
                self.check_register(source)?;
                self.check_register(array)?;
                self.check_register(index)
            }

            LoadEnv { env, target, .. } => {
                self.check_register(env)?;
                self.check_register(target)
            }
            StoreEnv { source, env, .. } => {
                self.check_register(source)?;
                self.check_register(env)
            }

            Add { lhs, rhs, target }
            | Sub { lhs, rhs, target }
            | Mul { lhs, rhs, target }
            | Div { lhs, rhs, target }
            | Mod { lhs, rhs, target }
            | Pow { lhs, rhs, target }
            | LSh { lhs, rhs, target }
            | RSh { lhs, rhs, target }
            | BAnd { lhs, rhs, target }
            | BOr { lhs, rhs, target }
            | BXor { lhs, rhs, target }
            | Gt { lhs, rhs, target }
            | Gte { lhs, rhs, target }
            | Lt { lhs, rhs, target }
            | Lte { lhs, rhs, target }
            | Eq { lhs, rhs, target }
            | NEq { lhs, rhs, target } => {
                self.check_register(lhs)?;
                self.check_register(rhs)?;
                self.check_register(target)
            }

            UAdd { value, target }
            | UNeg { value, target }
            | BNot { value, target }
            | LNot { value, target } => {
                self.check_register(value)?;
                self.check_register(target)
            }

            Array { count, target } => {
                self.check_register(target)?;
                self.check_container_args("array", count)
            }
            Tuple { count, target } => {
                self.check_register(target)?;
                self.check_container_args("tuple", count)
            }
            Set { count, target } => {
                self.check_register(target)?;
                self.check_container_args("set", count)
            }
            Map { count, target } => {
                self.check_register(target)?;
                if count % 2 != 0 {
                    return Err(self.fail(
                        "Map instruction must specify an even number of keys and values".into(),
                    ));
                }
                self.check_container_args("map", count)
            }

            Env {
                parent, target, ..
            } => {
                self.check_register(parent)?;
                self.check_register(target)
            }

            Closure {
                template,
                env,
                target,
            } => {
                let member = self.check_member(template)?;
                let Member::Function(function_id) = member else {
                    return Err(
                        self.fail("Closure instruction must reference a closure function".into())
                    );
                };
                let function = self
                    .parent
                    .module
                    .function(*function_id)
                    .expect("function reference was validated");
                if function.kind() != FunctionKind::Closure {
                    return Err(
                        self.fail("Closure instruction must reference a closure function".into())
                    );
                }
                self.check_register(env)?;
                self.check_register(target)
            }

            Record { template, target } => {
                if self.check_member(template)?.kind() != MemberKind::RecordSchema {
                    return Err(
                        self.fail("Record instruction must reference a record schema".into())
                    );
                }
                self.check_register(target)
            }

            Iterator { container, target } => {
                self.check_register(container)?;
                self.check_register(target)
            }
            IteratorNext {
                iterator,
                valid,
                value,
            } => {
                self.check_register(iterator)?;
                self.check_register(valid)?;
                self.check_register(value)
            }

            AppendFormat { value, formatter } => {
                self.check_register(value)?;
                self.check_register(formatter)
            }
            FormatResult { formatter, target } => {
                self.check_register(formatter)?;
                self.check_register(target)
            }

            Copy { source, target } => {
                self.check_register(source)?;
                self.check_register(target)
            }
            Swap { a, b } => {
                self.check_register(a)?;
                self.check_register(b)
            }
            Push { value } => self.check_register(value),
            Pop {} => Ok(()),

            Jmp { offset } => self.check_offset(offset),
            JmpTrue { condition, offset }
            | JmpFalse { condition, offset }
            | JmpNull { condition, offset }
            | JmpNotNull { condition, offset } => {
                self.check_register(condition)?;
                self.check_offset(offset)
            }

            Call { function, .. } => self.check_register(function),
            LoadMethod {
                object,
                name,
                this,
                method,
            } => {
                self.check_register(object)?;
                if self.check_member(name)?.kind() != MemberKind::Symbol {
                    return Err(
                        self.fail("name in LoadMethod instruction must reference a symbol".into())
                    );
                }
                self.check_register(this)?;
                self.check_register(method)
            }
            CallMethod { method, .. } => self.check_register(method),

            Return { value } => self.check_register(value),
            // Whether a Rethrow actually sits inside a handler region is
            // not validated here.
            Rethrow {} => Ok(()),
            AssertFail { expr, message } => {
                self.check_register(expr)?;
                self.check_register(message)
            }
        }
    }
}
