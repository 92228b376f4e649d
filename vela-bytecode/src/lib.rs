//! Instruction set, module model and verifier of the Vela virtual machine.
//!
//! The VM is register based: every function owns a dense file of local
//! slots, instructions address their operands directly, and an explicit
//! operand stack is used only for call argument passing and container
//! construction. Code is a byte stream of one-byte opcode tags followed by
//! big-endian operands.
//!
//! This crate owns the data model the compiler backend produces and the VM
//! consumes: [`Op`] / [`Instruction`] with their codec, [`Function`] with
//! its exception handler table, [`Module`] with members, record schemas and
//! exports, and [`verify_module`], the structural validator that runs
//! before a module may be executed.

#![warn(missing_docs)]

pub mod consts;
mod fmt;
mod function;
mod instruction;
pub(crate) mod macros;
mod member;
mod module;
mod op;
mod reader;
mod verify;

#[cfg(test)]
mod encoding_tests;

pub use vela_types::{
    FunctionId, MemberId, Offset, Param, RecordSchemaId, Register, Str, StringTable,
};

pub use fmt::{dump_function, dump_module};
pub use function::{ExceptionHandler, Function, FunctionKind};
pub use instruction::{Instruction, InstructionSink};
pub use member::{Member, MemberKind, RecordSchema};
pub use module::Module;
pub use op::{valid_opcode, Op, OP_COUNT};
pub use reader::{BytecodeReader, DecodeError};
pub use verify::{verify_module, VerifyError};
