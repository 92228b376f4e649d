//! Atomic types shared by the Vela bytecode toolchain.
//!
//! Everything above this crate (instruction set, module model, code
//! generation) speaks in terms of the id newtypes, the interned string
//! table and the big-endian binary cursors defined here.

#![warn(missing_docs)]

mod binary;
mod ids;
mod strings;

pub use binary::{BinaryReader, BinaryWriter, ReadError};
pub use ids::{FunctionId, MemberId, Offset, Param, RecordSchemaId, Register};
pub use strings::{Str, StringTable};
