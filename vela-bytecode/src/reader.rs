use thiserror::Error;
use vela_types::BinaryReader;

use crate::{valid_opcode, Instruction, Op};

/// Error produced while decoding an instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The tag at the instruction boundary is not a valid opcode.
    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),
    /// The code ends in the middle of an instruction's operands.
    #[error("incomplete instruction at end of code")]
    IncompleteInstruction,
    /// The reader is empty at an instruction boundary.
    #[error("end of code")]
    End,
}

/// Decodes bytecode instructions from a byte slice.
///
/// The interpreter uses its own inlined decoding loop; this reader is the
/// general-purpose decoder used by the verifier, the disassembler and
/// tests.
#[derive(Debug, Clone)]
pub struct BytecodeReader<'a> {
    reader: BinaryReader<'a>,
}

impl<'a> BytecodeReader<'a> {
    /// Creates a reader over the given code.
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            reader: BinaryReader::new(code),
        }
    }

    /// Byte offset of the next instruction start.
    pub fn pos(&self) -> usize {
        self.reader.pos()
    }

    /// Number of remaining bytes.
    pub fn remaining(&self) -> usize {
        self.reader.remaining()
    }

    /// Total number of bytes.
    pub fn size(&self) -> usize {
        self.reader.size()
    }

    /// Decodes the next instruction.
    pub fn read(&mut self) -> Result<Instruction, DecodeError> {
        if self.reader.remaining() == 0 {
            return Err(DecodeError::End);
        }

        let raw = self
            .reader
            .read_u8()
            .map_err(|_| DecodeError::IncompleteInstruction)?;
        if !valid_opcode(raw) {
            return Err(DecodeError::InvalidOpcode(raw));
        }
        let op = Op::from_u8(raw).expect("tag was validated");

        if self.reader.remaining() < op.operand_bytes() {
            return Err(DecodeError::IncompleteInstruction);
        }
        Instruction::decode_operands(op, &mut self.reader)
            .map_err(|_| DecodeError::IncompleteInstruction)
    }
}

impl<'a> Iterator for BytecodeReader<'a> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read() {
            Err(DecodeError::End) => None,
            result => Some(result),
        }
    }
}
