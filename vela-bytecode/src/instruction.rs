use core::fmt;

use vela_types::{BinaryReader, BinaryWriter, ReadError};

use crate::macros::{read_operand, sink_operand, vela_instruction_set};
use crate::{MemberId, Offset, Op, Param, Register};

/// Receiver for the serialized parts of one instruction, in declaration
/// order.
///
/// The plain implementation writes every part verbatim; the code generator's
/// function writer intercepts `offset` and `member` operands to record
/// patch sites.
pub trait InstructionSink {
    /// Receives the opcode tag.
    fn op(&mut self, op: Op);
    /// Receives a register operand.
    fn reg(&mut self, value: Register);
    /// Receives a parameter operand.
    fn param(&mut self, value: Param);
    /// Receives a module member operand.
    fn member(&mut self, value: MemberId);
    /// Receives a code offset operand.
    fn offset(&mut self, value: Offset);
    /// Receives a plain count/index operand.
    fn uint(&mut self, value: u32);
    /// Receives an integer constant operand.
    fn int(&mut self, value: i64);
    /// Receives a float constant operand.
    fn float(&mut self, value: f64);
}

macro_rules! define_instruction {
    ($( $(#[$attr:meta])* $name:ident = $tag:literal { $( $field:ident : $kind:ident ),* $(,)? } ),* $(,)?) => {
        /// A decoded bytecode instruction.
        ///
        /// Operands are serialized in field declaration order, big-endian,
        /// preceded by the one-byte opcode tag.
        #[derive(Debug, Clone, Copy, PartialEq)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum Instruction {
            $(
                $(#[$attr])*
                $name {
                    $(
                        #[doc = concat!("The `", stringify!($field), "` operand.")]
                        $field: $crate::macros::operand_ty!($kind),
                    )*
                },
            )*
        }

        impl Instruction {
            /// The instruction's opcode.
            pub const fn op(&self) -> Op {
                match self {
                    $( Self::$name { .. } => Op::$name, )*
                }
            }

            /// Feeds the opcode and every operand to `sink` in declaration
            /// order.
            pub fn encode<S: InstructionSink>(&self, sink: &mut S) {
                match self {
                    $(
                        Self::$name { $( $field, )* } => {
                            sink.op(Op::$name);
                            $( sink_operand!(sink, $kind, *$field); )*
                        }
                    )*
                }
            }

            /// Reads the operands of `op` from `reader`. The caller has
            /// already consumed the opcode tag and checked the remaining
            /// byte count.
            pub(crate) fn decode_operands(
                op: Op,
                reader: &mut BinaryReader<'_>,
            ) -> Result<Self, ReadError> {
                Ok(match op {
                    $(
                        Op::$name => Self::$name {
                            $( $field: read_operand!(reader, $kind), )*
                        },
                    )*
                })
            }
        }

        impl fmt::Display for Instruction {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(
                        Self::$name { $( $field, )* } => {
                            f.write_str(Op::$name.mnemonic())?;
                            $( write!(f, " {}", $field)?; )*
                            Ok(())
                        }
                    )*
                }
            }
        }
    };
}

vela_instruction_set!(define_instruction);

struct WriterSink<'w, 'b> {
    writer: &'w mut BinaryWriter<'b>,
}

impl InstructionSink for WriterSink<'_, '_> {
    fn op(&mut self, op: Op) {
        self.writer.emit_u8(op as u8);
    }

    fn reg(&mut self, value: Register) {
        self.writer.emit_u32(value.to_u32());
    }

    fn param(&mut self, value: Param) {
        self.writer.emit_u32(value.to_u32());
    }

    fn member(&mut self, value: MemberId) {
        self.writer.emit_u32(value.to_u32());
    }

    fn offset(&mut self, value: Offset) {
        self.writer.emit_u32(value.to_u32());
    }

    fn uint(&mut self, value: u32) {
        self.writer.emit_u32(value);
    }

    fn int(&mut self, value: i64) {
        self.writer.emit_i64(value);
    }

    fn float(&mut self, value: f64) {
        self.writer.emit_f64(value);
    }
}

impl Instruction {
    /// Appends the instruction's byte encoding to `writer`.
    pub fn encode_to(&self, writer: &mut BinaryWriter<'_>) {
        self.encode(&mut WriterSink { writer });
    }

    /// The instruction's byte encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.op().operand_bytes());
        self.encode_to(&mut BinaryWriter::new(&mut bytes));
        bytes
    }
}
