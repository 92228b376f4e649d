use core::fmt;

use crate::macros::{operand_is_member, operand_is_offset, operand_len, vela_instruction_set};

macro_rules! define_op {
    ($( $(#[$attr:meta])* $name:ident = $tag:literal { $( $field:ident : $kind:ident ),* $(,)? } ),* $(,)?) => {
        /// The opcode of a bytecode instruction.
        ///
        /// Tags are assigned sequentially starting at 1, so the valid range
        /// is contiguous and `0` never decodes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(u8)]
        pub enum Op {
            $(
                $(#[$attr])*
                $name = $tag,
            )*
        }

        /// Number of defined opcodes.
        pub const OP_COUNT: u8 = 0 $( + { let _ = $tag; 1 } )*;

        impl Op {
            /// The instruction mnemonic.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name), )*
                }
            }

            /// Number of operand bytes following the one-byte tag.
            pub const fn operand_bytes(self) -> usize {
                match self {
                    $( Self::$name => 0 $( + operand_len!($kind) )*, )*
                }
            }

            /// True if instructions with this opcode contain a jump target.
            pub const fn references_offset(self) -> bool {
                match self {
                    $( Self::$name => false $( || operand_is_offset!($kind) )*, )*
                }
            }

            /// True if instructions with this opcode reference a module
            /// member and therefore need link-time patching.
            pub const fn references_module(self) -> bool {
                match self {
                    $( Self::$name => false $( || operand_is_member!($kind) )*, )*
                }
            }

            /// Converts a raw tag into an opcode.
            pub const fn from_u8(raw: u8) -> Option<Self> {
                match raw {
                    $( $tag => Some(Self::$name), )*
                    _ => None,
                }
            }
        }
    };
}

vela_instruction_set!(define_op);

impl Op {
    /// True for instructions past which control cannot fall through in
    /// straight-line order. Every verified function ends with one of these.
    pub const fn is_halting(self) -> bool {
        matches!(self, Op::Return | Op::Rethrow | Op::Jmp | Op::AssertFail)
    }
}

/// Returns true if `raw` is in the range of valid opcode tags.
pub const fn valid_opcode(raw: u8) -> bool {
    1 <= raw && raw <= OP_COUNT
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_sequential_from_one() {
        for tag in 1..=OP_COUNT {
            let op = Op::from_u8(tag).expect("tag must decode");
            assert_eq!(op as u8, tag);
        }
        assert!(Op::from_u8(0).is_none());
        assert!(Op::from_u8(OP_COUNT + 1).is_none());

        assert!(!valid_opcode(0));
        assert!(valid_opcode(1));
        assert!(valid_opcode(OP_COUNT));
        assert!(!valid_opcode(OP_COUNT + 1));
    }

    #[test]
    fn operand_widths() {
        assert_eq!(Op::LoadNull.operand_bytes(), 4);
        assert_eq!(Op::LoadInt.operand_bytes(), 12);
        assert_eq!(Op::LoadFloat.operand_bytes(), 12);
        assert_eq!(Op::LoadMethod.operand_bytes(), 16);
        assert_eq!(Op::Pop.operand_bytes(), 0);
        assert_eq!(Op::Rethrow.operand_bytes(), 0);
    }

    #[test]
    fn jump_and_member_predicates() {
        for op in [Op::Jmp, Op::JmpTrue, Op::JmpFalse, Op::JmpNull, Op::JmpNotNull] {
            assert!(op.references_offset(), "{op} must be a jump");
        }
        for op in [
            Op::LoadModule,
            Op::StoreModule,
            Op::LoadMember,
            Op::StoreMember,
            Op::Closure,
            Op::Record,
            Op::LoadMethod,
        ] {
            assert!(op.references_module(), "{op} must reference the module");
        }
        assert!(!Op::Add.references_offset());
        assert!(!Op::Add.references_module());
    }

    #[test]
    fn halting_set() {
        assert!(Op::Return.is_halting());
        assert!(Op::Rethrow.is_halting());
        assert!(Op::Jmp.is_halting());
        assert!(Op::AssertFail.is_halting());
        assert!(!Op::JmpTrue.is_halting());
        assert!(!Op::Call.is_halting());
    }
}
