use core::fmt;

/// Defines a dense `u32` index newtype.
///
/// The generated types deliberately do not convert into each other; mixing
/// up id families is a compile error. `INVALID` is the serialized
/// placeholder value for slots that are patched later (label targets,
/// unlinked member references).
#[macro_export]
macro_rules! id_type {
    ($(#[$attr:meta])* $i:ident) => {
        $(#[$attr])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(transparent)]
        pub struct $i(u32);

        impl $i {
            /// Placeholder written into unpatched serialized slots.
            pub const INVALID: Self = Self(u32::MAX);

            /// Id constructor.
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Convert to array of big endian bytes.
            pub const fn to_bytes(self) -> [u8; 4] {
                self.0.to_be_bytes()
            }

            /// Convert to usize.
            pub const fn to_usize(self) -> usize {
                self.0 as usize
            }

            /// The raw index value.
            pub const fn to_u32(self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $i {
            fn from(index: u32) -> Self {
                Self(index)
            }
        }

        impl From<$i> for u32 {
            fn from(id: $i) -> u32 {
                id.0
            }
        }

        impl From<$i> for usize {
            fn from(id: $i) -> usize {
                id.0 as usize
            }
        }

        impl core::fmt::Display for $i {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_type!(
    /// Index of a member in a bytecode module.
    MemberId
);

id_type!(
    /// Index of a compiled function in a bytecode module.
    FunctionId
);

id_type!(
    /// Index of a record schema in a bytecode module.
    RecordSchemaId
);

id_type!(
    /// Physical local slot of a function (a "register" of the VM).
    Register
);

id_type!(
    /// Parameter slot of a function.
    Param
);

id_type!(
    /// Byte offset into a function's code.
    Offset
);

impl Register {
    /// The register immediately following this one. Multi-register values
    /// occupy contiguous slots.
    pub const fn successor(self) -> Register {
        Register::new(self.0 + 1)
    }
}

impl fmt::LowerHex for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
