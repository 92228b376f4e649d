use thiserror::Error;

/// Error produced by checked reads from a [`BinaryReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    /// A read past the end of the underlying buffer was attempted.
    #[error("out of bounds read of {requested} bytes with {remaining} remaining")]
    OutOfBounds {
        /// Bytes the failed read asked for.
        requested: usize,
        /// Bytes that were actually left.
        remaining: usize,
    },
}

/// Appends big-endian primitives to a byte buffer.
///
/// Fixed-width slots written earlier can be patched in place via the
/// `overwrite_*` family; `pos` before the write yields the slot position.
#[derive(Debug)]
pub struct BinaryWriter<'a> {
    out: &'a mut Vec<u8>,
}

macro_rules! emit_fns {
    ($($emit:ident, $overwrite:ident, $t:ty;)*) => {
        $(
            #[doc = concat!("Appends a big-endian `", stringify!($t), "`.")]
            pub fn $emit(&mut self, value: $t) {
                self.out.extend_from_slice(&value.to_be_bytes());
            }

            #[doc = concat!("Patches the `", stringify!($t), "` slot at `pos`.")]
            ///
            /// # Panics
            ///
            /// Panics if the slot is not entirely inside the written bytes.
            pub fn $overwrite(&mut self, pos: usize, value: $t) {
                let bytes = value.to_be_bytes();
                let end = pos
                    .checked_add(bytes.len())
                    .filter(|&end| end <= self.out.len())
                    .expect("overwrite out of bounds");
                self.out[pos..end].copy_from_slice(&bytes);
            }
        )*
    };
}

impl<'a> BinaryWriter<'a> {
    /// Creates a writer that appends to `out`.
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Self { out }
    }

    /// Current byte offset, where the next write will take place.
    pub fn pos(&self) -> usize {
        self.out.len()
    }

    emit_fns! {
        emit_u8, overwrite_u8, u8;
        emit_u16, overwrite_u16, u16;
        emit_u32, overwrite_u32, u32;
        emit_u64, overwrite_u64, u64;
        emit_i8, overwrite_i8, i8;
        emit_i16, overwrite_i16, i16;
        emit_i32, overwrite_i32, i32;
        emit_i64, overwrite_i64, i64;
    }

    /// Appends an `f64` as its big-endian bit pattern.
    pub fn emit_f64(&mut self, value: f64) {
        self.emit_u64(value.to_bits());
    }

    /// Patches the `f64` slot at `pos`.
    pub fn overwrite_f64(&mut self, pos: usize, value: f64) {
        self.overwrite_u64(pos, value.to_bits());
    }
}

/// Checked cursor over a byte slice reading big-endian primitives.
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

macro_rules! read_fns {
    ($($read:ident, $t:ty;)*) => {
        $(
            #[doc = concat!("Reads a big-endian `", stringify!($t), "`.")]
            pub fn $read(&mut self) -> Result<$t, ReadError> {
                const SIZE: usize = core::mem::size_of::<$t>();
                let bytes = self.take(SIZE)?;
                let mut buf = [0u8; SIZE];
                buf.copy_from_slice(bytes);
                Ok(<$t>::from_be_bytes(buf))
            }
        )*
    };
}

impl<'a> BinaryReader<'a> {
    /// Creates a reader over `data`, positioned at the start.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Total number of bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        if self.remaining() < len {
            return Err(ReadError::OutOfBounds {
                requested: len,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    read_fns! {
        read_u8, u8;
        read_u16, u16;
        read_u32, u32;
        read_u64, u64;
        read_i8, i8;
        read_i16, i16;
        read_i32, i32;
        read_i64, i64;
    }

    /// Reads an `f64` from its big-endian bit pattern.
    pub fn read_f64(&mut self) -> Result<f64, ReadError> {
        self.read_u64().map(f64::from_bits)
    }
}
