use core::fmt;

use crate::{MemberId, Offset};

/// Distinguishes plain functions from ones that capture an environment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FunctionKind {
    /// Callable without an environment.
    #[default]
    Normal,
    /// Requires a closure environment; may use `LoadClosure`.
    Closure,
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FunctionKind::Normal => "Normal",
            FunctionKind::Closure => "Closure",
        })
    }
}

/// One entry in the exception handler table of a function.
///
/// Instructions in `[from, to)` are covered by the handler starting at
/// `target`. All three offsets point at instruction starts, except that
/// `to` may equal the code length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExceptionHandler {
    /// Start of the covered range (inclusive).
    pub from: Offset,
    /// End of the covered range (exclusive).
    pub to: Offset,
    /// Entry offset of the handler.
    pub target: Offset,
}

impl ExceptionHandler {
    /// Handler entry constructor.
    pub const fn new(from: Offset, to: Offset, target: Offset) -> Self {
        Self { from, to, target }
    }
}

/// A function compiled to bytecode.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Function {
    name: Option<MemberId>,
    kind: FunctionKind,
    params: u32,
    locals: u32,
    code: Vec<u8>,
    handlers: Vec<ExceptionHandler>,
}

impl Function {
    /// Creates an empty function of the given kind.
    pub fn new(kind: FunctionKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Name member (a `String`), absent for anonymous functions.
    pub fn name(&self) -> Option<MemberId> {
        self.name
    }

    /// Sets the name member.
    pub fn set_name(&mut self, name: Option<MemberId>) {
        self.name = name;
    }

    /// The function kind.
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// Sets the function kind.
    pub fn set_kind(&mut self, kind: FunctionKind) {
        self.kind = kind;
    }

    /// Number of parameters.
    pub fn params(&self) -> u32 {
        self.params
    }

    /// Sets the number of parameters.
    pub fn set_params(&mut self, count: u32) {
        self.params = count;
    }

    /// Number of local register slots.
    pub fn locals(&self) -> u32 {
        self.locals
    }

    /// Sets the number of local register slots.
    pub fn set_locals(&mut self, count: u32) {
        self.locals = count;
    }

    /// The encoded instruction stream.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Mutable access to the instruction stream, used during emission and
    /// link-time patching.
    pub fn code_mut(&mut self) -> &mut Vec<u8> {
        &mut self.code
    }

    /// The exception handler table, ordered by `from`.
    pub fn handlers(&self) -> &[ExceptionHandler] {
        &self.handlers
    }

    /// Mutable access to the exception handler table.
    pub fn handlers_mut(&mut self) -> &mut Vec<ExceptionHandler> {
        &mut self.handlers
    }
}
