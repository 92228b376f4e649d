//! The instruction-set table.
//!
//! [`vela_instruction_set!`] invokes a callback macro with the complete
//! instruction table, so that the opcode enum, the instruction enum and the
//! codec tables are all generated from the single authoritative listing
//! below. Operand kinds:
//!
//! - `reg` — a local register slot (`u32` on the wire)
//! - `param` — a parameter slot (`u32`)
//! - `member` — a module member reference (`u32`, patched at link time)
//! - `offset` — a code offset (`u32`, patched when labels resolve)
//! - `uint` — a plain `u32` count/index
//! - `int` — an `i64` constant
//! - `float` — an `f64` constant, bit-cast through `u64`
//!
//! Opcode tags are assigned sequentially starting at 1; `0` never encodes a
//! valid instruction.

/// Rust type of an operand kind.
macro_rules! operand_ty {
    (reg) => { $crate::Register };
    (param) => { $crate::Param };
    (member) => { $crate::MemberId };
    (offset) => { $crate::Offset };
    (uint) => { u32 };
    (int) => { i64 };
    (float) => { f64 };
}

/// Serialized width of an operand kind in bytes.
macro_rules! operand_len {
    (reg) => { 4 };
    (param) => { 4 };
    (member) => { 4 };
    (offset) => { 4 };
    (uint) => { 4 };
    (int) => { 8 };
    (float) => { 8 };
}

/// Whether an operand kind is a jump target.
macro_rules! operand_is_offset {
    (offset) => { true };
    ($other:ident) => { false };
}

/// Whether an operand kind references a module member.
macro_rules! operand_is_member {
    (member) => { true };
    ($other:ident) => { false };
}

/// Forwards one operand to the matching [`InstructionSink`] method.
///
/// [`InstructionSink`]: crate::InstructionSink
macro_rules! sink_operand {
    ($sink:expr, reg, $value:expr) => { $sink.reg($value) };
    ($sink:expr, param, $value:expr) => { $sink.param($value) };
    ($sink:expr, member, $value:expr) => { $sink.member($value) };
    ($sink:expr, offset, $value:expr) => { $sink.offset($value) };
    ($sink:expr, uint, $value:expr) => { $sink.uint($value) };
    ($sink:expr, int, $value:expr) => { $sink.int($value) };
    ($sink:expr, float, $value:expr) => { $sink.float($value) };
}

/// Reads one operand from a [`BinaryReader`](vela_types::BinaryReader).
macro_rules! read_operand {
    ($reader:expr, reg) => { $crate::Register::new($reader.read_u32()?) };
    ($reader:expr, param) => { $crate::Param::new($reader.read_u32()?) };
    ($reader:expr, member) => { $crate::MemberId::new($reader.read_u32()?) };
    ($reader:expr, offset) => { $crate::Offset::new($reader.read_u32()?) };
    ($reader:expr, uint) => { $reader.read_u32()? };
    ($reader:expr, int) => { $reader.read_i64()? };
    ($reader:expr, float) => { $reader.read_f64()? };
}

/// Invokes `$callback` with the full instruction table.
macro_rules! vela_instruction_set {
    ($callback:ident) => {
        $callback! {
            /// Loads null into `target`.
            LoadNull = 1 { target: reg },
            /// Loads false into `target`.
            LoadFalse = 2 { target: reg },
            /// Loads true into `target`.
            LoadTrue = 3 { target: reg },
            /// Loads the integer `constant` into `target`.
            LoadInt = 4 { constant: int, target: reg },
            /// Loads the floating point `constant` into `target`.
            LoadFloat = 5 { constant: float, target: reg },
            /// Loads the parameter `source` into `target`.
            LoadParam = 6 { source: param, target: reg },
            /// Stores `source` into the parameter slot `target`.
            StoreParam = 7 { source: reg, target: param },
            /// Loads the module member `source` into `target`.
            LoadModule = 8 { source: member, target: reg },
            /// Stores `source` into the module member `target`.
            StoreModule = 9 { source: reg, target: member },
            /// Loads `object.name` into `target`; `name` must be a symbol member.
            LoadMember = 10 { object: reg, name: member, target: reg },
            /// Stores `source` into `object.name`; `name` must be a symbol member.
            StoreMember = 11 { source: reg, object: reg, name: member },
            /// Loads the tuple element `tuple.index` into `target`.
            LoadTupleMember = 12 { tuple: reg, index: uint, target: reg },
            /// Stores `source` into the tuple element `tuple.index`.
            StoreTupleMember = 13 { source: reg, tuple: reg, index: uint },
            /// Loads `array[index]` into `target`.
            LoadIndex = 14 { array: reg, index: reg, target: reg },
            /// Stores `source` into `array[index]`.
            StoreIndex = 15 { source: reg, array: reg, index: reg },
            /// Loads the function's own closure environment into `target`.
            /// Only valid inside closure functions.
            LoadClosure = 16 { target: reg },
            /// Loads a value from a closure environment. `level` parent links
            /// are followed starting at `env` (0 is `env` itself); `index`
            /// selects the slot in the target environment.
            LoadEnv = 17 { env: reg, level: uint, index: uint, target: reg },
            /// Stores a value into a closure environment slot; the addressing
            /// mirrors `LoadEnv`.
            StoreEnv = 18 { source: reg, env: reg, level: uint, index: uint },
            /// Stores `lhs + rhs` into `target`.
            Add = 19 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs - rhs` into `target`.
            Sub = 20 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs * rhs` into `target`.
            Mul = 21 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs / rhs` into `target`.
            Div = 22 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs % rhs` into `target`.
            Mod = 23 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs ** rhs` into `target`.
            Pow = 24 { lhs: reg, rhs: reg, target: reg },
            /// Stores `+value` into `target`.
            UAdd = 25 { value: reg, target: reg },
            /// Stores `-value` into `target`.
            UNeg = 26 { value: reg, target: reg },
            /// Stores `lhs << rhs` into `target`.
            LSh = 27 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs >> rhs` into `target`.
            RSh = 28 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs & rhs` into `target`.
            BAnd = 29 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs | rhs` into `target`.
            BOr = 30 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs ^ rhs` into `target`.
            BXor = 31 { lhs: reg, rhs: reg, target: reg },
            /// Stores `~value` into `target`.
            BNot = 32 { value: reg, target: reg },
            /// Stores `lhs > rhs` into `target`.
            Gt = 33 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs >= rhs` into `target`.
            Gte = 34 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs < rhs` into `target`.
            Lt = 35 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs <= rhs` into `target`.
            Lte = 36 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs == rhs` into `target`.
            Eq = 37 { lhs: reg, rhs: reg, target: reg },
            /// Stores `lhs != rhs` into `target`.
            NEq = 38 { lhs: reg, rhs: reg, target: reg },
            /// Stores `!value` into `target`.
            LNot = 39 { value: reg, target: reg },
            /// Builds an array from the `count` topmost stack values and
            /// stores it into `target`.
            Array = 40 { count: uint, target: reg },
            /// Builds a tuple from the `count` topmost stack values and
            /// stores it into `target`.
            Tuple = 41 { count: uint, target: reg },
            /// Builds a set from the `count` topmost stack values and stores
            /// it into `target`.
            Set = 42 { count: uint, target: reg },
            /// Builds a map from the `count` topmost stack values and stores
            /// it into `target`. `count` must be even; keys sit at even
            /// stack positions, values at odd ones.
            Map = 43 { count: uint, target: reg },
            /// Builds a closure environment with `size` slots and the given
            /// `parent`, storing it into `target`.
            Env = 44 { parent: reg, size: uint, target: reg },
            /// Builds a closure from the function `template` and the
            /// environment `env`, storing it into `target`. `template` must
            /// reference a closure function member.
            Closure = 45 { template: member, env: reg, target: reg },
            /// Builds an empty record from `template` and stores it into
            /// `target`. `template` must reference a record schema member.
            Record = 46 { template: member, target: reg },
            /// Builds an iterator over `container` and stores it into `target`.
            Iterator = 47 { container: reg, target: reg },
            /// Advances `iterator`, storing whether another element was
            /// produced into `valid` and the element into `value`.
            IteratorNext = 48 { iterator: reg, valid: reg, value: reg },
            /// Builds a new string formatter and stores it into `target`.
            Formatter = 49 { target: reg },
            /// Formats `value` and appends it to `formatter`.
            AppendFormat = 50 { value: reg, formatter: reg },
            /// Stores the string accumulated in `formatter` into `target`.
            FormatResult = 51 { formatter: reg, target: reg },
            /// Copies `source` into `target`.
            Copy = 52 { source: reg, target: reg },
            /// Exchanges the values of `a` and `b`.
            Swap = 53 { a: reg, b: reg },
            /// Pushes `value` onto the stack.
            Push = 54 { value: reg },
            /// Discards the topmost stack value.
            Pop = 55 { },
            /// Removes the topmost stack value and stores it into `target`.
            PopTo = 56 { target: reg },
            /// Jumps to `offset` unconditionally.
            Jmp = 57 { offset: offset },
            /// Jumps to `offset` if `condition` is true.
            JmpTrue = 58 { condition: reg, offset: offset },
            /// Jumps to `offset` if `condition` is false.
            JmpFalse = 59 { condition: reg, offset: offset },
            /// Jumps to `offset` if `condition` is null.
            JmpNull = 60 { condition: reg, offset: offset },
            /// Jumps to `offset` if `condition` is not null.
            JmpNotNull = 61 { condition: reg, offset: offset },
            /// Calls `function` with the `count` topmost stack values as
            /// arguments. The return value replaces them on the stack.
            Call = 62 { function: reg, count: uint },
            /// Resolves the method `name` on `object`. The receiver goes into
            /// `this` (null for functions without a receiver) and the method
            /// handle into `method`; both feed a later `CallMethod`.
            LoadMethod = 63 { object: reg, name: member, this: reg, method: reg },
            /// Calls `method` with the receiver and `count` further arguments
            /// on the stack (`count + 1` pushes in total). The return value
            /// replaces them on the stack.
            CallMethod = 64 { method: reg, count: uint },
            /// Returns `value` to the caller.
            Return = 65 { value: reg },
            /// Re-raises the exception currently being handled.
            Rethrow = 66 { },
            /// Signals an assertion failure and aborts. `expr` holds the
            /// string form of the failed expression, `message` a user message
            /// or null.
            AssertFail = 67 { expr: reg, message: reg },
        }
    };
}

pub(crate) use {
    operand_is_member, operand_is_offset, operand_len, operand_ty, read_operand, sink_operand,
    vela_instruction_set,
};
