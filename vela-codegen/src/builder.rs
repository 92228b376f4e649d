//! Linear bytecode emission with label and handler tracking.

use vela_bytecode::{ExceptionHandler, Instruction, InstructionSink, Op};
use vela_types::{id_type, BinaryWriter, MemberId, Offset, Param, Register};

id_type!(
    /// A jump target local to one function's emission, resolved to a code
    /// offset when the writer finishes. Lowering uses one label per basic
    /// block.
    Label
);

/// Byte positions inside a function's code that reference module members,
/// together with the referenced member. The linker patches these slots.
pub type ModuleRefs = Vec<(u32, MemberId)>;

/// Emits the bytecode of a single function.
///
/// Offset operands are written as labels: [`FunctionWriter::use_label`]
/// wraps a label for embedding into an instruction, the writer emits a
/// placeholder and patches every referencing slot in
/// [`FunctionWriter::finish`]. Member operands likewise emit placeholders
/// and are collected for the linker.
#[derive(Debug)]
pub struct FunctionWriter {
    code: Vec<u8>,

    // Code position at which each label was defined.
    label_defs: Vec<Option<u32>>,
    // (position of the 4-byte slot, referenced label), patched at finish.
    label_refs: Vec<(u32, Label)>,
    // (position of the 4-byte slot, referenced member), patched at link.
    module_refs: ModuleRefs,

    // Raw handler regions; targets become offsets at finish.
    handlers: Vec<(u32, u32, Label)>,
    // Currently active handler and the position its region started at.
    handler: Option<Label>,
    handler_start: u32,
}

impl FunctionWriter {
    /// Creates a writer for a function using `label_count` labels.
    pub fn new(label_count: usize) -> Self {
        Self {
            code: Vec::new(),
            label_defs: vec![None; label_count],
            label_refs: Vec::new(),
            module_refs: Vec::new(),
            handlers: Vec::new(),
            handler: None,
            handler_start: 0,
        }
    }

    /// Current byte position.
    pub fn pos(&self) -> u32 {
        self.code.len() as u32
    }

    /// Wraps a label as an offset operand. The encoded value is a
    /// placeholder until [`finish`](Self::finish) patches it.
    pub fn use_label(&self, label: Label) -> Offset {
        Offset::new(label.to_u32())
    }

    /// Binds `label` to the current position.
    ///
    /// # Panics
    ///
    /// Panics if the label was already defined.
    pub fn define_label(&mut self, label: Label) {
        let pos = self.pos();
        let slot = &mut self.label_defs[label.to_usize()];
        assert!(slot.is_none(), "label was already defined");
        *slot = Some(pos);
    }

    /// Marks the current position as the start of a region covered by the
    /// handler starting at `handler`, or by no handler for `None`. A
    /// repeated call with the current handler is a no-op; otherwise the
    /// previous region is closed (if non-empty) and a new one begins.
    pub fn start_handler(&mut self, handler: Option<Label>) {
        if handler == self.handler {
            return;
        }
        self.finish_handler();
        self.handler = handler;
        self.handler_start = self.pos();
    }

    /// Emits one instruction.
    pub fn emit(&mut self, instruction: &Instruction) {
        instruction.encode(self);
    }

    /// Completes emission: patches every label reference, resolves the
    /// handler table and simplifies it.
    ///
    /// Returns the final code, the handler table and the module reference
    /// patch sites.
    ///
    /// # Panics
    ///
    /// Panics if a referenced label was never defined.
    pub fn finish(mut self) -> (Vec<u8>, Vec<ExceptionHandler>, ModuleRefs) {
        self.finish_handler();

        let resolve = |label_defs: &[Option<u32>], label: Label| -> u32 {
            label_defs[label.to_usize()].expect("label was never defined")
        };

        let mut writer = BinaryWriter::new(&mut self.code);
        for &(pos, label) in &self.label_refs {
            let target = resolve(&self.label_defs, label);
            writer.overwrite_u32(pos as usize, target);
        }

        let mut handlers: Vec<ExceptionHandler> = self
            .handlers
            .iter()
            .map(|&(from, to, target)| {
                ExceptionHandler::new(
                    Offset::new(from),
                    Offset::new(to),
                    Offset::new(resolve(&self.label_defs, target)),
                )
            })
            .collect();
        simplify_handlers(&mut handlers);

        (self.code, handlers, self.module_refs)
    }

    fn finish_handler(&mut self) {
        let pos = self.pos();
        if let Some(handler) = self.handler {
            if self.handler_start != pos {
                self.handlers.push((self.handler_start, pos, handler));
            }
        }
        self.handler = None;
        self.handler_start = 0;
    }

    fn emit_u32(&mut self, value: u32) {
        BinaryWriter::new(&mut self.code).emit_u32(value);
    }
}

impl InstructionSink for FunctionWriter {
    fn op(&mut self, op: Op) {
        BinaryWriter::new(&mut self.code).emit_u8(op as u8);
    }

    fn reg(&mut self, value: Register) {
        debug_assert_ne!(value, Register::INVALID, "invalid register operand");
        self.emit_u32(value.to_u32());
    }

    fn param(&mut self, value: Param) {
        debug_assert_ne!(value, Param::INVALID, "invalid parameter operand");
        self.emit_u32(value.to_u32());
    }

    fn member(&mut self, value: MemberId) {
        debug_assert_ne!(value, MemberId::INVALID, "invalid member operand");
        self.module_refs.push((self.pos(), value));
        self.emit_u32(MemberId::INVALID.to_u32());
    }

    fn offset(&mut self, value: Offset) {
        debug_assert_ne!(value, Offset::INVALID, "invalid label operand");
        let label = Label::new(value.to_u32());
        self.label_refs.push((self.pos(), label));
        self.emit_u32(Offset::INVALID.to_u32());
    }

    fn uint(&mut self, value: u32) {
        self.emit_u32(value);
    }

    fn int(&mut self, value: i64) {
        BinaryWriter::new(&mut self.code).emit_i64(value);
    }

    fn float(&mut self, value: f64) {
        BinaryWriter::new(&mut self.code).emit_f64(value);
    }
}

/// Merges adjacent handler entries with the same target whose regions
/// abut. Empty blocks between two regions of one handler produce such
/// fragments.
fn simplify_handlers(handlers: &mut Vec<ExceptionHandler>) {
    let mut out = 0;
    for i in 1..handlers.len() {
        let current = handlers[i];
        if current.from == handlers[out].to && current.target == handlers[out].target {
            handlers[out].to = current.to;
        } else {
            out += 1;
            handlers[out] = current;
        }
    }
    handlers.truncate(if handlers.is_empty() { 0 } else { out + 1 });
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_bytecode::BytecodeReader;

    fn reg(index: u32) -> Register {
        Register::new(index)
    }

    #[test]
    fn forward_jumps_are_patched() {
        let mut writer = FunctionWriter::new(2);
        let start = Label::new(0);
        let end = Label::new(1);

        writer.define_label(start);
        writer.emit(&Instruction::Jmp {
            offset: writer.use_label(end),
        });
        writer.emit(&Instruction::LoadNull { target: reg(0) });
        writer.define_label(end);
        writer.emit(&Instruction::Return { value: reg(0) });

        let (code, handlers, refs) = writer.finish();
        assert!(handlers.is_empty());
        assert!(refs.is_empty());

        let decoded: Vec<_> = BytecodeReader::new(&code).map(Result::unwrap).collect();
        assert_eq!(
            decoded[0],
            Instruction::Jmp {
                offset: Offset::new(10),
            }
        );
    }

    #[test]
    #[should_panic(expected = "label was never defined")]
    fn undefined_labels_are_rejected() {
        let mut writer = FunctionWriter::new(1);
        writer.emit(&Instruction::Jmp {
            offset: writer.use_label(Label::new(0)),
        });
        let _ = writer.finish();
    }

    #[test]
    fn member_operands_become_patch_sites() {
        let mut writer = FunctionWriter::new(0);
        writer.emit(&Instruction::LoadModule {
            source: MemberId::new(17),
            target: reg(0),
        });
        writer.emit(&Instruction::Return { value: reg(0) });

        let (code, _, refs) = writer.finish();
        assert_eq!(refs, vec![(1, MemberId::new(17))]);
        // The emitted slot holds the placeholder until the linker patches
        // it.
        assert_eq!(&code[1..5], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn handler_regions_are_recorded_and_merged() {
        let mut writer = FunctionWriter::new(3);
        let outer = Label::new(2);
        let inner = Label::new(1);

        // The inner region stays empty, so the two abutting outer regions
        // collapse into one entry.
        writer.start_handler(Some(outer));
        writer.emit(&Instruction::LoadNull { target: reg(0) });
        writer.start_handler(Some(inner));
        writer.start_handler(Some(outer));
        writer.emit(&Instruction::LoadTrue { target: reg(1) });
        writer.start_handler(None);
        writer.emit(&Instruction::LoadFalse { target: reg(2) });
        writer.define_label(inner);
        writer.define_label(outer);
        writer.emit(&Instruction::Return { value: reg(0) });

        let (code, handlers, _) = writer.finish();
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].from, Offset::new(0));
        assert_eq!(handlers[0].to, Offset::new(10));
        assert_eq!(handlers[0].target, Offset::new(15));
        assert!(handlers[0].to.to_u32() < code.len() as u32);
    }

    #[test]
    fn abutting_regions_with_distinct_targets_stay_separate() {
        let mut writer = FunctionWriter::new(2);
        let first = Label::new(0);
        let second = Label::new(1);

        writer.start_handler(Some(first));
        writer.emit(&Instruction::LoadNull { target: reg(0) });
        writer.start_handler(Some(second));
        writer.emit(&Instruction::LoadTrue { target: reg(1) });
        writer.start_handler(None);
        writer.define_label(first);
        writer.emit(&Instruction::Pop {});
        writer.define_label(second);
        writer.emit(&Instruction::Return { value: reg(0) });

        let (_, handlers, _) = writer.finish();
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].to, handlers[1].from);
        assert_ne!(handlers[0].target, handlers[1].target);
    }

    #[test]
    fn empty_handler_regions_vanish() {
        let mut writer = FunctionWriter::new(1);
        let handler = Label::new(0);

        // Opened and replaced without emitting anything in between.
        writer.start_handler(Some(handler));
        writer.start_handler(None);
        writer.define_label(handler);
        writer.emit(&Instruction::Return { value: reg(0) });

        let (_, handlers, _) = writer.finish();
        assert!(handlers.is_empty());
    }
}
