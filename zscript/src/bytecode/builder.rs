use crate::{ObjectType, SmallString, TypeMask, VarDeclFlags};

use super::{CompareOp, GetFlags, Instruction, Reg};

/// A forward jump whose offset has not yet been resolved.
///
/// Created by the branching emitters ([`BytecodeBuilder::jump`],
/// [`BytecodeBuilder::jump_if_zero`], ...). Resolve it with
/// [`BytecodeBuilder::bind`].
#[derive(Debug)]
#[must_use = "an unbound label leaves a jump to itself"]
pub struct Label {
    /// Index of the jumping instruction.
    index: usize,
}

/// Builds an instruction stream for a [`FunctionPrototype`].
///
/// Jump offsets are relative to the jumping instruction, so a label bound
/// right after its jump resolves to `+1`.
///
/// [`FunctionPrototype`]: crate::FunctionPrototype
pub struct BytecodeBuilder {
    code: Vec<Instruction>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self { code: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            code: Vec::with_capacity(capacity),
        }
    }

    /// Index the next instruction will have.
    pub fn current_index(&self) -> usize {
        self.code.len()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.code
    }

    pub fn finish(self) -> Vec<Instruction> {
        self.code
    }

    pub fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    // ── loads ──────────────────────────────────────────────────────

    pub fn line(&mut self, line: u32) {
        self.emit(Instruction::Line { line });
    }

    /// `Load` from the literal pool.
    pub fn load(&mut self, target: Reg, idx: u32) {
        self.emit(Instruction::Load { target, idx });
    }

    pub fn load_int(&mut self, target: Reg, value: i64) {
        self.emit(Instruction::LoadInt { target, value });
    }

    pub fn load_float(&mut self, target: Reg, value: f64) {
        self.emit(Instruction::LoadFloat { target, value });
    }

    pub fn load_bool(&mut self, target: Reg, value: bool) {
        self.emit(Instruction::LoadBool { target, value });
    }

    /// Emits `LoadSmallString`, or returns `false` when `text` does not fit
    /// inline and belongs in the literal pool instead.
    pub fn load_small_string(&mut self, target: Reg, text: &str) -> bool {
        match SmallString::new(text) {
            Some(value) => {
                self.emit(Instruction::LoadSmallString { target, value });
                true
            }
            None => false,
        }
    }

    pub fn load_null(&mut self, target: Reg) {
        self.emit(Instruction::LoadNull { target });
    }

    pub fn load_nulls(&mut self, target: Reg, count: u8) {
        self.emit(Instruction::LoadNulls { target, count });
    }

    pub fn load_none(&mut self, target: Reg) {
        self.emit(Instruction::LoadNone { target });
    }

    pub fn load_root(&mut self, target: Reg) {
        self.emit(Instruction::LoadRoot { target });
    }

    pub fn mov(&mut self, target: Reg, src: Reg) {
        self.emit(Instruction::Move { target, src });
    }

    // ── keyed access ───────────────────────────────────────────────

    pub fn get(&mut self, target: Reg, table: Reg, key: Reg) {
        self.emit(Instruction::Get {
            target,
            table,
            key,
            flags: GetFlags::NONE,
        });
    }

    /// `Get` that falls back to the root table when the key is missing.
    pub fn get_or_root(&mut self, target: Reg, table: Reg, key: Reg) {
        self.emit(Instruction::Get {
            target,
            table,
            key,
            flags: GetFlags::LOOK_IN_ROOT,
        });
    }

    pub fn set(&mut self, table: Reg, key: Reg, value: Reg) {
        self.emit(Instruction::Set { table, key, value });
    }

    pub fn get_capture(&mut self, target: Reg, idx: u32) {
        self.emit(Instruction::GetCapture { target, idx });
    }

    pub fn set_capture(&mut self, idx: u32, src: Reg) {
        self.emit(Instruction::SetCapture { idx, src });
    }

    // ── arithmetic and comparison ──────────────────────────────────

    pub fn add(&mut self, target: Reg, lhs: Reg, rhs: Reg) {
        self.emit(Instruction::Add { target, lhs, rhs });
    }

    pub fn sub(&mut self, target: Reg, lhs: Reg, rhs: Reg) {
        self.emit(Instruction::Sub { target, lhs, rhs });
    }

    pub fn mul(&mut self, target: Reg, lhs: Reg, rhs: Reg) {
        self.emit(Instruction::Mul { target, lhs, rhs });
    }

    pub fn div(&mut self, target: Reg, lhs: Reg, rhs: Reg) {
        self.emit(Instruction::Div { target, lhs, rhs });
    }

    pub fn add_eq(&mut self, target: Reg, rhs: Reg) {
        self.emit(Instruction::AddEq { target, rhs });
    }

    pub fn cmp(&mut self, target: Reg, op: CompareOp, lhs: Reg, rhs: Reg) {
        self.emit(Instruction::Cmp { target, op, lhs, rhs });
    }

    pub fn eq(&mut self, target: Reg, lhs: Reg, rhs: Reg) {
        self.emit(Instruction::Eq { target, lhs, rhs });
    }

    pub fn not(&mut self, target: Reg, src: Reg) {
        self.emit(Instruction::Not { target, src });
    }

    pub fn incr(&mut self, target: Reg, src: Reg) {
        self.emit(Instruction::Incr {
            target,
            src,
            is_incr: true,
        });
    }

    pub fn pincr(&mut self, target: Reg, src: Reg, is_incr: bool) {
        self.emit(Instruction::PIncr { target, src, is_incr });
    }

    // ── control flow ───────────────────────────────────────────────

    /// Emit an unconditional forward jump. Returns a [`Label`] that must be
    /// resolved later with [`bind`](Self::bind).
    pub fn jump(&mut self) -> Label {
        self.emit_placeholder(Instruction::Jmp { offset: 0 })
    }

    /// Forward jump taken when `src` is falsy.
    pub fn jump_if_zero(&mut self, src: Reg) -> Label {
        self.emit_placeholder(Instruction::Jz { src, offset: 0 })
    }

    /// Short-circuit `and`: stores the truthiness of `src` into `target` and
    /// jumps when it is false.
    pub fn and(&mut self, target: Reg, src: Reg) -> Label {
        self.emit_placeholder(Instruction::And { target, src, offset: 0 })
    }

    pub fn or(&mut self, target: Reg, src: Reg) -> Label {
        self.emit_placeholder(Instruction::Or { target, src, offset: 0 })
    }

    /// Copies `src` into `target` and jumps when it is neither null nor none.
    pub fn if_null(&mut self, target: Reg, src: Reg) -> Label {
        self.emit_placeholder(Instruction::IfNull { target, src, offset: 0 })
    }

    /// Bind a forward jump label to the current position.
    pub fn bind(&mut self, label: Label) {
        let offset = (self.code.len() as isize - label.index as isize) as i32;
        match &mut self.code[label.index] {
            Instruction::Jmp { offset: slot }
            | Instruction::Jz { offset: slot, .. }
            | Instruction::And { offset: slot, .. }
            | Instruction::Or { offset: slot, .. }
            | Instruction::IfNull { offset: slot, .. } => *slot = offset,
            other => unreachable!("label points at non-branch {other}"),
        }
    }

    /// Emit an unconditional backward jump to `target` (an index obtained
    /// from [`current_index`](Self::current_index)).
    pub fn jump_back(&mut self, target: usize) {
        let offset = self.back_offset(target);
        self.emit(Instruction::Jmp { offset });
    }

    /// Backward jump taken when `src` is falsy.
    pub fn jump_back_if_zero(&mut self, src: Reg, target: usize) {
        let offset = self.back_offset(target);
        self.emit(Instruction::Jz { src, offset });
    }

    fn back_offset(&self, target: usize) -> i32 {
        (target as isize - self.code.len() as isize) as i32
    }

    fn emit_placeholder(&mut self, instruction: Instruction) -> Label {
        let index = self.code.len();
        self.emit(instruction);
        Label { index }
    }

    // ── calls and functions ────────────────────────────────────────

    /// Calls `callee` with `n_params` arguments starting at `stack_base`
    /// (the first being `this`) and stores the result in `target`.
    pub fn call(&mut self, target: Reg, callee: Reg, n_params: u8, stack_base: Reg) {
        self.emit(Instruction::Call {
            target,
            callee,
            n_params,
            stack_base,
        });
    }

    pub fn ret(&mut self, src: Reg) {
        self.emit(Instruction::Return { src, has_value: true });
    }

    pub fn ret_null(&mut self) {
        self.emit(Instruction::Return {
            src: 0,
            has_value: false,
        });
    }

    pub fn new_closure(&mut self, target: Reg, fct_idx: u32) {
        self.emit(Instruction::NewClosure { target, fct_idx });
    }

    // ── objects ────────────────────────────────────────────────────

    pub fn new_obj(&mut self, target: Reg, kind: ObjectType) {
        self.emit(Instruction::NewObj { target, kind });
    }

    pub fn new_slot(&mut self, table: Reg, key: Reg, value: Reg) {
        self.emit(Instruction::NewSlot { table, key, value });
    }

    pub fn array_append(&mut self, array: Reg, value: Reg) {
        self.emit(Instruction::ArrayAppend { array, value });
    }

    pub fn new_class_slot(&mut self, class: Reg, key: Reg, value: Reg, is_static: bool) {
        self.emit(Instruction::NewClassSlot {
            class,
            key,
            value,
            is_static,
        });
    }

    /// Declares a struct member. `value` is ignored when `None`.
    pub fn new_struct_slot(
        &mut self,
        strct: Reg,
        key: Reg,
        value: Option<Reg>,
        mask: TypeMask,
        flags: VarDeclFlags,
    ) {
        self.emit(Instruction::NewStructSlot {
            strct,
            key,
            value: value.unwrap_or(0),
            has_value: value.is_some(),
            mask,
            flags,
        });
    }

    pub fn new_enum_slot(&mut self, table: Reg, key: Reg, value: Reg) {
        self.emit(Instruction::NewEnumSlot { table, key, value });
    }

    pub fn close_enum(&mut self, table: Reg) {
        self.emit(Instruction::CloseEnum { table });
    }

    pub fn check_type(&mut self, src: Reg, kind: ObjectType) {
        self.emit(Instruction::CheckType { src, kind });
    }

    pub fn type_of(&mut self, target: Reg, src: Reg) {
        self.emit(Instruction::TypeOf { target, src });
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
