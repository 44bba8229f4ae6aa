use super::{Instruction, Op};

/// Serializes [`Instruction`]s into a flat byte stream.
///
/// Every instruction is its opcode byte followed by fixed-width
/// little-endian operands, in the order documented on [`Op`].
pub struct BytecodeEncoder {
    buf: Vec<u8>,
}

impl BytecodeEncoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Current byte offset in the bytecode stream.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn emit_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    fn emit_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    fn emit_op(&mut self, op: Op) {
        self.buf.push(op as u8);
    }

    fn emit_regs(&mut self, regs: &[u8]) {
        self.buf.extend_from_slice(regs);
    }

    pub fn encode(&mut self, instruction: &Instruction) {
        self.emit_op(instruction.op());

        match *instruction {
            Instruction::Line { line } => self.emit_u32(line),
            Instruction::Load { target, idx } => {
                self.emit_u8(target);
                self.emit_u32(idx);
            }
            Instruction::LoadInt { target, value } => {
                self.emit_u8(target);
                self.emit_i64(value);
            }
            Instruction::LoadFloat { target, value } => {
                self.emit_u8(target);
                self.emit_f64(value);
            }
            Instruction::LoadBool { target, value } => {
                self.emit_u8(target);
                self.emit_bool(value);
            }
            Instruction::LoadSmallString { target, value } => {
                self.emit_u8(target);
                let bytes = value.as_str().as_bytes();
                self.emit_u8(bytes.len() as u8);
                let mut padded = [0u8; crate::SMALL_STRING_CAPACITY];
                padded[..bytes.len()].copy_from_slice(bytes);
                self.buf.extend_from_slice(&padded);
            }
            Instruction::LoadNull { target }
            | Instruction::LoadNone { target }
            | Instruction::LoadRoot { target }
            | Instruction::GetBase { target } => self.emit_u8(target),
            Instruction::LoadNulls { target, count } => self.emit_regs(&[target, count]),
            Instruction::Move { target, src }
            | Instruction::Not { target, src }
            | Instruction::TypeOf { target, src }
            | Instruction::TypeId { target, src }
            | Instruction::Clone { target, src } => self.emit_regs(&[target, src]),

            Instruction::Get {
                target,
                table,
                key,
                flags,
            } => self.emit_regs(&[target, table, key, flags.0]),
            Instruction::Set { table, key, value }
            | Instruction::NewSlot { table, key, value }
            | Instruction::NewEnumSlot { table, key, value } => self.emit_regs(&[table, key, value]),
            Instruction::GetCapture { target, idx } => {
                self.emit_u8(target);
                self.emit_u32(idx);
            }
            Instruction::SetCapture { idx, src } => {
                self.emit_u32(idx);
                self.emit_u8(src);
            }

            Instruction::Add { target, lhs, rhs }
            | Instruction::Sub { target, lhs, rhs }
            | Instruction::Mul { target, lhs, rhs }
            | Instruction::Div { target, lhs, rhs }
            | Instruction::Mod { target, lhs, rhs }
            | Instruction::Exp { target, lhs, rhs }
            | Instruction::BitwiseOr { target, lhs, rhs }
            | Instruction::BitwiseAnd { target, lhs, rhs }
            | Instruction::BitwiseXor { target, lhs, rhs }
            | Instruction::LShift { target, lhs, rhs }
            | Instruction::RShift { target, lhs, rhs }
            | Instruction::Eq { target, lhs, rhs }
            | Instruction::Ne { target, lhs, rhs } => self.emit_regs(&[target, lhs, rhs]),

            Instruction::AddEq { target, rhs }
            | Instruction::SubEq { target, rhs }
            | Instruction::MulEq { target, rhs }
            | Instruction::DivEq { target, rhs }
            | Instruction::ModEq { target, rhs }
            | Instruction::ExpEq { target, rhs } => self.emit_regs(&[target, rhs]),

            Instruction::Cmp {
                target,
                op,
                lhs,
                rhs,
            } => self.emit_regs(&[target, op.into(), lhs, rhs]),

            Instruction::And { target, src, offset }
            | Instruction::Or { target, src, offset }
            | Instruction::IfNull { target, src, offset } => {
                self.emit_regs(&[target, src]);
                self.emit_i32(offset);
            }
            Instruction::Exists { target, table, key } => self.emit_regs(&[target, table, key]),

            Instruction::Incr { target, src, is_incr } | Instruction::PIncr { target, src, is_incr } => {
                self.emit_regs(&[target, src]);
                self.emit_bool(is_incr);
            }
            Instruction::PObjIncr {
                target,
                table,
                key,
                is_incr,
            } => {
                self.emit_regs(&[target, table, key]);
                self.emit_bool(is_incr);
            }

            Instruction::Jmp { offset } => self.emit_i32(offset),
            Instruction::Jz { src, offset } => {
                self.emit_u8(src);
                self.emit_i32(offset);
            }

            Instruction::Call {
                target,
                callee,
                n_params,
                stack_base,
            } => self.emit_regs(&[target, callee, n_params, stack_base]),
            Instruction::Return { src, has_value } => {
                self.emit_u8(src);
                self.emit_bool(has_value);
            }
            Instruction::NewClosure { target, fct_idx } => {
                self.emit_u8(target);
                self.emit_u32(fct_idx);
            }
            Instruction::NewObj { target, kind } => self.emit_regs(&[target, kind.into()]),

            Instruction::ArrayAppend { array, value } => self.emit_regs(&[array, value]),
            Instruction::NewClassSlot {
                class,
                key,
                value,
                is_static,
            } => {
                self.emit_regs(&[class, key, value]);
                self.emit_bool(is_static);
            }
            Instruction::NewStructSlot {
                strct,
                key,
                value,
                has_value,
                mask,
                flags,
            } => {
                self.emit_regs(&[strct, key, value]);
                self.emit_bool(has_value);
                self.emit_u32(mask.0);
                self.emit_u8(flags.0);
            }
            Instruction::NewStructMethod { strct, key, value } => self.emit_regs(&[strct, key, value]),
            Instruction::NewStructConstructor { strct, value } => self.emit_regs(&[strct, value]),
            Instruction::SetStructName { strct, name } => self.emit_regs(&[strct, name]),
            Instruction::CloseEnum { table } => self.emit_u8(table),

            Instruction::CheckType { src, kind } => self.emit_regs(&[src, kind.into()]),
            Instruction::CheckTypeMask { src, mask } => {
                self.emit_u8(src);
                self.emit_u32(mask.0);
            }
        }
    }
}

impl Default for BytecodeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes a whole instruction stream.
pub fn encode_all(instructions: &[Instruction]) -> Vec<u8> {
    let mut encoder = BytecodeEncoder::with_capacity(instructions.len() * 4);
    for instruction in instructions {
        encoder.encode(instruction);
    }
    encoder.into_bytes()
}
