use crate::{ErrorCode, ObjectType, Result, SMALL_STRING_CAPACITY, SmallString, TypeMask, VarDeclFlags, error::bail};

use super::{CompareOp, GetFlags, Instruction, Op};

/// Decodes a bytecode byte slice into [`Instruction`]s.
///
/// Every read is bounds checked, malformed input is `invalid`.
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Whether the decoder has reached the end of the bytecode.
    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Decode the next instruction, or `None` at end-of-stream.
    pub fn decode_next(&mut self) -> Result<Option<Instruction>> {
        if self.is_at_end() {
            return Ok(None);
        }

        let start = self.pos;
        let byte = self.read_u8()?;
        let Ok(op) = Op::try_from(byte) else {
            bail!(ErrorCode::Invalid, "unknown opcode {byte:#04x} at offset {start}");
        };
        self.decode_op(op).map(Some)
    }

    fn decode_op(&mut self, op: Op) -> Result<Instruction> {
        let instruction = match op {
            Op::Line => Instruction::Line { line: self.read_u32()? },
            Op::Load => Instruction::Load {
                target: self.read_u8()?,
                idx: self.read_u32()?,
            },
            Op::LoadInt => Instruction::LoadInt {
                target: self.read_u8()?,
                value: self.read_i64()?,
            },
            Op::LoadFloat => Instruction::LoadFloat {
                target: self.read_u8()?,
                value: f64::from_bits(self.read_i64()? as u64),
            },
            Op::LoadBool => Instruction::LoadBool {
                target: self.read_u8()?,
                value: self.read_bool()?,
            },
            Op::LoadSmallString => {
                let target = self.read_u8()?;
                let len = self.read_u8()? as usize;
                let raw = self.read_bytes(SMALL_STRING_CAPACITY)?;
                let value = raw
                    .get(..len)
                    .and_then(|b| core::str::from_utf8(b).ok())
                    .and_then(SmallString::new);
                let Some(value) = value else {
                    bail!(ErrorCode::Invalid, "malformed small string operand");
                };
                Instruction::LoadSmallString { target, value }
            }
            Op::LoadNull => Instruction::LoadNull { target: self.read_u8()? },
            Op::LoadNulls => Instruction::LoadNulls {
                target: self.read_u8()?,
                count: self.read_u8()?,
            },
            Op::LoadNone => Instruction::LoadNone { target: self.read_u8()? },
            Op::LoadRoot => Instruction::LoadRoot { target: self.read_u8()? },
            Op::Move => {
                let [target, src] = self.read_regs()?;
                Instruction::Move { target, src }
            }

            Op::Get => {
                let [target, table, key, flags] = self.read_regs()?;
                Instruction::Get {
                    target,
                    table,
                    key,
                    flags: GetFlags(flags),
                }
            }
            Op::Set => {
                let [table, key, value] = self.read_regs()?;
                Instruction::Set { table, key, value }
            }
            Op::GetCapture => Instruction::GetCapture {
                target: self.read_u8()?,
                idx: self.read_u32()?,
            },
            Op::SetCapture => Instruction::SetCapture {
                idx: self.read_u32()?,
                src: self.read_u8()?,
            },

            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::Exp
            | Op::BitwiseOr
            | Op::BitwiseAnd
            | Op::BitwiseXor
            | Op::LShift
            | Op::RShift
            | Op::Eq
            | Op::Ne => {
                let [target, lhs, rhs] = self.read_regs()?;
                binary(op, target, lhs, rhs)
            }

            Op::AddEq | Op::SubEq | Op::MulEq | Op::DivEq | Op::ModEq | Op::ExpEq => {
                let [target, rhs] = self.read_regs()?;
                match op {
                    Op::AddEq => Instruction::AddEq { target, rhs },
                    Op::SubEq => Instruction::SubEq { target, rhs },
                    Op::MulEq => Instruction::MulEq { target, rhs },
                    Op::DivEq => Instruction::DivEq { target, rhs },
                    Op::ModEq => Instruction::ModEq { target, rhs },
                    _ => Instruction::ExpEq { target, rhs },
                }
            }

            Op::Cmp => {
                let [target, raw_op, lhs, rhs] = self.read_regs()?;
                let Ok(op) = CompareOp::try_from(raw_op) else {
                    bail!(ErrorCode::Invalid, "unknown compare operator {raw_op}");
                };
                Instruction::Cmp { target, op, lhs, rhs }
            }

            Op::Not => {
                let [target, src] = self.read_regs()?;
                Instruction::Not { target, src }
            }
            Op::And | Op::Or | Op::IfNull => {
                let [target, src] = self.read_regs()?;
                let offset = self.read_i32()?;
                match op {
                    Op::And => Instruction::And { target, src, offset },
                    Op::Or => Instruction::Or { target, src, offset },
                    _ => Instruction::IfNull { target, src, offset },
                }
            }
            Op::Exists => {
                let [target, table, key] = self.read_regs()?;
                Instruction::Exists { target, table, key }
            }

            Op::Incr | Op::PIncr => {
                let [target, src] = self.read_regs()?;
                let is_incr = self.read_bool()?;
                if op == Op::Incr {
                    Instruction::Incr { target, src, is_incr }
                } else {
                    Instruction::PIncr { target, src, is_incr }
                }
            }
            Op::PObjIncr => {
                let [target, table, key] = self.read_regs()?;
                Instruction::PObjIncr {
                    target,
                    table,
                    key,
                    is_incr: self.read_bool()?,
                }
            }

            Op::Jmp => Instruction::Jmp { offset: self.read_i32()? },
            Op::Jz => Instruction::Jz {
                src: self.read_u8()?,
                offset: self.read_i32()?,
            },

            Op::Call => {
                let [target, callee, n_params, stack_base] = self.read_regs()?;
                Instruction::Call {
                    target,
                    callee,
                    n_params,
                    stack_base,
                }
            }
            Op::Return => Instruction::Return {
                src: self.read_u8()?,
                has_value: self.read_bool()?,
            },
            Op::NewClosure => Instruction::NewClosure {
                target: self.read_u8()?,
                fct_idx: self.read_u32()?,
            },
            Op::NewObj => Instruction::NewObj {
                target: self.read_u8()?,
                kind: self.read_kind()?,
            },

            Op::NewSlot => {
                let [table, key, value] = self.read_regs()?;
                Instruction::NewSlot { table, key, value }
            }
            Op::ArrayAppend => {
                let [array, value] = self.read_regs()?;
                Instruction::ArrayAppend { array, value }
            }
            Op::NewClassSlot => {
                let [class, key, value] = self.read_regs()?;
                Instruction::NewClassSlot {
                    class,
                    key,
                    value,
                    is_static: self.read_bool()?,
                }
            }
            Op::NewStructSlot => {
                let [strct, key, value] = self.read_regs()?;
                Instruction::NewStructSlot {
                    strct,
                    key,
                    value,
                    has_value: self.read_bool()?,
                    mask: TypeMask(self.read_u32()?),
                    flags: VarDeclFlags(self.read_u8()?),
                }
            }
            Op::NewStructMethod => {
                let [strct, key, value] = self.read_regs()?;
                Instruction::NewStructMethod { strct, key, value }
            }
            Op::NewStructConstructor => {
                let [strct, value] = self.read_regs()?;
                Instruction::NewStructConstructor { strct, value }
            }
            Op::SetStructName => {
                let [strct, name] = self.read_regs()?;
                Instruction::SetStructName { strct, name }
            }
            Op::NewEnumSlot => {
                let [table, key, value] = self.read_regs()?;
                Instruction::NewEnumSlot { table, key, value }
            }
            Op::CloseEnum => Instruction::CloseEnum { table: self.read_u8()? },

            Op::CheckType => Instruction::CheckType {
                src: self.read_u8()?,
                kind: self.read_kind()?,
            },
            Op::CheckTypeMask => Instruction::CheckTypeMask {
                src: self.read_u8()?,
                mask: TypeMask(self.read_u32()?),
            },
            Op::TypeOf => {
                let [target, src] = self.read_regs()?;
                Instruction::TypeOf { target, src }
            }
            Op::TypeId => {
                let [target, src] = self.read_regs()?;
                Instruction::TypeId { target, src }
            }
            Op::GetBase => Instruction::GetBase { target: self.read_u8()? },
            Op::Clone => {
                let [target, src] = self.read_regs()?;
                Instruction::Clone { target, src }
            }
        };
        Ok(instruction)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let Some(bytes) = self.bytes.get(self.pos..self.pos + len) else {
            bail!(ErrorCode::Invalid, "truncated bytecode at offset {}", self.pos);
        };
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    #[inline(always)]
    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_regs<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.read_array()
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn read_kind(&mut self) -> Result<ObjectType> {
        let byte = self.read_u8()?;
        match ObjectType::try_from(byte) {
            Ok(kind) => Ok(kind),
            Err(_) => bail!(ErrorCode::Invalid, "unknown object kind {byte}"),
        }
    }
}

fn binary(op: Op, target: u8, lhs: u8, rhs: u8) -> Instruction {
    match op {
        Op::Add => Instruction::Add { target, lhs, rhs },
        Op::Sub => Instruction::Sub { target, lhs, rhs },
        Op::Mul => Instruction::Mul { target, lhs, rhs },
        Op::Div => Instruction::Div { target, lhs, rhs },
        Op::Mod => Instruction::Mod { target, lhs, rhs },
        Op::Exp => Instruction::Exp { target, lhs, rhs },
        Op::BitwiseOr => Instruction::BitwiseOr { target, lhs, rhs },
        Op::BitwiseAnd => Instruction::BitwiseAnd { target, lhs, rhs },
        Op::BitwiseXor => Instruction::BitwiseXor { target, lhs, rhs },
        Op::LShift => Instruction::LShift { target, lhs, rhs },
        Op::RShift => Instruction::RShift { target, lhs, rhs },
        Op::Eq => Instruction::Eq { target, lhs, rhs },
        _ => Instruction::Ne { target, lhs, rhs },
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Result<Instruction>> {
        self.decode_next().transpose()
    }
}

/// Decodes a whole instruction stream.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Instruction>> {
    BytecodeDecoder::new(bytes).collect()
}
