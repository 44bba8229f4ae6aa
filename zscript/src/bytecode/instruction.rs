use core::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{ObjectType, SmallString, TypeMask, VarDeclFlags};

use super::Op;

/// Frame-relative register index.
pub type Reg = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct GetFlags(pub u8);

impl GetFlags {
    pub const NONE: Self = Self(0);
    /// Retry a not-found lookup in the closure's root table.
    pub const LOOK_IN_ROOT: Self = Self(1 << 0);

    #[inline(always)]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }
}

/// Operator of a [`Instruction::Cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
    /// Strict (triple) equality.
    Tw,
}

impl CompareOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Tw => "===",
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    Line { line: u32 },
    Load { target: Reg, idx: u32 },
    LoadInt { target: Reg, value: i64 },
    LoadFloat { target: Reg, value: f64 },
    LoadBool { target: Reg, value: bool },
    LoadSmallString { target: Reg, value: SmallString },
    LoadNull { target: Reg },
    LoadNulls { target: Reg, count: u8 },
    LoadNone { target: Reg },
    LoadRoot { target: Reg },
    Move { target: Reg, src: Reg },

    Get { target: Reg, table: Reg, key: Reg, flags: GetFlags },
    Set { table: Reg, key: Reg, value: Reg },
    GetCapture { target: Reg, idx: u32 },
    SetCapture { idx: u32, src: Reg },

    Add { target: Reg, lhs: Reg, rhs: Reg },
    Sub { target: Reg, lhs: Reg, rhs: Reg },
    Mul { target: Reg, lhs: Reg, rhs: Reg },
    Div { target: Reg, lhs: Reg, rhs: Reg },
    Mod { target: Reg, lhs: Reg, rhs: Reg },
    Exp { target: Reg, lhs: Reg, rhs: Reg },
    BitwiseOr { target: Reg, lhs: Reg, rhs: Reg },
    BitwiseAnd { target: Reg, lhs: Reg, rhs: Reg },
    BitwiseXor { target: Reg, lhs: Reg, rhs: Reg },
    LShift { target: Reg, lhs: Reg, rhs: Reg },
    RShift { target: Reg, lhs: Reg, rhs: Reg },

    AddEq { target: Reg, rhs: Reg },
    SubEq { target: Reg, rhs: Reg },
    MulEq { target: Reg, rhs: Reg },
    DivEq { target: Reg, rhs: Reg },
    ModEq { target: Reg, rhs: Reg },
    ExpEq { target: Reg, rhs: Reg },

    Eq { target: Reg, lhs: Reg, rhs: Reg },
    Ne { target: Reg, lhs: Reg, rhs: Reg },
    Cmp { target: Reg, op: CompareOp, lhs: Reg, rhs: Reg },

    Not { target: Reg, src: Reg },
    And { target: Reg, src: Reg, offset: i32 },
    Or { target: Reg, src: Reg, offset: i32 },
    Exists { target: Reg, table: Reg, key: Reg },
    IfNull { target: Reg, src: Reg, offset: i32 },

    Incr { target: Reg, src: Reg, is_incr: bool },
    PIncr { target: Reg, src: Reg, is_incr: bool },
    PObjIncr { target: Reg, table: Reg, key: Reg, is_incr: bool },

    Jmp { offset: i32 },
    Jz { src: Reg, offset: i32 },

    Call { target: Reg, callee: Reg, n_params: u8, stack_base: Reg },
    Return { src: Reg, has_value: bool },
    NewClosure { target: Reg, fct_idx: u32 },
    NewObj { target: Reg, kind: ObjectType },

    NewSlot { table: Reg, key: Reg, value: Reg },
    ArrayAppend { array: Reg, value: Reg },
    NewClassSlot { class: Reg, key: Reg, value: Reg, is_static: bool },
    NewStructSlot {
        strct: Reg,
        key: Reg,
        value: Reg,
        has_value: bool,
        mask: TypeMask,
        flags: VarDeclFlags,
    },
    NewStructMethod { strct: Reg, key: Reg, value: Reg },
    NewStructConstructor { strct: Reg, value: Reg },
    SetStructName { strct: Reg, name: Reg },
    NewEnumSlot { table: Reg, key: Reg, value: Reg },
    CloseEnum { table: Reg },

    CheckType { src: Reg, kind: ObjectType },
    CheckTypeMask { src: Reg, mask: TypeMask },
    TypeOf { target: Reg, src: Reg },
    /// Exposed kind name, never consulting `__typeof`.
    TypeId { target: Reg, src: Reg },
    GetBase { target: Reg },
    Clone { target: Reg, src: Reg },
}

impl Instruction {
    pub const fn op(&self) -> Op {
        match self {
            Self::Line { .. } => Op::Line,
            Self::Load { .. } => Op::Load,
            Self::LoadInt { .. } => Op::LoadInt,
            Self::LoadFloat { .. } => Op::LoadFloat,
            Self::LoadBool { .. } => Op::LoadBool,
            Self::LoadSmallString { .. } => Op::LoadSmallString,
            Self::LoadNull { .. } => Op::LoadNull,
            Self::LoadNulls { .. } => Op::LoadNulls,
            Self::LoadNone { .. } => Op::LoadNone,
            Self::LoadRoot { .. } => Op::LoadRoot,
            Self::Move { .. } => Op::Move,
            Self::Get { .. } => Op::Get,
            Self::Set { .. } => Op::Set,
            Self::GetCapture { .. } => Op::GetCapture,
            Self::SetCapture { .. } => Op::SetCapture,
            Self::Add { .. } => Op::Add,
            Self::Sub { .. } => Op::Sub,
            Self::Mul { .. } => Op::Mul,
            Self::Div { .. } => Op::Div,
            Self::Mod { .. } => Op::Mod,
            Self::Exp { .. } => Op::Exp,
            Self::BitwiseOr { .. } => Op::BitwiseOr,
            Self::BitwiseAnd { .. } => Op::BitwiseAnd,
            Self::BitwiseXor { .. } => Op::BitwiseXor,
            Self::LShift { .. } => Op::LShift,
            Self::RShift { .. } => Op::RShift,
            Self::AddEq { .. } => Op::AddEq,
            Self::SubEq { .. } => Op::SubEq,
            Self::MulEq { .. } => Op::MulEq,
            Self::DivEq { .. } => Op::DivEq,
            Self::ModEq { .. } => Op::ModEq,
            Self::ExpEq { .. } => Op::ExpEq,
            Self::Eq { .. } => Op::Eq,
            Self::Ne { .. } => Op::Ne,
            Self::Cmp { .. } => Op::Cmp,
            Self::Not { .. } => Op::Not,
            Self::And { .. } => Op::And,
            Self::Or { .. } => Op::Or,
            Self::Exists { .. } => Op::Exists,
            Self::IfNull { .. } => Op::IfNull,
            Self::Incr { .. } => Op::Incr,
            Self::PIncr { .. } => Op::PIncr,
            Self::PObjIncr { .. } => Op::PObjIncr,
            Self::Jmp { .. } => Op::Jmp,
            Self::Jz { .. } => Op::Jz,
            Self::Call { .. } => Op::Call,
            Self::Return { .. } => Op::Return,
            Self::NewClosure { .. } => Op::NewClosure,
            Self::NewObj { .. } => Op::NewObj,
            Self::NewSlot { .. } => Op::NewSlot,
            Self::ArrayAppend { .. } => Op::ArrayAppend,
            Self::NewClassSlot { .. } => Op::NewClassSlot,
            Self::NewStructSlot { .. } => Op::NewStructSlot,
            Self::NewStructMethod { .. } => Op::NewStructMethod,
            Self::NewStructConstructor { .. } => Op::NewStructConstructor,
            Self::SetStructName { .. } => Op::SetStructName,
            Self::NewEnumSlot { .. } => Op::NewEnumSlot,
            Self::CloseEnum { .. } => Op::CloseEnum,
            Self::CheckType { .. } => Op::CheckType,
            Self::CheckTypeMask { .. } => Op::CheckTypeMask,
            Self::TypeOf { .. } => Op::TypeOf,
            Self::TypeId { .. } => Op::TypeId,
            Self::GetBase { .. } => Op::GetBase,
            Self::Clone { .. } => Op::Clone,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Line { line } => write!(f, "Line {line}"),
            Self::Load { target, idx } => write!(f, "Load r{target}, #{idx}"),
            Self::LoadInt { target, value } => write!(f, "LoadInt r{target}, {value}"),
            Self::LoadFloat { target, value } => write!(f, "LoadFloat r{target}, {value:?}"),
            Self::LoadBool { target, value } => write!(f, "LoadBool r{target}, {value}"),
            Self::LoadSmallString { target, value } => {
                write!(f, "LoadSmallString r{target}, {value:?}")
            }
            Self::LoadNull { target } => write!(f, "LoadNull r{target}"),
            Self::LoadNulls { target, count } => write!(f, "LoadNulls r{target}, {count}"),
            Self::LoadNone { target } => write!(f, "LoadNone r{target}"),
            Self::LoadRoot { target } => write!(f, "LoadRoot r{target}"),
            Self::Move { target, src } => write!(f, "Move r{target}, r{src}"),
            Self::Get {
                target,
                table,
                key,
                flags,
            } => {
                let root = if flags.contains(GetFlags::LOOK_IN_ROOT) { " root" } else { "" };
                write!(f, "Get r{target}, r{table}[r{key}]{root}")
            }
            Self::Set { table, key, value } => write!(f, "Set r{table}[r{key}], r{value}"),
            Self::GetCapture { target, idx } => write!(f, "GetCapture r{target}, ^{idx}"),
            Self::SetCapture { idx, src } => write!(f, "SetCapture ^{idx}, r{src}"),
            Self::Add { target, lhs, rhs }
            | Self::Sub { target, lhs, rhs }
            | Self::Mul { target, lhs, rhs }
            | Self::Div { target, lhs, rhs }
            | Self::Mod { target, lhs, rhs }
            | Self::Exp { target, lhs, rhs }
            | Self::BitwiseOr { target, lhs, rhs }
            | Self::BitwiseAnd { target, lhs, rhs }
            | Self::BitwiseXor { target, lhs, rhs }
            | Self::LShift { target, lhs, rhs }
            | Self::RShift { target, lhs, rhs }
            | Self::Eq { target, lhs, rhs }
            | Self::Ne { target, lhs, rhs } => {
                write!(f, "{:?} r{target}, r{lhs}, r{rhs}", self.op())
            }
            Self::AddEq { target, rhs }
            | Self::SubEq { target, rhs }
            | Self::MulEq { target, rhs }
            | Self::DivEq { target, rhs }
            | Self::ModEq { target, rhs }
            | Self::ExpEq { target, rhs } => write!(f, "{:?} r{target}, r{rhs}", self.op()),
            Self::Cmp {
                target,
                op,
                lhs,
                rhs,
            } => write!(f, "Cmp r{target}, r{lhs} {} r{rhs}", op.symbol()),
            Self::Not { target, src } => write!(f, "Not r{target}, r{src}"),
            Self::And { target, src, offset }
            | Self::Or { target, src, offset }
            | Self::IfNull { target, src, offset } => {
                write!(f, "{:?} r{target}, r{src}, {offset:+}", self.op())
            }
            Self::Exists { target, table, key } => write!(f, "Exists r{target}, r{table}[r{key}]"),
            Self::Incr { target, src, is_incr } | Self::PIncr { target, src, is_incr } => {
                let sign = if is_incr { "++" } else { "--" };
                write!(f, "{:?} r{target}, r{src} {sign}", self.op())
            }
            Self::PObjIncr {
                target,
                table,
                key,
                is_incr,
            } => {
                let sign = if is_incr { "++" } else { "--" };
                write!(f, "PObjIncr r{target}, r{table}[r{key}] {sign}")
            }
            Self::Jmp { offset } => write!(f, "Jmp {offset:+}"),
            Self::Jz { src, offset } => write!(f, "Jz r{src}, {offset:+}"),
            Self::Call {
                target,
                callee,
                n_params,
                stack_base,
            } => write!(f, "Call r{target}, r{callee}({n_params} @ r{stack_base})"),
            Self::Return { src, has_value } => {
                if has_value {
                    write!(f, "Return r{src}")
                } else {
                    write!(f, "Return")
                }
            }
            Self::NewClosure { target, fct_idx } => write!(f, "NewClosure r{target}, fn#{fct_idx}"),
            Self::NewObj { target, kind } => write!(f, "NewObj r{target}, {kind}"),
            Self::NewSlot { table, key, value } => write!(f, "NewSlot r{table}[r{key}], r{value}"),
            Self::ArrayAppend { array, value } => write!(f, "ArrayAppend r{array}, r{value}"),
            Self::NewClassSlot {
                class,
                key,
                value,
                is_static,
            } => {
                let kind = if is_static { " static" } else { "" };
                write!(f, "NewClassSlot r{class}[r{key}], r{value}{kind}")
            }
            Self::NewStructSlot {
                strct,
                key,
                value,
                has_value,
                mask,
                flags,
            } => {
                write!(f, "NewStructSlot r{strct}[r{key}]")?;
                if has_value {
                    write!(f, ", r{value}")?;
                }
                write!(f, " mask={:#x} flags={:#04x}", mask.0, flags.0)
            }
            Self::NewStructMethod { strct, key, value } => {
                write!(f, "NewStructMethod r{strct}[r{key}], r{value}")
            }
            Self::NewStructConstructor { strct, value } => {
                write!(f, "NewStructConstructor r{strct}, r{value}")
            }
            Self::SetStructName { strct, name } => write!(f, "SetStructName r{strct}, r{name}"),
            Self::NewEnumSlot { table, key, value } => {
                write!(f, "NewEnumSlot r{table}[r{key}], r{value}")
            }
            Self::CloseEnum { table } => write!(f, "CloseEnum r{table}"),
            Self::CheckType { src, kind } => write!(f, "CheckType r{src}, {kind}"),
            Self::CheckTypeMask { src, mask } => write!(f, "CheckTypeMask r{src}, {:#x}", mask.0),
            Self::TypeOf { target, src } => write!(f, "TypeOf r{target}, r{src}"),
            Self::TypeId { target, src } => write!(f, "TypeId r{target}, r{src}"),
            Self::GetBase { target } => write!(f, "GetBase r{target}"),
            Self::Clone { target, src } => write!(f, "Clone r{target}, r{src}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_operands() {
        let add = Instruction::Add {
            target: 0,
            lhs: 1,
            rhs: 2,
        };
        assert_eq!(add.to_string(), "Add r0, r1, r2");
        assert_eq!(Instruction::Jmp { offset: -3 }.to_string(), "Jmp -3");
        assert_eq!(Instruction::Jz { src: 4, offset: 2 }.to_string(), "Jz r4, +2");
        let cmp = Instruction::Cmp {
            target: 0,
            op: CompareOp::Le,
            lhs: 1,
            rhs: 2,
        };
        assert_eq!(cmp.to_string(), "Cmp r0, r1 <= r2");
        assert_eq!(Instruction::Return { src: 0, has_value: false }.to_string(), "Return");
    }

    #[test]
    fn op_matches_variant() {
        assert_eq!(Instruction::LoadNulls { target: 0, count: 2 }.op(), Op::LoadNulls);
        assert_eq!(Instruction::CloseEnum { table: 0 }.op(), Op::CloseEnum);
        assert_eq!(Instruction::Clone { target: 0, src: 0 }.op(), Op::Clone);
    }
}
