/// Bytecode opcodes.
///
/// Register operands are 8-bit and frame relative. Literal pool and
/// function indices are 32-bit, jump offsets are signed 32-bit and relative
/// to the jumping instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// Record the source line of the following instructions.
    /// Operands: `line:u32`
    Line = 0x00,

    /// Load a literal pool entry.
    /// Operands: `target:u8`, `idx:u32`
    Load,

    /// Operands: `target:u8`, `value:i64`
    LoadInt,

    /// Operands: `target:u8`, `value:f64`
    LoadFloat,

    /// Operands: `target:u8`, `value:u8`
    LoadBool,

    /// Operands: `target:u8`, `len:u8`, `bytes:[u8; 15]`
    LoadSmallString,

    /// Operands: `target:u8`
    LoadNull,

    /// Reset `count` consecutive registers to null.
    /// Operands: `target:u8`, `count:u8`
    LoadNulls,

    /// Operands: `target:u8`
    LoadNone,

    /// Load the root table of the running closure.
    /// Operands: `target:u8`
    LoadRoot,

    /// Register copy.
    /// Operands: `target:u8`, `src:u8`
    Move,

    /// Keyed lookup, optionally retried in the root table.
    /// Operands: `target:u8`, `table:u8`, `key:u8`, `flags:u8`
    Get,

    /// Operands: `table:u8`, `key:u8`, `value:u8`
    Set,

    /// Operands: `target:u8`, `idx:u32`
    GetCapture,

    /// Operands: `idx:u32`, `src:u8`
    SetCapture,

    /// Binary arithmetic.
    /// Operands: `target:u8`, `lhs:u8`, `rhs:u8`
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    BitwiseOr,
    BitwiseAnd,
    BitwiseXor,
    LShift,
    RShift,

    /// Compound assignment into `target`.
    /// Operands: `target:u8`, `rhs:u8`
    AddEq,
    SubEq,
    MulEq,
    DivEq,
    ModEq,
    ExpEq,

    /// Permissive equality.
    /// Operands: `target:u8`, `lhs:u8`, `rhs:u8`
    Eq,
    Ne,

    /// Ordered or strict comparison.
    /// Operands: `target:u8`, `op:u8`, `lhs:u8`, `rhs:u8`
    Cmp,

    /// Operands: `target:u8`, `src:u8`
    Not,

    /// Store the truthiness of `src`, jump when false.
    /// Operands: `target:u8`, `src:u8`, `offset:i32`
    And,

    /// Store the truthiness of `src`, jump when true.
    /// Operands: `target:u8`, `src:u8`, `offset:i32`
    Or,

    /// Whether a keyed lookup succeeds.
    /// Operands: `target:u8`, `table:u8`, `key:u8`
    Exists,

    /// Copy `src`, jump when it is neither null nor none.
    /// Operands: `target:u8`, `src:u8`, `offset:i32`
    IfNull,

    /// Postfix increment or decrement.
    /// Operands: `target:u8`, `src:u8`, `is_incr:u8`
    Incr,

    /// Prefix increment or decrement.
    /// Operands: `target:u8`, `src:u8`, `is_incr:u8`
    PIncr,

    /// Prefix increment of a keyed slot.
    /// Operands: `target:u8`, `table:u8`, `key:u8`, `is_incr:u8`
    PObjIncr,

    /// Operands: `offset:i32`
    Jmp,

    /// Jump when `src` is falsy.
    /// Operands: `src:u8`, `offset:i32`
    Jz,

    /// Operands: `target:u8`, `callee:u8`, `n_params:u8`, `stack_base:u8`
    Call,

    /// Operands: `src:u8`, `has_value:u8`
    Return,

    /// Instantiate a nested prototype.
    /// Operands: `target:u8`, `fct_idx:u32`
    NewClosure,

    /// Operands: `target:u8`, `kind:u8`
    NewObj,

    /// Operands: `table:u8`, `key:u8`, `value:u8`
    NewSlot,

    /// Operands: `array:u8`, `value:u8`
    ArrayAppend,

    /// Operands: `class:u8`, `key:u8`, `value:u8`, `is_static:u8`
    NewClassSlot,

    /// Operands: `strct:u8`, `key:u8`, `value:u8`, `has_value:u8`,
    /// `mask:u32`, `flags:u8`
    NewStructSlot,

    /// Operands: `strct:u8`, `key:u8`, `value:u8`
    NewStructMethod,

    /// Operands: `strct:u8`, `value:u8`
    NewStructConstructor,

    /// Operands: `strct:u8`, `name:u8`
    SetStructName,

    /// Operands: `table:u8`, `key:u8`, `value:u8`
    NewEnumSlot,

    /// Operands: `table:u8`
    CloseEnum,

    /// Operands: `src:u8`, `kind:u8`
    CheckType,

    /// Operands: `src:u8`, `mask:u32`
    CheckTypeMask,

    /// Exposed type name as a string.
    /// Operands: `target:u8`, `src:u8`
    TypeOf,

    /// Kind id as an integer.
    /// Operands: `target:u8`, `src:u8`
    TypeId,

    /// Struct or class the running closure is a method of.
    /// Operands: `target:u8`
    GetBase,

    /// Shallow copy.
    /// Operands: `target:u8`, `src:u8`
    Clone,
}

impl Op {
    pub const COUNT: usize = Op::Clone as usize + 1;

    /// Whether the instruction may move the cursor somewhere other than the
    /// next instruction.
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Op::Jmp | Op::Jz | Op::And | Op::Or | Op::IfNull | Op::Return
        )
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte < Self::COUNT as u8 {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}
