//! The closed kind taxonomy, type masks and meta-method names.

use std::{fmt, ops::BitOr};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Kind tag of a [`Value`](crate::Value).
///
/// The order is load-bearing: `SmallString` must be zero, kinds from
/// `LongString` on are reference counted and kinds from `Table` on are
/// delegable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ObjectType {
    SmallString = 0,
    Null,
    Bool,
    Integer,
    Float,
    RawPointer,
    StringView,
    NativeFunction,
    NativePFunction,
    Extension,
    Error,
    None,

    LongString,
    Closure,
    NativeClosure,
    Class,
    WeakRef,
    Struct,
    StructInstance,
    FunctionPrototype,
    Capture,

    Table,
    MutableString,
    Array,
    NativeArray,
    Node,
    UserData,
    Instance,
}

const _: () = assert!(ObjectType::SmallString as u8 == 0);

impl ObjectType {
    pub const COUNT: usize = ObjectType::Instance as usize + 1;

    pub const FIRST_REF_COUNTED: ObjectType = ObjectType::LongString;
    pub const FIRST_DELEGABLE: ObjectType = ObjectType::Table;

    #[inline(always)]
    pub const fn is_ref_counted(self) -> bool {
        self as u8 >= Self::FIRST_REF_COUNTED as u8
    }

    #[inline(always)]
    pub const fn is_delegable(self) -> bool {
        self as u8 >= Self::FIRST_DELEGABLE as u8
    }

    #[inline(always)]
    pub const fn mask(self) -> TypeMask {
        TypeMask(1 << self as u32)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::SmallString => "small_string",
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::RawPointer => "raw_pointer",
            Self::StringView => "string_view",
            Self::NativeFunction => "native_function",
            Self::NativePFunction => "native_pfunction",
            Self::Extension => "extension",
            Self::Error => "error",
            Self::None => "none",
            Self::LongString => "long_string",
            Self::Closure => "closure",
            Self::NativeClosure => "native_closure",
            Self::Class => "class",
            Self::WeakRef => "weak_ref",
            Self::Struct => "struct",
            Self::StructInstance => "struct_instance",
            Self::FunctionPrototype => "function_prototype",
            Self::Capture => "capture",
            Self::Table => "table",
            Self::MutableString => "mutable_string",
            Self::Array => "array",
            Self::NativeArray => "native_array",
            Self::Node => "node",
            Self::UserData => "user_data",
            Self::Instance => "instance",
        }
    }

    /// The public type name, collapsing implementation-specific kinds.
    pub const fn exposed_name(self) -> &'static str {
        match self {
            Self::SmallString | Self::LongString | Self::StringView => "string",
            Self::NativeFunction | Self::NativePFunction | Self::NativeClosure => "closure",
            Self::None => "null",
            Self::StructInstance => "instance",
            Self::FunctionPrototype | Self::Capture => "extension",
            other => other.name(),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitset over [`ObjectType`], one bit per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct TypeMask(pub u32);

impl TypeMask {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self((1 << ObjectType::COUNT as u32) - 1);

    pub const NULL: Self = ObjectType::Null.mask();
    pub const BOOL: Self = ObjectType::Bool.mask();
    pub const INTEGER: Self = ObjectType::Integer.mask();
    pub const FLOAT: Self = ObjectType::Float.mask();
    pub const TABLE: Self = ObjectType::Table.mask();
    pub const ARRAY: Self = ObjectType::Array.mask();

    pub const NUMBER: Self = Self::INTEGER.with(Self::FLOAT);
    pub const NUMBER_OR_BOOL: Self = Self::NUMBER.with(Self::BOOL);
    pub const NULL_OR_NONE: Self = Self::NULL.with(ObjectType::None.mask());
    pub const STRING: Self = ObjectType::SmallString
        .mask()
        .with(ObjectType::LongString.mask())
        .with(ObjectType::StringView.mask())
        .with(ObjectType::MutableString.mask());
    pub const FUNCTION: Self = ObjectType::Closure
        .mask()
        .with(ObjectType::NativeClosure.mask())
        .with(ObjectType::NativeFunction.mask())
        .with(ObjectType::NativePFunction.mask());

    #[inline(always)]
    pub const fn contains(self, kind: ObjectType) -> bool {
        self.0 & kind.mask().0 != 0
    }

    #[inline(always)]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline(always)]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn of(kinds: &[ObjectType]) -> Self {
        kinds.iter().fold(Self::NONE, |mask, kind| mask.with(kind.mask()))
    }
}

impl BitOr for TypeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl From<ObjectType> for TypeMask {
    fn from(kind: ObjectType) -> Self {
        kind.mask()
    }
}

/// User-bindable operator overrides, looked up by their `__name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MetaMethod {
    None,
    Add,
    Sub,
    Mul,
    Div,
    Exp,
    Mod,
    LShift,
    RShift,
    AddEq,
    SubEq,
    MulEq,
    DivEq,
    ExpEq,
    ModEq,
    LShiftEq,
    RShiftEq,
    RhsAdd,
    RhsSub,
    RhsMul,
    RhsDiv,
    RhsExp,
    RhsMod,
    UnaryMinus,
    TypeOf,
    ToString,
    Set,
    Get,
    Next,
    Compare,
    Call,
    Cloned,
    DeleteSlot,
    NewMember,
    Inherited,
}

impl MetaMethod {
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "__none",
            Self::Add => "__add",
            Self::Sub => "__sub",
            Self::Mul => "__mul",
            Self::Div => "__div",
            Self::Exp => "__exp",
            Self::Mod => "__mod",
            Self::LShift => "__lshift",
            Self::RShift => "__rshift",
            Self::AddEq => "__add_eq",
            Self::SubEq => "__sub_eq",
            Self::MulEq => "__mul_eq",
            Self::DivEq => "__div_eq",
            Self::ExpEq => "__exp_eq",
            Self::ModEq => "__mod_eq",
            Self::LShiftEq => "__lshift_eq",
            Self::RShiftEq => "__rshift_eq",
            Self::RhsAdd => "__rhs_add",
            Self::RhsSub => "__rhs_sub",
            Self::RhsMul => "__rhs_mul",
            Self::RhsDiv => "__rhs_div",
            Self::RhsExp => "__rhs_exp",
            Self::RhsMod => "__rhs_mod",
            Self::UnaryMinus => "__unm",
            Self::TypeOf => "__typeof",
            Self::ToString => "__tostring",
            Self::Set => "__set",
            Self::Get => "__get",
            Self::Next => "__next",
            Self::Compare => "__compare",
            Self::Call => "__call",
            Self::Cloned => "__cloned",
            Self::DeleteSlot => "__delete_slot",
            Self::NewMember => "__new_member",
            Self::Inherited => "__inherited",
        }
    }
}

impl fmt::Display for MetaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declaration flags carried by struct slot instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct VarDeclFlags(pub u8);

impl VarDeclFlags {
    pub const NONE: Self = Self(0);
    pub const CONST: Self = Self(1 << 0);
    pub const STATIC: Self = Self(1 << 1);
    pub const PRIVATE: Self = Self(1 << 2);
    pub const MUTABLE: Self = Self(1 << 3);
    pub const EXPORT: Self = Self(1 << 4);
    pub const DOC: Self = Self(1 << 5);

    #[inline(always)]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    #[inline(always)]
    pub const fn with(self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }

    #[inline(always)]
    pub const fn without(self, flag: Self) -> Self {
        Self(self.0 & !flag.0)
    }

    pub const fn is_const(self) -> bool {
        self.contains(Self::CONST)
    }

    pub const fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }
}

impl BitOr for VarDeclFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

/// Sub-kind of an `extension` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ExtensionKind {
    Color,
    ArrayIterator,
    TableIterator,
}
