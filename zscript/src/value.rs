//! The tagged value.

use std::{any::Any, borrow::Cow, fmt, mem, ptr::NonNull};

use crate::{
    Array, Capture, Class, Closure, Engine, ErrorCode, ExtensionKind, FunctionPrototype, Instance,
    LongString, MutableString, NativeArray, NativeArrayType, NativeClosure, NativeClosureFn, Node,
    ObjectType, RcHeader, Ref, ReleaseHook, Result, Runtime, SmallString, Struct, StructInstance,
    Table, TypeMask, UserData, UserPointer, WeakProxy,
    compare::strict_equals,
    error::bail,
};

/// Host function with access to the calling runtime.
pub type NativeFunction = fn(&mut dyn Runtime, &[Value]) -> Result<Value>;

/// Pure host function, no runtime access.
pub type NativePFunction = fn(&[Value]) -> Result<Value>;

/// Payload of an `extension` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extension {
    pub kind: ExtensionKind,
    pub data: u64,
}

/// A dynamically typed value.
///
/// Inline kinds are stored directly, reference-counted kinds hold a
/// [`Ref`] and share their payload on clone.
#[derive(Clone)]
pub enum Value {
    SmallString(SmallString),
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    RawPointer(usize),
    StringView(&'static str),
    NativeFunction(NativeFunction),
    NativePFunction(NativePFunction),
    Extension(Extension),
    Error(ErrorCode),
    None,

    LongString(Ref<LongString>),
    Closure(Ref<Closure>),
    NativeClosure(Ref<NativeClosure>),
    Class(Ref<Class>),
    WeakRef(Ref<WeakProxy>),
    Struct(Ref<Struct>),
    StructInstance(Ref<StructInstance>),
    FunctionPrototype(Ref<FunctionPrototype>),
    Capture(Ref<Capture>),

    Table(Ref<Table>),
    MutableString(Ref<MutableString>),
    Array(Ref<Array>),
    NativeArray(Ref<NativeArray>),
    Node(Ref<Node>),
    UserData(Ref<UserData>),
    Instance(Ref<Instance>),
}

/// Applies `$body` to the [`Ref`] held by a reference-counted value.
macro_rules! with_ref {
    ($value:expr, $r:ident => $body:expr, _ => $otherwise:expr) => {
        match $value {
            Value::LongString($r) => $body,
            Value::Closure($r) => $body,
            Value::NativeClosure($r) => $body,
            Value::Class($r) => $body,
            Value::WeakRef($r) => $body,
            Value::Struct($r) => $body,
            Value::StructInstance($r) => $body,
            Value::FunctionPrototype($r) => $body,
            Value::Capture($r) => $body,
            Value::Table($r) => $body,
            Value::MutableString($r) => $body,
            Value::Array($r) => $body,
            Value::NativeArray($r) => $body,
            Value::Node($r) => $body,
            Value::UserData($r) => $body,
            Value::Instance($r) => $body,
            _ => $otherwise,
        }
    };
}

impl Default for Value {
    fn default() -> Self {
        Value::SmallString(SmallString::EMPTY)
    }
}

impl Value {
    // ── inline constructors ────────────────────────────────────────

    #[inline]
    pub const fn null() -> Self {
        Value::Null
    }

    #[inline]
    pub const fn none() -> Self {
        Value::None
    }

    #[inline]
    pub const fn string_view(text: &'static str) -> Self {
        Value::StringView(text)
    }

    /// Inline string, or `None` when `text` is too long.
    pub fn small_string(text: &str) -> Option<Self> {
        SmallString::new(text).map(Value::SmallString)
    }

    #[inline]
    pub const fn raw_pointer(addr: usize) -> Self {
        Value::RawPointer(addr)
    }

    #[inline]
    pub const fn native_function(function: NativeFunction) -> Self {
        Value::NativeFunction(function)
    }

    #[inline]
    pub const fn native_pfunction(function: NativePFunction) -> Self {
        Value::NativePFunction(function)
    }

    #[inline]
    pub const fn extension(kind: ExtensionKind, data: u64) -> Self {
        Value::Extension(Extension { kind, data })
    }

    #[inline]
    pub const fn error(code: ErrorCode) -> Self {
        Value::Error(code)
    }

    // ── reference-counted constructors ─────────────────────────────

    /// Small string when `text` fits inline, long string otherwise.
    pub fn new_string(engine: &Engine, text: &str) -> Result<Self> {
        match SmallString::new(text) {
            Some(small) => Ok(Value::SmallString(small)),
            None => Ok(Value::LongString(Ref::new(engine, LongString::new(text))?)),
        }
    }

    pub fn new_mutable_string(engine: &Engine, text: impl Into<String>) -> Result<Self> {
        Ok(Value::MutableString(Ref::new(engine, MutableString::new(text))?))
    }

    pub fn new_table(engine: &Engine) -> Result<Self> {
        Ok(Value::Table(Ref::new(engine, Table::new())?))
    }

    pub fn new_array(engine: &Engine, values: Vec<Value>) -> Result<Self> {
        Ok(Value::Array(Ref::new(engine, Array::new(values))?))
    }

    pub fn new_native_array(engine: &Engine, ty: NativeArrayType, len: usize) -> Result<Self> {
        Ok(Value::NativeArray(Ref::new(engine, NativeArray::new(ty, len))?))
    }

    pub fn new_node(engine: &Engine, name: Value) -> Result<Self> {
        Ok(Value::Node(Ref::new(engine, Node::new(name))?))
    }

    pub fn new_struct(engine: &Engine) -> Result<Self> {
        Ok(Value::Struct(Ref::new(engine, Struct::new())?))
    }

    pub fn new_struct_instance(engine: &Engine, strct: &Ref<Struct>) -> Result<Self> {
        Ok(Value::StructInstance(Ref::new(engine, StructInstance::new(strct.clone()))?))
    }

    pub fn new_class(engine: &Engine) -> Result<Self> {
        Ok(Value::Class(Ref::new(engine, Class::new())?))
    }

    pub fn new_instance(engine: &Engine, class: &Ref<Class>) -> Result<Self> {
        Ok(Value::Instance(Ref::new(engine, Instance::new(class.clone()))?))
    }

    pub fn new_user_data(
        engine: &Engine,
        data: Box<dyn Any>,
        user_pointer: UserPointer,
        release_hook: Option<ReleaseHook>,
    ) -> Result<Self> {
        Ok(Value::UserData(Ref::new(
            engine,
            UserData::new(data, user_pointer, release_hook),
        )?))
    }

    pub fn new_closure(engine: &Engine, prototype: &Ref<FunctionPrototype>, root: Value) -> Result<Self> {
        Ok(Value::Closure(Ref::new(engine, Closure::new(prototype.clone(), root))?))
    }

    pub fn new_native_closure(
        engine: &Engine,
        function: NativeClosureFn,
        user_pointer: UserPointer,
        release_hook: Option<ReleaseHook>,
    ) -> Result<Self> {
        Ok(Value::NativeClosure(Ref::new(
            engine,
            NativeClosure::new(function, user_pointer, release_hook),
        )?))
    }

    pub fn new_prototype(engine: &Engine, prototype: FunctionPrototype) -> Result<Self> {
        Ok(Value::FunctionPrototype(Ref::new(engine, prototype)?))
    }

    pub fn new_capture(engine: &Engine, value: Value) -> Result<Self> {
        Ok(Value::Capture(Ref::new(engine, Capture::new(value))?))
    }

    /// Rebuilds a value from a raw header without retaining.
    ///
    /// # Safety
    ///
    /// `header` must belong to a live payload of kind `kind` and the caller
    /// must own one count of it.
    pub(crate) unsafe fn from_raw_header(kind: ObjectType, header: NonNull<RcHeader>) -> Self {
        unsafe {
            match kind {
                ObjectType::LongString => Value::LongString(Ref::from_header(header)),
                ObjectType::Closure => Value::Closure(Ref::from_header(header)),
                ObjectType::NativeClosure => Value::NativeClosure(Ref::from_header(header)),
                ObjectType::Class => Value::Class(Ref::from_header(header)),
                ObjectType::WeakRef => Value::WeakRef(Ref::from_header(header)),
                ObjectType::Struct => Value::Struct(Ref::from_header(header)),
                ObjectType::StructInstance => Value::StructInstance(Ref::from_header(header)),
                ObjectType::FunctionPrototype => Value::FunctionPrototype(Ref::from_header(header)),
                ObjectType::Capture => Value::Capture(Ref::from_header(header)),
                ObjectType::Table => Value::Table(Ref::from_header(header)),
                ObjectType::MutableString => Value::MutableString(Ref::from_header(header)),
                ObjectType::Array => Value::Array(Ref::from_header(header)),
                ObjectType::NativeArray => Value::NativeArray(Ref::from_header(header)),
                ObjectType::Node => Value::Node(Ref::from_header(header)),
                ObjectType::UserData => Value::UserData(Ref::from_header(header)),
                ObjectType::Instance => Value::Instance(Ref::from_header(header)),
                _ => unreachable!("{kind} is not reference counted"),
            }
        }
    }

    // ── type queries ───────────────────────────────────────────────

    pub fn kind(&self) -> ObjectType {
        match self {
            Value::SmallString(_) => ObjectType::SmallString,
            Value::Null => ObjectType::Null,
            Value::Bool(_) => ObjectType::Bool,
            Value::Integer(_) => ObjectType::Integer,
            Value::Float(_) => ObjectType::Float,
            Value::RawPointer(_) => ObjectType::RawPointer,
            Value::StringView(_) => ObjectType::StringView,
            Value::NativeFunction(_) => ObjectType::NativeFunction,
            Value::NativePFunction(_) => ObjectType::NativePFunction,
            Value::Extension(_) => ObjectType::Extension,
            Value::Error(_) => ObjectType::Error,
            Value::None => ObjectType::None,
            other => with_ref!(other, r => r.header().kind(), _ => unreachable!()),
        }
    }

    #[inline]
    pub fn type_mask(&self) -> TypeMask {
        self.kind().mask()
    }

    /// Exposed type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.kind().exposed_name()
    }

    #[inline]
    pub fn is_type(&self, kind: ObjectType) -> bool {
        self.kind() == kind
    }

    #[inline]
    pub fn has_type_mask(&self, mask: TypeMask) -> bool {
        mask.contains(self.kind())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_null_or_none(&self) -> bool {
        matches!(self, Value::Null | Value::None)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Integer(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Value::Float(_))
    }

    pub fn is_number(&self) -> bool {
        self.has_type_mask(TypeMask::NUMBER)
    }

    pub fn is_number_or_bool(&self) -> bool {
        self.has_type_mask(TypeMask::NUMBER_OR_BOOL)
    }

    pub fn is_string(&self) -> bool {
        self.has_type_mask(TypeMask::STRING)
    }

    pub fn is_function(&self) -> bool {
        self.has_type_mask(TypeMask::FUNCTION)
    }

    pub fn is_table(&self) -> bool {
        matches!(self, Value::Table(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_closure(&self) -> bool {
        matches!(self, Value::Closure(_))
    }

    pub fn is_ref_counted(&self) -> bool {
        self.kind().is_ref_counted()
    }

    pub fn is_delegable(&self) -> bool {
        self.kind().is_delegable()
    }

    // ── conversions ────────────────────────────────────────────────

    pub fn to_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Integer(i) => Ok(*i != 0),
            Value::Float(f) => Ok(*f != 0.0),
            other => bail!(ErrorCode::InvalidType, "cannot convert {} to bool", other.type_name()),
        }
    }

    pub fn to_int(&self) -> Result<i64> {
        match self {
            Value::Bool(b) => Ok(*b as i64),
            Value::Integer(i) => Ok(*i),
            Value::Float(f) => Ok(*f as i64),
            other => bail!(ErrorCode::InvalidType, "cannot convert {} to integer", other.type_name()),
        }
    }

    pub fn to_float(&self) -> Result<f64> {
        match self {
            Value::Bool(b) => Ok(*b as i64 as f64),
            Value::Integer(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            other => bail!(ErrorCode::InvalidType, "cannot convert {} to float", other.type_name()),
        }
    }

    /// Text of any string kind.
    pub fn as_str(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::MutableString(s) => Some(Cow::Owned(s.borrow().clone())),
            other => other.immutable_str().map(Cow::Borrowed),
        }
    }

    /// Text of the immutable string kinds.
    pub fn immutable_str(&self) -> Option<&str> {
        match self {
            Value::SmallString(s) => Some(s.as_str()),
            Value::StringView(s) => Some(s),
            Value::LongString(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Null, none, false, zero and empty strings are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::None => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::SmallString(s) => !s.is_empty(),
            Value::StringView(s) => !s.is_empty(),
            Value::LongString(s) => !s.as_str().is_empty(),
            Value::MutableString(s) => !s.borrow().is_empty(),
            _ => true,
        }
    }

    /// Moves the value out, leaving null behind.
    #[inline]
    pub fn take(&mut self) -> Value {
        mem::replace(self, Value::Null)
    }

    // ── reference counting ─────────────────────────────────────────

    pub fn header(&self) -> Option<&RcHeader> {
        with_ref!(self, r => Some(r.header()), _ => None)
    }

    pub fn ref_count(&self) -> Option<usize> {
        self.header().map(RcHeader::count)
    }

    /// Payload address, zero for inline kinds.
    pub fn addr(&self) -> usize {
        with_ref!(self, r => r.addr(), _ => 0)
    }

    /// Identity of two reference-counted values.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        self.is_ref_counted() && self.addr() == other.addr()
    }

    pub fn engine(&self) -> Option<&Engine> {
        self.header().map(RcHeader::engine)
    }

    /// Returns a `weak_ref` value observing this payload.
    pub fn weak_ref(&self) -> Result<Value> {
        with_ref!(self, r => Ok(Value::WeakRef(r.weak_proxy()?)), _ => bail!(
            ErrorCode::InvalidType,
            "{} cannot be weakly referenced",
            self.type_name()
        ))
    }

    /// Upgrades a `weak_ref`, other values return themselves.
    pub fn upgrade(&self) -> Result<Value> {
        match self {
            Value::WeakRef(proxy) => proxy.upgrade(),
            other => Ok(other.clone()),
        }
    }

    // ── delegation ─────────────────────────────────────────────────

    /// Fallback object consulted by key lookups.
    pub fn delegate(&self) -> Value {
        match self {
            Value::Table(t) => t.delegate(),
            Value::Array(a) => a.delegate(),
            Value::MutableString(s) => s.delegate(),
            Value::NativeArray(a) => a.delegate(),
            Value::Node(n) => n.delegate(),
            Value::UserData(u) => u.delegate(),
            Value::Instance(i) => Value::Class(i.class().clone()),
            _ => Value::Null,
        }
    }

    pub fn set_delegate(&self, delegate: Value) -> Result<()> {
        if !(delegate.is_null() || delegate.is_table()) {
            bail!(ErrorCode::InvalidType, "delegate must be a table, got {}", delegate.type_name());
        }

        match self {
            Value::Table(t) => t.set_delegate(delegate),
            Value::Array(a) => a.set_delegate(delegate),
            Value::MutableString(s) => s.set_delegate(delegate),
            Value::NativeArray(a) => a.set_delegate(delegate),
            Value::Node(n) => n.set_delegate(delegate),
            Value::UserData(u) => u.set_delegate(delegate),
            other => bail!(ErrorCode::InvalidType, "{} has no delegate", other.type_name()),
        }
        Ok(())
    }

    // ── accessors ──────────────────────────────────────────────────

    pub fn as_table(&self) -> Option<&Ref<Table>> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Ref<Array>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Ref<Closure>> {
        match self {
            Value::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        strict_equals(self, other)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<ErrorCode> for Value {
    fn from(code: ErrorCode) -> Self {
        Value::Error(code)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::SmallString(s) => write!(f, "{s:?}"),
            Value::Null => f.write_str("null"),
            Value::None => f.write_str("none"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::RawPointer(p) => write!(f, "raw_pointer({p:#x})"),
            Value::StringView(s) => write!(f, "{s:?}"),
            Value::NativeFunction(_) => f.write_str("native_function"),
            Value::NativePFunction(_) => f.write_str("native_pfunction"),
            Value::Extension(e) => write!(f, "extension({:?}, {})", e.kind, e.data),
            Value::Error(code) => write!(f, "error({code})"),
            Value::LongString(s) => write!(f, "{:?}", s.as_str()),
            Value::MutableString(s) => write!(f, "mutable({:?})", s.borrow().as_str()),
            Value::Array(a) => f.debug_list().entries(a.borrow().iter()).finish(),
            other => with_ref!(other, r => write!(f, "{r:?}"), _ => unreachable!()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty_small_string() {
        let value = Value::default();
        assert_eq!(value.kind(), ObjectType::SmallString);
        assert_eq!(value.as_str().as_deref(), Some(""));
        assert!(!value.is_truthy());
    }

    #[test]
    fn new_string_picks_storage() {
        let engine = Engine::default();
        let short = Value::new_string(&engine, "short").unwrap();
        let long = Value::new_string(&engine, "definitely longer than fifteen").unwrap();
        assert_eq!(short.kind(), ObjectType::SmallString);
        assert_eq!(long.kind(), ObjectType::LongString);
        assert_eq!(long.type_name(), "string");
        assert_eq!(long.ref_count(), Some(1));
        assert_eq!(short.ref_count(), None);
    }

    #[test]
    fn conversions_cover_number_or_bool() {
        let engine = Engine::default();
        for value in [Value::from(true), Value::from(3), Value::from(2.5)] {
            assert!(value.to_bool().is_ok());
            assert!(value.to_int().is_ok());
            assert!(value.to_float().is_ok());
        }
        assert_eq!(Value::from(2.9).to_int().unwrap(), 2);
        assert_eq!(Value::from(true).to_float().unwrap(), 1.0);

        let others = [
            Value::Null,
            Value::None,
            Value::string_view("1"),
            Value::new_table(&engine).unwrap(),
        ];
        for value in others {
            assert_eq!(value.to_bool().unwrap_err().code, ErrorCode::InvalidType);
            assert_eq!(value.to_int().unwrap_err().code, ErrorCode::InvalidType);
            assert_eq!(value.to_float().unwrap_err().code, ErrorCode::InvalidType);
        }
    }

    #[test]
    fn truthiness() {
        let engine = Engine::default();
        let falsy = [
            Value::Null,
            Value::None,
            Value::from(false),
            Value::from(0),
            Value::from(0.0),
            Value::string_view(""),
            Value::new_mutable_string(&engine, "").unwrap(),
        ];
        assert!(falsy.iter().all(|v| !v.is_truthy()));

        let truthy = [
            Value::from(1),
            Value::from(-0.5),
            Value::string_view("x"),
            Value::new_array(&engine, Vec::new()).unwrap(),
        ];
        assert!(truthy.iter().all(Value::is_truthy));
    }

    #[test]
    fn take_leaves_null() {
        let engine = Engine::default();
        let mut slot = Value::new_table(&engine).unwrap();
        let taken = slot.take();
        assert!(slot.is_null());
        assert_eq!(taken.ref_count(), Some(1));
    }

    #[test]
    fn clone_retains_and_drop_releases() {
        let engine = Engine::default();
        let value = Value::new_array(&engine, Vec::new()).unwrap();
        let copies: Vec<_> = (0..5).map(|_| value.clone()).collect();
        assert_eq!(value.ref_count(), Some(6));
        drop(copies);
        assert_eq!(value.ref_count(), Some(1));
        drop(value);
        assert_eq!(engine.stats().live_allocations(), 0);
    }

    #[test]
    fn weak_ref_values() {
        let engine = Engine::default();
        let table = Value::new_table(&engine).unwrap();
        let weak = table.weak_ref().unwrap();
        assert_eq!(weak.kind(), ObjectType::WeakRef);
        assert!(weak.upgrade().unwrap().ptr_eq(&table));
        assert!(Value::from(1).weak_ref().is_err());

        drop(table);
        assert_eq!(weak.upgrade().unwrap_err().code, ErrorCode::NullType);
    }

    #[test]
    fn type_queries() {
        let value = Value::from(4);
        assert!(value.is_type(ObjectType::Integer));
        assert!(value.has_type_mask(TypeMask::NUMBER));
        assert!(!value.has_type_mask(TypeMask::STRING));
        assert!(Value::native_pfunction(|_| Ok(Value::Null)).is_function());
        assert_eq!(Value::None.type_name(), "null");
    }
}
