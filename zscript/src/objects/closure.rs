//! Function prototypes, closures and capture cells.

use std::{
    cell::{Cell, Ref as CellRef, RefCell},
    fmt,
};

use log::debug;

use crate::{
    AllocTag, Engine, Instruction, ObjectType, Payload, Ref, ReleaseHook, Result, Runtime,
    TypeMask, UserPointer, Value,
};

/// Where a closure pulls a captured value from at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// A register of the frame creating the closure.
    Local(u32),
    /// A capture of the closure creating the closure.
    Outer(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureInfo {
    pub name: String,
    pub source: CaptureSource,
}

impl CaptureInfo {
    pub fn local(name: impl Into<String>, register: u32) -> Self {
        Self {
            name: name.into(),
            source: CaptureSource::Local(register),
        }
    }

    pub fn outer(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            source: CaptureSource::Outer(index),
        }
    }
}

/// Immutable compiled function.
///
/// `parameter_names` includes the implicit `this` in position 0.
/// `default_params` are registers of the creating frame holding the default
/// values, copied into the closure when it is instantiated.
#[derive(Default)]
pub struct FunctionPrototype {
    pub name: String,
    pub source_name: String,
    pub instructions: Vec<Instruction>,
    pub literals: Vec<Value>,
    pub functions: Vec<Ref<FunctionPrototype>>,
    pub captures: Vec<CaptureInfo>,
    pub default_params: Vec<u32>,
    pub parameter_names: Vec<String>,
    pub restricted_types: Vec<TypeMask>,
    pub stack_size: usize,
}

impl FunctionPrototype {
    pub fn parameter_count(&self) -> usize {
        self.parameter_names.len()
    }

    /// Restricted mask of parameter `index`, empty when unrestricted.
    pub fn restricted_type(&self, index: usize) -> TypeMask {
        self.restricted_types.get(index).copied().unwrap_or(TypeMask::NONE)
    }
}

impl fmt::Debug for FunctionPrototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionPrototype")
            .field("name", &self.name)
            .field("parameters", &self.parameter_names)
            .field("stack_size", &self.stack_size)
            .field("instructions", &self.instructions.len())
            .finish()
    }
}

impl Payload for FunctionPrototype {
    const KIND: ObjectType = ObjectType::FunctionPrototype;
    const TAG: AllocTag = AllocTag::Prototype;
}

/// A prototype bound to its environment.
pub struct Closure {
    prototype: Ref<FunctionPrototype>,
    root: RefCell<Value>,
    this: RefCell<Value>,
    captures: RefCell<Vec<Value>>,
    default_params: RefCell<Vec<Value>>,
    base: RefCell<Value>,
}

impl Closure {
    pub fn new(prototype: Ref<FunctionPrototype>, root: Value) -> Self {
        Self {
            prototype,
            root: RefCell::new(root),
            this: RefCell::new(Value::Null),
            captures: RefCell::new(Vec::new()),
            default_params: RefCell::new(Vec::new()),
            base: RefCell::new(Value::Null),
        }
    }

    pub fn prototype(&self) -> &Ref<FunctionPrototype> {
        &self.prototype
    }

    pub fn root(&self) -> Value {
        self.root.borrow().clone()
    }

    pub fn set_root(&self, root: Value) {
        *self.root.borrow_mut() = root;
    }

    /// Bound receiver, null when unbound.
    pub fn this(&self) -> Value {
        self.this.borrow().clone()
    }

    pub fn bind_this(&self, this: Value) {
        *self.this.borrow_mut() = this;
    }

    pub fn captures(&self) -> CellRef<'_, Vec<Value>> {
        self.captures.borrow()
    }

    pub fn capture(&self, index: usize) -> Option<Value> {
        self.captures.borrow().get(index).cloned()
    }

    pub(crate) fn push_capture(&self, value: Value) {
        self.captures.borrow_mut().push(value);
    }

    /// Returns `false` when `index` is out of range.
    pub(crate) fn replace_capture(&self, index: usize, value: Value) -> bool {
        match self.captures.borrow_mut().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn default_params(&self) -> CellRef<'_, Vec<Value>> {
        self.default_params.borrow()
    }

    pub(crate) fn push_default_param(&self, value: Value) {
        self.default_params.borrow_mut().push(value);
    }

    /// Weak link to the struct or class the closure is a method of.
    pub fn base(&self) -> Value {
        self.base.borrow().clone()
    }

    pub fn set_base(&self, base: Value) {
        *self.base.borrow_mut() = base;
    }
}

impl Payload for Closure {
    const KIND: ObjectType = ObjectType::Closure;
    const TAG: AllocTag = AllocTag::Closure;
}

/// Boxed host function carried by a native closure.
pub type NativeClosureFn = Box<dyn Fn(&mut dyn Runtime, &[Value]) -> Result<Value>>;

pub struct NativeClosure {
    function: NativeClosureFn,
    user_pointer: UserPointer,
    release_hook: Cell<Option<ReleaseHook>>,
}

impl NativeClosure {
    pub fn new(
        function: NativeClosureFn,
        user_pointer: UserPointer,
        release_hook: Option<ReleaseHook>,
    ) -> Self {
        Self {
            function,
            user_pointer,
            release_hook: Cell::new(release_hook),
        }
    }

    pub fn call(&self, runtime: &mut dyn Runtime, args: &[Value]) -> Result<Value> {
        (self.function)(runtime, args)
    }

    pub fn user_pointer(&self) -> UserPointer {
        self.user_pointer
    }

    pub fn set_release_hook(&self, hook: Option<ReleaseHook>) {
        self.release_hook.set(hook);
    }
}

impl Payload for NativeClosure {
    const KIND: ObjectType = ObjectType::NativeClosure;
    const TAG: AllocTag = AllocTag::NativeClosure;

    fn finalize(&mut self, engine: &Engine) {
        if let Some(hook) = self.release_hook.take() {
            debug!("running native closure release hook");
            hook(engine, self.user_pointer);
        }
    }
}

/// Shared mutable box. Closures capturing the same cell see each other's
/// writes.
pub struct Capture {
    value: RefCell<Value>,
}

impl Capture {
    pub fn new(value: Value) -> Self {
        Self {
            value: RefCell::new(value),
        }
    }

    pub fn get(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.value.borrow_mut() = value;
    }
}

impl Payload for Capture {
    const KIND: ObjectType = ObjectType::Capture;
    const TAG: AllocTag = AllocTag::Capture;
}
