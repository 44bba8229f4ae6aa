use std::borrow::Cow;

use log::debug;

use crate::{
    Class, Closure, Engine, ErrorCode, ErrorResult, ExecState, Instance, MetaMethod, Ref, Result,
    Struct, StructInstance, Value,
    error::bail,
    lookup::meta_method,
    stack::RegisterStack,
};

/// Callback surface handed to host functions.
pub trait Runtime {
    fn engine(&self) -> &Engine;

    /// Root table of the runtime.
    fn root(&self) -> Value;

    /// Calls `callee`. `args[0]` is the receiver, an empty slice passes the
    /// root table.
    fn call(&mut self, callee: &Value, args: &[Value]) -> Result<Value>;

    fn get(&mut self, object: &Value, key: &Value) -> Result<Value>;

    fn set(&mut self, object: &Value, key: &Value, value: Value) -> Result<()>;
}

pub const DEFAULT_STACK_SIZE: usize = 1 << 16;

/// Nested calls recurse on the host stack, keep this well below what the
/// host thread can afford.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub struct VmCreateInfo {
    /// Maximum number of values on the register stack.
    pub stack_size: usize,
    pub max_call_depth: usize,
}

impl Default for VmCreateInfo {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub callable: Value,
    pub base: usize,
    pub previous_top: usize,
    pub line: u32,
}

/// A virtual machine: a root table, a register stack and a call stack.
///
/// Not thread safe. Several VMs may share one [`Engine`].
pub struct Vm {
    pub(crate) engine: Engine,
    root: Value,
    pub(crate) stack: RegisterStack,
    pub(crate) frames: Vec<Frame>,
    /// Nested `call_value` invocations, frames or not.
    depth: usize,
    max_call_depth: usize,
    error_message: String,
    pub(crate) state: ExecState,
}

impl Vm {
    pub fn new(engine: Engine, info: VmCreateInfo) -> Result<Self> {
        if info.max_call_depth == 0 || info.stack_size == 0 {
            bail!(ErrorCode::InvalidArgument, "stack size and call depth must be positive");
        }

        let root = Value::new_table(&engine)?;
        debug!(
            "vm created: stack_size={} max_call_depth={}",
            info.stack_size, info.max_call_depth
        );
        Ok(Self {
            engine,
            root,
            stack: RegisterStack::new(info.stack_size),
            frames: Vec::new(),
            depth: 0,
            max_call_depth: info.max_call_depth,
            error_message: String::new(),
            state: ExecState::Done,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn set_root(&mut self, root: Value) {
        self.root = root;
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Every error reported since the last [`clear_error`](Self::clear_error),
    /// one per line.
    pub fn last_error(&self) -> &str {
        &self.error_message
    }

    pub fn clear_error(&mut self) {
        self.error_message.clear();
    }

    pub(crate) fn report_error(&mut self, message: &str) {
        debug!("{message}");
        if !self.error_message.is_empty() {
            self.error_message.push('\n');
        }
        self.error_message.push_str(message);
    }

    // ── host stack ─────────────────────────────────────────────────

    pub fn push(&mut self, value: impl Into<Value>) -> Result<()> {
        self.stack.push(value.into())
    }

    pub fn pop(&mut self) -> Option<Value> {
        if self.stack.len() <= self.host_base() {
            return None;
        }
        self.stack.pop()
    }

    pub fn top(&self) -> Option<&Value> {
        if self.stack.len() <= self.host_base() {
            return None;
        }
        self.stack.last()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len() - self.host_base()
    }

    /// Reads a host stack slot. Negative indices count from the top.
    pub fn stack_get(&self, index: isize) -> Result<Value> {
        let len = self.stack_len() as isize;
        let resolved = if index < 0 { len + index } else { index };
        if resolved < 0 || resolved >= len {
            bail!(ErrorCode::OutOfBounds, "stack index {index} out of bounds for length {len}");
        }
        Ok(self
            .stack
            .get(self.host_base() + resolved as usize)
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Values below this index belong to running frames.
    fn host_base(&self) -> usize {
        self.frames.last().map_or(0, |frame| frame.base)
    }

    /// Calls the value sitting below the top `n_params` values.
    ///
    /// The callee and arguments are popped and replaced by the result. With
    /// `n_params == 0` the root table is passed as `this`.
    pub fn call_top(&mut self, n_params: usize) -> ErrorResult {
        if self.stack_len() < n_params + 1 {
            self.report_error(&format!("call_top({n_params}) with only {} values", self.stack_len()));
            return ErrorResult::new(ErrorCode::StackError);
        }

        let mut values = self.stack.split_off(self.stack.len() - n_params - 1);
        let callee = values.remove(0);
        match self.call(&callee, &values) {
            Ok(result) => match self.stack.push(result) {
                Ok(()) => ErrorResult::OK,
                Err(err) => ErrorResult::new(err.code),
            },
            Err(err) => ErrorResult::new(err.code),
        }
    }

    /// Host-level call. `args[0]` is `this`, an empty slice passes the root
    /// table.
    pub fn call(&mut self, callee: &Value, args: &[Value]) -> Result<Value> {
        let is_top_level = self.frames.is_empty();
        // A host function may have swallowed an earlier failure.
        self.state = ExecState::Running;

        let result = self.call_value(callee, args);
        if let Err(err) = &result {
            if self.state != ExecState::Error {
                self.report_error(&err.to_string());
                self.state = ExecState::Error;
            }
        }

        if is_top_level {
            self.state = ExecState::Done;
        }
        result
    }

    // ── calls ──────────────────────────────────────────────────────

    /// Calls any callable kind.
    pub(crate) fn call_value(&mut self, callee: &Value, args: &[Value]) -> Result<Value> {
        if self.depth >= self.max_call_depth {
            bail!(
                ErrorCode::OutOfBounds,
                "call depth exceeded (max {})",
                self.max_call_depth
            );
        }

        self.depth += 1;
        let result = self.dispatch_call(callee, args);
        self.depth -= 1;

        if result.is_ok() && !self.frames.is_empty() {
            self.state = ExecState::Running;
        }
        result
    }

    fn dispatch_call(&mut self, callee: &Value, args: &[Value]) -> Result<Value> {
        let args: Cow<'_, [Value]> = if args.is_empty() {
            Cow::Owned(vec![self.root.clone()])
        } else {
            Cow::Borrowed(args)
        };

        match callee {
            Value::Closure(closure) => self.call_closure(closure, &args),
            Value::NativeClosure(native) => {
                let native = native.clone();
                self.call_native(callee, |vm| native.call(vm, &args))
            }
            Value::NativeFunction(function) => {
                let function = *function;
                self.call_native(callee, |vm| function(vm, &args))
            }
            Value::NativePFunction(function) => {
                let function = *function;
                self.call_native(callee, |_| function(&args))
            }
            Value::Class(class) => self.construct_instance(class, &args),
            Value::Struct(strct) => self.construct_struct(strct, &args),
            Value::Table(_) | Value::UserData(_) => {
                let Some(method) = meta_method(callee, MetaMethod::Call) else {
                    bail!(ErrorCode::InvalidType, "{} has no __call", callee.type_name());
                };
                let mut call_args = Vec::with_capacity(args.len());
                call_args.push(callee.clone());
                call_args.extend(args.iter().skip(1).cloned());
                self.call_value(&method, &call_args)
            }
            other => bail!(ErrorCode::InvalidType, "{} is not callable", other.type_name()),
        }
    }

    fn call_native(
        &mut self,
        callee: &Value,
        f: impl FnOnce(&mut Vm) -> Result<Value>,
    ) -> Result<Value> {
        let top = self.stack.len();
        self.frames.push(Frame {
            callable: callee.clone(),
            base: top,
            previous_top: top,
            line: 0,
        });
        debug!("enter native {} (depth {})", callee.kind(), self.frames.len());

        let result = f(self);

        if let Some(frame) = self.frames.pop() {
            self.stack.truncate(frame.previous_top);
        }
        debug!("leave native {}", callee.kind());
        result
    }

    /// Binds arguments into a fresh frame and runs the closure.
    fn call_closure(&mut self, closure: &Ref<Closure>, args: &[Value]) -> Result<Value> {
        let proto = closure.prototype().clone();
        let n_expected = proto.parameter_count();

        let defaults: Vec<Value> = if args.len() < n_expected {
            let diff = n_expected - args.len();
            let available = closure.default_params();
            if diff > available.len() {
                bail!(
                    ErrorCode::InvalidParameterCount,
                    "{} expects {n_expected} parameters, got {}",
                    proto.name,
                    args.len()
                );
            }
            available[available.len() - diff..].to_vec()
        } else if args.len() > n_expected {
            bail!(
                ErrorCode::InvalidParameterCount,
                "{} expects {n_expected} parameters, got {}",
                proto.name,
                args.len()
            );
        } else {
            Vec::new()
        };

        for (index, arg) in args.iter().enumerate() {
            let mask = proto.restricted_type(index);
            if !mask.is_empty() && !arg.has_type_mask(mask) {
                let name = proto.parameter_names.get(index).map_or("?", String::as_str);
                bail!(
                    ErrorCode::InvalidParameterType,
                    "parameter '{name}' of {} cannot be {}",
                    proto.name,
                    arg.type_name()
                );
            }
        }

        let base = self.stack.len();
        let frame_size = proto.stack_size.max(n_expected);
        let bound = self.bind_frame(base, frame_size, args, &defaults);
        if let Err(err) = bound {
            self.stack.truncate(base);
            return Err(err);
        }

        let this = closure.this();
        if !this.is_null() {
            if let Some(slot) = self.stack.get_mut(base) {
                *slot = this;
            }
        }

        self.frames.push(Frame {
            callable: Value::Closure(closure.clone()),
            base,
            previous_top: base,
            line: 0,
        });
        debug!("enter {} (depth {})", proto.name, self.frames.len());

        let result = self.execute(closure, &proto, base, frame_size);

        if let Some(frame) = self.frames.pop() {
            self.stack.truncate(frame.previous_top);
        }
        debug!("leave {}", proto.name);
        result
    }

    fn bind_frame(&mut self, base: usize, size: usize, args: &[Value], defaults: &[Value]) -> Result<()> {
        for value in args.iter().chain(defaults) {
            self.stack.push(value.clone())?;
        }
        self.stack.pad_to(base + size)
    }

    /// Calling a class makes an instance and runs its `constructor`.
    fn construct_instance(&mut self, class: &Ref<Class>, args: &[Value]) -> Result<Value> {
        let instance = Value::Instance(Ref::new(&self.engine, Instance::new(class.clone()))?);

        if let Some(constructor) = class.lookup(&Value::string_view("constructor")) {
            let mut ctor_args = Vec::with_capacity(args.len());
            ctor_args.push(instance.clone());
            ctor_args.extend(args.iter().skip(1).cloned());
            self.call_value(&constructor, &ctor_args)?;
        }
        Ok(instance)
    }

    /// Calling a struct runs its constructor, or assigns the arguments to
    /// the members in declaration order.
    fn construct_struct(&mut self, strct: &Ref<Struct>, args: &[Value]) -> Result<Value> {
        let instance = Ref::new(&self.engine, StructInstance::new(strct.clone()))?;
        let value = Value::StructInstance(instance.clone());
        let params = args.get(1..).unwrap_or_default();

        let constructor = strct.constructor();
        if !constructor.is_null() {
            let mut ctor_args = Vec::with_capacity(params.len() + 1);
            ctor_args.push(value.clone());
            ctor_args.extend(params.iter().cloned());

            instance.set_initializing(true);
            let result = self.call_value(&constructor, &ctor_args);
            instance.set_initializing(false);
            result?;
            return Ok(value);
        }

        let member_count = strct.members().len();
        if params.len() > member_count {
            bail!(
                ErrorCode::InvalidParameterCount,
                "struct has {member_count} members, got {} values",
                params.len()
            );
        }
        for (index, param) in params.iter().enumerate() {
            let Some(member) = strct.member(index) else { break };
            if !member.accepts(param) {
                bail!(
                    ErrorCode::InvalidValueTypeAssignment,
                    "member {:?} cannot hold {}",
                    member.name,
                    param.type_name()
                );
            }
            instance.set(index, param.clone());
        }
        Ok(value)
    }
}

impl Runtime for Vm {
    fn engine(&self) -> &Engine {
        &self.engine
    }

    fn root(&self) -> Value {
        self.root.clone()
    }

    fn call(&mut self, callee: &Value, args: &[Value]) -> Result<Value> {
        Vm::call(self, callee, args)
    }

    fn get(&mut self, object: &Value, key: &Value) -> Result<Value> {
        Vm::get(self, object, key)
    }

    fn set(&mut self, object: &Value, key: &Value, value: Value) -> Result<()> {
        Vm::set(self, object, key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FunctionPrototype, StructMember, TypeMask, VarDeclFlags};

    fn vm() -> Vm {
        Vm::new(Engine::default(), VmCreateInfo::default()).unwrap()
    }

    fn add_args(_: &mut dyn Runtime, args: &[Value]) -> Result<Value> {
        let mut sum = 0;
        for arg in &args[1..] {
            sum += arg.to_int()?;
        }
        Ok(Value::from(sum))
    }

    #[test]
    fn host_stack_call_top() {
        let mut vm = vm();
        vm.push(Value::native_function(add_args)).unwrap();
        vm.push(Value::Null).unwrap();
        vm.push(2).unwrap();
        vm.push(3).unwrap();
        assert!(!vm.call_top(3).is_err());
        assert_eq!(vm.stack_len(), 1);
        assert_eq!(vm.stack_get(-1).unwrap(), Value::from(5));
        assert_eq!(vm.pop(), Some(Value::from(5)));
        assert_eq!(vm.pop(), None);
        assert_eq!(vm.state(), ExecState::Done);
    }

    #[test]
    fn call_top_reports_failures() {
        let mut vm = vm();
        vm.push(Value::from(1)).unwrap();
        let result = vm.call_top(0);
        assert!(result.is_err());
        assert_eq!(result.code(), ErrorCode::InvalidType);
        assert!(vm.last_error().contains("not callable"));
        assert_eq!(vm.call_top(4).code(), ErrorCode::StackError);
    }

    #[test]
    fn empty_args_pass_the_root() {
        fn echo(_: &mut dyn Runtime, args: &[Value]) -> Result<Value> {
            Ok(args[0].clone())
        }

        let mut vm = vm();
        let root = vm.root().clone();
        let this = vm.call(&Value::native_function(echo), &[]).unwrap();
        assert!(this.ptr_eq(&root));
    }

    #[test]
    fn parameter_count_and_types_are_checked() {
        let mut vm = vm();
        let engine = vm.engine().clone();
        let proto = Ref::new(&engine, FunctionPrototype {
            name: "f".into(),
            parameter_names: vec!["this".into(), "x".into()],
            restricted_types: vec![TypeMask::NONE, TypeMask::NUMBER],
            stack_size: 2,
            ..Default::default()
        })
        .unwrap();
        let closure = Value::new_closure(&engine, &proto, vm.root().clone()).unwrap();

        let err = vm.call(&closure, &[Value::Null]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameterCount);
        let err = vm.call(&closure, &[Value::Null, Value::string_view("s")]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameterType);
        assert_eq!(vm.call(&closure, &[Value::Null, Value::from(1)]).unwrap(), Value::Null);
        assert_eq!(vm.state(), ExecState::Done);
    }

    #[test]
    fn struct_positional_construction() {
        let mut vm = vm();
        let engine = vm.engine().clone();
        let strct = Ref::new(&engine, Struct::new()).unwrap();
        strct.push_member(StructMember {
            name: Value::string_view("x"),
            value: Value::from(0),
            mask: TypeMask::INTEGER,
            flags: VarDeclFlags::NONE,
        });
        let callee = Value::Struct(strct);

        let instance = vm.call(&callee, &[Value::Null, Value::from(4)]).unwrap();
        assert_eq!(vm.get(&instance, &Value::string_view("x")).unwrap(), Value::from(4));

        let err = vm.call(&callee, &[Value::Null, Value::from(1), Value::from(2)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameterCount);
        let err = vm.call(&callee, &[Value::Null, Value::from(1.5)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidValueTypeAssignment);
    }

    #[test]
    fn table_call_meta_method() {
        fn invoked(args: &[Value]) -> Result<Value> {
            Ok(Value::from(args.len()))
        }

        let mut vm = vm();
        let engine = vm.engine().clone();
        let delegate = Value::new_table(&engine).unwrap();
        delegate
            .as_table()
            .unwrap()
            .insert(Value::string_view("__call"), Value::native_pfunction(invoked));
        let table = Value::new_table(&engine).unwrap();
        table.set_delegate(delegate).unwrap();

        let result = vm.call(&table, &[Value::Null, Value::from(1), Value::from(2)]).unwrap();
        assert_eq!(result, Value::from(3));
    }

    #[test]
    fn self_calling_table_hits_the_depth_limit() {
        let mut vm = Vm::new(Engine::default(), VmCreateInfo {
            max_call_depth: 16,
            ..Default::default()
        })
        .unwrap();
        let engine = vm.engine().clone();
        let delegate = Value::new_table(&engine).unwrap();
        let table = Value::new_table(&engine).unwrap();
        delegate.as_table().unwrap().insert(Value::string_view("__call"), table.clone());
        table.set_delegate(delegate.clone()).unwrap();

        let err = vm.call(&table, &[Value::Null]).unwrap_err();
        assert_eq!(err.code, ErrorCode::OutOfBounds);
        assert_eq!(vm.state(), ExecState::Done);
        assert_eq!(vm.stack_len(), 0);

        delegate.as_table().unwrap().remove(&Value::string_view("__call"));
    }

    #[test]
    fn swallowed_failures_are_each_reported() {
        fn retry(rt: &mut dyn Runtime, args: &[Value]) -> Result<Value> {
            assert!(rt.call(&args[1], &[]).is_err());
            assert!(rt.call(&args[1], &[]).is_err());
            Ok(Value::Null)
        }

        let mut vm = vm();
        let result = vm.call(&Value::native_function(retry), &[Value::Null, Value::from(1)]);
        assert_eq!(result.unwrap(), Value::Null);
        assert_eq!(vm.last_error().lines().count(), 2, "{}", vm.last_error());
        assert_eq!(vm.state(), ExecState::Done);
    }
}
