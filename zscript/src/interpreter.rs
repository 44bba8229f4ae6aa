//! The dispatch loop.

use std::cmp::Ordering;

use log::trace;

use crate::{
    ArithOp, Closure, CompareOp, Error, ErrorCode, FunctionPrototype, GetFlags, Instruction,
    InstructionCursor, MetaMethod, Ref, Result, Value, Vm,
    compare::{equals, strict_equals},
    error::bail,
    lookup::meta_method,
    objects::CaptureSource,
    slots,
};

/// Where execution goes after an instruction.
#[derive(Debug)]
pub(crate) enum Flow {
    Next,
    Jump(i32),
    Returned(Value),
}

/// Execution state of a [`Vm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Running,
    /// The current frame just returned and is being unwound.
    Returned,
    Error,
    /// The top-level call finished, successfully or not.
    Done,
}

/// Register window of the executing frame.
#[derive(Debug, Clone, Copy)]
struct Registers {
    base: usize,
    size: usize,
}

impl Vm {
    pub(crate) fn execute(
        &mut self,
        closure: &Ref<Closure>,
        proto: &FunctionPrototype,
        base: usize,
        size: usize,
    ) -> Result<Value> {
        let regs = Registers { base, size };
        let mut cursor = InstructionCursor::new(&proto.instructions);

        while let Some(instruction) = cursor.current() {
            trace!("{}:{:04} {instruction}", proto.name, cursor.index());

            let flow = match self.dispatch(closure, proto, regs, instruction) {
                Ok(flow) => flow,
                Err(err) => return Err(self.fail(proto, err)),
            };

            match flow {
                Flow::Next => cursor.advance(),
                Flow::Jump(offset) => {
                    if let Err(err) = cursor.jump(offset) {
                        return Err(self.fail(proto, err));
                    }
                }
                Flow::Returned(value) => {
                    self.state = ExecState::Returned;
                    return Ok(value);
                }
            }
        }

        Ok(Value::Null)
    }

    /// Records the first report of an error as it leaves the innermost
    /// frame.
    fn fail(&mut self, proto: &FunctionPrototype, err: Error) -> Error {
        if self.state != ExecState::Error {
            let line = self.frames.last().map_or(0, |frame| frame.line);
            self.report_error(&format!("{}:{line}: {err}", proto.name));
            self.state = ExecState::Error;
        }
        err
    }

    // ── registers ──────────────────────────────────────────────────

    #[inline(always)]
    fn reg(&self, regs: Registers, index: usize) -> Result<Value> {
        if index >= regs.size {
            bail!(ErrorCode::OutOfBounds, "register r{index} outside a frame of {}", regs.size);
        }
        Ok(self.stack.get(regs.base + index).cloned().unwrap_or(Value::Null))
    }

    #[inline(always)]
    fn set_reg(&mut self, regs: Registers, index: usize, value: Value) -> Result<()> {
        if index >= regs.size {
            bail!(ErrorCode::OutOfBounds, "register r{index} outside a frame of {}", regs.size);
        }
        match self.stack.get_mut(regs.base + index) {
            Some(slot) => *slot = value,
            None => bail!(ErrorCode::StackError, "register r{index} is not on the stack"),
        }
        Ok(())
    }

    // ── dispatch ───────────────────────────────────────────────────

    fn dispatch(
        &mut self,
        closure: &Ref<Closure>,
        proto: &FunctionPrototype,
        regs: Registers,
        instruction: &Instruction,
    ) -> Result<Flow> {
        macro_rules! r {
            ($reg:expr) => {
                self.reg(regs, $reg as usize)?
            };
        }
        macro_rules! store {
            ($reg:expr, $value:expr) => {{
                let value = $value;
                self.set_reg(regs, $reg as usize, value)?;
            }};
        }
        macro_rules! binary {
            ($op:expr, $target:expr, $lhs:expr, $rhs:expr) => {{
                let (lhs, rhs) = (r!($lhs), r!($rhs));
                store!($target, self.binary_op($op, &lhs, &rhs)?);
            }};
        }
        macro_rules! compound {
            ($op:expr, $target:expr, $rhs:expr) => {{
                let (lhs, rhs) = (r!($target), r!($rhs));
                store!($target, self.compound_op($op, &lhs, &rhs)?);
            }};
        }

        match *instruction {
            Instruction::Line { line } => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.line = line;
                }
            }

            Instruction::Load { target, idx } => {
                let Some(literal) = proto.literals.get(idx as usize) else {
                    bail!(ErrorCode::OutOfBounds, "literal #{idx} out of {}", proto.literals.len());
                };
                store!(target, literal.clone());
            }
            Instruction::LoadInt { target, value } => store!(target, Value::Integer(value)),
            Instruction::LoadFloat { target, value } => store!(target, Value::Float(value)),
            Instruction::LoadBool { target, value } => store!(target, Value::Bool(value)),
            Instruction::LoadSmallString { target, value } => store!(target, Value::SmallString(value)),
            Instruction::LoadNull { target } => store!(target, Value::Null),
            Instruction::LoadNulls { target, count } => {
                for i in 0..count as usize {
                    store!(target as usize + i, Value::Null);
                }
            }
            Instruction::LoadNone { target } => store!(target, Value::None),
            Instruction::LoadRoot { target } => store!(target, closure.root()),
            Instruction::Move { target, src } => store!(target, r!(src)),

            Instruction::Get {
                target,
                table,
                key,
                flags,
            } => {
                let (object, key) = (r!(table), r!(key));
                let value = match self.get(&object, &key) {
                    Ok(value) => Ok(value),
                    Err(err) if err.code == ErrorCode::NotFound && flags.contains(GetFlags::LOOK_IN_ROOT) => {
                        let root = closure.root();
                        self.get(&root, &key)
                    }
                    Err(err) => Err(err),
                };
                match value {
                    Ok(value) => store!(target, value),
                    Err(err) => {
                        store!(target, Value::Null);
                        return Err(err);
                    }
                }
            }
            Instruction::Set { table, key, value } => {
                let (object, key, value) = (r!(table), r!(key), r!(value));
                self.set(&object, &key, value)?;
            }

            Instruction::GetCapture { target, idx } => {
                let Some(captured) = closure.capture(idx as usize) else {
                    bail!(ErrorCode::OutOfBounds, "capture #{idx} out of range");
                };
                let value = match &captured {
                    Value::Capture(cell) => cell.get(),
                    _ => captured,
                };
                store!(target, value);
            }
            Instruction::SetCapture { idx, src } => {
                let value = r!(src);
                match closure.capture(idx as usize) {
                    Some(Value::Capture(cell)) => cell.set(value),
                    Some(_) => {
                        closure.replace_capture(idx as usize, value);
                    }
                    None => bail!(ErrorCode::OutOfBounds, "capture #{idx} out of range"),
                }
            }

            Instruction::Add { target, lhs, rhs } => binary!(ArithOp::Add, target, lhs, rhs),
            Instruction::Sub { target, lhs, rhs } => binary!(ArithOp::Sub, target, lhs, rhs),
            Instruction::Mul { target, lhs, rhs } => binary!(ArithOp::Mul, target, lhs, rhs),
            Instruction::Div { target, lhs, rhs } => binary!(ArithOp::Div, target, lhs, rhs),
            Instruction::Mod { target, lhs, rhs } => binary!(ArithOp::Mod, target, lhs, rhs),
            Instruction::Exp { target, lhs, rhs } => binary!(ArithOp::Exp, target, lhs, rhs),
            Instruction::BitwiseOr { target, lhs, rhs } => binary!(ArithOp::BitOr, target, lhs, rhs),
            Instruction::BitwiseAnd { target, lhs, rhs } => binary!(ArithOp::BitAnd, target, lhs, rhs),
            Instruction::BitwiseXor { target, lhs, rhs } => binary!(ArithOp::BitXor, target, lhs, rhs),
            Instruction::LShift { target, lhs, rhs } => binary!(ArithOp::LShift, target, lhs, rhs),
            Instruction::RShift { target, lhs, rhs } => binary!(ArithOp::RShift, target, lhs, rhs),

            Instruction::AddEq { target, rhs } => compound!(ArithOp::Add, target, rhs),
            Instruction::SubEq { target, rhs } => compound!(ArithOp::Sub, target, rhs),
            Instruction::MulEq { target, rhs } => compound!(ArithOp::Mul, target, rhs),
            Instruction::DivEq { target, rhs } => compound!(ArithOp::Div, target, rhs),
            Instruction::ModEq { target, rhs } => compound!(ArithOp::Mod, target, rhs),
            Instruction::ExpEq { target, rhs } => compound!(ArithOp::Exp, target, rhs),

            Instruction::Eq { target, lhs, rhs } => {
                let (lhs, rhs) = (r!(lhs), r!(rhs));
                store!(target, Value::Bool(equals(&lhs, &rhs)));
            }
            Instruction::Ne { target, lhs, rhs } => {
                let (lhs, rhs) = (r!(lhs), r!(rhs));
                store!(target, Value::Bool(!equals(&lhs, &rhs)));
            }
            Instruction::Cmp {
                target,
                op,
                lhs,
                rhs,
            } => {
                let (lhs, rhs) = (r!(lhs), r!(rhs));
                let result = match op {
                    CompareOp::Tw => strict_equals(&lhs, &rhs),
                    CompareOp::Lt => self.compare_op(&lhs, &rhs)? == Ordering::Less,
                    CompareOp::Gt => self.compare_op(&lhs, &rhs)? == Ordering::Greater,
                    CompareOp::Le => self.compare_op(&lhs, &rhs)? != Ordering::Greater,
                    CompareOp::Ge => self.compare_op(&lhs, &rhs)? != Ordering::Less,
                };
                store!(target, Value::Bool(result));
            }

            Instruction::Not { target, src } => store!(target, Value::Bool(!r!(src).is_truthy())),
            Instruction::And { target, src, offset } => {
                let truthy = r!(src).is_truthy();
                store!(target, Value::Bool(truthy));
                if !truthy {
                    return Ok(Flow::Jump(offset));
                }
            }
            Instruction::Or { target, src, offset } => {
                let truthy = r!(src).is_truthy();
                store!(target, Value::Bool(truthy));
                if truthy {
                    return Ok(Flow::Jump(offset));
                }
            }
            Instruction::Exists { target, table, key } => {
                let (object, key) = (r!(table), r!(key));
                let exists = self.exists(&object, &key);
                store!(target, Value::Bool(exists));
            }
            Instruction::IfNull { target, src, offset } => {
                let value = r!(src);
                let present = !value.is_null_or_none();
                store!(target, value);
                if present {
                    return Ok(Flow::Jump(offset));
                }
            }

            Instruction::Incr { target, src, is_incr } => {
                let old = r!(src);
                let new = self.step(&old, is_incr)?;
                store!(target, old);
                store!(src, new);
            }
            Instruction::PIncr { target, src, is_incr } => {
                let new = self.step(&r!(src), is_incr)?;
                store!(src, new.clone());
                store!(target, new);
            }
            Instruction::PObjIncr {
                target,
                table,
                key,
                is_incr,
            } => {
                let (object, key) = (r!(table), r!(key));
                let current = match self.get(&object, &key) {
                    Err(err) if err.code == ErrorCode::NotFound => {
                        let root = closure.root();
                        self.get(&root, &key)?
                    }
                    other => other?,
                };
                let new = self.step(&current, is_incr)?;
                self.set(&object, &key, new.clone())?;
                store!(target, new);
            }

            Instruction::Jmp { offset } => return Ok(Flow::Jump(offset)),
            Instruction::Jz { src, offset } => {
                if !r!(src).is_truthy() {
                    return Ok(Flow::Jump(offset));
                }
            }

            Instruction::Call {
                target,
                callee,
                n_params,
                stack_base,
            } => {
                let callee = r!(callee);
                let mut args = Vec::with_capacity(n_params as usize);
                for i in 0..n_params as usize {
                    args.push(r!(stack_base as usize + i));
                }
                let result = self.call_value(&callee, &args)?;
                store!(target, result);
            }
            Instruction::Return { src, has_value } => {
                let value = if has_value { r!(src) } else { Value::Null };
                return Ok(Flow::Returned(value));
            }
            Instruction::NewClosure { target, fct_idx } => {
                let value = self.instantiate(closure, proto, regs, fct_idx)?;
                store!(target, value);
            }
            Instruction::NewObj { target, kind } => store!(target, slots::new_object(&self.engine, kind)?),

            Instruction::NewSlot { table, key, value } => {
                let (object, key, value) = (r!(table), r!(key), r!(value));
                self.new_slot(&object, &key, value)?;
            }
            Instruction::ArrayAppend { array, value } => slots::array_append(&r!(array), r!(value))?,
            Instruction::NewClassSlot {
                class,
                key,
                value,
                is_static,
            } => slots::new_class_slot(&r!(class), r!(key), r!(value), is_static)?,
            Instruction::NewStructSlot {
                strct,
                key,
                value,
                has_value,
                mask,
                flags,
            } => {
                let value = if has_value { Some(r!(value)) } else { None };
                slots::new_struct_slot(&r!(strct), r!(key), value, mask, flags)?;
            }
            Instruction::NewStructMethod { strct, key, value } => {
                slots::new_struct_method(&r!(strct), r!(key), r!(value))?
            }
            Instruction::NewStructConstructor { strct, value } => {
                slots::new_struct_constructor(&r!(strct), r!(value))?
            }
            Instruction::SetStructName { strct, name } => slots::set_struct_name(&r!(strct), r!(name))?,
            Instruction::NewEnumSlot { table, key, value } => {
                slots::new_enum_slot(&r!(table), r!(key), r!(value))?
            }
            Instruction::CloseEnum { table } => slots::close_enum(&self.engine, &r!(table))?,

            Instruction::CheckType { src, kind } => slots::check_type(&r!(src), kind)?,
            Instruction::CheckTypeMask { src, mask } => {
                let value = r!(src);
                if !value.has_type_mask(mask) {
                    bail!(
                        ErrorCode::InvalidValueTypeAssignment,
                        "{} does not match type mask {:#x}",
                        value.type_name(),
                        mask.0
                    );
                }
            }
            Instruction::TypeOf { target, src } => {
                let value = r!(src);
                store!(target, self.type_of(&value)?);
            }
            Instruction::TypeId { target, src } => {
                store!(target, Value::string_view(r!(src).type_name()));
            }
            Instruction::GetBase { target } => {
                let base = match closure.base() {
                    Value::Null => Value::Null,
                    weak => weak.upgrade().unwrap_or(Value::Null),
                };
                store!(target, base);
            }
            Instruction::Clone { target, src } => {
                store!(target, slots::clone_value(&self.engine, &r!(src))?);
            }
        }

        Ok(Flow::Next)
    }

    /// `value ± 1` through the regular operator dispatch.
    fn step(&mut self, value: &Value, is_incr: bool) -> Result<Value> {
        let op = if is_incr { ArithOp::Add } else { ArithOp::Sub };
        self.binary_op(op, value, &Value::Integer(1))
    }

    /// Instantiates nested prototype `fct_idx`, resolving its captures and
    /// default parameters against the running frame.
    fn instantiate(
        &mut self,
        closure: &Ref<Closure>,
        proto: &FunctionPrototype,
        regs: Registers,
        fct_idx: u32,
    ) -> Result<Value> {
        let Some(nested) = proto.functions.get(fct_idx as usize) else {
            bail!(ErrorCode::OutOfBounds, "function #{fct_idx} out of {}", proto.functions.len());
        };

        let created = Ref::new(&self.engine, Closure::new(nested.clone(), closure.root()))?;
        for capture in &nested.captures {
            let value = match capture.source {
                CaptureSource::Local(src) => self.reg(regs, src as usize)?,
                CaptureSource::Outer(src) => match closure.capture(src as usize) {
                    Some(value) => value,
                    None => bail!(
                        ErrorCode::OutOfBounds,
                        "outer capture #{src} ({}) out of range",
                        capture.name
                    ),
                },
            };
            created.push_capture(value);
        }
        for &slot in &nested.default_params {
            created.push_default_param(self.reg(regs, slot as usize)?);
        }
        Ok(Value::Closure(created))
    }

    /// `__typeof` when defined, the exposed kind name otherwise.
    fn type_of(&mut self, value: &Value) -> Result<Value> {
        if let Some(method) = meta_method(value, MetaMethod::TypeOf) {
            return self.call_value(&method, &[value.clone()]);
        }
        Ok(Value::string_view(value.type_name()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{BytecodeBuilder, CaptureInfo, Engine, ObjectType, TypeMask, VmCreateInfo};

    fn vm_with(info: VmCreateInfo) -> Vm {
        Vm::new(Engine::default(), info).unwrap()
    }

    fn prototype(vm: &Vm, name: &str, stack_size: usize, code: BytecodeBuilder) -> Ref<FunctionPrototype> {
        Ref::new(vm.engine(), FunctionPrototype {
            name: name.into(),
            parameter_names: vec!["this".into()],
            instructions: code.finish(),
            stack_size,
            ..Default::default()
        })
        .unwrap()
    }

    fn closure(vm: &Vm, proto: &Ref<FunctionPrototype>) -> Value {
        Value::new_closure(vm.engine(), proto, vm.root().clone()).unwrap()
    }

    #[test]
    fn adds_two_integers() {
        let mut vm = vm_with(VmCreateInfo::default());
        let mut code = BytecodeBuilder::new();
        code.load_int(0, 5);
        code.load_int(1, 10);
        code.add(2, 0, 1);
        code.ret(2);
        let main = closure(&vm, &prototype(&vm, "main", 3, code));

        assert_eq!(vm.call(&main, &[]).unwrap(), Value::from(15));
        assert_eq!(vm.state(), ExecState::Done);
        assert_eq!(vm.call_depth(), 0);
    }

    #[test]
    fn jump_if_zero_takes_the_false_branch() {
        let mut vm = vm_with(VmCreateInfo::default());
        let mut code = BytecodeBuilder::new();
        code.emit(Instruction::LoadBool { target: 0, value: false });
        code.emit(Instruction::Jz { src: 0, offset: 3 });
        code.emit(Instruction::LoadInt { target: 1, value: 1 });
        code.emit(Instruction::Jmp { offset: 1 });
        code.emit(Instruction::LoadInt { target: 1, value: 2 });
        code.emit(Instruction::Return { src: 1, has_value: true });
        let main = closure(&vm, &prototype(&vm, "main", 2, code));

        assert_eq!(vm.call(&main, &[]).unwrap(), Value::from(2));
    }

    #[test]
    fn labels_resolve_forward_jumps() {
        let mut vm = vm_with(VmCreateInfo::default());
        let mut code = BytecodeBuilder::new();
        code.load_bool(0, true);
        let otherwise = code.jump_if_zero(0);
        code.load_int(1, 1);
        code.ret(1);
        code.bind(otherwise);
        code.load_int(1, 2);
        code.ret(1);
        let main = closure(&vm, &prototype(&vm, "main", 2, code));

        assert_eq!(vm.call(&main, &[]).unwrap(), Value::from(1));
    }

    #[test]
    fn loop_counts_down() {
        let mut vm = vm_with(VmCreateInfo::default());
        let mut code = BytecodeBuilder::new();
        code.load_int(0, 0);
        code.load_int(1, 4);
        let top = code.current_index();
        let done = code.jump_if_zero(1);
        code.pincr(0, 0, true);
        code.pincr(1, 1, false);
        code.jump_back(top);
        code.bind(done);
        code.ret(0);
        let main = closure(&vm, &prototype(&vm, "main", 2, code));

        assert_eq!(vm.call(&main, &[]).unwrap(), Value::from(4));
    }

    #[test]
    fn closures_capture_locals() {
        let mut vm = vm_with(VmCreateInfo::default());

        let mut inner_code = BytecodeBuilder::new();
        inner_code.get_capture(0, 0);
        inner_code.load_int(1, 1);
        inner_code.add(0, 0, 1);
        inner_code.ret(0);
        let inner = Ref::new(vm.engine(), FunctionPrototype {
            name: "inner".into(),
            parameter_names: vec!["this".into()],
            instructions: inner_code.finish(),
            captures: vec![CaptureInfo::local("x", 1)],
            stack_size: 2,
            ..Default::default()
        })
        .unwrap();

        let mut code = BytecodeBuilder::new();
        code.load_int(1, 7);
        code.new_closure(2, 0);
        code.call(3, 2, 0, 0);
        code.ret(3);
        let outer = Ref::new(vm.engine(), FunctionPrototype {
            name: "outer".into(),
            parameter_names: vec!["this".into()],
            instructions: code.finish(),
            functions: vec![inner],
            stack_size: 4,
            ..Default::default()
        })
        .unwrap();

        let main = closure(&vm, &outer);
        assert_eq!(vm.call(&main, &[]).unwrap(), Value::from(8));
    }

    fn capture_prototype(vm: &Vm, name: &str, capture: CaptureInfo, code: BytecodeBuilder) -> Ref<FunctionPrototype> {
        Ref::new(vm.engine(), FunctionPrototype {
            name: name.into(),
            parameter_names: vec!["this".into()],
            instructions: code.finish(),
            captures: vec![capture],
            stack_size: 2,
            ..Default::default()
        })
        .unwrap()
    }

    /// A setter storing 42 into capture 0 and a getter returning it.
    fn setter_and_getter(vm: &Vm, capture: CaptureInfo) -> Vec<Ref<FunctionPrototype>> {
        let mut set = BytecodeBuilder::new();
        set.load_int(1, 42);
        set.set_capture(0, 1);
        set.ret_null();

        let mut get = BytecodeBuilder::new();
        get.get_capture(0, 0);
        get.ret(0);

        vec![
            capture_prototype(vm, "set", capture.clone(), set),
            capture_prototype(vm, "get", capture, get),
        ]
    }

    /// Creates both siblings, calls the setter, then returns the getter's view.
    fn run_siblings(vm: &mut Vm, functions: Vec<Ref<FunctionPrototype>>, outer_cell: Option<Value>) -> Value {
        let mut code = BytecodeBuilder::new();
        code.load_int(1, 5);
        code.new_closure(2, 0);
        code.new_closure(3, 1);
        code.call(4, 2, 0, 0);
        code.call(4, 3, 0, 0);
        code.ret(4);
        let proto = Ref::new(vm.engine(), FunctionPrototype {
            name: "main".into(),
            parameter_names: vec!["this".into()],
            instructions: code.finish(),
            functions,
            stack_size: 5,
            ..Default::default()
        })
        .unwrap();

        let main = closure(vm, &proto);
        if let Some(cell) = outer_cell {
            main.as_closure().unwrap().push_capture(cell);
        }
        vm.call(&main, &[]).unwrap()
    }

    #[test]
    fn outer_captures_share_the_cell() {
        let mut vm = vm_with(VmCreateInfo::default());
        let functions = setter_and_getter(&vm, CaptureInfo::outer("x", 0));
        let cell = Value::new_capture(vm.engine(), Value::from(5)).unwrap();

        assert_eq!(run_siblings(&mut vm, functions, Some(cell.clone())), Value::from(42));
        let Value::Capture(cell) = cell else { unreachable!() };
        assert_eq!(cell.get(), Value::from(42));
    }

    #[test]
    fn local_captures_are_independent() {
        let mut vm = vm_with(VmCreateInfo::default());
        let functions = setter_and_getter(&vm, CaptureInfo::local("x", 1));

        assert_eq!(run_siblings(&mut vm, functions, None), Value::from(5));
    }

    #[test]
    fn nested_return_resumes_the_caller() {
        let mut vm = vm_with(VmCreateInfo::default());

        let mut inner_code = BytecodeBuilder::new();
        inner_code.load_int(0, 1);
        inner_code.ret(0);
        let inner = closure(&vm, &prototype(&vm, "inner", 1, inner_code));
        let key = Value::small_string("inner").unwrap();
        vm.root().as_table().unwrap().insert(key, inner);

        let mut code = BytecodeBuilder::new();
        code.load_small_string(1, "inner");
        code.get_or_root(2, 0, 1);
        code.call(3, 2, 0, 0);
        code.load_int(4, 1);
        code.add(0, 3, 4);
        code.ret(0);
        let main = closure(&vm, &prototype(&vm, "main", 5, code));

        assert_eq!(vm.call(&main, &[]).unwrap(), Value::from(2));
        assert_eq!(vm.state(), ExecState::Done);
    }

    #[test]
    fn unbounded_recursion_is_out_of_bounds() {
        let mut vm = vm_with(VmCreateInfo {
            max_call_depth: 8,
            ..Default::default()
        });

        let mut code = BytecodeBuilder::new();
        code.line(3);
        code.load_root(0);
        code.load_small_string(1, "f");
        code.get(2, 0, 1);
        code.call(3, 2, 0, 0);
        code.ret(3);
        let f = closure(&vm, &prototype(&vm, "f", 4, code));
        vm.root()
            .as_table()
            .unwrap()
            .insert(Value::small_string("f").unwrap(), f.clone());

        let err = vm.call(&f, &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::OutOfBounds);
        assert!(vm.last_error().starts_with("f:3:"), "{}", vm.last_error());
        assert_eq!(vm.state(), ExecState::Done);
        assert_eq!(vm.call_depth(), 0);
        assert_eq!(vm.stack_len(), 0);
    }

    #[test]
    fn register_outside_the_frame_fails() {
        let mut vm = vm_with(VmCreateInfo::default());
        let mut code = BytecodeBuilder::new();
        code.load_int(5, 1);
        let main = closure(&vm, &prototype(&vm, "main", 2, code));

        assert_eq!(vm.call(&main, &[]).unwrap_err().code, ErrorCode::OutOfBounds);
    }

    #[test]
    fn falling_off_the_end_returns_null() {
        let mut vm = vm_with(VmCreateInfo::default());
        let mut code = BytecodeBuilder::new();
        code.load_int(0, 3);
        let main = closure(&vm, &prototype(&vm, "main", 1, code));

        assert_eq!(vm.call(&main, &[]).unwrap(), Value::Null);
    }

    #[test]
    fn type_of_uses_exposed_names() {
        let mut vm = vm_with(VmCreateInfo::default());
        let mut code = BytecodeBuilder::new();
        code.load_float(1, 1.5);
        code.type_of(0, 1);
        code.ret(0);
        let main = closure(&vm, &prototype(&vm, "main", 2, code));

        let name = vm.call(&main, &[]).unwrap();
        assert_eq!(name.as_str().as_deref(), Some("float"));
    }

    #[test]
    fn type_id_names_the_kind() {
        let mut vm = vm_with(VmCreateInfo::default());
        let mut code = BytecodeBuilder::new();
        code.load_float(1, 1.5);
        code.emit(Instruction::TypeId { target: 0, src: 1 });
        code.ret(0);
        let main = closure(&vm, &prototype(&vm, "main", 2, code));

        let name = vm.call(&main, &[]).unwrap();
        assert_eq!(name.as_str().as_deref(), Some("float"));
        assert!(name.is_string());
    }

    #[test]
    fn postfix_increment_keeps_the_old_value() {
        let mut vm = vm_with(VmCreateInfo::default());
        let mut code = BytecodeBuilder::new();
        code.load_int(1, 5);
        code.incr(0, 1);
        code.emit(Instruction::Incr { target: 2, src: 1, is_incr: false });
        code.new_obj(3, ObjectType::Array);
        code.array_append(3, 0);
        code.array_append(3, 1);
        code.array_append(3, 2);
        code.ret(3);
        let main = closure(&vm, &prototype(&vm, "main", 4, code));

        let result = vm.call(&main, &[]).unwrap();
        assert_eq!(
            result.as_array().unwrap().to_vec(),
            vec![Value::from(5), Value::from(5), Value::from(6)]
        );
    }

    #[test]
    fn object_increment_falls_back_to_root() {
        let mut vm = vm_with(VmCreateInfo::default());
        let key = Value::small_string("counter").unwrap();
        vm.root().as_table().unwrap().insert(key.clone(), Value::from(41));

        let mut code = BytecodeBuilder::new();
        code.new_obj(0, ObjectType::Table);
        code.load_small_string(1, "counter");
        code.emit(Instruction::PObjIncr { target: 2, table: 0, key: 1, is_incr: true });
        code.emit(Instruction::PObjIncr { target: 3, table: 0, key: 1, is_incr: true });
        code.new_obj(4, ObjectType::Array);
        code.array_append(4, 2);
        code.array_append(4, 3);
        code.array_append(4, 0);
        code.ret(4);
        let main = closure(&vm, &prototype(&vm, "main", 5, code));

        let result = vm.call(&main, &[]).unwrap();
        let items = result.as_array().unwrap().to_vec();
        assert_eq!(items[..2].to_vec(), vec![Value::from(42), Value::from(43)]);
        assert_eq!(items[2].as_table().unwrap().get(&key), Some(Value::from(43)));
        assert_eq!(vm.root().as_table().unwrap().get(&key), Some(Value::from(41)));
    }

    #[test]
    fn get_looks_in_root_only_when_flagged() {
        let mut vm = vm_with(VmCreateInfo::default());
        let key = Value::small_string("answer").unwrap();
        vm.root().as_table().unwrap().insert(key, Value::from(7));

        let mut code = BytecodeBuilder::new();
        code.new_obj(0, ObjectType::Table);
        code.load_small_string(1, "answer");
        code.get_or_root(2, 0, 1);
        code.ret(2);
        let main = closure(&vm, &prototype(&vm, "main", 3, code));
        assert_eq!(vm.call(&main, &[]).unwrap(), Value::from(7));

        let mut code = BytecodeBuilder::new();
        code.new_obj(0, ObjectType::Table);
        code.load_small_string(1, "answer");
        code.get(2, 0, 1);
        code.ret(2);
        let main = closure(&vm, &prototype(&vm, "main", 3, code));
        assert_eq!(vm.call(&main, &[]).unwrap_err().code, ErrorCode::NotFound);
    }

    #[test]
    fn failed_type_checks_leave_the_stack_alone() {
        let mut vm = vm_with(VmCreateInfo::default());
        vm.push(Value::from(9)).unwrap();

        let mut code = BytecodeBuilder::new();
        code.load_int(1, 5);
        code.check_type(1, ObjectType::Integer);
        code.emit(Instruction::CheckTypeMask { src: 1, mask: TypeMask::NUMBER });
        code.ret(1);
        let main = closure(&vm, &prototype(&vm, "main", 2, code));
        assert_eq!(vm.call(&main, &[]).unwrap(), Value::from(5));

        let mut code = BytecodeBuilder::new();
        code.load_int(1, 5);
        code.check_type(1, ObjectType::Float);
        code.ret(1);
        let main = closure(&vm, &prototype(&vm, "main", 2, code));
        let err = vm.call(&main, &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidValueTypeAssignment);

        let mut code = BytecodeBuilder::new();
        code.load_int(1, 5);
        code.emit(Instruction::CheckTypeMask { src: 1, mask: TypeMask::STRING });
        code.ret(1);
        let main = closure(&vm, &prototype(&vm, "main", 2, code));
        let err = vm.call(&main, &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidValueTypeAssignment);

        assert_eq!(vm.stack_len(), 1);
        assert_eq!(vm.stack_get(-1).unwrap(), Value::from(9));
        assert_eq!(vm.state(), ExecState::Done);
    }

    #[test]
    fn compound_assignment_writes_the_lhs() {
        let mut vm = vm_with(VmCreateInfo::default());
        let mut code = BytecodeBuilder::new();
        code.load_int(0, 5);
        code.load_int(1, 3);
        code.add_eq(0, 1);
        code.emit(Instruction::MulEq { target: 0, rhs: 1 });
        code.ret(0);
        let main = closure(&vm, &prototype(&vm, "main", 2, code));

        assert_eq!(vm.call(&main, &[]).unwrap(), Value::from(24));
    }

    #[test]
    fn add_dispatches_to_meta_methods() {
        fn add(args: &[Value]) -> Result<Value> {
            Ok(Value::from(args[1].to_int()? + 100))
        }
        fn rhs_add(args: &[Value]) -> Result<Value> {
            Ok(Value::from(args[1].to_int()? + 200))
        }
        fn add_eq(args: &[Value]) -> Result<Value> {
            Ok(Value::from(args[1].to_int()? + 300))
        }

        let mut vm = vm_with(VmCreateInfo::default());
        let engine = vm.engine().clone();
        let delegate = Value::new_table(&engine).unwrap();
        let methods = delegate.as_table().unwrap();
        methods.insert(Value::string_view("__add"), Value::native_pfunction(add));
        methods.insert(Value::string_view("__rhs_add"), Value::native_pfunction(rhs_add));
        methods.insert(Value::string_view("__add_eq"), Value::native_pfunction(add_eq));
        let object = Value::new_table(&engine).unwrap();
        object.set_delegate(delegate).unwrap();
        vm.root()
            .as_table()
            .unwrap()
            .insert(Value::small_string("obj").unwrap(), object);

        let mut code = BytecodeBuilder::new();
        code.load_root(0);
        code.load_small_string(1, "obj");
        code.get(2, 0, 1);
        code.load_int(3, 1);
        code.add(4, 2, 3);
        code.add(5, 3, 2);
        code.add_eq(2, 3);
        code.new_obj(6, ObjectType::Array);
        code.array_append(6, 4);
        code.array_append(6, 5);
        code.array_append(6, 2);
        code.ret(6);
        let main = closure(&vm, &prototype(&vm, "main", 7, code));

        let result = vm.call(&main, &[]).unwrap();
        assert_eq!(
            result.as_array().unwrap().to_vec(),
            vec![Value::from(101), Value::from(201), Value::from(301)]
        );
    }
}
