//! Slot insertion for the declaration opcodes: object creation, struct and
//! class members, enums.

use std::mem;

use log::debug;

use crate::{
    Engine, EnumState, ErrorCode, Instance, ObjectType, Ref, Result, StructInstance,
    StructMember, Table, TypeMask, Value, VarDeclFlags, error::bail,
};

/// Fresh container of one of the `new_obj` kinds.
pub fn new_object(engine: &Engine, kind: ObjectType) -> Result<Value> {
    match kind {
        ObjectType::Table => Value::new_table(engine),
        ObjectType::Array => Value::new_array(engine, Vec::new()),
        ObjectType::Class => Value::new_class(engine),
        ObjectType::Struct => Value::new_struct(engine),
        other => bail!(ErrorCode::InvalidType, "cannot create an object of kind {other}"),
    }
}

pub fn array_append(array: &Value, value: Value) -> Result<()> {
    match array {
        Value::Array(a) => a.push(value),
        Value::NativeArray(a) => a.push(&value)?,
        other => bail!(ErrorCode::InvalidType, "cannot append to {}", other.type_name()),
    }
    Ok(())
}

/// Adds a class member. Closures get their `base` bound to a weak reference
/// of the class so `base` calls resolve against it.
pub fn new_class_slot(class: &Value, key: Value, value: Value, is_static: bool) -> Result<()> {
    let Value::Class(c) = class else {
        bail!(ErrorCode::InvalidType, "class slot on {}", class.type_name());
    };

    if let Value::Closure(closure) = &value {
        closure.set_base(class.weak_ref()?);
    }
    if is_static {
        c.set_static(key, value);
    } else {
        c.set_member(key, value);
    }
    Ok(())
}

fn expect_struct(strct: &Value) -> Result<&Ref<crate::Struct>> {
    match strct {
        Value::Struct(s) => Ok(s),
        other => bail!(ErrorCode::InvalidType, "expected a struct, got {}", other.type_name()),
    }
}

fn expect_name(key: &Value) -> Result<()> {
    if !key.is_string() {
        bail!(ErrorCode::InvalidType, "member name must be a string, got {}", key.type_name());
    }
    Ok(())
}

/// Declares a struct member. Without a value the member defaults to null
/// and the mask is not checked until assignment.
pub fn new_struct_slot(
    strct: &Value,
    key: Value,
    value: Option<Value>,
    mask: TypeMask,
    flags: VarDeclFlags,
) -> Result<()> {
    let s = expect_struct(strct)?;
    expect_name(&key)?;
    if s.has_name(&key) {
        bail!(ErrorCode::AlreadyExists, "struct member '{}' already exists", display_key(&key));
    }

    let member = StructMember {
        name: key,
        value: value.unwrap_or(Value::Null),
        mask,
        flags,
    };
    if !member.value.is_null() && !member.accepts(&member.value) {
        bail!(
            ErrorCode::InvalidValueTypeAssignment,
            "struct member '{}' cannot hold {}",
            display_key(&member.name),
            member.value.type_name()
        );
    }
    s.push_member(member);
    Ok(())
}

pub fn new_struct_method(strct: &Value, key: Value, value: Value) -> Result<()> {
    let s = expect_struct(strct)?;
    expect_name(&key)?;
    if s.has_name(&key) {
        bail!(ErrorCode::AlreadyExists, "struct member '{}' already exists", display_key(&key));
    }
    s.add_method(key, value);
    Ok(())
}

pub fn new_struct_constructor(strct: &Value, value: Value) -> Result<()> {
    let s = expect_struct(strct)?;
    if !value.is_function() {
        bail!(ErrorCode::InvalidType, "struct constructor cannot be {}", value.type_name());
    }
    s.set_constructor(value);
    Ok(())
}

pub fn set_struct_name(strct: &Value, name: Value) -> Result<()> {
    let s = expect_struct(strct)?;
    expect_name(&name)?;
    s.set_name(name);
    Ok(())
}

fn display_key(key: &Value) -> String {
    key.as_str().map(|s| s.into_owned()).unwrap_or_else(|| key.type_name().to_owned())
}

// ── enums ──────────────────────────────────────────────────────────

fn expect_enum_table(table: &Value) -> Result<&Ref<Table>> {
    match table {
        Value::Table(t) => Ok(t),
        other => bail!(ErrorCode::InvalidType, "enum slot on {}", other.type_name()),
    }
}

/// Adds one enumerator.
///
/// `none` takes the running counter, an integer resets it to `value + 1`.
/// Floats, bools and strings are stored as given and leave the counter
/// alone.
pub fn new_enum_slot(table: &Value, key: Value, value: Value) -> Result<()> {
    let t = expect_enum_table(table)?;
    if !key.is_string() {
        bail!(ErrorCode::InvalidType, "enum key must be a string, got {}", key.type_name());
    }

    let mut state = t.enum_state_mut();
    if let EnumState::Closed { .. } = *state {
        bail!(ErrorCode::CantModifyConstMember, "enum is closed");
    }
    if let EnumState::Plain = *state {
        *state = EnumState::Building {
            counter: 0,
            names: Vec::new(),
        };
    }
    let EnumState::Building { counter, names } = &mut *state else {
        bail!(ErrorCode::Invalid, "enum is not being built");
    };

    if t.contains(&key) {
        bail!(ErrorCode::NameExists, "enumerator '{}' already exists", display_key(&key));
    }

    let stored = match value {
        Value::None => {
            let current = *counter;
            *counter = current.wrapping_add(1);
            Value::Integer(current)
        }
        Value::Integer(v) => {
            *counter = v.wrapping_add(1);
            Value::Integer(v)
        }
        v @ (Value::Float(_) | Value::Bool(_)) => v,
        v if v.is_string() => v,
        other => bail!(ErrorCode::InvalidType, "enum value cannot be {}", other.type_name()),
    };

    names.push(key.clone());
    t.insert(key, stored);
    Ok(())
}

/// Freezes an enum table and publishes its ordered names.
pub fn close_enum(engine: &Engine, table: &Value) -> Result<()> {
    let t = expect_enum_table(table)?;
    let mut state = t.enum_state_mut();
    let names = match mem::take(&mut *state) {
        EnumState::Plain => Vec::new(),
        EnumState::Building { names, .. } => names,
        closed @ EnumState::Closed { .. } => {
            *state = closed;
            bail!(ErrorCode::CantModifyConstMember, "enum is already closed");
        }
    };

    debug!("enum closed with {} names", names.len());
    *state = EnumState::Closed {
        names: Value::new_array(engine, names)?,
    };
    Ok(())
}

// ── checks and copies ──────────────────────────────────────────────

/// Any string kind satisfies a string check.
pub fn check_type(value: &Value, kind: ObjectType) -> Result<()> {
    let matches = if TypeMask::STRING.contains(kind) {
        value.is_string()
    } else {
        value.kind() == kind
    };
    if !matches {
        bail!(
            ErrorCode::InvalidValueTypeAssignment,
            "expected {}, got {}",
            kind.exposed_name(),
            value.type_name()
        );
    }
    Ok(())
}

/// One-level copy. Containers get a fresh payload holding the same
/// children, immutable values are shared.
pub fn clone_value(engine: &Engine, value: &Value) -> Result<Value> {
    Ok(match value {
        Value::Table(t) => Value::Table(Ref::new(engine, t.shallow_clone())?),
        Value::Array(a) => {
            let copy = Value::new_array(engine, a.to_vec())?;
            copy.set_delegate(a.delegate())?;
            copy
        }
        Value::MutableString(s) => {
            let copy = Value::new_mutable_string(engine, s.borrow().clone())?;
            copy.set_delegate(s.delegate())?;
            copy
        }
        Value::StructInstance(instance) => {
            let copy = StructInstance::new(instance.strct().clone());
            for (index, v) in instance.values().into_iter().enumerate() {
                copy.set(index, v);
            }
            Value::StructInstance(Ref::new(engine, copy)?)
        }
        Value::Instance(instance) => {
            let copy = Instance::new(instance.class().clone());
            for (key, v) in instance.fields().iter() {
                copy.set_field(key.value().clone(), v.clone());
            }
            Value::Instance(Ref::new(engine, copy)?)
        }
        Value::Struct(_) | Value::Class(_) | Value::Node(_) | Value::NativeArray(_) | Value::UserData(_) => {
            bail!(ErrorCode::InvalidType, "{} cannot be cloned", value.type_name())
        }
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn name(text: &'static str) -> Value {
        Value::string_view(text)
    }

    fn enum_values(table: &Value) -> Vec<(Value, Value)> {
        table.as_table().unwrap().entries()
    }

    #[test]
    fn enum_counter_runs_from_zero() {
        let engine = Engine::default();
        let table = Value::new_table(&engine).unwrap();
        for key in ["a", "b", "c"] {
            new_enum_slot(&table, name(key), Value::None).unwrap();
        }

        assert_eq!(
            enum_values(&table),
            vec![
                (name("a"), Value::from(0)),
                (name("b"), Value::from(1)),
                (name("c"), Value::from(2)),
            ]
        );
    }

    #[test]
    fn explicit_integer_resets_counter() {
        let engine = Engine::default();
        let table = Value::new_table(&engine).unwrap();
        new_enum_slot(&table, name("d"), Value::from(10)).unwrap();
        new_enum_slot(&table, name("e"), Value::None).unwrap();

        let t = table.as_table().unwrap();
        assert_eq!(t.get(&name("e")), Some(Value::from(11)));
    }

    #[test]
    fn non_integer_values_leave_counter_alone() {
        let engine = Engine::default();
        let table = Value::new_table(&engine).unwrap();
        new_enum_slot(&table, name("a"), Value::None).unwrap();
        new_enum_slot(&table, name("pi"), Value::from(3.5)).unwrap();
        new_enum_slot(&table, name("yes"), Value::from(true)).unwrap();
        new_enum_slot(&table, name("s"), name("text")).unwrap();
        new_enum_slot(&table, name("b"), Value::None).unwrap();

        let t = table.as_table().unwrap();
        assert_eq!(t.get(&name("pi")), Some(Value::from(3.5)));
        assert_eq!(t.get(&name("b")), Some(Value::from(1)));
    }

    #[test]
    fn enum_rejects_duplicates_and_bad_keys() {
        let engine = Engine::default();
        let table = Value::new_table(&engine).unwrap();
        new_enum_slot(&table, name("a"), Value::None).unwrap();

        let err = new_enum_slot(&table, name("a"), Value::None).unwrap_err();
        assert_eq!(err.code, ErrorCode::NameExists);
        let err = new_enum_slot(&table, Value::from(1), Value::None).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidType);
        let err = new_enum_slot(&table, name("t"), Value::new_table(&engine).unwrap()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidType);
    }

    #[test]
    fn close_enum_publishes_names() {
        let engine = Engine::default();
        let table = Value::new_table(&engine).unwrap();
        new_enum_slot(&table, name("x"), Value::None).unwrap();
        new_enum_slot(&table, name("y"), Value::None).unwrap();
        close_enum(&engine, &table).unwrap();

        let t = table.as_table().unwrap();
        assert!(t.is_frozen());
        let names = t.enum_names().unwrap();
        assert_eq!(names.as_array().unwrap().to_vec(), vec![name("x"), name("y")]);

        let err = new_enum_slot(&table, name("z"), Value::None).unwrap_err();
        assert_eq!(err.code, ErrorCode::CantModifyConstMember);
        assert_eq!(close_enum(&engine, &table).unwrap_err().code, ErrorCode::CantModifyConstMember);
    }

    #[test]
    fn struct_slots_check_names_and_masks() {
        let engine = Engine::default();
        let strct = new_object(&engine, ObjectType::Struct).unwrap();

        new_struct_slot(&strct, name("x"), Some(Value::from(1)), TypeMask::INTEGER, VarDeclFlags::NONE).unwrap();
        new_struct_slot(&strct, name("y"), None, TypeMask::FLOAT, VarDeclFlags::NONE).unwrap();

        let err = new_struct_slot(&strct, name("x"), None, TypeMask::NONE, VarDeclFlags::NONE).unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyExists);
        let err = new_struct_slot(&strct, Value::from(3), None, TypeMask::NONE, VarDeclFlags::NONE).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidType);
        let err = new_struct_slot(&strct, name("z"), Some(name("s")), TypeMask::NUMBER, VarDeclFlags::NONE)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidValueTypeAssignment);

        let Value::Struct(s) = &strct else { unreachable!() };
        assert_eq!(s.members().len(), 2);
    }

    #[test]
    fn class_slot_binds_closure_base() {
        let engine = Engine::default();
        let class = new_object(&engine, ObjectType::Class).unwrap();
        let proto = Ref::new(&engine, crate::FunctionPrototype::default()).unwrap();
        let method = Value::new_closure(&engine, &proto, Value::Null).unwrap();

        new_class_slot(&class, name("m"), method.clone(), false).unwrap();
        let base = method.as_closure().unwrap().base();
        assert!(base.upgrade().unwrap().ptr_eq(&class));
    }

    #[test]
    fn check_type_accepts_any_string_kind() {
        check_type(&name("s"), ObjectType::SmallString).unwrap();
        check_type(&Value::from(1), ObjectType::Integer).unwrap();
        let err = check_type(&Value::from(1), ObjectType::Float).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidValueTypeAssignment);
        assert_eq!(new_object(&Engine::default(), ObjectType::Integer).unwrap_err().code, ErrorCode::InvalidType);
    }

    #[test]
    fn clone_copies_containers() {
        let engine = Engine::default();
        let array = Value::new_array(&engine, vec![Value::from(1)]).unwrap();
        let copy = clone_value(&engine, &array).unwrap();
        array_append(&copy, Value::from(2)).unwrap();

        assert_eq!(array.as_array().unwrap().len(), 1);
        assert_eq!(copy.as_array().unwrap().len(), 2);
        assert_eq!(clone_value(&engine, &Value::from(4)).unwrap(), Value::from(4));
    }
}
