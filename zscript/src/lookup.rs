//! Keyed access (`get`, `set`, `new_slot`) and meta-method resolution.

use crate::{
    ErrorCode, MAX_CLASS_CHAIN, MetaMethod, Result, Value, Vm,
    error::bail,
    objects::strings::resolve_index,
};

/// Finds `method` for `value`.
///
/// Delegable kinds search their delegate chain, instances their class
/// chain and struct instances the methods of their struct.
pub fn meta_method(value: &Value, method: MetaMethod) -> Option<Value> {
    let name = Value::string_view(method.name());
    match value {
        Value::Instance(instance) => instance.class().lookup(&name),
        Value::StructInstance(instance) => instance.strct().method(&name),
        other if other.is_delegable() => delegate_get(other.delegate(), &name),
        _ => None,
    }
}

/// Raw lookup along a chain of delegate tables.
fn delegate_get(mut current: Value, key: &Value) -> Option<Value> {
    for _ in 0..MAX_CLASS_CHAIN {
        let Value::Table(table) = current else {
            return None;
        };
        if let Some(found) = table.get(key) {
            return Some(found);
        }
        current = table.delegate();
    }
    None
}

const ENUM_NAMES_KEY: &str = "__enum_array";

fn not_found(object: &Value, key: &Value) -> crate::Error {
    crate::Error::new(
        ErrorCode::NotFound,
        format!("key {key:?} not found in {}", object.type_name()),
    )
}

fn out_of_bounds(index: i64, len: usize) -> crate::Error {
    crate::Error::new(
        ErrorCode::OutOfBounds,
        format!("index {index} out of bounds for length {len}"),
    )
}

impl Vm {
    /// Reads `object[key]`.
    pub fn get(&mut self, object: &Value, key: &Value) -> Result<Value> {
        match object {
            Value::Table(table) => {
                if let Some(found) = table.get(key) {
                    return Ok(found);
                }
                if key.immutable_str() == Some(ENUM_NAMES_KEY) {
                    if let Some(names) = table.enum_names() {
                        return Ok(names);
                    }
                }
                self.get_fallback(object, key)
            }

            Value::Array(array) => match key {
                Value::Integer(index) => array.get(*index).ok_or_else(|| out_of_bounds(*index, array.len())),
                _ => self.get_fallback(object, key),
            },

            Value::SmallString(_) | Value::StringView(_) | Value::LongString(_) | Value::MutableString(_) => {
                let Value::Integer(index) = key else {
                    if object.is_delegable() {
                        return self.get_fallback(object, key);
                    }
                    bail!(ErrorCode::InvalidType, "string index must be an integer, got {}", key.type_name());
                };
                let text = object.as_str().unwrap_or_default();
                let len = text.chars().count();
                let Some(pos) = resolve_index(*index, len) else {
                    return Err(out_of_bounds(*index, len));
                };
                let ch = text.chars().nth(pos).unwrap_or_default();
                Value::new_string(&self.engine, ch.encode_utf8(&mut [0u8; 4]))
            }

            Value::Struct(strct) => match strct.static_index(key) {
                Some(index) => Ok(strct.static_value(index).unwrap_or(Value::Null)),
                None => Err(not_found(object, key)),
            },

            Value::StructInstance(instance) => {
                let strct = instance.strct();
                if let Some(index) = strct.member_index(key) {
                    return Ok(instance.get(index).unwrap_or(Value::Null));
                }
                if let Some(index) = strct.static_index(key) {
                    return Ok(strct.static_value(index).unwrap_or(Value::Null));
                }
                strct.method(key).ok_or_else(|| not_found(object, key))
            }

            Value::Class(class) => class.lookup(key).ok_or_else(|| not_found(object, key)),
            Value::Instance(instance) => instance.lookup(key).ok_or_else(|| not_found(object, key)),

            Value::Node(node) => match key {
                Value::Integer(index) => node
                    .child(*index)
                    .ok_or_else(|| out_of_bounds(*index, node.child_count())),
                k if k.is_string() => node.attribute(k).ok_or_else(|| not_found(object, key)),
                _ => bail!(ErrorCode::InvalidType, "node key must be a string or integer"),
            },

            Value::NativeArray(array) => match key {
                Value::Integer(index) => array.get(*index),
                _ => self.get_fallback(object, key),
            },

            Value::UserData(_) => self.get_fallback(object, key),

            other => bail!(ErrorCode::InvalidType, "cannot index {}", other.type_name()),
        }
    }

    /// Delegate chain, then `__get`.
    fn get_fallback(&mut self, object: &Value, key: &Value) -> Result<Value> {
        if let Some(found) = delegate_get(object.delegate(), key) {
            return Ok(found);
        }
        if let Some(method) = meta_method(object, MetaMethod::Get) {
            return self.call_value(&method, &[object.clone(), key.clone()]);
        }
        Err(not_found(object, key))
    }

    /// Writes `object[key] = value`.
    pub fn set(&mut self, object: &Value, key: &Value, value: Value) -> Result<()> {
        match object {
            Value::Table(table) => {
                if table.is_frozen() {
                    bail!(ErrorCode::CantModifyConstMember, "cannot modify closed enum");
                }
                if table.contains(key) {
                    table.replace(key, value);
                    return Ok(());
                }
                if let Some(method) = meta_method(object, MetaMethod::Set) {
                    self.call_value(&method, &[object.clone(), key.clone(), value])?;
                    return Ok(());
                }
                table.insert(key.clone(), value);
                Ok(())
            }

            Value::Array(array) => match key {
                Value::Integer(index) => {
                    if array.set(*index, value) {
                        Ok(())
                    } else {
                        Err(out_of_bounds(*index, array.len()))
                    }
                }
                _ => bail!(ErrorCode::InvalidType, "array index must be an integer, got {}", key.type_name()),
            },

            Value::Struct(strct) => {
                let Some(index) = strct.static_index(key) else {
                    return Err(not_found(object, key));
                };
                let Some(member) = strct.static_member(index) else {
                    return Err(not_found(object, key));
                };
                if member.flags.is_const() {
                    bail!(ErrorCode::CantModifyStaticConst, "static {key:?} is const");
                }
                if !member.accepts(&value) {
                    bail!(
                        ErrorCode::InvalidValueTypeAssignment,
                        "static {key:?} cannot hold {}",
                        value.type_name()
                    );
                }
                strct.set_static_value(index, value);
                Ok(())
            }

            Value::StructInstance(instance) => {
                let strct = instance.strct();
                let Some(index) = strct.member_index(key) else {
                    if strct.static_index(key).is_some() {
                        let owner = Value::Struct(strct.clone());
                        return self.set(&owner, key, value);
                    }
                    return Err(not_found(object, key));
                };
                let Some(member) = strct.member(index) else {
                    return Err(not_found(object, key));
                };
                if member.flags.is_const() && !instance.is_initializing() {
                    bail!(ErrorCode::CantModifyConstMember, "member {key:?} is const");
                }
                if !member.accepts(&value) {
                    bail!(
                        ErrorCode::InvalidValueTypeAssignment,
                        "member {key:?} cannot hold {}",
                        value.type_name()
                    );
                }
                instance.set(index, value);
                Ok(())
            }

            Value::Class(class) => {
                if class.has_static(key) {
                    class.set_static(key.clone(), value);
                } else {
                    class.set_member(key.clone(), value);
                }
                Ok(())
            }

            Value::Instance(instance) => {
                instance.set_field(key.clone(), value);
                Ok(())
            }

            Value::Node(node) => match key {
                Value::Integer(index) => {
                    if node.set_child(*index, value) {
                        Ok(())
                    } else {
                        Err(out_of_bounds(*index, node.child_count()))
                    }
                }
                k if k.is_string() => {
                    node.set_attribute(k.clone(), value);
                    Ok(())
                }
                _ => bail!(ErrorCode::InvalidType, "node key must be a string or integer"),
            },

            Value::NativeArray(array) => match key {
                Value::Integer(index) => array.set(*index, &value),
                _ => bail!(ErrorCode::InvalidType, "native array index must be an integer"),
            },

            Value::MutableString(text) => {
                let (Value::Integer(index), Some(replacement)) = (key, value.as_str()) else {
                    bail!(ErrorCode::InvalidType, "mutable string assignment needs an integer index and a string");
                };
                let mut chars: Vec<char> = text.borrow().chars().collect();
                let Some(pos) = resolve_index(*index, chars.len()) else {
                    return Err(out_of_bounds(*index, chars.len()));
                };
                let mut replacement = replacement.chars();
                let (Some(ch), None) = (replacement.next(), replacement.next()) else {
                    bail!(ErrorCode::InvalidType, "mutable string element must be a single character");
                };
                chars[pos] = ch;
                text.replace(chars.into_iter().collect());
                Ok(())
            }

            Value::UserData(_) => match meta_method(object, MetaMethod::Set) {
                Some(method) => {
                    self.call_value(&method, &[object.clone(), key.clone(), value])?;
                    Ok(())
                }
                None => bail!(ErrorCode::InvalidType, "user data has no __set"),
            },

            other => bail!(ErrorCode::InvalidType, "cannot assign into {}", other.type_name()),
        }
    }

    /// Declares a slot. Tables overwrite without consulting `__set`.
    pub fn new_slot(&mut self, object: &Value, key: &Value, value: Value) -> Result<()> {
        match object {
            Value::Table(table) => {
                if table.is_frozen() {
                    bail!(ErrorCode::CantModifyConstMember, "cannot add to closed enum");
                }
                table.insert(key.clone(), value);
                Ok(())
            }
            Value::Array(_) => self.set(object, key, value),
            Value::Class(class) => {
                class.set_member(key.clone(), value);
                Ok(())
            }
            other => bail!(ErrorCode::InvalidType, "cannot add a slot to {}", other.type_name()),
        }
    }

    /// Whether `object[key]` resolves.
    pub fn exists(&mut self, object: &Value, key: &Value) -> bool {
        self.get(object, key).is_ok()
    }
}
