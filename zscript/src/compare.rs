//! Equality, ordering and hashing of values.

use std::{
    cmp::Ordering,
    hash::{Hash, Hasher},
    ptr,
};

use crate::{Array, ErrorCode, Result, Table, Value, error::bail};

#[derive(Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

fn number(value: &Value) -> Option<Number> {
    match value {
        Value::Bool(b) => Some(Number::Int(*b as i64)),
        Value::Integer(i) => Some(Number::Int(*i)),
        Value::Float(f) => Some(Number::Float(*f)),
        _ => None,
    }
}

fn as_f64(n: Number) -> f64 {
    match n {
        Number::Int(i) => i as f64,
        Number::Float(f) => f,
    }
}

/// Permissive equality.
///
/// Numbers and bools compare by numeric value, every string kind by
/// content, arrays and tables structurally. Other references compare by
/// identity.
pub fn equals(lhs: &Value, rhs: &Value) -> bool {
    Structural::new(false).eq(lhs, rhs)
}

/// Kind-exact equality. Arrays and tables still compare structurally.
pub fn strict_equals(lhs: &Value, rhs: &Value) -> bool {
    Structural::new(true).eq(lhs, rhs)
}

/// Pairwise walk over containers. A pair of containers already under
/// comparison counts as equal, so self-referencing graphs terminate.
struct Structural {
    strict: bool,
    path: Vec<(usize, usize)>,
}

impl Structural {
    fn new(strict: bool) -> Self {
        Self {
            strict,
            path: Vec::new(),
        }
    }

    fn eq(&mut self, lhs: &Value, rhs: &Value) -> bool {
        if self.strict {
            self.strict_eq(lhs, rhs)
        } else {
            self.loose_eq(lhs, rhs)
        }
    }

    fn loose_eq(&mut self, lhs: &Value, rhs: &Value) -> bool {
        if let (Some(a), Some(b)) = (number(lhs), number(rhs)) {
            return match (a, b) {
                (Number::Int(a), Number::Int(b)) => a == b,
                (a, b) => as_f64(a) == as_f64(b),
            };
        }

        if lhs.is_string() && rhs.is_string() {
            return lhs.as_str() == rhs.as_str();
        }

        match (lhs, rhs) {
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b) || self.arrays(lhs, rhs, a, b),
            (Value::Table(a), Value::Table(b)) => a.ptr_eq(b) || self.tables(lhs, rhs, a, b),
            _ if lhs.is_null_or_none() && rhs.is_null_or_none() => true,
            _ => self.strict_eq(lhs, rhs),
        }
    }

    fn strict_eq(&mut self, lhs: &Value, rhs: &Value) -> bool {
        if lhs.kind() != rhs.kind() {
            return false;
        }

        match (lhs, rhs) {
            (Value::SmallString(a), Value::SmallString(b)) => a == b,
            (Value::Null, Value::Null) | (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::RawPointer(a), Value::RawPointer(b)) => a == b,
            (Value::StringView(a), Value::StringView(b)) => a == b,
            (Value::NativeFunction(a), Value::NativeFunction(b)) => ptr::fn_addr_eq(*a, *b),
            (Value::NativePFunction(a), Value::NativePFunction(b)) => ptr::fn_addr_eq(*a, *b),
            (Value::Extension(a), Value::Extension(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::LongString(a), Value::LongString(b)) => a.ptr_eq(b) || a.as_str() == b.as_str(),
            (Value::MutableString(a), Value::MutableString(b)) => {
                a.ptr_eq(b) || *a.borrow() == *b.borrow()
            }
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b) || self.arrays(lhs, rhs, a, b),
            (Value::Table(a), Value::Table(b)) => a.ptr_eq(b) || self.tables(lhs, rhs, a, b),
            _ => lhs.ptr_eq(rhs),
        }
    }

    /// Pushes the pair, false when it is already being compared.
    fn enter(&mut self, lhs: &Value, rhs: &Value) -> bool {
        let pair = (lhs.addr(), rhs.addr());
        if self.path.contains(&pair) {
            return false;
        }
        self.path.push(pair);
        true
    }

    fn arrays(&mut self, lhs: &Value, rhs: &Value, a: &Array, b: &Array) -> bool {
        if !self.enter(lhs, rhs) {
            return true;
        }
        let a = a.borrow();
        let b = b.borrow();
        let equal = a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| self.eq(x, y));
        self.path.pop();
        equal
    }

    fn tables(&mut self, lhs: &Value, rhs: &Value, a: &Table, b: &Table) -> bool {
        if !self.enter(lhs, rhs) {
            return true;
        }
        let a = a.borrow();
        let b = b.borrow();
        let equal = a.len() == b.len()
            && a.iter().all(|(key, x)| b.get(key).is_some_and(|y| self.eq(x, y)));
        self.path.pop();
        equal
    }
}

/// Three-way comparison over numbers and strings.
///
/// Numbers follow [`f64::total_cmp`] once either side is a float.
pub fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering> {
    if let (Some(a), Some(b)) = (number(lhs), number(rhs)) {
        return Ok(match (a, b) {
            (Number::Int(a), Number::Int(b)) => a.cmp(&b),
            (a, b) => as_f64(a).total_cmp(&as_f64(b)),
        });
    }

    if let (Some(a), Some(b)) = (lhs.as_str(), rhs.as_str()) {
        return Ok(a.cmp(&b));
    }

    bail!(
        ErrorCode::InvalidType,
        "cannot compare {} with {}",
        lhs.type_name(),
        rhs.type_name()
    );
}

/// Hashable map key.
///
/// Immutable strings match by content whatever their storage, floats by
/// bit pattern and reference kinds by identity.
#[derive(Clone, Debug)]
#[repr(transparent)]
pub struct Key(pub Value);

impl Key {
    #[inline]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.0
    }

    #[inline]
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Key {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self.0.immutable_str(), other.0.immutable_str()) {
            (Some(a), Some(b)) => return a == b,
            (Some(_), None) | (None, Some(_)) => return false,
            (None, None) => {}
        }

        match (&self.0, &other.0) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (a, b) if a.is_ref_counted() => a.ptr_eq(b),
            (a, b) => strict_equals(a, b),
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if let Some(text) = self.0.immutable_str() {
            0u8.hash(state);
            text.hash(state);
            return;
        }

        (self.0.kind() as u8).hash(state);
        match &self.0 {
            Value::Bool(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::RawPointer(p) => p.hash(state),
            Value::NativeFunction(f) => (*f as usize).hash(state),
            Value::NativePFunction(f) => (*f as usize).hash(state),
            Value::Extension(e) => e.hash(state),
            Value::Error(code) => code.hash(state),
            other => other.addr().hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::Engine;

    #[test]
    fn permissive_numbers_and_strings() {
        let engine = Engine::default();
        assert!(equals(&Value::from(1), &Value::from(1.0)));
        assert!(equals(&Value::from(true), &Value::from(1)));
        assert!(!equals(&Value::from(1), &Value::from(2)));
        assert!(equals(&Value::Null, &Value::None));

        let long = Value::new_string(&engine, "a string that is definitely long").unwrap();
        let view = Value::string_view("a string that is definitely long");
        assert!(equals(&long, &view));
        assert!(!strict_equals(&long, &view));
    }

    #[test]
    fn strict_requires_same_kind() {
        assert!(!strict_equals(&Value::from(1), &Value::from(1.0)));
        assert!(strict_equals(&Value::from(1.5), &Value::from(1.5)));
        assert!(!strict_equals(&Value::from(f64::NAN), &Value::from(f64::NAN)));
        assert!(!strict_equals(&Value::Null, &Value::None));
    }

    #[test]
    fn containers_compare_structurally() {
        let engine = Engine::default();
        let a = Value::new_array(&engine, vec![Value::from(1), Value::from(2)]).unwrap();
        let b = Value::new_array(&engine, vec![Value::from(1.0), Value::from(2)]).unwrap();
        assert!(equals(&a, &b));
        assert!(!strict_equals(&a, &b));

        let t1 = Value::new_table(&engine).unwrap();
        let t2 = Value::new_table(&engine).unwrap();
        for t in [&t1, &t2] {
            let Value::Table(table) = t else { unreachable!() };
            table.insert(Value::string_view("x"), Value::from(3));
        }
        assert!(strict_equals(&t1, &t2));
    }

    #[test]
    fn self_containing_arrays_terminate() {
        let engine = Engine::default();
        let a = Value::new_array(&engine, Vec::new()).unwrap();
        let b = Value::new_array(&engine, Vec::new()).unwrap();
        a.as_array().unwrap().push(a.clone());
        b.as_array().unwrap().push(b.clone());
        assert!(equals(&a, &b));
        assert!(strict_equals(&a, &b));

        let c = Value::new_array(&engine, vec![Value::from(1)]).unwrap();
        c.as_array().unwrap().push(c.clone());
        assert!(!equals(&a, &c));

        for array in [&a, &b, &c] {
            array.as_array().unwrap().borrow_mut().clear();
        }
    }

    #[test]
    fn ordering() {
        assert_eq!(compare(&Value::from(1), &Value::from(2.5)).unwrap(), Ordering::Less);
        assert_eq!(compare(&Value::from(3), &Value::from(3)).unwrap(), Ordering::Equal);
        assert_eq!(
            compare(&Value::string_view("b"), &Value::string_view("a")).unwrap(),
            Ordering::Greater
        );
        let err = compare(&Value::Null, &Value::from(1)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidType);
    }

    #[test]
    fn keys_unify_string_storage() {
        let engine = Engine::default();
        let text = "the same long key text";
        let mut keys = HashSet::new();
        keys.insert(Key::new(Value::new_string(&engine, text).unwrap()));
        assert!(keys.contains(&Key::new(Value::string_view(text))));
        assert!(!keys.contains(&Key::new(Value::from(1))));

        keys.insert(Key::new(Value::from(1)));
        assert!(!keys.contains(&Key::new(Value::from(1.0))));
    }
}
