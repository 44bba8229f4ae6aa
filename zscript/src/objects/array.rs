use std::cell::{Ref as CellRef, RefCell, RefMut};

use crate::{AllocTag, ObjectType, Payload, Value, objects::strings::resolve_index};

pub struct Array {
    values: RefCell<Vec<Value>>,
    delegate: RefCell<Value>,
}

impl Array {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: RefCell::new(values),
            delegate: RefCell::new(Value::Null),
        }
    }

    pub fn borrow(&self) -> CellRef<'_, Vec<Value>> {
        self.values.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Vec<Value>> {
        self.values.borrow_mut()
    }

    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }

    /// Element at `index`, negative indices count from the end.
    pub fn get(&self, index: i64) -> Option<Value> {
        let values = self.values.borrow();
        resolve_index(index, values.len()).map(|i| values[i].clone())
    }

    /// Returns `false` when `index` is out of range.
    pub fn set(&self, index: i64, value: Value) -> bool {
        let mut values = self.values.borrow_mut();
        match resolve_index(index, values.len()) {
            Some(i) => {
                values[i] = value;
                true
            }
            None => false,
        }
    }

    pub fn push(&self, value: Value) {
        self.values.borrow_mut().push(value);
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.values.borrow().clone()
    }

    pub fn delegate(&self) -> Value {
        self.delegate.borrow().clone()
    }

    pub fn set_delegate(&self, delegate: Value) {
        *self.delegate.borrow_mut() = delegate;
    }
}

impl Payload for Array {
    const KIND: ObjectType = ObjectType::Array;
    const TAG: AllocTag = AllocTag::Array;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexing() {
        let array = Array::new(vec![Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(array.get(0), Some(Value::from(1)));
        assert_eq!(array.get(-1), Some(Value::from(3)));
        assert_eq!(array.get(3), None);
        assert!(array.set(-2, Value::from(20)));
        assert!(!array.set(7, Value::Null));
        array.push(Value::from(4));
        assert_eq!(array.to_vec(), vec![1, 20, 3, 4].into_iter().map(Value::from).collect::<Vec<_>>());
    }
}
