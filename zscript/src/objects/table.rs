use std::cell::{Ref as CellRef, RefCell, RefMut};

use indexmap::IndexMap;

use crate::{AllocTag, Key, ObjectType, Payload, Value};

pub type TableMap = IndexMap<Key, Value>;

/// Enumeration state carried by a table built through enum slots.
#[derive(Debug, Clone, Default)]
pub enum EnumState {
    #[default]
    Plain,
    Building {
        counter: i64,
        names: Vec<Value>,
    },
    Closed {
        names: Value,
    },
}

/// Insertion-ordered hash table with an optional delegate.
pub struct Table {
    entries: RefCell<TableMap>,
    delegate: RefCell<Value>,
    enum_state: RefCell<EnumState>,
}

impl Table {
    pub fn new() -> Self {
        Self::with_entries(TableMap::new())
    }

    pub fn with_entries(entries: TableMap) -> Self {
        Self {
            entries: RefCell::new(entries),
            delegate: RefCell::new(Value::Null),
            enum_state: RefCell::new(EnumState::Plain),
        }
    }

    pub fn borrow(&self) -> CellRef<'_, TableMap> {
        self.entries.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, TableMap> {
        self.entries.borrow_mut()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries.borrow().get(&Key::new(key.clone())).cloned()
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.entries.borrow().contains_key(&Key::new(key.clone()))
    }

    /// Inserts or overwrites, returning the previous value.
    pub fn insert(&self, key: Value, value: Value) -> Option<Value> {
        self.entries.borrow_mut().insert(Key::new(key), value)
    }

    /// Overwrites an existing entry, returns `false` if the key is absent.
    pub fn replace(&self, key: &Value, value: Value) -> bool {
        match self.entries.borrow_mut().get_mut(&Key::new(key.clone())) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &Value) -> Option<Value> {
        self.entries.borrow_mut().shift_remove(&Key::new(key.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Snapshot of the entries in insertion order.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.value().clone(), v.clone()))
            .collect()
    }

    pub fn delegate(&self) -> Value {
        self.delegate.borrow().clone()
    }

    pub fn set_delegate(&self, delegate: Value) {
        *self.delegate.borrow_mut() = delegate;
    }

    pub fn enum_state(&self) -> CellRef<'_, EnumState> {
        self.enum_state.borrow()
    }

    pub(crate) fn enum_state_mut(&self) -> RefMut<'_, EnumState> {
        self.enum_state.borrow_mut()
    }

    /// A closed enum refuses every mutation.
    pub fn is_frozen(&self) -> bool {
        matches!(*self.enum_state.borrow(), EnumState::Closed { .. })
    }

    /// Ordered member names of a closed enum.
    pub fn enum_names(&self) -> Option<Value> {
        match &*self.enum_state.borrow() {
            EnumState::Closed { names } => Some(names.clone()),
            _ => None,
        }
    }

    /// Shallow copy of the entries and delegate.
    pub fn shallow_clone(&self) -> Self {
        let table = Self::with_entries(self.entries.borrow().clone());
        table.set_delegate(self.delegate());
        table
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Payload for Table {
    const KIND: ObjectType = ObjectType::Table;
    const TAG: AllocTag = AllocTag::Table;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let table = Table::new();
        table.insert(Value::string_view("b"), Value::from(2));
        table.insert(Value::string_view("a"), Value::from(1));
        table.insert(Value::string_view("b"), Value::from(3));

        assert_eq!(
            table.entries(),
            vec![
                (Value::string_view("b"), Value::from(3)),
                (Value::string_view("a"), Value::from(1)),
            ]
        );
        assert!(table.replace(&Value::string_view("a"), Value::from(5)));
        assert!(!table.replace(&Value::string_view("c"), Value::from(5)));
        assert_eq!(table.remove(&Value::string_view("b")), Some(Value::from(3)));
        assert_eq!(table.len(), 1);
    }
}
