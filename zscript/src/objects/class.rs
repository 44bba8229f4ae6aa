use std::cell::{Ref as CellRef, RefCell};

use indexmap::IndexMap;

use crate::{AllocTag, Key, ObjectType, Payload, Ref, Value};

pub type MemberMap = IndexMap<Key, Value>;

/// Longest base-class chain followed by lookups.
pub(crate) const MAX_CLASS_CHAIN: usize = 64;

pub struct Class {
    name: RefCell<Value>,
    base: RefCell<Value>,
    members: RefCell<MemberMap>,
    statics: RefCell<MemberMap>,
}

impl Class {
    pub fn new() -> Self {
        Self {
            name: RefCell::new(Value::Null),
            base: RefCell::new(Value::Null),
            members: RefCell::new(MemberMap::new()),
            statics: RefCell::new(MemberMap::new()),
        }
    }

    pub fn name(&self) -> Value {
        self.name.borrow().clone()
    }

    pub fn set_name(&self, name: Value) {
        *self.name.borrow_mut() = name;
    }

    /// Parent class, or null.
    pub fn base(&self) -> Value {
        self.base.borrow().clone()
    }

    pub fn set_base(&self, base: Value) {
        *self.base.borrow_mut() = base;
    }

    pub fn members(&self) -> CellRef<'_, MemberMap> {
        self.members.borrow()
    }

    pub fn statics(&self) -> CellRef<'_, MemberMap> {
        self.statics.borrow()
    }

    pub fn set_member(&self, key: Value, value: Value) {
        self.members.borrow_mut().insert(Key::new(key), value);
    }

    pub fn set_static(&self, key: Value, value: Value) {
        self.statics.borrow_mut().insert(Key::new(key), value);
    }

    pub fn has_static(&self, key: &Value) -> bool {
        self.statics.borrow().contains_key(&Key::new(key.clone()))
    }

    /// Statics then members, walking up the base chain.
    pub fn lookup(&self, key: &Value) -> Option<Value> {
        let key = Key::new(key.clone());
        if let Some(found) = self.lookup_own(&key) {
            return Some(found);
        }

        let mut current = self.base();
        for _ in 0..MAX_CLASS_CHAIN {
            let Value::Class(class) = current else {
                return None;
            };
            if let Some(found) = class.lookup_own(&key) {
                return Some(found);
            }
            current = class.base();
        }
        None
    }

    fn lookup_own(&self, key: &Key) -> Option<Value> {
        if let Some(found) = self.statics.borrow().get(key) {
            return Some(found.clone());
        }
        self.members.borrow().get(key).cloned()
    }
}

impl Default for Class {
    fn default() -> Self {
        Self::new()
    }
}

impl Payload for Class {
    const KIND: ObjectType = ObjectType::Class;
    const TAG: AllocTag = AllocTag::Class;
}

/// Instance of a [`Class`]. Fields start as copies of the class members.
pub struct Instance {
    class: Ref<Class>,
    fields: RefCell<MemberMap>,
}

impl Instance {
    pub fn new(class: Ref<Class>) -> Self {
        let mut fields = MemberMap::new();
        let mut chain = vec![Value::Class(class.clone())];
        let mut current = class.base();
        while let Value::Class(base) = current {
            if chain.len() >= MAX_CLASS_CHAIN {
                break;
            }
            current = base.base();
            chain.push(Value::Class(base));
        }

        for link in chain.iter().rev() {
            if let Value::Class(c) = link {
                for (key, value) in c.members().iter() {
                    if !value.is_function() {
                        fields.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        Self {
            class,
            fields: RefCell::new(fields),
        }
    }

    pub fn class(&self) -> &Ref<Class> {
        &self.class
    }

    pub fn fields(&self) -> CellRef<'_, MemberMap> {
        self.fields.borrow()
    }

    pub fn get_field(&self, key: &Value) -> Option<Value> {
        self.fields.borrow().get(&Key::new(key.clone())).cloned()
    }

    pub fn set_field(&self, key: Value, value: Value) {
        self.fields.borrow_mut().insert(Key::new(key), value);
    }

    /// Own fields, then the class chain.
    pub fn lookup(&self, key: &Value) -> Option<Value> {
        self.get_field(key).or_else(|| self.class.lookup(key))
    }
}

impl Payload for Instance {
    const KIND: ObjectType = ObjectType::Instance;
    const TAG: AllocTag = AllocTag::Class;
}
