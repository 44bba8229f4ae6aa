use std::cell::{Ref as CellRef, RefCell};

use indexmap::IndexMap;

use crate::{AllocTag, Key, ObjectType, Payload, Value, objects::strings::resolve_index};

/// Tree node with named attributes and ordered children.
pub struct Node {
    name: RefCell<Value>,
    value: RefCell<Value>,
    attributes: RefCell<IndexMap<Key, Value>>,
    children: RefCell<Vec<Value>>,
    delegate: RefCell<Value>,
}

impl Node {
    pub fn new(name: Value) -> Self {
        Self {
            name: RefCell::new(name),
            value: RefCell::new(Value::Null),
            attributes: RefCell::new(IndexMap::new()),
            children: RefCell::new(Vec::new()),
            delegate: RefCell::new(Value::Null),
        }
    }

    pub fn name(&self) -> Value {
        self.name.borrow().clone()
    }

    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn set_value(&self, value: Value) {
        *self.value.borrow_mut() = value;
    }

    pub fn attribute(&self, key: &Value) -> Option<Value> {
        self.attributes.borrow().get(&Key::new(key.clone())).cloned()
    }

    pub fn set_attribute(&self, key: Value, value: Value) {
        self.attributes.borrow_mut().insert(Key::new(key), value);
    }

    pub fn attributes(&self) -> CellRef<'_, IndexMap<Key, Value>> {
        self.attributes.borrow()
    }

    pub fn child(&self, index: i64) -> Option<Value> {
        let children = self.children.borrow();
        resolve_index(index, children.len()).map(|i| children[i].clone())
    }

    /// Returns `false` when `index` is out of range.
    pub fn set_child(&self, index: i64, child: Value) -> bool {
        let mut children = self.children.borrow_mut();
        match resolve_index(index, children.len()) {
            Some(i) => {
                children[i] = child;
                true
            }
            None => false,
        }
    }

    pub fn push_child(&self, child: Value) {
        self.children.borrow_mut().push(child);
    }

    pub fn child_count(&self) -> usize {
        self.children.borrow().len()
    }

    pub fn delegate(&self) -> Value {
        self.delegate.borrow().clone()
    }

    pub fn set_delegate(&self, delegate: Value) {
        *self.delegate.borrow_mut() = delegate;
    }
}

impl Payload for Node {
    const KIND: ObjectType = ObjectType::Node;
    const TAG: AllocTag = AllocTag::Node;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_and_children() {
        let node = Node::new(Value::string_view("root"));
        node.set_attribute(Value::string_view("id"), Value::from(7));
        node.push_child(Value::from(1));
        node.push_child(Value::from(2));

        assert_eq!(node.attribute(&Value::string_view("id")), Some(Value::from(7)));
        assert_eq!(node.child(-1), Some(Value::from(2)));
        assert!(node.set_child(0, Value::from(10)));
        assert!(!node.set_child(2, Value::Null));
        assert_eq!(node.child_count(), 2);
        assert_eq!(node.name(), Value::string_view("root"));
    }
}
