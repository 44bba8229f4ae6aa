use std::cell::{Cell, Ref as CellRef, RefCell};

use indexmap::IndexMap;

use crate::{AllocTag, Key, ObjectType, Payload, Ref, TypeMask, Value, VarDeclFlags};

/// A declared struct field or static.
#[derive(Debug, Clone)]
pub struct StructMember {
    pub name: Value,
    pub value: Value,
    pub mask: TypeMask,
    pub flags: VarDeclFlags,
}

impl StructMember {
    /// A value fits when the mask is empty or contains its kind.
    pub fn accepts(&self, value: &Value) -> bool {
        self.mask.is_empty() || value.has_type_mask(self.mask)
    }
}

/// Fixed-layout record type.
///
/// Instance members keep declaration order, which is also the order used
/// for positional construction.
pub struct Struct {
    name: RefCell<Value>,
    members: RefCell<Vec<StructMember>>,
    statics: RefCell<Vec<StructMember>>,
    methods: RefCell<IndexMap<Key, Value>>,
    constructor: RefCell<Value>,
}

impl Struct {
    pub fn new() -> Self {
        Self {
            name: RefCell::new(Value::Null),
            members: RefCell::new(Vec::new()),
            statics: RefCell::new(Vec::new()),
            methods: RefCell::new(IndexMap::new()),
            constructor: RefCell::new(Value::Null),
        }
    }

    pub fn name(&self) -> Value {
        self.name.borrow().clone()
    }

    pub fn set_name(&self, name: Value) {
        *self.name.borrow_mut() = name;
    }

    pub fn members(&self) -> CellRef<'_, Vec<StructMember>> {
        self.members.borrow()
    }

    pub fn statics(&self) -> CellRef<'_, Vec<StructMember>> {
        self.statics.borrow()
    }

    pub fn member_index(&self, name: &Value) -> Option<usize> {
        find(&self.members.borrow(), name)
    }

    pub fn static_index(&self, name: &Value) -> Option<usize> {
        find(&self.statics.borrow(), name)
    }

    /// Whether `name` is already used by a member, static or method.
    pub fn has_name(&self, name: &Value) -> bool {
        self.member_index(name).is_some()
            || self.static_index(name).is_some()
            || self.methods.borrow().contains_key(&Key::new(name.clone()))
    }

    pub fn push_member(&self, member: StructMember) {
        if member.flags.is_static() {
            self.statics.borrow_mut().push(member);
        } else {
            self.members.borrow_mut().push(member);
        }
    }

    pub fn static_value(&self, index: usize) -> Option<Value> {
        self.statics.borrow().get(index).map(|m| m.value.clone())
    }

    pub(crate) fn set_static_value(&self, index: usize, value: Value) {
        if let Some(member) = self.statics.borrow_mut().get_mut(index) {
            member.value = value;
        }
    }

    pub fn static_member(&self, index: usize) -> Option<StructMember> {
        self.statics.borrow().get(index).cloned()
    }

    pub fn member(&self, index: usize) -> Option<StructMember> {
        self.members.borrow().get(index).cloned()
    }

    pub fn method(&self, name: &Value) -> Option<Value> {
        self.methods.borrow().get(&Key::new(name.clone())).cloned()
    }

    pub fn add_method(&self, name: Value, method: Value) {
        self.methods.borrow_mut().insert(Key::new(name), method);
    }

    pub fn constructor(&self) -> Value {
        self.constructor.borrow().clone()
    }

    pub fn set_constructor(&self, constructor: Value) {
        *self.constructor.borrow_mut() = constructor;
    }

    /// Default values for a fresh instance.
    pub fn member_defaults(&self) -> Vec<Value> {
        self.members.borrow().iter().map(|m| m.value.clone()).collect()
    }
}

impl Default for Struct {
    fn default() -> Self {
        Self::new()
    }
}

fn find(members: &[StructMember], name: &Value) -> Option<usize> {
    let key = Key::new(name.clone());
    members.iter().position(|m| Key::new(m.name.clone()) == key)
}

impl Payload for Struct {
    const KIND: ObjectType = ObjectType::Struct;
    const TAG: AllocTag = AllocTag::Struct;
}

/// Instance of a [`Struct`], one value per declared member.
pub struct StructInstance {
    strct: Ref<Struct>,
    values: RefCell<Vec<Value>>,
    initializing: Cell<bool>,
}

impl StructInstance {
    pub fn new(strct: Ref<Struct>) -> Self {
        let values = strct.member_defaults();
        Self {
            strct,
            values: RefCell::new(values),
            initializing: Cell::new(false),
        }
    }

    pub fn strct(&self) -> &Ref<Struct> {
        &self.strct
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.values.borrow().get(index).cloned()
    }

    pub(crate) fn set(&self, index: usize, value: Value) {
        if let Some(slot) = self.values.borrow_mut().get_mut(index) {
            *slot = value;
        }
    }

    pub fn values(&self) -> Vec<Value> {
        self.values.borrow().clone()
    }

    /// Const members stay writable while the constructor runs.
    pub fn is_initializing(&self) -> bool {
        self.initializing.get()
    }

    pub(crate) fn set_initializing(&self, initializing: bool) {
        self.initializing.set(initializing);
    }
}

impl Payload for StructInstance {
    const KIND: ObjectType = ObjectType::StructInstance;
    const TAG: AllocTag = AllocTag::Struct;
}
