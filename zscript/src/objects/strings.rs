use std::{
    cell::{Ref as CellRef, RefCell},
    fmt,
};

use crate::{AllocTag, ObjectType, Payload, Value};

/// Longest string stored inline in a [`Value`].
pub const SMALL_STRING_CAPACITY: usize = 15;

/// Inline string of up to [`SMALL_STRING_CAPACITY`] bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SmallString {
    bytes: [u8; SMALL_STRING_CAPACITY],
    len: u8,
}

impl SmallString {
    pub const EMPTY: Self = Self {
        bytes: [0; SMALL_STRING_CAPACITY],
        len: 0,
    };

    /// Returns `None` when `text` does not fit inline.
    pub fn new(text: &str) -> Option<Self> {
        let len = text.len();
        if len > SMALL_STRING_CAPACITY {
            return None;
        }

        let mut bytes = [0; SMALL_STRING_CAPACITY];
        bytes[..len].copy_from_slice(text.as_bytes());
        Some(Self {
            bytes,
            len: len as u8,
        })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        // SAFETY: only built from a `&str` prefix, so always valid UTF-8.
        unsafe { std::str::from_utf8_unchecked(&self.bytes[..self.len as usize]) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for SmallString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

/// Immutable heap string, used when the text does not fit inline.
pub struct LongString {
    text: Box<str>,
}

impl LongString {
    pub fn new(text: &str) -> Self {
        Self { text: text.into() }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Payload for LongString {
    const KIND: ObjectType = ObjectType::LongString;
    const TAG: AllocTag = AllocTag::String;
}

/// Growable string with its own delegate.
pub struct MutableString {
    text: RefCell<String>,
    delegate: RefCell<Value>,
}

impl MutableString {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: RefCell::new(text.into()),
            delegate: RefCell::new(Value::Null),
        }
    }

    pub fn borrow(&self) -> CellRef<'_, String> {
        self.text.borrow()
    }

    pub fn push_str(&self, text: &str) {
        self.text.borrow_mut().push_str(text);
    }

    pub fn replace(&self, text: String) {
        *self.text.borrow_mut() = text;
    }

    pub fn char_count(&self) -> usize {
        self.text.borrow().chars().count()
    }

    pub fn delegate(&self) -> Value {
        self.delegate.borrow().clone()
    }

    pub fn set_delegate(&self, delegate: Value) {
        *self.delegate.borrow_mut() = delegate;
    }
}

impl Payload for MutableString {
    const KIND: ObjectType = ObjectType::MutableString;
    const TAG: AllocTag = AllocTag::String;
}

/// Resolves a possibly negative index against `len`.
pub(crate) fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}
