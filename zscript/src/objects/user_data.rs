use std::{
    any::Any,
    cell::{Cell, RefCell},
};

use log::debug;

use crate::{AllocTag, Engine, ObjectType, Payload, ReleaseHook, UserPointer, Value};

/// Host-owned data with a delegate table for lookups and meta-methods.
pub struct UserData {
    data: RefCell<Box<dyn Any>>,
    user_pointer: UserPointer,
    release_hook: Cell<Option<ReleaseHook>>,
    delegate: RefCell<Value>,
}

impl UserData {
    pub fn new(data: Box<dyn Any>, user_pointer: UserPointer, release_hook: Option<ReleaseHook>) -> Self {
        Self {
            data: RefCell::new(data),
            user_pointer,
            release_hook: Cell::new(release_hook),
            delegate: RefCell::new(Value::Null),
        }
    }

    pub fn user_pointer(&self) -> UserPointer {
        self.user_pointer
    }

    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.data.borrow().downcast_ref::<T>().map(f)
    }

    pub fn with_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.data.borrow_mut().downcast_mut::<T>().map(f)
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.data.borrow().is::<T>()
    }

    pub fn set_release_hook(&self, hook: Option<ReleaseHook>) {
        self.release_hook.set(hook);
    }

    pub fn delegate(&self) -> Value {
        self.delegate.borrow().clone()
    }

    pub fn set_delegate(&self, delegate: Value) {
        *self.delegate.borrow_mut() = delegate;
    }
}

impl Payload for UserData {
    const KIND: ObjectType = ObjectType::UserData;
    const TAG: AllocTag = AllocTag::UserData;

    fn finalize(&mut self, engine: &Engine) {
        if let Some(hook) = self.release_hook.take() {
            debug!("running user data release hook");
            hook(engine, self.user_pointer);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static RELEASED: AtomicUsize = AtomicUsize::new(0);

    fn on_release(_: &Engine, _: UserPointer) {
        RELEASED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn downcasts_and_releases() {
        let engine = Engine::default();
        let value = Value::new_user_data(&engine, Box::new(41u32), UserPointer::NULL, Some(on_release)).unwrap();
        let Value::UserData(data) = &value else { unreachable!() };

        assert!(data.is::<u32>());
        data.with_mut(|n: &mut u32| *n += 1);
        assert_eq!(data.with(|n: &u32| *n), Some(42));
        assert_eq!(data.with(|s: &String| s.len()), None);

        let before = RELEASED.load(Ordering::SeqCst);
        drop(value);
        assert_eq!(RELEASED.load(Ordering::SeqCst), before + 1);
    }
}
