//! Manual reference counting for out-of-line payloads.
//!
//! Every reference-counted kind lives in an [`RcBox`] allocated through the
//! owning [`Engine`]. The header stores the count, the kind and the lazily
//! created [`WeakProxy`] shared by all weak references to the payload.

use std::{
    alloc::Layout,
    cell::Cell,
    fmt,
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::{self, NonNull},
};

use crate::{
    AllocTag, Engine, ErrorCode, ObjectType, Result, Value,
    engine::MAX_ALIGN,
    error::bail,
};

/// A type that can live behind a [`Ref`].
pub trait Payload: Sized {
    const KIND: ObjectType;
    const TAG: AllocTag;

    /// Runs once, right before the payload is dropped.
    fn finalize(&mut self, _engine: &Engine) {}
}

pub struct RcHeader {
    count: Cell<usize>,
    kind: ObjectType,
    weak: Cell<Option<Ref<WeakProxy>>>,
    engine: Engine,
}

impl RcHeader {
    #[inline]
    pub fn count(&self) -> usize {
        self.count.get()
    }

    #[inline]
    pub fn kind(&self) -> ObjectType {
        self.kind
    }

    #[inline]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[inline]
    fn retain(&self) {
        self.count.set(self.count.get() + 1);
    }
}

#[repr(C)]
struct RcBox<T> {
    header: RcHeader,
    value: T,
}

/// Owning handle to a reference-counted payload.
///
/// Cloning retains, dropping releases. The last release finalizes the
/// payload and returns its storage to the engine.
pub struct Ref<T: Payload> {
    ptr: NonNull<RcBox<T>>,
    _marker: PhantomData<RcBox<T>>,
}

impl<T: Payload> Ref<T> {
    pub fn new(engine: &Engine, value: T) -> Result<Self> {
        let layout = Layout::new::<RcBox<T>>();
        if layout.align() > MAX_ALIGN {
            bail!(ErrorCode::InvalidSize, "payload alignment {} is too large", layout.align());
        }

        let ptr = engine.allocate(layout.size(), T::TAG)?.cast::<RcBox<T>>();

        // SAFETY: the block is fresh, large enough and suitably aligned.
        unsafe {
            ptr.as_ptr().write(RcBox {
                header: RcHeader {
                    count: Cell::new(1),
                    kind: T::KIND,
                    weak: Cell::new(None),
                    engine: engine.clone(),
                },
                value,
            });
        }

        Ok(Self {
            ptr,
            _marker: PhantomData,
        })
    }

    /// Rebuilds a handle from a header pointer without retaining.
    ///
    /// # Safety
    ///
    /// `header` must point at the header of a live `RcBox<T>` and the
    /// caller must own one count of it.
    pub(crate) unsafe fn from_header(header: NonNull<RcHeader>) -> Self {
        Self {
            ptr: header.cast(),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn header(&self) -> &RcHeader {
        // SAFETY: the box stays alive while we hold a count.
        unsafe { &self.ptr.as_ref().header }
    }

    #[inline]
    pub(crate) fn header_ptr(&self) -> NonNull<RcHeader> {
        self.ptr.cast()
    }

    #[inline]
    pub fn ref_count(&self) -> usize {
        self.header().count()
    }

    #[inline]
    pub fn engine(&self) -> &Engine {
        self.header().engine()
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Returns the payload's weak proxy, creating it on first use.
    pub fn weak_proxy(&self) -> Result<Ref<WeakProxy>> {
        let header = self.header();
        if let Some(proxy) = header.weak.take() {
            let out = proxy.clone();
            header.weak.set(Some(proxy));
            return Ok(out);
        }

        let proxy = Ref::new(
            header.engine(),
            WeakProxy {
                target: Cell::new(Some(WeakTarget {
                    kind: header.kind,
                    header: self.header_ptr(),
                })),
            },
        )?;
        header.weak.set(Some(proxy.clone()));
        Ok(proxy)
    }

    /// # Safety
    ///
    /// Must be called exactly once, when the count reaches zero.
    unsafe fn destroy(ptr: NonNull<RcBox<T>>) {
        let raw = ptr.as_ptr();
        unsafe {
            if let Some(proxy) = (*raw).header.weak.take() {
                proxy.target.set(None);
                drop(proxy);
            }

            let engine = ptr::read(&(*raw).header.engine);
            (*raw).value.finalize(&engine);
            ptr::drop_in_place(&mut (*raw).value);
            engine.deallocate(ptr.cast(), mem::size_of::<RcBox<T>>(), T::TAG);
        }
    }
}

impl<T: Payload> Clone for Ref<T> {
    #[inline]
    fn clone(&self) -> Self {
        self.header().retain();
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: Payload> Drop for Ref<T> {
    fn drop(&mut self) {
        let header = self.header();
        let count = header.count.get();
        debug_assert!(count > 0, "release of a dead {}", header.kind);
        header.count.set(count - 1);
        if count == 1 {
            // SAFETY: this was the last count.
            unsafe { Self::destroy(self.ptr) }
        }
    }
}

impl<T: Payload> Deref for Ref<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the box stays alive while we hold a count.
        unsafe { &self.ptr.as_ref().value }
    }
}

impl<T: Payload> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}(rc={})", T::KIND, self.addr(), self.ref_count())
    }
}

#[derive(Clone, Copy)]
struct WeakTarget {
    kind: ObjectType,
    header: NonNull<RcHeader>,
}

/// Non-owning observer shared by all weak references to one payload.
pub struct WeakProxy {
    target: Cell<Option<WeakTarget>>,
}

impl WeakProxy {
    pub fn is_alive(&self) -> bool {
        self.target.get().is_some()
    }

    /// Kind of the observed payload, while it is alive.
    pub fn target_kind(&self) -> Option<ObjectType> {
        self.target.get().map(|target| target.kind)
    }

    /// Retains and returns the observed payload.
    pub fn upgrade(&self) -> Result<Value> {
        let Some(target) = self.target.get() else {
            bail!(ErrorCode::NullType, "weak reference target is gone");
        };

        // SAFETY: the target clears this proxy before it is freed, so a set
        // target is alive. The retain gives the new handle its own count.
        unsafe {
            target.header.as_ref().retain();
            Ok(Value::from_raw_header(target.kind, target.header))
        }
    }
}

impl Payload for WeakProxy {
    const KIND: ObjectType = ObjectType::WeakRef;
    const TAG: AllocTag = AllocTag::WeakRef;
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    struct Tracked {
        log: std::rc::Rc<RefCell<Vec<&'static str>>>,
    }

    impl Payload for Tracked {
        const KIND: ObjectType = ObjectType::UserData;
        const TAG: AllocTag = AllocTag::UserData;

        fn finalize(&mut self, _engine: &Engine) {
            self.log.borrow_mut().push("finalize");
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.log.borrow_mut().push("drop");
        }
    }

    #[test]
    fn retains_and_releases_balance() {
        let engine = Engine::default();
        let log = std::rc::Rc::new(RefCell::new(Vec::new()));
        let tracked = Ref::new(&engine, Tracked { log: log.clone() }).unwrap();

        let clones: Vec<_> = (0..8).map(|_| tracked.clone()).collect();
        assert_eq!(tracked.ref_count(), 9);
        drop(clones);
        assert_eq!(tracked.ref_count(), 1);
        assert!(log.borrow().is_empty());

        drop(tracked);
        assert_eq!(*log.borrow(), vec!["finalize", "drop"]);
        assert_eq!(engine.stats().live_allocations(), 0);
    }

    #[test]
    fn proxy_is_unique_per_owner() {
        let engine = Engine::default();
        let value = Value::new_table(&engine).unwrap();
        let Value::Table(table) = &value else { unreachable!() };

        let a = table.weak_proxy().unwrap();
        let b = table.weak_proxy().unwrap();
        assert!(a.ptr_eq(&b));
        assert!(a.is_alive());
        assert_eq!(a.target_kind(), Some(ObjectType::Table));
    }

    #[test]
    fn upgrade_fails_after_owner_is_gone() {
        let engine = Engine::default();
        let value = Value::new_array(&engine, vec![Value::from(1)]).unwrap();
        let Value::Array(array) = &value else { unreachable!() };
        let proxy = array.weak_proxy().unwrap();

        let strong = proxy.upgrade().unwrap();
        assert!(strong.ptr_eq(&value));
        assert_eq!(value.ref_count(), Some(2));
        drop(strong);

        drop(value);
        assert!(!proxy.is_alive());
        assert_eq!(proxy.upgrade().unwrap_err().code, ErrorCode::NullType);
    }
}
