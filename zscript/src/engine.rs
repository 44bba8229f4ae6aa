//! The allocation owner shared by every value and VM.
//!
//! All reference-counted payloads are allocated through the engine's
//! [`AllocateFn`]. The callback follows the classic single-entry protocol:
//! a null pointer with a non-zero size allocates, a pointer with a non-zero
//! size reallocates and a pointer with a zero size frees.

use std::{
    alloc::{self, Layout},
    ffi::c_void,
    fmt,
    ptr::{self, NonNull},
    sync::Arc,
};

use log::warn;
use parking_lot::Mutex;

use crate::{ErrorCode, Result, error::bail};

/// Largest alignment the default allocator guarantees.
pub const MAX_ALIGN: usize = 16;

/// What an allocation is for, passed through to the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AllocTag {
    Unknown,
    Engine,
    Vm,
    Array,
    Table,
    Struct,
    Class,
    String,
    UserData,
    NativeClosure,
    WeakRef,
    Capture,
    Closure,
    Prototype,
    Node,
}

/// Opaque host pointer handed back to callbacks and hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct UserPointer(pub *mut c_void);

// SAFETY: the runtime never dereferences the pointer, it only hands it back
// to host callbacks.
unsafe impl Send for UserPointer {}
unsafe impl Sync for UserPointer {}

impl UserPointer {
    pub const NULL: Self = Self(ptr::null_mut());

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl Default for UserPointer {
    fn default() -> Self {
        Self::NULL
    }
}

/// Allocation callback.
///
/// # Safety
///
/// Implementations must behave like `realloc`: return a block of at least
/// `size` bytes aligned to [`MAX_ALIGN`], or null on failure. `ptr` is
/// either null or a block previously returned by the same callback with
/// `old_size` bytes.
pub type AllocateFn =
    unsafe fn(&Engine, UserPointer, *mut u8, usize, usize, AllocTag) -> *mut u8;

/// Hook run on a user pointer when its owner goes away.
pub type ReleaseHook = fn(&Engine, UserPointer);

/// Hook run on the engine's own user pointer when it is replaced or the
/// engine is dropped.
pub type UserReleaseHook = fn(UserPointer);

/// Default [`AllocateFn`] backed by the global allocator.
///
/// # Safety
///
/// See [`AllocateFn`].
pub unsafe fn default_allocate(
    _engine: &Engine,
    _user: UserPointer,
    ptr: *mut u8,
    size: usize,
    old_size: usize,
    _tag: AllocTag,
) -> *mut u8 {
    let layout = |size| Layout::from_size_align(size, MAX_ALIGN).ok();

    unsafe {
        if ptr.is_null() {
            if size == 0 {
                return ptr::null_mut();
            }
            return match layout(size) {
                Some(layout) => alloc::alloc(layout),
                None => ptr::null_mut(),
            };
        }

        let Some(old) = layout(old_size) else {
            return ptr::null_mut();
        };

        if size == 0 {
            alloc::dealloc(ptr, old);
            return ptr::null_mut();
        }

        alloc::realloc(ptr, old, size)
    }
}

pub struct EngineCreateInfo {
    pub allocate: AllocateFn,
    pub user_pointer: UserPointer,
    pub user_release_hook: Option<UserReleaseHook>,
}

impl Default for EngineCreateInfo {
    fn default() -> Self {
        Self {
            allocate: default_allocate,
            user_pointer: UserPointer::NULL,
            user_release_hook: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    pub allocations: usize,
    pub deallocations: usize,
    pub reallocations: usize,
    pub bytes_in_use: usize,
    pub peak_bytes: usize,
}

impl AllocationStats {
    pub fn live_allocations(&self) -> usize {
        self.allocations - self.deallocations
    }

    fn grow(&mut self, bytes: usize) {
        self.bytes_in_use += bytes;
        self.peak_bytes = self.peak_bytes.max(self.bytes_in_use);
    }

    fn shrink(&mut self, bytes: usize) {
        self.bytes_in_use = self.bytes_in_use.saturating_sub(bytes);
    }
}

struct UserState {
    pointer: UserPointer,
    release_hook: Option<UserReleaseHook>,
}

struct EngineShared {
    allocate: AllocateFn,
    user: Mutex<UserState>,
    stats: Mutex<AllocationStats>,
}

impl Drop for EngineShared {
    fn drop(&mut self) {
        let user = self.user.get_mut();
        if let Some(hook) = user.release_hook.take() {
            hook(user.pointer);
        }
    }
}

/// Shared handle to the allocator, user pointer and allocation counters.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    pub fn new(info: EngineCreateInfo) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                allocate: info.allocate,
                user: Mutex::new(UserState {
                    pointer: info.user_pointer,
                    release_hook: info.user_release_hook,
                }),
                stats: Mutex::new(AllocationStats::default()),
            }),
        }
    }

    pub fn ptr_eq(&self, other: &Engine) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn stats(&self) -> AllocationStats {
        *self.shared.stats.lock()
    }

    pub fn user_pointer(&self) -> UserPointer {
        self.shared.user.lock().pointer
    }

    /// Replaces the user pointer, running the release hook on the old one.
    pub fn set_user_pointer(&self, pointer: UserPointer) {
        let (old, hook) = {
            let mut user = self.shared.user.lock();
            (std::mem::replace(&mut user.pointer, pointer), user.release_hook)
        };
        if let Some(hook) = hook {
            if old != pointer {
                hook(old);
            }
        }
    }

    /// A replaced hook never runs for the current pointer.
    pub fn set_user_release_hook(&self, hook: Option<UserReleaseHook>) {
        let mut user = self.shared.user.lock();
        if user.release_hook.is_some() && !user.pointer.is_null() {
            warn!("user release hook replaced while a user pointer is set");
        }
        user.release_hook = hook;
    }

    pub fn allocate(&self, size: usize, tag: AllocTag) -> Result<NonNull<u8>> {
        if size == 0 {
            bail!(ErrorCode::InvalidSize, "zero-sized allocation");
        }

        // SAFETY: null pointer with a non-zero size requests a fresh block.
        let raw = unsafe {
            (self.shared.allocate)(self, self.user_pointer(), ptr::null_mut(), size, 0, tag)
        };
        let Some(block) = NonNull::new(raw) else {
            bail!(ErrorCode::OutOfMemory, "failed to allocate {size} bytes");
        };

        let mut stats = self.shared.stats.lock();
        stats.allocations += 1;
        stats.grow(size);
        Ok(block)
    }

    /// # Safety
    ///
    /// `ptr` must come from this engine and hold `old_size` bytes. On
    /// success the old pointer must no longer be used.
    pub unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        size: usize,
        old_size: usize,
        tag: AllocTag,
    ) -> Result<NonNull<u8>> {
        if size == 0 {
            bail!(ErrorCode::InvalidSize, "zero-sized reallocation");
        }

        let raw = unsafe {
            (self.shared.allocate)(self, self.user_pointer(), ptr.as_ptr(), size, old_size, tag)
        };
        let Some(block) = NonNull::new(raw) else {
            bail!(ErrorCode::OutOfMemory, "failed to reallocate {old_size} -> {size} bytes");
        };

        let mut stats = self.shared.stats.lock();
        stats.reallocations += 1;
        stats.shrink(old_size);
        stats.grow(size);
        Ok(block)
    }

    /// # Safety
    ///
    /// `ptr` must come from this engine, hold `size` bytes and not be used
    /// afterwards.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, tag: AllocTag) {
        unsafe {
            (self.shared.allocate)(self, self.user_pointer(), ptr.as_ptr(), 0, size, tag);
        }

        let mut stats = self.shared.stats.lock();
        stats.deallocations += 1;
        stats.shrink(size);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineCreateInfo::default())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("user_pointer", &self.user_pointer())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn allocate_and_free_track_stats() {
        let engine = Engine::default();
        let block = engine.allocate(64, AllocTag::Unknown).unwrap();
        let stats = engine.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.bytes_in_use, 64);

        let block = unsafe { engine.reallocate(block, 128, 64, AllocTag::Unknown).unwrap() };
        assert_eq!(engine.stats().bytes_in_use, 128);
        assert_eq!(engine.stats().peak_bytes, 128);

        unsafe { engine.deallocate(block, 128, AllocTag::Unknown) };
        let stats = engine.stats();
        assert_eq!(stats.live_allocations(), 0);
        assert_eq!(stats.bytes_in_use, 0);
        assert_eq!(stats.reallocations, 1);
    }

    unsafe fn failing_allocate(
        _: &Engine,
        _: UserPointer,
        _: *mut u8,
        _: usize,
        _: usize,
        _: AllocTag,
    ) -> *mut u8 {
        ptr::null_mut()
    }

    #[test]
    fn null_from_callback_is_out_of_memory() {
        let engine = Engine::new(EngineCreateInfo {
            allocate: failing_allocate,
            ..Default::default()
        });
        let err = engine.allocate(16, AllocTag::Table).unwrap_err();
        assert_eq!(err.code, ErrorCode::OutOfMemory);
        assert_eq!(engine.stats().allocations, 0);
    }

    static RELEASED: AtomicUsize = AtomicUsize::new(0);

    fn count_release(_: UserPointer) {
        RELEASED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn user_pointer_hook_runs_on_replace_and_drop() {
        let mut slot = 7u32;
        let engine = Engine::new(EngineCreateInfo {
            user_pointer: UserPointer(&mut slot as *mut u32 as *mut c_void),
            user_release_hook: Some(count_release),
            ..Default::default()
        });
        let before = RELEASED.load(Ordering::SeqCst);

        engine.set_user_pointer(UserPointer::NULL);
        assert_eq!(RELEASED.load(Ordering::SeqCst), before + 1);
        assert!(engine.user_pointer().is_null());

        drop(engine);
        assert_eq!(RELEASED.load(Ordering::SeqCst), before + 2);
    }
}
