use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, Ordering},
};

/// A test-and-set spinlock guarding the data within.
///
/// Access is only handed out through closures, so the lock can never be
/// leaked in a held state by a forgotten guard.
#[repr(align(16))]
pub struct SpinMutex<T> {
    locked: AtomicBool,
    inner: UnsafeCell<T>,
}

// The data is only reached while holding the lock, so `T: Send` is enough.
unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Consume the mutex, returning the data within.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Exclusive access through `&mut self` needs no locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Attempt to take the lock once and call `f` with the data.
    ///
    /// Returns `None` if the lock was already held.
    pub fn try_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        if !self.try_acquire() {
            return None;
        }

        // SAFETY: We hold the lock.
        let r = f(unsafe { &mut *self.inner.get() });
        self.release();

        Some(r)
    }

    /// Spin until the lock is taken, then call `f` with the data.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        while !self.try_acquire() {
            // Wait for a plain load to see the lock free before retrying the
            // read-modify-write, so waiters don't bounce the line around.
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }

        // SAFETY: We hold the lock.
        let r = f(unsafe { &mut *self.inner.get() });
        self.release();

        r
    }
}
