use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// A non-blocking mutual-exclusion lock with a deferred-work flag, for
/// sharing state between interrupt handlers and ordinary code in a
/// `no_std` environment.
///
/// `DeferLock` allows exclusive access to data from two kinds of call
/// sites. Ordinary code acquires it with [`lock`](Self::lock), spinning
/// briefly if needed. An interrupt handler must never spin on a lock its
/// own interruptee may hold, so it uses [`try_lock`](Self::try_lock)
/// instead and, on failure, records that its work is pending with
/// [`defer`](Self::defer). Whoever holds the lock drains that flag with
/// [`take_deferred`](Self::take_deferred) after releasing, so deferred
/// work is delayed but never lost.
///
/// # Type Parameters
///
/// * `T` - The type of data protected by the lock.
pub struct DeferLock<T> {
    locked: AtomicBool,
    deferred: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: DeferLock can be shared between contexts if T can be sent between them
unsafe impl<T: Send> Sync for DeferLock<T> {}
unsafe impl<T: Send> Send for DeferLock<T> {}

impl<T> DeferLock<T> {
    /// Creates a new `DeferLock` wrapping the provided data.
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            deferred: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns a guard on success, or `None` if the lock is currently
    /// held. This is the only acquisition path an interrupt handler may
    /// use; on `None` it should call [`defer`](Self::defer) and return.
    pub fn try_lock(&self) -> Option<DeferLockGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(DeferLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Acquires the lock, spinning until it is available.
    ///
    /// Must not be called from interrupt context: the spin is bounded
    /// only because the other possible holder is an interrupt handler
    /// with a short critical section that always releases.
    ///
    /// Returns a `DeferLockGuard` which provides mutable access to the
    /// underlying data. The lock is automatically released when the
    /// guard is dropped.
    pub fn lock(&self) -> DeferLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            core::hint::spin_loop();
        }
    }

    /// Records that a lock-out occurred and work is pending.
    ///
    /// Called by an interrupt handler when [`try_lock`](Self::try_lock)
    /// fails.
    pub fn defer(&self) {
        self.deferred.store(true, Ordering::Release);
    }

    /// Consumes the deferred-work flag.
    ///
    /// Returns `true` exactly once per recorded deferral. Callers that
    /// held the lock must check this after releasing and run the
    /// deferred work themselves.
    pub fn take_deferred(&self) -> bool {
        self.deferred.swap(false, Ordering::Acquire)
    }

    /// Clears the deferred-work flag without acting on it.
    ///
    /// Used by a holder that is about to do the deferred work anyway as
    /// part of its own critical section.
    pub fn clear_deferred(&self) {
        self.deferred.store(false, Ordering::Release);
    }
}

/// A guard that provides access to the data protected by a `DeferLock`.
///
/// This guard is returned by `DeferLock::lock` and `DeferLock::try_lock`.
/// It releases the lock automatically when dropped.
pub struct DeferLockGuard<'a, T> {
    lock: &'a DeferLock<T>,
}

impl<T> core::ops::Deref for DeferLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: The lock is held, so we have exclusive access
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> core::ops::DerefMut for DeferLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: The lock is held, so we have exclusive access
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for DeferLockGuard<'_, T> {
    /// Releases the lock when the guard goes out of scope.
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
