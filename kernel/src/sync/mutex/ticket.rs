//! A FIFO ticket spinlock.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

/// A spinlock that serves waiters in arrival order, so a frame request cannot
/// be starved by a stream of later ones.
///
/// ```
/// let lock = vmcore::sync::mutex::TicketMutex::new(0);
/// *lock.lock() += 1;
/// assert_eq!(*lock.lock(), 1);
/// ```
pub struct TicketMutex<T: ?Sized> {
    /// Next ticket to hand out.
    issued: AtomicUsize,
    /// Ticket currently allowed in.
    serving: AtomicUsize,
    data: UnsafeCell<T>,
}

// Tickets serialize every access to `data`.
unsafe impl<T: ?Sized + Send> Sync for TicketMutex<T> {}
unsafe impl<T: ?Sized + Send> Send for TicketMutex<T> {}

impl<T> TicketMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            issued: AtomicUsize::new(0),
            serving: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> TicketMutex<T> {
    pub fn lock(&self) -> TicketMutexGuard<'_, T> {
        let ticket = self.issued.fetch_add(1, Ordering::Relaxed);
        while self.serving.load(Ordering::Acquire) != ticket {
            core::hint::spin_loop();
        }
        TicketMutexGuard { lock: self }
    }

    /// Takes the lock only if nobody holds it or is queued for it.
    pub fn try_lock(&self) -> Option<TicketMutexGuard<'_, T>> {
        let serving = self.serving.load(Ordering::Acquire);
        self.issued
            .compare_exchange(serving, serving + 1, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| TicketMutexGuard { lock: self })
    }

    pub fn is_locked(&self) -> bool {
        self.issued.load(Ordering::Relaxed) != self.serving.load(Ordering::Relaxed)
    }
}

impl<T: Default> Default for TicketMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Releases the lock to the next ticket holder on drop.
pub struct TicketMutexGuard<'a, T: ?Sized> {
    lock: &'a TicketMutex<T>,
}

impl<T: ?Sized> Deref for TicketMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TicketMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for TicketMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.serving.fetch_add(1, Ordering::Release);
    }
}
