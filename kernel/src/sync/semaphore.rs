use crate::sync::mutex::TicketMutex;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// A counting semaphore.
///
/// `down` spins until the count is positive; the scheduler is not reachable
/// from here, so waiting threads burn their quantum instead of sleeping.
pub struct Semaphore {
    value: TicketMutex<u32>,
}

impl Semaphore {
    pub const fn new(count: u32) -> Self {
        Self {
            value: TicketMutex::new(count),
        }
    }

    pub fn down(&self) {
        loop {
            if self.try_down() {
                return;
            }
            super::relax();
        }
    }

    pub fn try_down(&self) -> bool {
        let mut value = self.value.lock();
        if *value == 0 {
            return false;
        }
        *value -= 1;
        true
    }

    pub fn up(&self) {
        *self.value.lock() += 1;
    }

    pub fn value(&self) -> u32 {
        *self.value.lock()
    }
}

/// Data guarded by a binary semaphore.
///
/// Unlike a [`TicketMutex`], the guard can be taken from one lock-holder's
/// context and carried across other locks (see [`ArcSemaphoreGuard`]), which
/// is what lets eviction hold a victim process's page table while it performs
/// I/O without holding the frame table lock.
pub struct SemaphoreLock<T: ?Sized> {
    sema: Semaphore,
    data: UnsafeCell<T>,
}

// The semaphore serializes access to `data`.
unsafe impl<T: ?Sized + Send> Sync for SemaphoreLock<T> {}
unsafe impl<T: ?Sized + Send> Send for SemaphoreLock<T> {}

impl<T> SemaphoreLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            sema: Semaphore::new(1),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SemaphoreLock<T> {
    pub fn lock(&self) -> SemaphoreGuard<'_, T> {
        self.sema.down();
        SemaphoreGuard { lock: self }
    }

    pub fn try_lock(&self) -> Option<SemaphoreGuard<'_, T>> {
        self.sema.try_down().then(|| SemaphoreGuard { lock: self })
    }

    /// Like [`Self::try_lock`], but the guard keeps the lock alive by itself.
    pub fn try_lock_arc(this: &Arc<Self>) -> Option<ArcSemaphoreGuard<T>> {
        this.sema.try_down().then(|| ArcSemaphoreGuard { lock: this.clone() })
    }

    pub fn is_locked(&self) -> bool {
        self.sema.value() == 0
    }
}

pub struct SemaphoreGuard<'a, T: ?Sized> {
    lock: &'a SemaphoreLock<T>,
}

impl<T: ?Sized> Deref for SemaphoreGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SemaphoreGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SemaphoreGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.sema.up();
    }
}

/// An owning guard over a [`SemaphoreLock`] held through an [`Arc`].
pub struct ArcSemaphoreGuard<T: ?Sized> {
    lock: Arc<SemaphoreLock<T>>,
}

impl<T: ?Sized> Deref for ArcSemaphoreGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for ArcSemaphoreGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for ArcSemaphoreGuard<T> {
    fn drop(&mut self) {
        self.lock.sema.up();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_semaphore_counts() {
        let sema = Semaphore::new(2);
        assert!(sema.try_down());
        assert!(sema.try_down());
        assert!(!sema.try_down());
        sema.up();
        assert_eq!(sema.value(), 1);
        sema.down();
        assert_eq!(sema.value(), 0);
    }

    #[test]
    fn test_lock_is_binary() {
        let lock = Arc::new(SemaphoreLock::new(0));
        let guard = lock.lock();
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        assert!(SemaphoreLock::try_lock_arc(&lock).is_none());
        drop(guard);

        let mut owned = SemaphoreLock::try_lock_arc(&lock).unwrap();
        *owned += 1;
        assert!(lock.try_lock().is_none());
        drop(owned);
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn test_arc_guard_crosses_threads() {
        let lock = Arc::new(SemaphoreLock::new(Vec::new()));
        let mut guard = SemaphoreLock::try_lock_arc(&lock).unwrap();
        guard.push(1);

        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || lock.lock().push(2))
        };
        // The waiter cannot get in until the guard goes away.
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(*guard, [1]);
        drop(guard);
        waiter.join().unwrap();
        assert_eq!(*lock.lock(), [1, 2]);
    }
}
