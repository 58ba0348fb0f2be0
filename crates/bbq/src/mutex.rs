//! Mutual exclusion from a one-permit semaphore.
//!
//! `lock` is `acquire`, and dropping the guard is `release`, so lock and
//! unlock are always paired by the same owner. There is no try-lock and
//! no reentrancy: a thread that locks twice deadlocks itself.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use crate::semaphore::{RawSemaphore, StdSemaphore};

/// A mutex guarding `T`, built on a semaphore initialised to one permit.
pub struct Mutex<T, S: RawSemaphore = StdSemaphore> {
    sem: S,
    value: UnsafeCell<T>,
}

// Safety: the semaphore admits one holder at a time, so `&Mutex` only
// ever hands out one `&mut T`. Moving `T` between threads needs `T: Send`.
unsafe impl<T: Send, S: RawSemaphore> Send for Mutex<T, S> {}
unsafe impl<T: Send, S: RawSemaphore> Sync for Mutex<T, S> {}

/// RAII guard. Releases the permit on drop. Not `Send`: the thread that
/// locked is the thread that unlocks.
#[must_use = "dropping the guard unlocks the mutex immediately"]
pub struct MutexGuard<'a, T, S: RawSemaphore = StdSemaphore> {
    mutex: &'a Mutex<T, S>,
    _not_send: PhantomData<*const ()>,
}

// Safety: sharing the guard only shares `&T`.
unsafe impl<T: Sync, S: RawSemaphore> Sync for MutexGuard<'_, T, S> {}

impl<T, S: RawSemaphore> Mutex<T, S> {
    pub fn new(value: T) -> Self {
        Self {
            sem: S::new(1),
            value: UnsafeCell::new(value),
        }
    }

    /// Block until the lock is free, then take it.
    pub fn lock(&self) -> MutexGuard<'_, T, S> {
        self.sem.acquire();
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    /// Whether the lock is currently held. A snapshot, for diagnostics.
    pub fn is_locked(&self) -> bool {
        self.sem.value() == 0
    }

    /// Exclusive access without locking: `&mut self` proves no guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default, S: RawSemaphore> Default for Mutex<T, S> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, S: RawSemaphore> fmt::Debug for Mutex<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

impl<T, S: RawSemaphore> Deref for MutexGuard<'_, T, S> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard holds the only permit.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T, S: RawSemaphore> DerefMut for MutexGuard<'_, T, S> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard holds the only permit.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T, S: RawSemaphore> Drop for MutexGuard<'_, T, S> {
    fn drop(&mut self) {
        self.mutex.sem.release();
    }
}

impl<T: fmt::Debug, S: RawSemaphore> fmt::Debug for MutexGuard<'_, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
