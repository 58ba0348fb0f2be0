//! Counting semaphores: the only blocking primitive in the crate.
//!
//! Everything else (the mutex, the barrier, the queue) is built from
//! `acquire`/`release` pairs on a [`RawSemaphore`]. The backend is a type
//! parameter, so the choice is made at compile time and there is no
//! global state.
//!
//! | Backend | Built on |
//! |---------|----------|
//! | [`StdSemaphore`] | `std::sync::{Mutex, Condvar}` (loom's under `cfg(loom)`) |
//! | [`ParkingSemaphore`] | `parking_lot::{Mutex, Condvar}` |
//!
//! Neither backend promises fairness: a release wakes some waiter, not
//! necessarily the oldest.

use std::fmt;
use std::sync::PoisonError;

use crate::sync::{Condvar, StdMutex, StdMutexGuard};

/// A blocking counting semaphore.
///
/// Dropping the semaphore is its destroy; the owner must guarantee that
/// no thread is still blocked in `acquire` at that point.
pub trait RawSemaphore: Send + Sync {
    /// Create a semaphore holding `permits` permits.
    fn new(permits: usize) -> Self
    where
        Self: Sized;

    /// Block until a permit is available, then take it.
    fn acquire(&self);

    /// Return one permit and wake at most one blocked `acquire`.
    fn release(&self);

    /// Best-effort snapshot of the permit count.
    ///
    /// Not linearizable with concurrent `acquire`/`release`: the value may
    /// be stale by the time the caller looks at it.
    fn value(&self) -> usize;

    /// Return `n` permits, waking up to `n` blocked acquirers.
    fn release_many(&self, n: usize) {
        for _ in 0..n {
            self.release();
        }
    }
}

/// Semaphore on `std::sync::Mutex` + `Condvar`.
pub struct StdSemaphore {
    permits: StdMutex<usize>,
    available: Condvar,
}

impl StdSemaphore {
    // Critical sections below only touch the counter and cannot panic, so a
    // poisoned lock still guards a consistent count.
    fn lock(&self) -> StdMutexGuard<'_, usize> {
        self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RawSemaphore for StdSemaphore {
    fn new(permits: usize) -> Self {
        Self {
            permits: StdMutex::new(permits),
            available: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = self.lock();
        while *permits == 0 {
            permits = self
                .available
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
    }

    fn release(&self) {
        let mut permits = self.lock();
        *permits += 1;
        drop(permits);
        self.available.notify_one();
    }

    fn value(&self) -> usize {
        *self.lock()
    }

    fn release_many(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut permits = self.lock();
        *permits += n;
        drop(permits);
        for _ in 0..n {
            self.available.notify_one();
        }
    }
}

impl fmt::Debug for StdSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdSemaphore")
            .field("permits", &self.value())
            .finish()
    }
}

/// Semaphore on `parking_lot::Mutex` + `Condvar`. No poisoning.
pub struct ParkingSemaphore {
    permits: parking_lot::Mutex<usize>,
    available: parking_lot::Condvar,
}

impl RawSemaphore for ParkingSemaphore {
    fn new(permits: usize) -> Self {
        Self {
            permits: parking_lot::Mutex::new(permits),
            available: parking_lot::Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    fn release(&self) {
        *self.permits.lock() += 1;
        self.available.notify_one();
    }

    fn value(&self) -> usize {
        *self.permits.lock()
    }

    fn release_many(&self, n: usize) {
        if n == 0 {
            return;
        }
        *self.permits.lock() += n;
        for _ in 0..n {
            self.available.notify_one();
        }
    }
}

impl fmt::Debug for ParkingSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParkingSemaphore")
            .field("permits", &self.value())
            .finish()
    }
}
