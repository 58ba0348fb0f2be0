//! Single-use rendezvous barrier from a mutex and a turnstile semaphore.
//!
//! `wait` takes the mutex and counts the arrival. The arrival that
//! completes the party pre-charges the turnstile with one permit per
//! party. Every caller, that last one included, then acquires the
//! turnstile once, so all parties leave together and the turnstile ends
//! at zero.
//!
//! Counters are never reset. A barrier rendezvous happens once; callers
//! that need another round build a fresh barrier. Arrivals beyond
//! `parties` get [`BarrierError::Exhausted`] instead of blocking forever.

use std::fmt;

use thiserror::Error;
use tracing::trace;

use crate::mutex::Mutex;
use crate::semaphore::{RawSemaphore, StdSemaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BarrierError {
    /// Every party has already arrived; this barrier will never open again.
    #[error("barrier for {parties} parties has already been filled")]
    Exhausted { parties: usize },
}

/// Returned to each party that passes the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    leader: bool,
}

impl BarrierWaitResult {
    /// True for the one party whose arrival released the turnstile.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.leader
    }
}

/// A one-shot barrier for `parties` threads.
pub struct Barrier<S: RawSemaphore = StdSemaphore> {
    parties: usize,
    arrived: Mutex<usize, S>,
    turnstile: S,
}

impl<S: RawSemaphore> Barrier<S> {
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            arrived: Mutex::new(0),
            turnstile: S::new(0),
        }
    }

    #[must_use]
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// How many parties have arrived so far.
    pub fn arrived(&self) -> usize {
        *self.arrived.lock()
    }

    /// Block until all `parties` callers have arrived.
    pub fn wait(&self) -> Result<BarrierWaitResult, BarrierError> {
        let leader = {
            let mut arrived = self.arrived.lock();
            if *arrived >= self.parties {
                return Err(BarrierError::Exhausted {
                    parties: self.parties,
                });
            }
            *arrived += 1;
            let leader = *arrived == self.parties;
            if leader {
                trace!(parties = self.parties, "barrier full, opening turnstile");
                self.turnstile.release_many(self.parties);
            }
            leader
        };

        self.turnstile.acquire();
        Ok(BarrierWaitResult { leader })
    }
}

impl<S: RawSemaphore> fmt::Debug for Barrier<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("parties", &self.parties)
            .field("arrived", &self.arrived())
            .finish()
    }
}
