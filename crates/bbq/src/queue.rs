//! Blocking bounded queue with a race-free close.
//!
//! Producers block in `put` while the queue is full; consumers block in
//! `take` while it is empty. `close` wakes every thread blocked at that
//! moment and waits until each of them has left its blocking call.
//!
//! # Structure
//!
//! ```text
//!  put ──> free_slots.acquire() ──> lock ──> ring.enqueue ──> occupied_slots.release()
//!  take ─> occupied_slots.acquire() ─> lock ─> ring.dequeue ─> free_slots.release()
//! ```
//!
//! # Close protocol
//!
//! 1. A thread registers as a waiter (`enq_waiters`/`deq_waiters`) under
//!    the queue mutex, after re-checking `is_open` there.
//! 2. `close` takes the mutex, clears `is_open`, samples both waiter
//!    counts, builds one barrier per side sized `sampled + 1`, and
//!    force-releases exactly `sampled` permits per side.
//! 3. A waiter that wakes re-checks `is_open` under the mutex. If the
//!    queue closed, it deregisters, leaves the mutex and joins its side's
//!    barrier. Otherwise it mutates the ring and deregisters under the
//!    same lock.
//! 4. `close` is the extra party on both barriers, so it returns only
//!    after every sampled waiter has left its blocking call.
//!
//! Registering and deregistering under the mutex is what makes the
//! sampled counts exact: a thread is either counted and will join the
//! barrier, or it observes the closed flag and never blocks.
//!
//! # Invariants (at quiescent points, while open)
//!
//! | Property | Description |
//! |----------|-------------|
//! | PermitAccounting | `occupied_slots == len == capacity - free_slots` |
//! | NoAdmissionAfterClose | no item enters the ring once `is_open` is false |
//! | FIFO | items leave in the order they were admitted |

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::barrier::Barrier;
use crate::mutex::Mutex;
use crate::ring_buffer::{RingBuffer, RingBufferError};
use crate::semaphore::{RawSemaphore, StdSemaphore};
use crate::sync::{AtomicBool, AtomicUsize, Ordering};

/// Construction failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("failed to create queue storage: {0}")]
    Storage(#[from] RingBufferError),
}

/// `put` on a closed queue. Carries the rejected item back.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct PutError<T>(pub T);

impl<T> PutError<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PutError(..)")
    }
}

impl<T> fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("put on a closed queue")
    }
}

impl<T: fmt::Debug> std::error::Error for PutError<T> {}

/// `take` on a closed queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("take on a closed queue")]
pub struct TakeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CloseError {
    #[error("queue is already closed")]
    AlreadyClosed,
}

/// What a successful `close` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseSummary {
    /// Producers blocked in `put` when the queue closed
    pub woken_producers: usize,
    /// Consumers blocked in `take` when the queue closed
    pub woken_consumers: usize,
    /// Items handed to the cleanup callback
    pub reclaimed: usize,
}

/// Snapshot of the two slot semaphores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPermits {
    pub free: usize,
    pub occupied: usize,
}

struct CloseBarriers<S: RawSemaphore> {
    producers: Barrier<S>,
    consumers: Barrier<S>,
}

struct State<T, S: RawSemaphore> {
    ring: RingBuffer<T>,
    /// Set once, by `close`, before any waiter is force-released.
    close: Option<Arc<CloseBarriers<S>>>,
}

/// A fixed-capacity, blocking, closeable MPMC queue.
///
/// `S` picks the semaphore backend for every internal primitive.
pub struct BlockingBoundedQueue<T, S: RawSemaphore = StdSemaphore> {
    state: Mutex<State<T, S>, S>,
    free_slots: S,
    occupied_slots: S,
    enq_waiters: AtomicUsize,
    deq_waiters: AtomicUsize,
    is_open: AtomicBool,
    capacity: usize,
}

#[derive(Clone, Copy, Debug)]
enum Side {
    Producer,
    Consumer,
}

impl<T, S: RawSemaphore> BlockingBoundedQueue<T, S> {
    /// Create an open queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        let ring = RingBuffer::new(capacity)?;
        debug!(capacity, "queue created");
        Ok(Self {
            state: Mutex::new(State { ring, close: None }),
            free_slots: S::new(capacity),
            occupied_slots: S::new(0),
            enq_waiters: AtomicUsize::new(0),
            deq_waiters: AtomicUsize::new(0),
            is_open: AtomicBool::new(true),
            capacity,
        })
    }

    /// Append `item`, blocking while the queue is full.
    ///
    /// Returns the item inside `PutError` if the queue is closed, whether
    /// it was closed before the call or while the call was blocked.
    pub fn put(&self, item: T) -> Result<(), PutError<T>> {
        if !self.register(Side::Producer) {
            trace!("put rejected, queue closed");
            return Err(PutError(item));
        }

        trace!(free = self.free_slots.value(), "put waiting for a free slot");
        self.free_slots.acquire();

        let mut state = self.state.lock();
        if !self.is_open.load(Ordering::Acquire) {
            self.enq_waiters.fetch_sub(1, Ordering::AcqRel);
            let barriers = state.close.clone();
            drop(state);
            self.leave_through_barrier(Side::Producer, barriers);
            return Err(PutError(item));
        }

        if state.ring.enqueue(item).is_err() {
            unreachable!("holding a free-slot permit but the ring is full");
        }
        self.enq_waiters.fetch_sub(1, Ordering::AcqRel);
        drop(state);

        self.occupied_slots.release();
        Ok(())
    }

    /// Remove the oldest item, blocking while the queue is empty.
    ///
    /// Once the queue is closed this returns `TakeError` even if items
    /// remain; those go to `close_with`/`destroy` or are dropped.
    pub fn take(&self) -> Result<T, TakeError> {
        if !self.register(Side::Consumer) {
            trace!("take rejected, queue closed");
            return Err(TakeError);
        }

        trace!(occupied = self.occupied_slots.value(), "take waiting for an item");
        self.occupied_slots.acquire();

        let mut state = self.state.lock();
        if !self.is_open.load(Ordering::Acquire) {
            self.deq_waiters.fetch_sub(1, Ordering::AcqRel);
            let barriers = state.close.clone();
            drop(state);
            self.leave_through_barrier(Side::Consumer, barriers);
            return Err(TakeError);
        }

        let Some(item) = state.ring.dequeue() else {
            unreachable!("holding an occupied-slot permit but the ring is empty");
        };
        self.deq_waiters.fetch_sub(1, Ordering::AcqRel);
        drop(state);

        self.free_slots.release();
        Ok(item)
    }

    /// Close the queue and wait for every blocked `put`/`take` to leave.
    ///
    /// Items still stored stay in the ring; use [`close_with`] or
    /// [`destroy`] to reclaim them. Only the first call closes; later
    /// calls return `CloseError::AlreadyClosed`.
    ///
    /// [`close_with`]: Self::close_with
    /// [`destroy`]: Self::destroy
    pub fn close(&self) -> Result<CloseSummary, CloseError> {
        let (barriers, summary) = {
            let mut state = self.state.lock();
            if !self.is_open.load(Ordering::Acquire) {
                return Err(CloseError::AlreadyClosed);
            }
            self.is_open.store(false, Ordering::Release);

            let woken_producers = self.enq_waiters.load(Ordering::Acquire);
            let woken_consumers = self.deq_waiters.load(Ordering::Acquire);
            debug!(
                producers = woken_producers,
                consumers = woken_consumers,
                "closing queue"
            );

            let barriers = Arc::new(CloseBarriers {
                producers: Barrier::new(woken_producers + 1),
                consumers: Barrier::new(woken_consumers + 1),
            });
            state.close = Some(Arc::clone(&barriers));

            self.free_slots.release_many(woken_producers);
            self.occupied_slots.release_many(woken_consumers);

            let summary = CloseSummary {
                woken_producers,
                woken_consumers,
                reclaimed: 0,
            };
            (barriers, summary)
        };

        if let Err(e) = barriers.producers.wait() {
            warn!(error = %e, "producer close barrier");
        }
        if let Err(e) = barriers.consumers.wait() {
            warn!(error = %e, "consumer close barrier");
        }

        debug!(
            producers = summary.woken_producers,
            consumers = summary.woken_consumers,
            "queue closed"
        );
        Ok(summary)
    }

    /// `close`, then hand every remaining item, oldest first, to `cleanup`.
    pub fn close_with<F>(&self, cleanup: F) -> Result<CloseSummary, CloseError>
    where
        F: FnMut(T),
    {
        let mut summary = self.close()?;
        summary.reclaimed = self.state.lock().ring.drain(cleanup);
        debug!(reclaimed = summary.reclaimed, "reclaimed items on close");
        Ok(summary)
    }

    /// Close (if still open) and tear the queue down, handing remaining
    /// items to `cleanup`. Returns how many items were reclaimed.
    ///
    /// Owning `self` proves that no thread is inside `put` or `take`.
    pub fn destroy<F>(self, cleanup: F) -> usize
    where
        F: FnMut(T),
    {
        if self.is_open() {
            // Nothing can be blocked, both barriers are single-party.
            if let Err(e) = self.close() {
                warn!(error = %e, "close during destroy");
            }
        }
        let reclaimed = self.state.into_inner().ring.destroy(cleanup);
        debug!(reclaimed, "queue destroyed");
        reclaimed
    }

    /// Items currently stored. Stale as soon as it returns.
    pub fn size(&self) -> usize {
        self.state.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().ring.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    /// Snapshot of the slot semaphores.
    pub fn permits(&self) -> SlotPermits {
        SlotPermits {
            free: self.free_slots.value(),
            occupied: self.occupied_slots.value(),
        }
    }

    /// Producers registered in `put` and not yet finished.
    pub fn waiting_producers(&self) -> usize {
        self.enq_waiters.load(Ordering::Acquire)
    }

    /// Consumers registered in `take` and not yet finished.
    pub fn waiting_consumers(&self) -> usize {
        self.deq_waiters.load(Ordering::Acquire)
    }

    /// Visit stored items, oldest first, under the queue lock.
    ///
    /// The callback must not call back into the queue: the lock is not
    /// reentrant.
    pub fn for_each<F>(&self, f: F) -> usize
    where
        F: FnMut(&T) -> ControlFlow<()>,
    {
        self.state.lock().ring.for_each(f)
    }

    /// Count this thread as a waiter on `side`, unless the queue is closed.
    fn register(&self, side: Side) -> bool {
        // Fast path: no lock once closed.
        if !self.is_open.load(Ordering::Acquire) {
            return false;
        }
        let _state = self.state.lock();
        if !self.is_open.load(Ordering::Acquire) {
            return false;
        }
        match side {
            Side::Producer => self.enq_waiters.fetch_add(1, Ordering::AcqRel),
            Side::Consumer => self.deq_waiters.fetch_add(1, Ordering::AcqRel),
        };
        true
    }

    fn leave_through_barrier(&self, side: Side, barriers: Option<Arc<CloseBarriers<S>>>) {
        let Some(barriers) = barriers else {
            unreachable!("queue closed without close barriers");
        };
        trace!(?side, "woken by close, joining barrier");
        let barrier = match side {
            Side::Producer => &barriers.producers,
            Side::Consumer => &barriers.consumers,
        };
        if let Err(e) = barrier.wait() {
            warn!(?side, error = %e, "close barrier rejected a sampled waiter");
        }
    }
}

impl<T, S: RawSemaphore> fmt::Debug for BlockingBoundedQueue<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let permits = self.permits();
        f.debug_struct("BlockingBoundedQueue")
            .field("capacity", &self.capacity)
            .field("open", &self.is_open())
            .field("free_slots", &permits.free)
            .field("occupied_slots", &permits.occupied)
            .field("enq_waiters", &self.waiting_producers())
            .field("deq_waiters", &self.waiting_consumers())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::semaphore::ParkingSemaphore;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    const BLOCKED: Duration = Duration::from_millis(50);
    const WAKE: Duration = Duration::from_secs(5);

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + WAKE;
        while !cond() {
            assert!(std::time::Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = BlockingBoundedQueue::<u8>::new(0);
        assert_eq!(
            result.err(),
            Some(QueueError::Storage(RingBufferError::ZeroCapacity))
        );
    }

    #[test]
    fn test_put_take_fifo() {
        let queue: BlockingBoundedQueue<&str> = BlockingBoundedQueue::new(3).unwrap();
        queue.put("a").unwrap();
        queue.put("b").unwrap();
        assert_eq!(queue.size(), 2);
        assert_eq!(
            queue.permits(),
            SlotPermits {
                free: 1,
                occupied: 2
            }
        );
        assert_eq!(queue.take(), Ok("a"));
        assert_eq!(queue.take(), Ok("b"));
        assert!(queue.is_empty());
        assert_eq!(queue.waiting_producers(), 0);
        assert_eq!(queue.waiting_consumers(), 0);
    }

    #[test]
    fn test_closed_queue_rejects() {
        let queue: BlockingBoundedQueue<u32, ParkingSemaphore> =
            BlockingBoundedQueue::new(2).unwrap();
        queue.put(1).unwrap();

        let summary = queue.close().unwrap();
        assert_eq!(summary, CloseSummary::default());
        assert!(!queue.is_open());

        assert_eq!(queue.put(2).unwrap_err().into_inner(), 2);
        assert_eq!(queue.take(), Err(TakeError));
        assert_eq!(queue.close(), Err(CloseError::AlreadyClosed));
        // The admitted item is still there for cleanup.
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_close_with_reclaims_in_order() {
        let queue: BlockingBoundedQueue<u32> = BlockingBoundedQueue::new(4).unwrap();
        for i in 1..=3 {
            queue.put(i).unwrap();
        }
        queue.take().unwrap();

        let mut reclaimed = Vec::new();
        let summary = queue.close_with(|item| reclaimed.push(item)).unwrap();
        assert_eq!(summary.reclaimed, 2);
        assert_eq!(reclaimed, vec![2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_destroy_open_queue() {
        let queue: BlockingBoundedQueue<String> = BlockingBoundedQueue::new(2).unwrap();
        queue.put("x".to_string()).unwrap();
        let mut seen = Vec::new();
        assert_eq!(queue.destroy(|s| seen.push(s)), 1);
        assert_eq!(seen, vec!["x"]);
    }

    #[test]
    fn test_destroy_after_close_reclaims() {
        let queue: BlockingBoundedQueue<String> = BlockingBoundedQueue::new(2).unwrap();
        queue.put("a".to_string()).unwrap();
        queue.put("b".to_string()).unwrap();
        queue.close().unwrap();

        let mut seen = Vec::new();
        assert_eq!(queue.destroy(|s| seen.push(s)), 2);
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn test_for_each_visits_in_order() {
        let queue: BlockingBoundedQueue<u8> = BlockingBoundedQueue::new(3).unwrap();
        for i in [7, 8, 9] {
            queue.put(i).unwrap();
        }
        let mut seen = Vec::new();
        let visited = queue.for_each(|&x| {
            seen.push(x);
            if x == 8 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(visited, 2);
        assert_eq!(seen, vec![7, 8]);
    }

    #[test]
    fn test_put_blocks_until_take() {
        let queue: Arc<BlockingBoundedQueue<u32>> = Arc::new(BlockingBoundedQueue::new(1).unwrap());
        queue.put(1).unwrap();

        let (tx, rx) = mpsc::channel();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || tx.send(queue.put(2)).unwrap())
        };

        assert!(rx.recv_timeout(BLOCKED).is_err(), "put on a full queue returned");
        assert_eq!(queue.take(), Ok(1));
        assert_eq!(rx.recv_timeout(WAKE).unwrap(), Ok(()));
        producer.join().unwrap();
        assert_eq!(queue.take(), Ok(2));
    }

    #[test]
    fn test_close_wakes_blocked_consumers() {
        let queue: Arc<BlockingBoundedQueue<u32>> = Arc::new(BlockingBoundedQueue::new(1).unwrap());
        let (tx, rx) = mpsc::channel();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let tx = tx.clone();
                thread::spawn(move || tx.send(queue.take()).unwrap())
            })
            .collect();

        wait_until(|| queue.waiting_consumers() == 3);
        let summary = queue.close().unwrap();
        assert_eq!(summary.woken_consumers, 3);
        assert_eq!(summary.woken_producers, 0);

        for _ in 0..3 {
            assert_eq!(rx.recv_timeout(WAKE).unwrap(), Err(TakeError));
        }
        for c in consumers {
            c.join().unwrap();
        }
        assert_eq!(queue.waiting_consumers(), 0);
    }

    #[test]
    fn test_debug_output() {
        let queue: BlockingBoundedQueue<u8> = BlockingBoundedQueue::new(2).unwrap();
        let text = format!("{:?}", queue);
        assert!(text.contains("capacity: 2"));
        assert!(text.contains("open: true"));
    }
}
