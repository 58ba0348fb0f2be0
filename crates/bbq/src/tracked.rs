//! Instrumented `u64` queue for property checking and DST.
//!
//! Every call is stamped with an invocation and completion step from a
//! shared counter, so the history can tell a `put` that raced `close`
//! from one that started after `close` returned.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use bbq_core::invariants::queue::{QueueHistory, QueueOpKind, QueueProperties};
use bbq_dst::DstTestableQueue;

use crate::queue::{BlockingBoundedQueue, CloseError, CloseSummary, PutError, QueueError, TakeError};
use crate::semaphore::{RawSemaphore, StdSemaphore};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

#[derive(Default)]
struct QueueTracker {
    admitted: Vec<u64>,
    taken: Vec<u64>,
    reclaimed: Vec<u64>,
    history: QueueHistory,
}

/// A `BlockingBoundedQueue<u64>` that records what went in and out.
pub struct TrackedQueue<S: RawSemaphore = StdSemaphore> {
    inner: BlockingBoundedQueue<u64, S>,
    tracker: Mutex<QueueTracker>,
    step: AtomicU64,
}

impl<S: RawSemaphore> TrackedQueue<S> {
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        Ok(Self {
            inner: BlockingBoundedQueue::new(capacity)?,
            tracker: Mutex::new(QueueTracker::default()),
            step: AtomicU64::new(0),
        })
    }

    fn next_step(&self) -> u64 {
        self.step.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record(&self, kind: QueueOpKind, item: Option<u64>, invoked_at: u64) {
        let completed_at = self.next_step();
        let mut tracker = self.tracker.lock();
        match kind {
            QueueOpKind::Put => tracker.admitted.extend(item),
            QueueOpKind::Take => tracker.taken.extend(item),
            _ => {}
        }
        tracker
            .history
            .record(current_thread_id(), kind, item, invoked_at, completed_at);
    }

    pub fn put(&self, item: u64) -> Result<(), PutError<u64>> {
        let invoked_at = self.next_step();
        let result = self.inner.put(item);
        let kind = if result.is_ok() {
            QueueOpKind::Put
        } else {
            QueueOpKind::PutClosed
        };
        self.record(kind, Some(item), invoked_at);
        result
    }

    pub fn take(&self) -> Result<u64, TakeError> {
        let invoked_at = self.next_step();
        let result = self.inner.take();
        match result {
            Ok(item) => self.record(QueueOpKind::Take, Some(item), invoked_at),
            Err(_) => self.record(QueueOpKind::TakeClosed, None, invoked_at),
        }
        result
    }

    pub fn close(&self) -> Result<CloseSummary, CloseError> {
        let invoked_at = self.next_step();
        let result = self.inner.close();
        if result.is_ok() {
            self.record(QueueOpKind::Close, None, invoked_at);
        }
        result
    }

    /// Close and move leftover items into the reclaimed set.
    pub fn close_and_reclaim(&self) -> Result<CloseSummary, CloseError> {
        let invoked_at = self.next_step();
        let mut reclaimed = Vec::new();
        let result = self.inner.close_with(|item| reclaimed.push(item));
        if result.is_ok() {
            self.tracker.lock().reclaimed.extend(reclaimed);
            self.record(QueueOpKind::Close, None, invoked_at);
        }
        result
    }

    pub fn inner(&self) -> &BlockingBoundedQueue<u64, S> {
        &self.inner
    }

    /// Stored items, head to tail.
    pub fn contents(&self) -> Vec<u64> {
        let mut items = Vec::with_capacity(self.inner.capacity());
        self.inner.for_each(|&item| {
            items.push(item);
            std::ops::ControlFlow::Continue(())
        });
        items
    }
}

impl<S: RawSemaphore> QueueProperties for TrackedQueue<S> {
    fn admitted_items(&self) -> Vec<u64> {
        self.tracker.lock().admitted.clone()
    }

    fn taken_items(&self) -> Vec<u64> {
        self.tracker.lock().taken.clone()
    }

    fn reclaimed_items(&self) -> Vec<u64> {
        self.tracker.lock().reclaimed.clone()
    }

    fn current_contents(&self) -> Vec<u64> {
        self.contents()
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn slot_permits(&self) -> Option<(usize, usize)> {
        let permits = self.inner.permits();
        Some((permits.free, permits.occupied))
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn history(&self) -> QueueHistory {
        self.tracker.lock().history.clone()
    }
}

impl DstTestableQueue for TrackedQueue {
    fn with_capacity(capacity: usize) -> Self {
        match Self::new(capacity) {
            Ok(queue) => queue,
            Err(e) => panic!("DST queue with capacity {} could not be built: {}", capacity, e),
        }
    }

    fn put(&self, item: u64) -> bool {
        TrackedQueue::put(self, item).is_ok()
    }

    fn take(&self) -> Option<u64> {
        TrackedQueue::take(self).ok()
    }

    fn close(&self) {
        // A second close is a no-op for the harness.
        let _ = TrackedQueue::close(self);
    }

    fn len(&self) -> usize {
        self.inner.size()
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn contents(&self) -> Vec<u64> {
        TrackedQueue::contents(self)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use bbq_core::invariants::queue::QueuePropertyChecker;
    use bbq_core::{ItemTag, PropertyChecker};
    use bbq_dst::{dst_iterations, get_or_generate_seed, DstEnv, FaultConfig};

    #[test]
    fn test_invariants_basic() {
        let queue: TrackedQueue = TrackedQueue::new(4).unwrap();
        queue.put(1).unwrap();
        queue.put(2).unwrap();
        queue.take().unwrap();

        let checker = QueuePropertyChecker::new(&queue);
        assert!(checker.all_hold(), "{:?}", checker.violations());
    }

    #[test]
    fn test_history_stamps() {
        let queue: TrackedQueue = TrackedQueue::new(2).unwrap();
        queue.put(5).unwrap();
        queue.close().unwrap();
        assert!(queue.put(6).is_err());

        let history = queue.history();
        assert_eq!(history.operations.len(), 3);
        assert_eq!(history.operations[0].kind, QueueOpKind::Put);
        assert_eq!(history.operations[2].kind, QueueOpKind::PutClosed);
        let closed_at = history.closed_at().unwrap();
        assert!(history.operations[2].invoked_at > closed_at);
        assert_eq!(queue.admitted_items(), vec![5]);
    }

    #[test]
    fn test_close_and_reclaim_accounts_leftovers() {
        let queue: TrackedQueue = TrackedQueue::new(3).unwrap();
        for i in 1..=3 {
            queue.put(i).unwrap();
        }
        let summary = queue.close_and_reclaim().unwrap();
        assert_eq!(summary.reclaimed, 3);
        assert_eq!(queue.reclaimed_items(), vec![1, 2, 3]);
        assert!(queue.contents().is_empty());

        let checker = QueuePropertyChecker::new(&queue);
        assert!(checker.all_hold(), "{:?}", checker.violations());
    }

    #[test]
    fn test_dst_single_threaded() {
        let seed = get_or_generate_seed();
        let mut env = DstEnv::with_fault_config(seed, FaultConfig::none());
        let queue: TrackedQueue = TrackedQueue::new(4).unwrap();
        let mut sequence = 0_u32;

        for _ in 0..dst_iterations(1000) {
            match env.rng().gen_range(0..3_u8) {
                0 => {
                    // Never block: only put when a slot is free.
                    if queue.inner().size() < queue.inner().capacity() {
                        sequence += 1;
                        queue.put(ItemTag::new(0, sequence).into_item()).unwrap();
                    }
                }
                1 => {
                    if !queue.inner().is_empty() {
                        queue.take().unwrap();
                    }
                }
                _ => {
                    let checker = QueuePropertyChecker::new(&queue).with_seed(seed);
                    assert!(
                        checker.all_hold(),
                        "Invariant violated at {}: {:?}",
                        env.format_seed(),
                        checker.violations()
                    );
                }
            }
        }

        queue.close_and_reclaim().unwrap();
        let checker = QueuePropertyChecker::new(&queue).with_seed(seed);
        assert!(
            checker.all_hold(),
            "Final invariant check failed at {}",
            env.format_seed()
        );
    }
}
