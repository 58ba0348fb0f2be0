//! # bbq
//!
//! A bounded, blocking, closeable multi-producer multi-consumer queue.
//!
//! The queue is assembled from small primitives, each usable on its own:
//!
//! - `ring_buffer`: fixed-capacity FIFO storage, not thread-safe
//! - `semaphore`: counting semaphores behind the `RawSemaphore` trait
//! - `mutex`: a binary-semaphore mutex with an RAII guard
//! - `barrier`: a single-use rendezvous for a fixed number of parties
//! - `queue`: the blocking queue and its close protocol
//! - `tracked`: a `u64` queue instrumented for property checks and DST
//! - `kani_proofs`: Kani bounded model checking proofs (under `#[cfg(kani)]`)
//!
//! Loom tests for thread interleavings live next to each primitive under
//! `#[cfg(loom)]`.
//!
//! ```
//! use bbq::BlockingBoundedQueue;
//!
//! let queue: BlockingBoundedQueue<&str> = BlockingBoundedQueue::new(2).unwrap();
//! queue.put("a").unwrap();
//! assert_eq!(queue.take(), Ok("a"));
//!
//! queue.put("b").unwrap();
//! let mut leftovers = Vec::new();
//! queue.close_with(|item| leftovers.push(item)).unwrap();
//! assert_eq!(leftovers, ["b"]);
//! assert!(queue.put("c").is_err());
//! ```

pub mod barrier;
pub mod kani_proofs;
pub mod mutex;
pub mod queue;
pub mod ring_buffer;
pub mod semaphore;
mod sync;
pub mod tracked;

pub use barrier::{Barrier, BarrierError, BarrierWaitResult};
pub use mutex::{Mutex, MutexGuard};
pub use queue::{
    BlockingBoundedQueue, CloseError, CloseSummary, PutError, QueueError, SlotPermits, TakeError,
};
pub use ring_buffer::{Overflow, RingBuffer, RingBufferError};
pub use semaphore::{ParkingSemaphore, RawSemaphore, StdSemaphore};
pub use tracked::TrackedQueue;
