//! Fixed-capacity FIFO ring buffer.
//!
//! The raw storage under the blocking queue. It does no locking of its own:
//! every method takes `&mut self` or `&self`, and the caller serializes
//! access (the queue keeps it inside its semaphore mutex).
//!
//! # Invariants
//!
//! | Property | Description |
//! |----------|-------------|
//! | BoundedCapacity | `0 <= len <= capacity` |
//! | TailPosition | `tail == (head + len) % capacity` |
//! | ClearedSlots | slots outside `[head, head + len)` hold nothing |
//! | FIFO | items leave in the order they entered |

use std::fmt;
use std::ops::ControlFlow;

use thiserror::Error;

/// Construction failures. Nothing is allocated when these are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingBufferError {
    #[error("ring buffer capacity must be at least 1")]
    ZeroCapacity,
    #[error("failed to allocate {capacity} ring buffer slots")]
    AllocationFailed { capacity: usize },
}

/// The buffer was full. Carries the rejected item back to the caller.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Overflow<T>(pub T);

impl<T> Overflow<T> {
    /// Recover the item that was not enqueued.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Overflow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Overflow(..)")
    }
}

impl<T> fmt::Display for Overflow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ring buffer is full")
    }
}

impl<T: fmt::Debug> std::error::Error for Overflow<T> {}

/// A bounded circular FIFO of owned items.
pub struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    /// Next slot to dequeue from
    head: usize,
    /// Next slot to enqueue into
    tail: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Allocate a ring buffer with room for exactly `capacity` items.
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::ZeroCapacity);
        }

        let mut slots: Vec<Option<T>> = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| RingBufferError::AllocationFailed { capacity })?;
        slots.resize_with(capacity, || None);

        Ok(Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Append at the tail, or hand the item back when full.
    pub fn enqueue(&mut self, item: T) -> Result<(), Overflow<T>> {
        if self.is_full() {
            return Err(Overflow(item));
        }

        debug_assert!(self.slots[self.tail].is_none(), "tail slot must be free");
        self.slots[self.tail] = Some(item);
        self.tail = self.advance(self.tail);
        self.len += 1;

        self.debug_check_positions();
        Ok(())
    }

    /// Remove from the head. `None` is the underflow condition.
    pub fn dequeue(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }

        let item = self.slots[self.head].take();
        debug_assert!(item.is_some(), "head slot of a non-empty buffer must be filled");
        self.head = self.advance(self.head);
        self.len -= 1;

        self.debug_check_positions();
        item
    }

    /// Visit items head to tail until the callback breaks.
    ///
    /// Returns how many times the callback ran; the item it broke on counts.
    pub fn for_each<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&T) -> ControlFlow<()>,
    {
        let mut visited = 0;
        for item in self.iter() {
            visited += 1;
            if f(item).is_break() {
                break;
            }
        }
        visited
    }

    /// Items head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |offset| {
            let index = (self.head + offset) % self.capacity();
            self.slots[index].as_ref()
        })
    }

    /// Move every stored item, head to tail, into `cleanup`.
    /// Returns how many items were drained.
    pub fn drain<F>(&mut self, mut cleanup: F) -> usize
    where
        F: FnMut(T),
    {
        let mut drained = 0;
        while let Some(item) = self.dequeue() {
            cleanup(item);
            drained += 1;
        }
        drained
    }

    /// Consume the buffer, handing remaining items to `cleanup` first.
    ///
    /// Plain `drop` also releases remaining items, by dropping them.
    pub fn destroy<F>(mut self, cleanup: F) -> usize
    where
        F: FnMut(T),
    {
        self.drain(cleanup)
    }

    fn advance(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }

    fn debug_check_positions(&self) {
        debug_assert!(self.len <= self.capacity(), "len exceeds capacity");
        debug_assert_eq!(
            self.tail,
            (self.head + self.len) % self.capacity(),
            "tail must equal (head + len) % capacity"
        );
    }
}

impl<T: fmt::Debug> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("items", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}
