//! Kani proof harnesses for the ring buffer.
//!
//! Bounded model checking over every input up to the unwind bound. The
//! ring buffer is the only part of the queue with index arithmetic, so it
//! is the part proved here; blocking and close races are covered by loom
//! and the stateright model.
//!
//! # Running the proofs
//!
//! ```bash
//! # Run all proofs
//! cargo kani -p bbq
//!
//! # Run a specific proof
//! cargo kani -p bbq --harness proof_fifo_two_items
//! ```

#[cfg(kani)]
mod proofs {
    use crate::ring_buffer::{RingBuffer, RingBufferError};

    /// Zero capacity is always rejected.
    #[kani::proof]
    fn proof_zero_capacity_rejected() {
        let result = RingBuffer::<u8>::new(0);
        kani::assert(
            matches!(result, Err(RingBufferError::ZeroCapacity)),
            "capacity 0 must be rejected",
        );
    }

    /// Two items come out in the order they went in.
    #[kani::proof]
    #[kani::unwind(4)]
    fn proof_fifo_two_items() {
        let capacity: usize = kani::any();
        kani::assume(capacity >= 2 && capacity <= 3);
        let Ok(mut ring) = RingBuffer::new(capacity) else {
            return;
        };

        let a: u32 = kani::any();
        let b: u32 = kani::any();
        kani::assert(ring.enqueue(a).is_ok(), "first enqueue fits");
        kani::assert(ring.enqueue(b).is_ok(), "second enqueue fits");

        kani::assert(ring.dequeue() == Some(a), "first out is first in");
        kani::assert(ring.dequeue() == Some(b), "second out is second in");
        kani::assert(ring.dequeue().is_none(), "ring is empty again");
    }

    /// Length never exceeds capacity and a full ring rejects the item.
    #[kani::proof]
    #[kani::unwind(5)]
    fn proof_bounded_capacity() {
        let capacity: usize = kani::any();
        kani::assume(capacity >= 1 && capacity <= 3);
        let Ok(mut ring) = RingBuffer::new(capacity) else {
            return;
        };

        for i in 0..capacity {
            kani::assert(ring.enqueue(i as u8).is_ok(), "enqueue below capacity");
        }
        kani::assert(ring.is_full(), "ring is full at capacity");

        let extra: u8 = kani::any();
        match ring.enqueue(extra) {
            Err(overflow) => kani::assert(overflow.into_inner() == extra, "item handed back"),
            Ok(()) => kani::assert(false, "enqueue on a full ring must fail"),
        }
        kani::assert(ring.len() == capacity, "length stays at capacity");
    }

    /// Head and tail wrap without reordering items.
    #[kani::proof]
    #[kani::unwind(6)]
    fn proof_wraparound_preserves_order() {
        let Ok(mut ring) = RingBuffer::new(2) else {
            return;
        };
        let shift: u8 = kani::any();
        kani::assume(shift <= 3);

        // Rotate the head by `shift` positions.
        for i in 0..shift {
            let _ = ring.enqueue(i);
            let _ = ring.dequeue();
        }

        let a: u8 = kani::any();
        let b: u8 = kani::any();
        kani::assert(ring.enqueue(a).is_ok(), "enqueue after rotation");
        kani::assert(ring.enqueue(b).is_ok(), "enqueue after rotation");
        kani::assert(ring.dequeue() == Some(a), "wrapped head");
        kani::assert(ring.dequeue() == Some(b), "wrapped tail");
    }

    /// Draining hands back exactly the stored items.
    #[kani::proof]
    #[kani::unwind(4)]
    fn proof_drain_reclaims_all() {
        let Ok(mut ring) = RingBuffer::new(3) else {
            return;
        };
        let count: usize = kani::any();
        kani::assume(count <= 3);
        for i in 0..count {
            let _ = ring.enqueue(i);
        }

        let mut reclaimed = 0;
        let drained = ring.drain(|_| reclaimed += 1);
        kani::assert(drained == count, "drain reports every item");
        kani::assert(reclaimed == count, "callback sees every item");
        kani::assert(ring.is_empty(), "ring is empty after drain");
    }
}
