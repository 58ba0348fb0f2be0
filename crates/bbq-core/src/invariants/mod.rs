//! Invariant traits for the blocking bounded queue.
//!
//! - `queue`: BoundedCapacity, PermitAccounting, NoLostItems, NoDuplicates,
//!   NoPhantomItems, PerProducerFifo, NoAdmissionAfterClose

pub mod queue;

pub use queue::{
    QueueHistory, QueueOpKind, QueueOperation, QueueProperties, QueuePropertyChecker,
};
