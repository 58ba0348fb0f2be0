//! # bbq-core
//!
//! Core types and invariants for the blocking bounded queue.
//!
//! This crate provides:
//! - `PropertyResult` and `PropertyChecker` for verifying invariants
//! - `Counterexample` for rendering failure paths
//! - `QueueProperties` and `QueuePropertyChecker` for queue invariants
//! - `ItemTag` for producer-tagged `u64` items

pub mod counterexample;
pub mod invariants;
pub mod property;
pub mod tag;

pub use counterexample::{Counterexample, ProtocolIssue, StateSnapshot, ThreadAction};
pub use invariants::{
    QueueHistory, QueueOpKind, QueueOperation, QueueProperties, QueuePropertyChecker,
};
pub use property::{PropertyChecker, PropertyResult};
pub use tag::ItemTag;
