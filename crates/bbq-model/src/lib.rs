//! # bbq-model
//!
//! Stateright model of the blocking bounded queue's close protocol.
//!
//! The model explores every interleaving of a few producers and consumers
//! with one `close`, and checks that the closer's barriers are sized
//! exactly to the threads that will arrive at them.
//!
//! ## Usage
//!
//! 1. Model checking from tests:
//!    ```ignore
//!    cargo test -p bbq-model
//!    ```
//!
//! 2. From code:
//!    ```
//!    use bbq_model::{check, ModelConfig, Registration};
//!
//!    let report = check(&ModelConfig {
//!        producers: 1,
//!        consumers: 1,
//!        capacity: 1,
//!        registration: Registration::Locked,
//!    });
//!    assert!(report.passed());
//!    ```
//!
//! 3. From the command line: `check-close-protocol --registration atomic`.
//!
//! ## Modules
//!
//! - `close_protocol`: states, actions and properties
//! - `report`: running the checker and collecting findings

pub mod close_protocol;
pub mod report;

pub use close_protocol::{
    BarrierState, CloseAction, CloseProtocolModel, CloseState, CloserPc, Outcome, Pc,
    Registration, REACHABILITY_PROPERTIES, SAFETY_PROPERTIES,
};
pub use report::{check, Finding, ModelConfig, ModelReport};
