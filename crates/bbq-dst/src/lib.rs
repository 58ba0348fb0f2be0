//! # bbq-dst
//!
//! Deterministic Simulation Testing for the blocking bounded queue.
//!
//! Inspired by FoundationDB and TigerBeetle, this crate provides deterministic
//! simulation of time, randomness, and faults. All behavior is reproducible
//! via a seed.
//!
//! ## Usage
//!
//! ```rust
//! use bbq_dst::DstEnv;
//!
//! let seed = 12345;
//! let mut env = DstEnv::new(seed);
//!
//! // Deterministic time
//! let now = env.clock().now_ns();
//! env.clock().advance_ns(1_000_000); // 1ms
//!
//! // Deterministic randomness
//! let value: u64 = env.rng().gen();
//! let choice = env.rng().gen_range(0..10);
//!
//! // Deterministic fault injection
//! if env.fault().should_fail() {
//!     // Simulate failure
//! }
//! ```
//!
//! ## Reproducibility
//!
//! To reproduce a failing test:
//! ```bash
//! DST_SEED=12345 cargo test
//! ```

pub mod clock;
pub mod env;
pub mod fault;
pub mod queue_harness;
pub mod random;

pub use clock::SimClock;
pub use env::{DstEnv, DstEnvStats};
pub use fault::{FaultConfig, FaultInjector, FaultStats};
pub use queue_harness::{
    run_queue_scenario, DstTestableQueue, FaultPoint, FaultType, QueueDstConfig, QueueDstOp,
    QueueDstResult, QueueDstRunner, QueueDstStats, QueueOpOutcome,
};
pub use random::DeterministicRng;

use tracing::{info, warn};

/// Get DST seed from environment or generate random one.
///
/// Logs the seed for reproduction. Use `DST_SEED=<seed>` to reproduce.
/// An unparsable `DST_SEED` falls back to a random seed.
#[must_use]
pub fn get_or_generate_seed() -> u64 {
    if let Ok(s) = std::env::var("DST_SEED") {
        match s.trim().parse::<u64>() {
            Ok(seed) if seed != 0 => {
                info!(seed, source = "environment", "DST_SEED={}", seed);
                return seed;
            }
            _ => warn!(value = %s, "DST_SEED is not a non-zero u64, generating one"),
        }
    }
    // Zero is reserved: checkers reject it as a seed.
    let seed = rand::random::<u64>().max(1);
    info!(seed, source = "random", "DST_SEED={}", seed);
    seed
}

/// Iteration count from `DST_ITERATIONS`, or `default`.
#[must_use]
pub fn dst_iterations(default: u64) -> u64 {
    std::env::var("DST_ITERATIONS")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
