//! Fault injection for the blocking bounded queue.
//!
//! DST injects faults at OPERATION BOUNDARIES, never inside the queue's
//! critical sections. The queue under test is the real implementation.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  QueueDstRunner                                              │
//! │  ┌─────────────┐    ┌──────────────────┐    ┌─────────────┐  │
//! │  │ FaultPoint  │───>│ Real queue       │───>│ FaultPoint  │  │
//! │  │ (pre-op)    │    │ put/take/close   │    │ (post-op)   │  │
//! │  └─────────────┘    └──────────────────┘    └─────────────┘  │
//! │        │                                           │         │
//! │        ▼                                           ▼         │
//! │  "Caller crashes first?"         "Caller crashes before it   │
//! │                                   sees the result?"          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A single simulated thread must never block, so a `put` on a full open
//! queue and a `take` on an empty open queue are recorded as `would_block`
//! and skipped rather than issued.

use std::collections::HashSet;

use tracing::debug;

use crate::env::DstEnv;
use crate::fault::FaultConfig;

/// Fault injection points (between operations, not inside).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// Before starting an operation
    BeforeOperation,
    /// After the operation completed, before the caller sees the result
    AfterOperation,
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// Caller "crashes": before the call the operation is abandoned,
    /// after the call its result is dropped
    ThreadCrash,
    /// Slow caller: simulated time advances
    Delay,
    /// An unrelated thread closes the queue at this boundary
    InjectedClose,
}

/// The minimal surface a queue needs for DST.
///
/// `put` returns `false` for CLOSED and `take` returns `None` for CLOSED.
/// Neither may be called when it would block; the runner guarantees that.
pub trait DstTestableQueue {
    fn with_capacity(capacity: usize) -> Self;
    fn put(&self, item: u64) -> bool;
    fn take(&self) -> Option<u64>;
    fn close(&self);
    fn len(&self) -> usize;
    fn capacity(&self) -> usize;
    /// Stored items, head to tail.
    fn contents(&self) -> Vec<u64>;
}

/// Configuration for a queue DST run.
#[derive(Debug, Clone)]
pub struct QueueDstConfig {
    pub capacity: usize,
    pub operations_count: u64,
    pub fault_config: FaultConfig,
    /// Check invariants after every N operations (0 = only at the end)
    pub invariant_check_interval: u64,
}

impl Default for QueueDstConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            operations_count: 500,
            fault_config: FaultConfig::default(),
            invariant_check_interval: 10,
        }
    }
}

impl QueueDstConfig {
    #[must_use]
    pub fn quick() -> Self {
        Self {
            capacity: 2,
            operations_count: 100,
            fault_config: FaultConfig::none(),
            invariant_check_interval: 5,
        }
    }

    #[must_use]
    pub fn stress() -> Self {
        Self {
            capacity: 8,
            operations_count: 10_000,
            fault_config: FaultConfig::aggressive(),
            invariant_check_interval: 100,
        }
    }
}

/// A scripted DST operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDstOp {
    Put(u64),
    Take,
    Close,
}

/// What an operation did, as seen by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOpOutcome {
    Admitted,
    Delivered(u64),
    Closed,
    /// The queue was open and this call closed it
    Closing,
    /// Skipped: issuing it would have blocked the only simulated thread
    WouldBlock,
}

/// DST runner for blocking bounded queues.
pub struct QueueDstRunner<Q> {
    queue: Q,
    env: DstEnv,
    config: QueueDstConfig,
    closed: bool,
    // Tracking for invariant verification
    admitted: Vec<u64>,
    delivered: Vec<u64>,
    admitted_after_close: Vec<u64>,
    // Statistics
    operations_count: u64,
    faults_injected: u64,
    abandoned_operations: u64,
    would_block: u64,
    closed_results: u64,
}

impl<Q: DstTestableQueue> QueueDstRunner<Q> {
    #[must_use]
    pub fn new(seed: u64, config: QueueDstConfig) -> Self {
        debug_assert!(config.capacity > 0, "capacity must be at least 1");
        let env = DstEnv::with_fault_config(seed, config.fault_config.clone());
        Self {
            queue: Q::with_capacity(config.capacity),
            env,
            config,
            closed: false,
            admitted: Vec::new(),
            delivered: Vec::new(),
            admitted_after_close: Vec::new(),
            operations_count: 0,
            faults_injected: 0,
            abandoned_operations: 0,
            would_block: 0,
            closed_results: 0,
        }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.env.seed()
    }

    #[must_use]
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn env(&mut self) -> &mut DstEnv {
        &mut self.env
    }

    /// Put with fault injection at boundaries.
    pub fn put(&mut self, item: u64) -> Result<QueueOpOutcome, FaultType> {
        if !self.closed && self.queue.len() >= self.queue.capacity() {
            self.would_block += 1;
            return Ok(QueueOpOutcome::WouldBlock);
        }

        self.before_operation()?;

        let admitted = self.queue.put(item);
        self.operations_count += 1;
        if admitted {
            if self.closed {
                self.admitted_after_close.push(item);
            }
            self.admitted.push(item);
        } else {
            self.closed_results += 1;
        }

        self.after_operation()?;

        Ok(if admitted {
            QueueOpOutcome::Admitted
        } else {
            QueueOpOutcome::Closed
        })
    }

    /// Take with fault injection at boundaries.
    pub fn take(&mut self) -> Result<QueueOpOutcome, FaultType> {
        if !self.closed && self.queue.len() == 0 {
            self.would_block += 1;
            return Ok(QueueOpOutcome::WouldBlock);
        }

        self.before_operation()?;

        let result = self.queue.take();
        self.operations_count += 1;
        match result {
            // The item left the queue even if the caller crashes below.
            Some(item) => self.delivered.push(item),
            None => self.closed_results += 1,
        }

        self.after_operation()?;

        Ok(match result {
            Some(item) => QueueOpOutcome::Delivered(item),
            None => QueueOpOutcome::Closed,
        })
    }

    /// Close the queue. Closing twice is a caller error, so a second close
    /// request is reported as `Closed` without calling the queue.
    pub fn close(&mut self) -> QueueOpOutcome {
        if self.closed {
            return QueueOpOutcome::Closed;
        }
        self.queue.close();
        self.closed = true;
        self.operations_count += 1;
        QueueOpOutcome::Closing
    }

    fn before_operation(&mut self) -> Result<(), FaultType> {
        match self.maybe_inject_fault(FaultPoint::BeforeOperation) {
            Some(FaultType::ThreadCrash) => {
                self.abandoned_operations += 1;
                Err(FaultType::ThreadCrash)
            }
            _ => Ok(()),
        }
    }

    fn after_operation(&mut self) -> Result<(), FaultType> {
        match self.maybe_inject_fault(FaultPoint::AfterOperation) {
            Some(FaultType::ThreadCrash) => {
                self.abandoned_operations += 1;
                Err(FaultType::ThreadCrash)
            }
            _ => Ok(()),
        }
    }

    fn maybe_inject_fault(&mut self, point: FaultPoint) -> Option<FaultType> {
        if !self.env.fault().should_fail() {
            self.env.maybe_delay();
            return None;
        }
        self.faults_injected += 1;
        let fault = match self.env.rng().gen_range(0..8_u8) {
            0..=3 => FaultType::ThreadCrash,
            4..=6 => FaultType::Delay,
            _ => FaultType::InjectedClose,
        };
        debug!(?point, ?fault, "injecting fault");
        match fault {
            FaultType::Delay => {
                let delay = self.env.rng().gen_range(1..=1_000_u64);
                self.env.clock().advance_us(delay);
            }
            FaultType::InjectedClose => {
                self.close();
            }
            FaultType::ThreadCrash => {}
        }
        Some(fault)
    }

    /// Run a scripted sequence, checking invariants every
    /// `invariant_check_interval` operations and once at the end.
    pub fn run(&mut self, ops: &[QueueDstOp]) -> QueueDstResult {
        let mut fault_errors = Vec::new();
        let mut violations = Vec::new();

        for (i, op) in ops.iter().enumerate() {
            let result = match *op {
                QueueDstOp::Put(item) => self.put(item),
                QueueDstOp::Take => self.take(),
                QueueDstOp::Close => Ok(self.close()),
            };
            if let Err(fault) = result {
                fault_errors.push(format!("op {}: {:?}", i, fault));
            }

            let interval = self.config.invariant_check_interval;
            if interval > 0 && (i as u64 + 1) % interval == 0 {
                violations = self.check_invariants();
                if !violations.is_empty() {
                    break;
                }
            }
        }

        if violations.is_empty() {
            violations = self.check_invariants();
        }

        QueueDstResult {
            passed: violations.is_empty(),
            violations,
            stats: self.stats(),
            fault_errors,
        }
    }

    /// Generate `operations_count` random operations from the run's RNG.
    ///
    /// Items are unique and increasing. Close is rare so that most of the
    /// run exercises the open queue.
    pub fn generate_ops(&mut self) -> Vec<QueueDstOp> {
        let mut next_item = 1u64;
        let mut ops = Vec::with_capacity(self.config.operations_count as usize);
        for _ in 0..self.config.operations_count {
            let op = match self.env.rng().gen_range(0..100_u32) {
                0 => QueueDstOp::Close,
                1..=50 => {
                    let item = next_item;
                    next_item += 1;
                    QueueDstOp::Put(item)
                }
                _ => QueueDstOp::Take,
            };
            ops.push(op);
        }
        ops
    }

    /// Check every invariant. Returns the names and details of violations.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let contents = self.queue.contents();

        if self.queue.len() > self.queue.capacity() || contents.len() > self.queue.capacity() {
            violations.push(format!(
                "BoundedCapacity: len={} capacity={}",
                contents.len(),
                self.queue.capacity()
            ));
        }

        let seen: HashSet<u64> = self.delivered.iter().chain(&contents).copied().collect();
        if seen.len() != self.delivered.len() + contents.len() {
            violations.push("NoDuplicates: an item was delivered or stored twice".to_string());
        }

        if let Some(lost) = self.admitted.iter().find(|item| !seen.contains(item)) {
            violations.push(format!("NoLostItems: item {} vanished", lost));
        }

        let prefix_ok = self.delivered.len() <= self.admitted.len()
            && self.delivered[..] == self.admitted[..self.delivered.len()];
        let rest_ok = prefix_ok && contents[..] == self.admitted[self.delivered.len()..];
        if !rest_ok {
            violations.push(format!(
                "FifoOrder: admitted={:?} delivered={:?} contents={:?}",
                self.admitted, self.delivered, contents
            ));
        }

        if !self.admitted_after_close.is_empty() {
            violations.push(format!(
                "NoAdmissionAfterClose: admitted {:?} after close",
                self.admitted_after_close
            ));
        }

        violations
    }

    #[must_use]
    pub fn stats(&self) -> QueueDstStats {
        QueueDstStats {
            seed: self.env.seed(),
            operations_count: self.operations_count,
            faults_injected: self.faults_injected,
            abandoned_operations: self.abandoned_operations,
            would_block: self.would_block,
            closed_results: self.closed_results,
            admitted: self.admitted.len() as u64,
            delivered: self.delivered.len() as u64,
        }
    }
}

/// Statistics from a queue DST run.
#[derive(Debug, Clone)]
pub struct QueueDstStats {
    pub seed: u64,
    pub operations_count: u64,
    pub faults_injected: u64,
    pub abandoned_operations: u64,
    pub would_block: u64,
    pub closed_results: u64,
    pub admitted: u64,
    pub delivered: u64,
}

impl QueueDstStats {
    pub fn format(&self) -> String {
        format!(
            "DST_SEED={} ops={} faults={} abandoned={} would_block={} closed={} admitted={} delivered={}",
            self.seed,
            self.operations_count,
            self.faults_injected,
            self.abandoned_operations,
            self.would_block,
            self.closed_results,
            self.admitted,
            self.delivered
        )
    }
}

/// Result of a queue DST run.
#[derive(Debug)]
pub struct QueueDstResult {
    pub passed: bool,
    pub violations: Vec<String>,
    pub stats: QueueDstStats,
    pub fault_errors: Vec<String>,
}

impl QueueDstResult {
    /// One status line starting with `DST_SEED=`, then one line per violation.
    pub fn format(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut result = format!("{} [{}]", self.stats.format(), status);
        for violation in &self.violations {
            result.push_str("\n  VIOLATION: ");
            result.push_str(violation);
        }
        result
    }
}

/// Run a scripted queue scenario with the default fault configuration.
pub fn run_queue_scenario<Q: DstTestableQueue>(
    seed: u64,
    capacity: usize,
    ops: &[QueueDstOp],
) -> QueueDstResult {
    let config = QueueDstConfig {
        capacity,
        operations_count: ops.len() as u64,
        ..QueueDstConfig::default()
    };
    QueueDstRunner::<Q>::new(seed, config).run(ops)
}
