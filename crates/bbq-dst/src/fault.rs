//! Probabilistic fault decisions driven by a deterministic RNG.

use crate::random::DeterministicRng;

/// Fault injection configuration.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Probability that `should_fail` returns true
    pub failure_probability: f64,
    /// Probability that `delay_us` returns a delay
    pub delay_probability: f64,
    /// Upper bound on injected delays, in microseconds
    pub delay_us_max: u64,
}

impl Default for FaultConfig {
    /// Light faults.
    fn default() -> Self {
        Self {
            failure_probability: 0.01,
            delay_probability: 0.05,
            delay_us_max: 100,
        }
    }
}

impl FaultConfig {
    /// No faults at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            failure_probability: 0.0,
            delay_probability: 0.0,
            delay_us_max: 0,
        }
    }

    /// Frequent faults for stress runs.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_probability: 0.1,
            delay_probability: 0.3,
            delay_us_max: 10_000,
        }
    }
}

/// Counters for injected faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub checks_count: u64,
    pub faults_count: u64,
    pub delays_count: u64,
}

/// Decides, deterministically, when faults happen.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    rng: DeterministicRng,
    config: FaultConfig,
    stats: FaultStats,
}

impl FaultInjector {
    #[must_use]
    pub fn new(rng: DeterministicRng, config: FaultConfig) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&config.failure_probability),
            "failure_probability out of range"
        );
        debug_assert!(
            (0.0..=1.0).contains(&config.delay_probability),
            "delay_probability out of range"
        );
        Self {
            rng,
            config,
            stats: FaultStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// Should the next operation fail?
    pub fn should_fail(&mut self) -> bool {
        self.stats.checks_count += 1;
        if self.config.failure_probability <= 0.0 {
            return false;
        }
        let fail = self.rng.gen_bool(self.config.failure_probability);
        if fail {
            self.stats.faults_count += 1;
        }
        fail
    }

    /// A delay to inject before the next operation, if any.
    pub fn delay_us(&mut self) -> Option<u64> {
        if self.config.delay_probability <= 0.0 || self.config.delay_us_max == 0 {
            return None;
        }
        if !self.rng.gen_bool(self.config.delay_probability) {
            return None;
        }
        self.stats.delays_count += 1;
        Some(self.rng.gen_range(1..=self.config.delay_us_max))
    }

    #[must_use]
    pub fn stats(&self) -> FaultStats {
        self.stats
    }
}
