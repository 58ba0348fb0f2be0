//! The DST environment: one seed, one RNG, one clock, one fault injector.

use std::fmt;

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector};
use crate::random::DeterministicRng;

/// Deterministic environment for a single simulation run.
pub struct DstEnv {
    seed: u64,
    rng: DeterministicRng,
    clock: SimClock,
    fault: FaultInjector,
    steps_count: u64,
}

/// Summary of an environment after a run.
#[derive(Debug, Clone, Copy)]
pub struct DstEnvStats {
    pub seed: u64,
    pub steps_count: u64,
    pub sim_time_ns: u64,
    pub faults_count: u64,
    pub delays_count: u64,
}

impl DstEnv {
    /// Environment with the default (light) fault configuration.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    #[must_use]
    pub fn with_fault_config(seed: u64, config: FaultConfig) -> Self {
        // The injector gets its own stream so that changing the fault
        // config does not perturb the operation stream.
        let fault = FaultInjector::new(DeterministicRng::new(seed.wrapping_add(1)), config);
        Self {
            seed,
            rng: DeterministicRng::new(seed),
            clock: SimClock::new(),
            fault,
            steps_count: 0,
        }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    pub fn clock(&mut self) -> &mut SimClock {
        &mut self.clock
    }

    pub fn fault(&mut self) -> &mut FaultInjector {
        &mut self.fault
    }

    /// Advance simulated time by an injected delay, if the injector asks for one.
    pub fn maybe_delay(&mut self) -> Option<u64> {
        self.steps_count += 1;
        let delay = self.fault.delay_us()?;
        self.clock.advance_us(delay);
        Some(delay)
    }

    /// `DST_SEED=<seed>`, for assertion messages.
    #[must_use]
    pub fn format_seed(&self) -> String {
        format!("DST_SEED={}", self.seed)
    }

    #[must_use]
    pub fn stats(&self) -> DstEnvStats {
        let fault = self.fault.stats();
        DstEnvStats {
            seed: self.seed,
            steps_count: self.steps_count,
            sim_time_ns: self.clock.now_ns(),
            faults_count: fault.faults_count,
            delays_count: fault.delays_count,
        }
    }
}

impl fmt::Display for DstEnvStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DST_SEED={} steps={} sim_time={}ns faults={} delays={}",
            self.seed, self.steps_count, self.sim_time_ns, self.faults_count, self.delays_count
        )
    }
}
