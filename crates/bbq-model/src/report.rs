//! Run the checker and summarise what it found.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use stateright::{Checker, Model};
use tracing::{debug, info};

use bbq_core::{Counterexample, ThreadAction};

use crate::close_protocol::{
    CloseAction, CloseProtocolModel, Registration, REACHABILITY_PROPERTIES, SAFETY_PROPERTIES,
};

/// Configuration for one model-checking run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub producers: usize,
    pub consumers: usize,
    pub capacity: usize,
    pub registration: Registration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            producers: 2,
            consumers: 2,
            capacity: 1,
            registration: Registration::Locked,
        }
    }
}

impl ModelConfig {
    pub fn model(&self) -> CloseProtocolModel {
        CloseProtocolModel::new(self.producers, self.consumers, self.capacity, self.registration)
    }
}

/// A property the checker found a path for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub property: &'static str,
    /// Steps from the initial state, one per line, e.g. `producer 0 Start`.
    pub trace: Vec<String>,
    #[serde(skip)]
    actions: Vec<CloseAction>,
    #[serde(skip)]
    producers: usize,
    #[serde(skip)]
    consumers: usize,
}

impl Finding {
    /// The trace as a thread interleaving. Producers are threads
    /// `0..producers`, consumers follow, the closer comes last.
    pub fn counterexample(&self) -> Counterexample {
        let mut ce = Counterexample::new().with_description(self.property);
        for (step, action) in self.actions.iter().enumerate() {
            let thread_id = match *action {
                CloseAction::Producer(id, _) => id,
                CloseAction::Consumer(id, _) => self.producers + id,
                CloseAction::Closer(_) => self.producers + self.consumers,
            };
            ce.add_action(ThreadAction {
                thread_id: thread_id as u64,
                step: step as u64 + 1,
                action: action.to_string(),
                success: true,
            });
        }
        ce
    }
}

/// Outcome of [`check`].
#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub config: ModelConfig,
    pub registration: Registration,
    pub unique_states: usize,
    /// Safety properties with a counterexample.
    pub violations: Vec<Finding>,
    /// Reachability properties with an example path.
    pub examples: Vec<Finding>,
    /// Reachability properties never reached.
    pub unreached: Vec<&'static str>,
}

impl ModelReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for ModelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "close protocol ({} registration): {} producers, {} consumers, capacity {}, {} states",
            self.registration,
            self.config.producers,
            self.config.consumers,
            self.config.capacity,
            self.unique_states
        )?;
        for name in SAFETY_PROPERTIES {
            let failed = self.violations.iter().any(|v| v.property == name);
            writeln!(f, "  [{}] always {}", if failed { "FAIL" } else { "PASS" }, name)?;
        }
        for name in REACHABILITY_PROPERTIES {
            let reached = self.examples.iter().any(|e| e.property == name);
            writeln!(f, "  [{}] sometimes {}", if reached { "SEEN" } else { "MISS" }, name)?;
        }
        for violation in &self.violations {
            writeln!(f)?;
            write!(f, "{}", violation.counterexample().render_diagram())?;
        }
        Ok(())
    }
}

/// Exhaustively check the close protocol under `config`.
pub fn check(config: &ModelConfig) -> ModelReport {
    let start = Instant::now();
    let checker = config.model().checker().spawn_bfs().join();
    let unique_states = checker.unique_state_count();
    debug!(
        unique_states,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "model checking finished"
    );

    let finding = |property: &'static str| {
        checker.discovery(property).map(|path| {
            let actions = path.into_actions();
            Finding {
                property,
                trace: actions.iter().map(ToString::to_string).collect(),
                actions,
                producers: config.producers,
                consumers: config.consumers,
            }
        })
    };

    let violations: Vec<Finding> = SAFETY_PROPERTIES.into_iter().filter_map(&finding).collect();
    let mut examples = Vec::new();
    let mut unreached = Vec::new();
    for name in REACHABILITY_PROPERTIES {
        match finding(name) {
            Some(example) => examples.push(example),
            None => unreached.push(name),
        }
    }

    info!(
        registration = %config.registration,
        unique_states,
        violations = violations.len(),
        "close protocol checked"
    );

    ModelReport {
        config: *config,
        registration: config.registration,
        unique_states,
        violations,
        examples,
        unreached,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_report_passes() {
        let report = check(&ModelConfig::default());
        assert!(report.passed(), "{}", report);
        assert!(report.unreached.is_empty(), "{:?}", report.unreached);
        assert!(report.unique_states > 1);
    }

    #[test]
    fn test_atomic_report_has_counterexample() {
        let config = ModelConfig {
            registration: Registration::Atomic,
            ..ModelConfig::default()
        };
        let report = check(&config);
        assert!(!report.passed());

        let violation = &report.violations[0];
        assert!(!violation.trace.is_empty());
        let diagram = violation.counterexample().render_diagram();
        assert!(diagram.contains("closer"), "{}", diagram);
    }

    #[test]
    fn test_report_serializes() {
        let report = check(&ModelConfig {
            producers: 1,
            consumers: 1,
            ..ModelConfig::default()
        });
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["registration"], "locked");
        assert_eq!(json["violations"].as_array().map(Vec::len), Some(0));
        assert!(json["unique_states"].as_u64().unwrap() > 0);
    }
}
