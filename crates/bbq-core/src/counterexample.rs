//! Counterexample representation and rendering.
//!
//! When a queue property is violated, a counterexample shows the
//! operations, per thread, that led to the failure.

use std::fmt;

/// A counterexample showing the failure path.
///
/// Contains the state snapshots and thread actions that led to a
/// property violation. Can be rendered as a human-readable thread diagram.
#[derive(Debug, Clone)]
pub struct Counterexample {
    /// Sequence of state snapshots
    pub states: Vec<StateSnapshot>,
    /// Thread interleaving that caused the failure
    pub interleaving: Vec<ThreadAction>,
    /// Protocol-level issues detected
    pub issues: Vec<ProtocolIssue>,
    /// DST seed for reproduction (if applicable)
    pub dst_seed: Option<u64>,
    /// Human-readable description of the failure
    pub description: Option<String>,
}

/// Snapshot of queue state at a point in time.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Step number in the execution
    pub step: u64,
    /// Description of the state
    pub description: String,
    /// Variable values at this point
    pub variables: Vec<(String, String)>,
}

/// Action taken by a thread.
#[derive(Debug, Clone)]
pub struct ThreadAction {
    /// Thread identifier
    pub thread_id: u64,
    /// Step number when this action occurred
    pub step: u64,
    /// Description of the action, e.g. `put(7)` or `take()`
    pub action: String,
    /// Whether the action succeeded (false for a CLOSED status)
    pub success: bool,
}

/// Queue protocol issue detected while checking a history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolIssue {
    /// An admitted item is in neither the queue, the taken set nor the reclaimed set
    ItemLost { item: u64 },
    /// An item was delivered more than once
    DuplicateDelivery { item: u64, deliveries: usize },
    /// A put succeeded after the queue had been closed
    AdmissionAfterClose {
        thread_id: u64,
        item: u64,
        closed_at_step: u64,
        admitted_at_step: u64,
    },
}

impl Counterexample {
    /// Create a new empty counterexample.
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            interleaving: Vec::new(),
            issues: Vec::new(),
            dst_seed: None,
            description: None,
        }
    }

    /// Create a counterexample with DST seed for reproduction.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        Self {
            dst_seed: Some(seed),
            ..Self::new()
        }
    }

    /// Start from an optional seed.
    #[must_use]
    pub fn for_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::with_seed(seed),
            None => Self::new(),
        }
    }

    /// Set the description for this counterexample.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a state snapshot.
    pub fn add_state(&mut self, state: StateSnapshot) {
        debug_assert!(
            self.states.last().map_or(true, |last| state.step > last.step),
            "States must be added in order"
        );
        self.states.push(state);
    }

    /// Add a thread action.
    pub fn add_action(&mut self, action: ThreadAction) {
        self.interleaving.push(action);
    }

    /// Add a protocol issue.
    pub fn add_issue(&mut self, issue: ProtocolIssue) {
        self.issues.push(issue);
    }

    /// Render the counterexample as a human-readable thread diagram.
    ///
    /// Format:
    /// ```text
    /// DST_SEED=12345
    ///
    /// Step | Thread 0 | Thread 1 | State
    /// -----|----------|----------|------
    ///    1 | put(1) |          | len=1
    ///    2 |          | close() | open=false
    ///    3 | put(2) |          | len=2
    /// ```
    #[must_use]
    pub fn render_diagram(&self) -> String {
        let mut output = String::new();

        if let Some(seed) = self.dst_seed {
            output.push_str(&format!("DST_SEED={}\n\n", seed));
        }

        if let Some(ref desc) = self.description {
            output.push_str("Failure: ");
            output.push_str(desc);
            output.push_str("\n\n");
        }

        let mut threads: Vec<u64> = self.interleaving.iter().map(|a| a.thread_id).collect();
        threads.sort_unstable();
        threads.dedup();

        if threads.is_empty() {
            output.push_str("(no thread actions recorded)\n");
        } else {
            output.push_str("Step |");
            for tid in &threads {
                output.push_str(&format!(" Thread {} |", tid));
            }
            output.push_str(" State\n");

            output.push_str("-----|");
            for _ in &threads {
                output.push_str("----------|");
            }
            output.push_str("------\n");

            let max_step = self.interleaving.iter().map(|a| a.step).max().unwrap_or(0);

            for step in 1..=max_step {
                output.push_str(&format!("{:4} |", step));

                for tid in &threads {
                    let action = self
                        .interleaving
                        .iter()
                        .find(|a| a.step == step && a.thread_id == *tid);

                    match action {
                        Some(a) => {
                            let status = if a.success { "" } else { " [CLOSED]" };
                            output.push_str(&format!(" {}{} |", a.action, status));
                        }
                        None => output.push_str("          |"),
                    }
                }

                if let Some(state) = self.states.iter().find(|s| s.step == step) {
                    output.push_str(&format!(" {}", state.description));
                }

                output.push('\n');
            }
        }

        if !self.issues.is_empty() {
            output.push_str("\nProtocol Issues:\n");
            for issue in &self.issues {
                output.push_str(&format!("  - {}\n", issue));
            }
        }

        output
    }
}

impl Default for Counterexample {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProtocolIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolIssue::ItemLost { item } => {
                write!(f, "Item {} was admitted but never taken, reclaimed or stored", item)
            }
            ProtocolIssue::DuplicateDelivery { item, deliveries } => {
                write!(f, "Item {} was delivered {} times", item, deliveries)
            }
            ProtocolIssue::AdmissionAfterClose {
                thread_id,
                item,
                closed_at_step,
                admitted_at_step,
            } => write!(
                f,
                "Thread {} admitted item {} at step {}, after close at step {}",
                thread_id, item, admitted_at_step, closed_at_step
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterexample_creation() {
        let ce = Counterexample::new();
        assert!(ce.states.is_empty());
        assert!(ce.interleaving.is_empty());
        assert!(ce.dst_seed.is_none());
    }

    #[test]
    fn test_counterexample_with_seed() {
        let ce = Counterexample::with_seed(12345);
        assert_eq!(ce.dst_seed, Some(12345));
        assert_eq!(Counterexample::for_seed(None).dst_seed, None);
    }

    #[test]
    fn test_render_diagram() {
        let mut ce = Counterexample::with_seed(42).with_description("put after close");

        ce.add_action(ThreadAction {
            thread_id: 0,
            step: 1,
            action: "close()".to_string(),
            success: true,
        });
        ce.add_action(ThreadAction {
            thread_id: 1,
            step: 2,
            action: "put(7)".to_string(),
            success: false,
        });
        ce.add_state(StateSnapshot {
            step: 1,
            description: "open=false".to_string(),
            variables: vec![],
        });
        ce.add_issue(ProtocolIssue::ItemLost { item: 7 });

        let diagram = ce.render_diagram();
        assert!(diagram.contains("DST_SEED=42"));
        assert!(diagram.contains("Failure: put after close"));
        assert!(diagram.contains("Thread 1"));
        assert!(diagram.contains("put(7) [CLOSED]"));
        assert!(diagram.contains("open=false"));
        assert!(diagram.contains("Item 7 was admitted"));
    }

    #[test]
    fn test_render_without_actions() {
        let diagram = Counterexample::new().render_diagram();
        assert!(diagram.contains("(no thread actions recorded)"));
    }
}
