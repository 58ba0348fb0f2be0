//! Property results and the checker trait shared by every invariant module.

use std::fmt;

use crate::counterexample::Counterexample;

/// Outcome of checking a single named property.
#[derive(Debug, Clone)]
pub struct PropertyResult {
    /// Property name (e.g. `"NoLostItems"`)
    pub property: &'static str,
    /// Whether the property held
    pub holds: bool,
    /// Explanation when the property failed
    pub message: Option<String>,
    /// Failure path, when one could be reconstructed
    pub counterexample: Option<Counterexample>,
}

impl PropertyResult {
    /// A property that held.
    #[must_use]
    pub fn pass(property: &'static str) -> Self {
        Self {
            property,
            holds: true,
            message: None,
            counterexample: None,
        }
    }

    /// A property that was violated.
    #[must_use]
    pub fn fail(
        property: &'static str,
        message: impl Into<String>,
        counterexample: Option<Counterexample>,
    ) -> Self {
        Self {
            property,
            holds: false,
            message: Some(message.into()),
            counterexample,
        }
    }
}

impl fmt::Display for PropertyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.holds {
            return write!(f, "[PASS] {}", self.property);
        }
        write!(f, "[FAIL] {}", self.property)?;
        if let Some(ref message) = self.message {
            write!(f, ": {}", message)?;
        }
        if let Some(ref ce) = self.counterexample {
            write!(f, "\n{}", ce.render_diagram())?;
        }
        Ok(())
    }
}

/// A checker evaluates a fixed set of properties against some observed state.
pub trait PropertyChecker {
    /// Check every property, passing or not.
    fn check_all(&self) -> Vec<PropertyResult>;

    /// True when every property holds.
    fn all_hold(&self) -> bool {
        self.check_all().iter().all(|r| r.holds)
    }

    /// Only the violated properties.
    fn violations(&self) -> Vec<PropertyResult> {
        self.check_all().into_iter().filter(|r| !r.holds).collect()
    }
}
