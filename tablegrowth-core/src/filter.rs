//! Tag-based eligibility filtering.

use crate::error::AuditError;
use crate::models::Instance;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Exact, case-sensitive `(key, value)` tag predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

impl TagFilter {
    /// Creates a new filter.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parses `key=value`. The value may itself contain `=`.
    ///
    /// # Errors
    /// Returns a configuration error when there is no `=` or the key is empty
    pub fn parse(input: &str) -> Result<Self> {
        match input.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok(Self::new(key, value)),
            _ => Err(AuditError::configuration(format!(
                "filter tag must look like key=value, got '{}'",
                input
            ))),
        }
    }

    /// True when the instance carries the key with exactly this value.
    pub fn matches(&self, instance: &Instance) -> bool {
        instance.tags.has(&self.key, &self.value)
    }

    /// Keeps the instances that match, preserving their order.
    pub fn apply(&self, instances: Vec<Instance>) -> Vec<Instance> {
        instances
            .into_iter()
            .filter(|instance| self.matches(instance))
            .collect()
    }
}

impl std::fmt::Display for TagFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}
