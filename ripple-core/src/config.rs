//! Scheduler Configuration
//!
//! Every [`Scheduler`](crate::graph::Scheduler) is built from a
//! [`SchedulerConfig`]. Configurations can be constructed in code or loaded
//! from JSON; missing fields fall back to their defaults.
//!
//! ```rust,ignore
//! let config = SchedulerConfig::from_json(r#"{ "max_flush_iterations": 16 }"#)?;
//! let scheduler = Scheduler::new(config)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};

/// Default bound on how often one node may run within a single flush.
pub const DEFAULT_MAX_FLUSH_ITERATIONS: usize = 100;

/// Default number of consecutive retries granted by [`ErrorAction::Retry`](crate::graph::ErrorAction::Retry).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Tunables for a scheduler instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Runs of a single node within one flush before a cycle is reported.
    pub max_flush_iterations: usize,

    /// Consecutive failures after which a retrying node is left errored.
    pub max_retries: u32,

    /// Contain panics raised by computation bodies.
    pub catch_panics: bool,

    /// Never flush automatically; the caller drives `flush()` explicitly.
    ///
    /// Useful for deterministic tests.
    pub manual_flush: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_flush_iterations: DEFAULT_MAX_FLUSH_ITERATIONS,
            max_retries: DEFAULT_MAX_RETRIES,
            catch_panics: true,
            manual_flush: false,
        }
    }
}

impl SchedulerConfig {
    /// Configuration for a manually flushed scheduler.
    pub fn manual() -> Self {
        Self {
            manual_flush: true,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set the per-node run limit for one flush.
    pub fn with_max_flush_iterations(mut self, iterations: usize) -> Self {
        self.max_flush_iterations = iterations;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Enable or disable panic containment.
    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_flush_iterations == 0 {
            return Err(ReactiveError::InvalidConfig(
                "max_flush_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_flush_iterations, DEFAULT_MAX_FLUSH_ITERATIONS);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert!(config.catch_panics);
        assert!(!config.manual_flush);
        assert!(config.validate().is_ok());
        assert!(SchedulerConfig::manual().validate().is_ok());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = SchedulerConfig::from_json(r#"{ "manual_flush": true }"#).unwrap();
        assert!(config.manual_flush);
        assert_eq!(config.max_flush_iterations, DEFAULT_MAX_FLUSH_ITERATIONS);
    }

    #[test]
    fn zero_iterations_is_rejected() {
        let err = SchedulerConfig::from_json(r#"{ "max_flush_iterations": 0 }"#).unwrap_err();
        assert!(matches!(err, ReactiveError::InvalidConfig(_)));
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = SchedulerConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ReactiveError::Config(_)));
    }

    #[test]
    fn json_round_trip_preserves_overrides() {
        let config = SchedulerConfig::manual()
            .with_max_flush_iterations(8)
            .with_max_retries(1);
        let parsed = SchedulerConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
