//! Error types for the reactive graph.
//!
//! Two families of errors exist:
//!
//! - [`ReactiveError`] is returned synchronously to the caller that misused
//!   the API (disposed handles, wrong thread, builder misuse) or that
//!   triggered a runaway flush.
//! - [`BodyError`] describes a failure inside a computation body. These never
//!   escape a flush; they are routed to the scheduler's error boundary.

use thiserror::Error;

/// Boxed error returned by computation bodies.
///
/// Bodies return `Result<T, BoxError>` so that `?` works on both builder
/// calls and arbitrary user errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors reported synchronously by reactive operations.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// An operation was attempted on a disposed state cell or computation.
    #[error("{kind} `{name}` has already been disposed")]
    Disposed { kind: &'static str, name: String },

    /// A node kept being dirtied past the configured per-flush run limit.
    #[error("dependency cycle suspected after {iterations} runs of one node in a flush (abandoned: {})", nodes.join(", "))]
    CycleSuspected {
        iterations: usize,
        nodes: Vec<String>,
    },

    /// The tracked source belongs to a different scheduler.
    #[error("source `{name}` belongs to another scheduler and cannot be tracked here")]
    ForeignSource { name: String },

    /// A computation tried to track a computed value that is currently running.
    #[error("computed `{name}` is currently running and cannot be tracked by its own subtree")]
    ReentrantRead { name: String },

    /// A builder was used while its computation was not the active one.
    #[error("builder for `{name}` used outside of its computation's run")]
    WrongContext { name: String },

    /// An owner-thread operation was called from another thread.
    #[error("`{operation}` must be called on the scheduler's owner thread")]
    WrongThread { operation: &'static str },

    /// The computed value has never completed a successful run.
    #[error("computed `{name}` has no value yet")]
    NotComputed { name: String },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The default runtime was initialized twice.
    #[error("the default runtime is already initialized")]
    AlreadyInitialized,

    /// Configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl ReactiveError {
    pub(crate) fn disposed(kind: &'static str, name: &str) -> Self {
        Self::Disposed {
            kind,
            name: name.to_string(),
        }
    }

    /// Whether this error reports access to a disposed handle.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }
}

/// A failure raised while running a computation body.
#[derive(Debug, Error)]
pub enum BodyError {
    /// The body returned an error.
    #[error("{0}")]
    Failed(BoxError),

    /// The body panicked and the panic was contained.
    #[error("computation panicked: {0}")]
    Panicked(String),
}

impl BodyError {
    /// Extract a printable message from a panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_names_nodes() {
        let err = ReactiveError::CycleSuspected {
            iterations: 100,
            nodes: vec!["left".into(), "right".into()],
        };
        let message = err.to_string();
        assert!(message.contains("100"));
        assert!(message.contains("left, right"));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = BodyError::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "computation panicked: boom");

        let err = BodyError::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(err.to_string(), "computation panicked: owned boom");

        let err = BodyError::from_panic(Box::new(7_u8));
        assert!(matches!(err, BodyError::Panicked(_)));
    }

    #[test]
    fn reactive_errors_convert_into_box_error() {
        fn body() -> std::result::Result<(), BoxError> {
            Err(ReactiveError::disposed("state", "counter"))?;
            Ok(())
        }
        let err = body().unwrap_err();
        assert_eq!(err.to_string(), "state `counter` has already been disposed");
    }
}
