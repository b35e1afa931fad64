//! Error Boundaries
//!
//! A failed run (the body returned an error or panicked, and there was no
//! fallback value) is handed to the scheduler's [`ErrorBoundary`]. The
//! boundary decides what happens to the node next; the flush itself always
//! continues with the remaining nodes.

use tracing::warn;

use super::node::NodeInfo;
use crate::error::BodyError;

/// What to do with a node whose run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Keep the node errored with its previous value until a dependency changes.
    Ignore,

    /// Queue the node again, up to `max_retries` consecutive failures.
    Retry,

    /// Dispose the node.
    Dispose,
}

/// Receives failed runs.
pub trait ErrorBoundary: Send + Sync {
    fn on_error(&self, node: &NodeInfo, error: &BodyError) -> ErrorAction;
}

impl<F> ErrorBoundary for F
where
    F: Fn(&NodeInfo, &BodyError) -> ErrorAction + Send + Sync,
{
    fn on_error(&self, node: &NodeInfo, error: &BodyError) -> ErrorAction {
        self(node, error)
    }
}

/// Default boundary: log and keep going.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBoundary;

impl ErrorBoundary for LogBoundary {
    fn on_error(&self, node: &NodeInfo, error: &BodyError) -> ErrorAction {
        warn!(
            node = %node.name,
            id = %node.id,
            kind = ?node.kind,
            failures = node.failures,
            %error,
            "computation failed"
        );
        ErrorAction::Ignore
    }
}

/// Retry every failure, leaving the retry budget to the scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryBoundary;

impl ErrorBoundary for RetryBoundary {
    fn on_error(&self, node: &NodeInfo, error: &BodyError) -> ErrorAction {
        warn!(node = %node.name, failures = node.failures, %error, "computation failed; retrying");
        ErrorAction::Retry
    }
}
