//! Trackable sources.
//!
//! Anything a computation can depend on implements [`Source`] (identity plus
//! change subscription) and [`Trackable`] (reading the current value).
//! [`ReactiveState`](super::ReactiveState) and
//! [`ComputedValue`](super::ComputedValue) are the two built-in sources.

use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::graph::node::Runnable;
use crate::graph::{DepthProbe, NodeId, NodeKind, SchedulerId};

use super::source::Subscription;

/// Identity of a source, as needed to record a dependency edge.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub id: NodeId,
    pub name: Arc<str>,
    pub kind: NodeKind,
    /// Scheduler the source belongs to. Edges may not cross schedulers.
    pub scheduler: SchedulerId,
    pub depth: DepthProbe,
}

/// Something a computation can subscribe to.
pub trait Source: Send + Sync {
    fn source_info(&self) -> SourceInfo;

    /// Arrange for `notifier` to fire whenever the source changes.
    fn subscribe_change(&self, notifier: ChangeNotifier) -> Result<Subscription>;
}

/// A source whose current value can be read.
pub trait Trackable: Source {
    type Value;

    fn read(&self) -> Result<Self::Value>;
}

/// Marks one computation dirty when its dependency changes.
///
/// The notifier holds the computation weakly; once the computation is gone
/// the notifier reports itself dead and sources prune it.
#[derive(Clone)]
pub struct ChangeNotifier {
    node: Weak<dyn Runnable>,
}

impl ChangeNotifier {
    pub(crate) fn new(node: Weak<dyn Runnable>) -> Self {
        Self { node }
    }

    /// Queue the computation with its scheduler.
    pub fn notify(&self) {
        if let Some(node) = self.node.upgrade() {
            node.core().scheduler().enqueue(&node);
        }
    }

    /// Whether the computation still exists.
    pub fn is_alive(&self) -> bool {
        self.node.strong_count() > 0
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("alive", &self.is_alive())
            .finish()
    }
}
