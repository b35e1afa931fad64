//! Effect Implementation
//!
//! An effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its body immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued and re-run by the
//!    next flush, after every computed value it could depend on.
//!
//! 3. Before re-running, the effect drops its old dependencies, disposes
//!    the children and resources of the previous run, and tracks new ones
//!    during execution.
//!
//! # Use Cases
//!
//! Effects synchronize reactive state with the outside world:
//!
//! - Rendering when state changes
//! - Logging state changes
//! - Writing to files or sockets
//!
//! # Cleanup
//!
//! Register cleanup with
//! [`ComputationBuilder::on_cleanup`](super::ComputationBuilder::on_cleanup).
//! It is called before the effect re-runs and when the effect is disposed.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::builder::ComputationBuilder;
use super::context::TrackingContext;
use super::disposable::Disposable;
use super::scope::ContextScope;
use super::trackable::Source;
use crate::error::{BoxError, Result};
use crate::graph::node::{invoke, NodeCore, RunOutcome, Runnable};
use crate::graph::{NodeId, NodeKind, NodeState, Scheduler};

type EffectFn =
    Box<dyn FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<(), BoxError> + Send>;

/// Construction options for an effect.
#[derive(Default)]
pub struct EffectOptions {
    static_deps: Vec<Box<dyn Source>>,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `source` for the effect's whole lifetime.
    pub fn static_dep<S>(mut self, source: &S) -> Self
    where
        S: Source + Clone + 'static,
    {
        self.static_deps.push(Box::new(source.clone()));
        self
    }
}

struct EffectNode {
    core: NodeCore,
    body: Mutex<EffectFn>,
}

impl Runnable for EffectNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn run(self: Arc<Self>) -> RunOutcome {
        if !self.core.begin_run() {
            return RunOutcome::Skipped;
        }

        let node: Arc<dyn Runnable> = self.clone();
        let mut builder = ComputationBuilder::new(&self.core, Arc::downgrade(&node));
        drop(node);

        let result = {
            let _tracking = TrackingContext::enter(self.core.id());
            let mut guard = self.body.lock();
            let body = &mut **guard;
            invoke(self.core.scheduler().config().catch_panics, || body(&mut builder))
        };
        builder.install();

        self.core.finish_run(result.is_ok());
        match result {
            Ok(()) => RunOutcome::Completed,
            Err(err) => RunOutcome::Failed(err),
        }
    }

    fn dispose(&self) {
        self.core.dispose();
    }
}

/// A side-effecting computation that runs when its dependencies change.
///
/// The effect lives as long as any handle does; keep the handle (or call
/// [`dispose`](ReactiveEffect::dispose)) to control its lifetime.
///
/// # Example
///
/// ```rust,ignore
/// let count = scheduler.create_state(0);
/// let c = count.clone();
///
/// let _logger = scheduler.create_effect("logger", move |cx| {
///     println!("Count is: {}", cx.track(&c)?);
///     Ok(())
/// })?;
///
/// count.set(5)?;  // Prints: "Count is: 5"
/// ```
#[must_use = "dropping the last handle disposes the computation"]
#[derive(Clone)]
pub struct ReactiveEffect {
    inner: Arc<EffectNode>,
}

impl ReactiveEffect {
    pub(crate) fn create<F>(
        scheduler: &Arc<Scheduler>,
        name: &str,
        options: EffectOptions,
        parent_scope: Option<Arc<ContextScope>>,
        body: F,
    ) -> Result<Self>
    where
        F: FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        scheduler.ensure_owner("create_effect")?;

        let inner = Arc::new(EffectNode {
            core: NodeCore::new(NodeKind::Effect, name, Arc::clone(scheduler), parent_scope),
            body: Mutex::new(Box::new(body)),
        });
        let node: Arc<dyn Runnable> = inner.clone();
        inner.core.attach_static(&options.static_deps, &node)?;
        scheduler.register(&node);
        debug!(node = name, id = %inner.core.id(), "effect created");

        scheduler.run_initial(&node)?;
        Ok(Self { inner })
    }

    pub fn id(&self) -> NodeId {
        self.inner.core.id()
    }

    pub fn name(&self) -> &str {
        self.inner.core.name()
    }

    /// Queue a re-run even though no dependency changed.
    pub fn trigger(&self) -> Result<()> {
        self.inner.core.ensure_live()?;
        let node: Arc<dyn Runnable> = self.inner.clone();
        self.inner.core.scheduler().mark_dirty(&node)
    }

    pub fn state(&self) -> NodeState {
        self.inner.core.state()
    }

    /// Get the number of times this effect has run.
    pub fn run_count(&self) -> u64 {
        self.inner.core.run_count()
    }

    pub fn depth(&self) -> usize {
        self.inner.core.depth()
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.core.dependency_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.core.is_disposed()
    }

    /// Stop the effect from running again.
    pub fn dispose(&self) {
        self.inner.core.dispose();
    }
}

impl Disposable for ReactiveEffect {
    fn dispose(&self) {
        ReactiveEffect::dispose(self);
    }
}

impl std::fmt::Debug for ReactiveEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveEffect")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
