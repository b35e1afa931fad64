//! Computed Values
//!
//! A [`ComputedValue`] is a derived value: its body reads other sources
//! through the [`ComputationBuilder`] and returns a result, which is cached
//! and published to the computed value's own subscribers.
//!
//! # How Computed Values Work
//!
//! 1. Creation runs the body once, synchronously, to establish the initial
//!    value and dependencies.
//!
//! 2. When a dependency changes the node is marked dirty and re-run by the
//!    scheduler's next flush, after every shallower node. Reading
//!    [`current`](ComputedValue::current) never triggers a computation; it
//!    returns whatever the last flush produced.
//!
//! 3. After a run, downstream computations are notified only if the new
//!    value differs from the cached one.
//!
//! # Failures
//!
//! A body that returns an error (or panics, when panics are caught) leaves
//! the previous value in place and moves the node to `Errored`. If a
//! fallback was configured, the fallback is stored and published instead and
//! the node stays usable.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::builder::ComputationBuilder;
use super::context::TrackingContext;
use super::disposable::Disposable;
use super::scope::ContextScope;
use super::source::{EventSource, Subscription};
use super::trackable::{ChangeNotifier, Source, SourceInfo, Trackable};
use crate::error::{BoxError, ReactiveError, Result};
use crate::graph::node::{invoke, NodeCore, RunOutcome, Runnable};
use crate::graph::{NodeId, NodeKind, NodeState, Scheduler};

type ComputeFn<T> =
    Box<dyn FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<T, BoxError> + Send>;

/// Construction options for a computed value.
pub struct ComputedOptions<T> {
    static_deps: Vec<Box<dyn Source>>,
    fallback: Option<T>,
}

impl<T> ComputedOptions<T> {
    pub fn new() -> Self {
        Self {
            static_deps: Vec::new(),
            fallback: None,
        }
    }

    /// Subscribe to `source` for the node's whole lifetime, whether or not
    /// the body tracks it.
    pub fn static_dep<S>(mut self, source: &S) -> Self
    where
        S: Source + Clone + 'static,
    {
        self.static_deps.push(Box::new(source.clone()));
        self
    }

    /// Value stored when the body fails.
    pub fn fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }
}

impl<T> Default for ComputedOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct ComputedNode<T> {
    core: NodeCore,
    body: Mutex<ComputeFn<T>>,
    cached: RwLock<Option<T>>,
    fallback: Option<T>,
    source: EventSource<T>,
}

impl<T> ComputedNode<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Cache `value` and publish it if it changed.
    fn store(&self, value: T) {
        let changed = {
            let mut cached = self.cached.write();
            if cached.as_ref() == Some(&value) {
                false
            } else {
                *cached = Some(value.clone());
                true
            }
        };
        if changed {
            self.source.emit(&value);
        }
    }
}

impl<T> Runnable for ComputedNode<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
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

        match result {
            Ok(value) => {
                self.core.finish_run(true);
                self.store(value);
                RunOutcome::Completed
            }
            Err(err) => match &self.fallback {
                Some(fallback) => {
                    self.core.finish_run(true);
                    self.store(fallback.clone());
                    RunOutcome::Recovered(err)
                }
                None => {
                    self.core.finish_run(false);
                    RunOutcome::Failed(err)
                }
            },
        }
    }

    fn dispose(&self) {
        if self.core.dispose() {
            self.source.clear();
        }
    }
}

/// A cached value derived from other sources.
///
/// Cloning a `ComputedValue` creates another handle to the same node. The
/// node lives as long as any handle does (including handles captured by
/// downstream bodies); dropping the last one disposes it.
///
/// # Example
///
/// ```rust,ignore
/// let count = scheduler.create_state(2);
/// let c = count.clone();
/// let doubled = scheduler.create_computed("doubled", move |cx| Ok(cx.track(&c)? * 2))?;
///
/// count.set(5)?;
/// assert_eq!(doubled.current()?, 10);
/// ```
#[must_use = "dropping the last handle disposes the computation"]
pub struct ComputedValue<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<ComputedNode<T>>,
}

impl<T> ComputedValue<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn create<F>(
        scheduler: &Arc<Scheduler>,
        name: &str,
        options: ComputedOptions<T>,
        parent_scope: Option<Arc<ContextScope>>,
        body: F,
    ) -> Result<Self>
    where
        F: FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<T, BoxError> + Send + 'static,
    {
        scheduler.ensure_owner("create_computed")?;
        let ComputedOptions {
            static_deps,
            fallback,
        } = options;

        let inner = Arc::new(ComputedNode {
            core: NodeCore::new(NodeKind::Computed, name, Arc::clone(scheduler), parent_scope),
            body: Mutex::new(Box::new(body)),
            cached: RwLock::new(None),
            fallback,
            source: EventSource::new(),
        });
        let node: Arc<dyn Runnable> = inner.clone();
        inner.core.attach_static(&static_deps, &node)?;
        scheduler.register(&node);
        debug!(node = name, id = %inner.core.id(), "computed created");

        scheduler.run_initial(&node)?;
        Ok(Self { inner })
    }

    pub fn id(&self) -> NodeId {
        self.inner.core.id()
    }

    pub fn name(&self) -> &str {
        self.inner.core.name()
    }

    /// The value produced by the latest run.
    pub fn current(&self) -> Result<T> {
        self.with_current(T::clone)
    }

    /// Borrow the latest value without cloning it.
    pub fn with_current<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.inner.core.ensure_live()?;
        let cached = self.inner.cached.read();
        match cached.as_ref() {
            Some(value) => Ok(f(value)),
            None => Err(ReactiveError::NotComputed {
                name: self.name().to_string(),
            }),
        }
    }

    /// Register a plain callback invoked whenever the value changes.
    pub fn subscribe<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.core.ensure_live()?;
        Ok(self.inner.source.subscribe(callback))
    }

    /// Force a re-run even though no dependency changed.
    pub fn invalidate(&self) -> Result<()> {
        self.inner.core.ensure_live()?;
        let node: Arc<dyn Runnable> = self.inner.clone();
        self.inner.core.scheduler().mark_dirty(&node)
    }

    pub fn state(&self) -> NodeState {
        self.inner.core.state()
    }

    pub fn run_count(&self) -> u64 {
        self.inner.core.run_count()
    }

    /// Distance from the state cells this value derives from.
    pub fn depth(&self) -> usize {
        self.inner.core.depth()
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.core.dependency_count()
    }

    /// Number of consumers, computations included.
    pub fn subscriber_count(&self) -> usize {
        self.inner.source.subscriber_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.core.is_disposed()
    }

    /// Stop the computation, drop its dependencies and dispose everything it owns.
    pub fn dispose(&self) {
        Runnable::dispose(&*self.inner);
    }
}

impl<T> Clone for ComputedValue<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Source for ComputedValue<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn source_info(&self) -> SourceInfo {
        let core = &self.inner.core;
        SourceInfo {
            id: core.id(),
            name: Arc::from(core.name()),
            kind: NodeKind::Computed,
            scheduler: core.scheduler().id(),
            depth: core.depth_probe(),
        }
    }

    fn subscribe_change(&self, notifier: ChangeNotifier) -> Result<Subscription> {
        self.inner.core.ensure_live()?;
        let alive = notifier.clone();
        Ok(self
            .inner
            .source
            .subscribe_while(move || alive.is_alive(), move |_| notifier.notify()))
    }
}

impl<T> Trackable for ComputedValue<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    type Value = T;

    fn read(&self) -> Result<T> {
        self.current()
    }
}

impl<T> Disposable for ComputedValue<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn dispose(&self) {
        ComputedValue::dispose(self);
    }
}

impl<T> std::fmt::Debug for ComputedValue<T>
where
    T: Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedValue")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("value", &*self.inner.cached.read())
            .field("depth", &self.depth())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn computed_runs_on_creation() {
        let scheduler = Scheduler::with_defaults();
        let compute_count = Arc::new(AtomicI32::new(0));
        let compute_count_clone = compute_count.clone();

        let computed = scheduler
            .create_computed("answer", move |_| {
                compute_count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .unwrap();

        assert_eq!(compute_count.load(Ordering::SeqCst), 1);
        assert_eq!(computed.current().unwrap(), 42);
        assert_eq!(computed.state(), NodeState::Clean);
    }

    #[test]
    fn current_never_recomputes() {
        let scheduler = Scheduler::with_defaults();
        let compute_count = Arc::new(AtomicI32::new(0));
        let compute_count_clone = compute_count.clone();

        let computed = scheduler
            .create_computed("cached", move |_| {
                compute_count_clone.fetch_add(1, Ordering::SeqCst);
                Ok("value".to_string())
            })
            .unwrap();

        for _ in 0..3 {
            assert_eq!(computed.current().unwrap(), "value");
        }
        assert_eq!(compute_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn computed_follows_its_source() {
        let scheduler = Scheduler::with_defaults();
        let count = scheduler.create_state(1);
        let count_clone = count.clone();
        let doubled = scheduler
            .create_computed("doubled", move |cx| Ok(cx.track(&count_clone)? * 2))
            .unwrap();

        count.set(21).unwrap();
        assert_eq!(doubled.current().unwrap(), 42);
        assert_eq!(doubled.run_count(), 2);
    }

    #[test]
    fn unchanged_result_does_not_notify() {
        let scheduler = Scheduler::with_defaults();
        let count = scheduler.create_state(1);
        let notified = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let parity = scheduler
            .create_computed("parity", move |cx| Ok(cx.track(&count_clone)? % 2))
            .unwrap();
        let notified_clone = notified.clone();
        let _sub = parity
            .subscribe(move |_| {
                notified_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        count.set(3).unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        count.set(4).unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(parity.run_count(), 3);
    }

    #[test]
    fn failure_without_fallback_keeps_last_value() {
        let scheduler = Scheduler::with_defaults();
        let input = scheduler.create_state(4);
        let input_clone = input.clone();

        let checked = scheduler
            .create_computed("checked", move |cx| {
                let v = cx.track(&input_clone)?;
                if v < 0 {
                    return Err("negative".into());
                }
                Ok(v * 10)
            })
            .unwrap();

        input.set(-1).unwrap();
        assert_eq!(checked.state(), NodeState::Errored);
        assert_eq!(checked.current().unwrap(), 40);

        input.set(2).unwrap();
        assert_eq!(checked.state(), NodeState::Clean);
        assert_eq!(checked.current().unwrap(), 20);
    }

    #[test]
    fn first_failure_leaves_nothing_computed() {
        let scheduler = Scheduler::with_defaults();
        let broken = scheduler
            .create_computed::<i32, _>("broken", |_| Err("unavailable".into()))
            .unwrap();

        assert!(matches!(
            broken.current(),
            Err(ReactiveError::NotComputed { ref name }) if name == "broken"
        ));
    }

    #[test]
    fn fallback_replaces_failed_runs() {
        let scheduler = Scheduler::with_defaults();
        let input = scheduler.create_state(1);
        let input_clone = input.clone();

        let guarded = scheduler
            .create_computed_with(
                "guarded",
                ComputedOptions::new().fallback(-1),
                move |cx| {
                    let v = cx.track(&input_clone)?;
                    if v == 0 {
                        return Err("division by zero".into());
                    }
                    Ok(100 / v)
                },
            )
            .unwrap();

        assert_eq!(guarded.current().unwrap(), 100);
        input.set(0).unwrap();
        assert_eq!(guarded.current().unwrap(), -1);
        assert_eq!(guarded.state(), NodeState::Clean);
    }

    #[test]
    fn panics_are_contained() {
        let scheduler = Scheduler::with_defaults();
        let input = scheduler.create_state(false);
        let input_clone = input.clone();

        let fragile = scheduler
            .create_computed("fragile", move |cx| {
                if cx.track(&input_clone)? {
                    panic!("bad input");
                }
                Ok(1)
            })
            .unwrap();

        input.set(true).unwrap();
        assert_eq!(fragile.state(), NodeState::Errored);
        assert_eq!(fragile.current().unwrap(), 1);
    }

    #[test]
    fn static_dependencies_trigger_reruns() {
        let scheduler = Scheduler::with_defaults();
        let trigger = scheduler.create_state(0);
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let stamp = scheduler
            .create_computed_with(
                "stamp",
                ComputedOptions::new().static_dep(&trigger),
                move |cx| {
                    runs_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(cx.run_count())
                },
            )
            .unwrap();

        assert_eq!(stamp.dependency_count(), 1);
        trigger.set(1).unwrap();
        trigger.set(2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(stamp.current().unwrap(), 3);
    }

    #[test]
    fn invalidate_forces_a_run() {
        let scheduler = Scheduler::with_defaults();
        let computed = scheduler
            .create_computed("counter", |cx| Ok(cx.run_count()))
            .unwrap();

        computed.invalidate().unwrap();
        assert_eq!(computed.current().unwrap(), 2);
    }

    #[test]
    fn disposed_computed_rejects_access() {
        let scheduler = Scheduler::with_defaults();
        let source = scheduler.create_state(1);
        let source_clone = source.clone();
        let computed = scheduler
            .create_computed("gone", move |cx| Ok(cx.track(&source_clone)?))
            .unwrap();
        assert_eq!(source.subscriber_count(), 1);

        computed.dispose();
        computed.dispose();

        assert!(computed.is_disposed());
        assert_eq!(source.subscriber_count(), 0);
        assert!(computed.current().unwrap_err().is_disposed());
        assert!(computed.invalidate().unwrap_err().is_disposed());
    }

    #[test]
    fn creation_off_the_owner_thread_is_refused() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let remote = scheduler.clone();
        let err = std::thread::spawn(move || remote.create_computed("remote", |_| Ok(1)).unwrap_err())
            .join()
            .unwrap();
        assert!(matches!(err, ReactiveError::WrongThread { .. }));
    }

    #[test]
    fn computed_clone_shares_state() {
        let scheduler = Scheduler::with_defaults();
        let computed1 = scheduler.create_computed("shared", |_| Ok(7)).unwrap();
        let computed2 = computed1.clone();

        assert_eq!(computed1.id(), computed2.id());
        computed1.dispose();
        assert!(computed2.is_disposed());
    }

    #[test]
    fn downstream_handles_keep_upstream_alive() {
        let scheduler = Scheduler::with_defaults();
        let source = scheduler.create_state(1);

        let source_clone = source.clone();
        let doubled = scheduler
            .create_computed("doubled", move |cx| Ok(cx.track(&source_clone)? * 2))
            .unwrap();
        let doubled_clone = doubled.clone();
        let plus_one = scheduler
            .create_computed("plus_one", move |cx| Ok(cx.track(&doubled_clone)? + 1))
            .unwrap();

        drop(doubled);
        source.set(2).unwrap();
        assert_eq!(plus_one.current().unwrap(), 5);
        assert_eq!(scheduler.node_count(), 2);

        drop(plus_one);
        assert_eq!(scheduler.node_count(), 0);
        assert_eq!(source.subscriber_count(), 0);
    }
}
