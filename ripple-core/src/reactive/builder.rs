//! Computation Builder
//!
//! Every computed value and effect body receives a [`ComputationBuilder`].
//! The builder is the only way to create dependency edges: a source read
//! through [`track`](ComputationBuilder::track) is recorded, a source read
//! directly (`state.get()`) is not.
//!
//! # What the builder collects
//!
//! - **Dependencies.** Each tracked source is subscribed at most once per
//!   run. When the run ends the collected edges replace the previous set, so
//!   a branch that stops reading a source also stops listening to it.
//!
//! - **Owned resources.** Child computations and anything passed to
//!   [`use_disposable`](ComputationBuilder::use_disposable) or
//!   [`on_cleanup`](ComputationBuilder::on_cleanup) belong to the running
//!   node. They are disposed before the node runs again and when it is
//!   disposed.
//!
//! - **Context.** Values provided with
//!   [`provide_context`](ComputationBuilder::provide_context) are visible to
//!   child computations created by this run, keyed by type.

use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use super::computed::{ComputedOptions, ComputedValue};
use super::context::TrackingContext;
use super::disposable::{Disposable, DisposeFn};
use super::effect::{EffectOptions, ReactiveEffect};
use super::trackable::{ChangeNotifier, Trackable};
use crate::error::{BoxError, ReactiveError, Result};
use crate::graph::node::{connect, Dependency, NodeCore, Runnable};
use crate::graph::{NodeKind, Scheduler};

/// Per-run handle passed to computation bodies.
pub struct ComputationBuilder<'a> {
    core: &'a NodeCore,
    node: Weak<dyn Runnable>,
    dependencies: SmallVec<[Dependency; 4]>,
    owned: Vec<Box<dyn Disposable>>,
}

impl<'a> ComputationBuilder<'a> {
    pub(crate) fn new(core: &'a NodeCore, node: Weak<dyn Runnable>) -> Self {
        Self {
            core,
            node,
            dependencies: SmallVec::new(),
            owned: Vec::new(),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if TrackingContext::current() != Some(self.core.id()) {
            return Err(ReactiveError::WrongContext {
                name: self.core.name().to_string(),
            });
        }
        self.core.ensure_live()
    }

    /// Read `source` and record it as a dependency of this run.
    pub fn track<S: Trackable>(&mut self, source: &S) -> Result<S::Value> {
        self.ensure_active()?;

        let info = source.source_info();
        if info.scheduler != self.core.scheduler().id() {
            return Err(ReactiveError::ForeignSource {
                name: info.name.to_string(),
            });
        }
        if info.kind == NodeKind::Computed && TrackingContext::is_running(info.id) {
            return Err(ReactiveError::ReentrantRead {
                name: info.name.to_string(),
            });
        }

        // Subscribe before reading so a write landing in between still
        // marks this run dirty.
        if !self.dependencies.iter().any(|dep| dep.source == info.id) {
            let notifier = ChangeNotifier::new(self.node.clone());
            let dependency = connect(source, self.core.scheduler(), notifier)?;
            self.dependencies.push(dependency);
        }
        source.read()
    }

    /// Tie `resource` to this run; it is disposed before the next one.
    pub fn use_disposable<D>(&mut self, resource: D) -> Result<D>
    where
        D: Disposable + Clone + 'static,
    {
        self.ensure_active()?;
        self.owned.push(Box::new(resource.clone()));
        Ok(resource)
    }

    /// Run `cleanup` before the next run or on disposal.
    pub fn on_cleanup<F>(&mut self, cleanup: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_active()?;
        self.owned.push(Box::new(DisposeFn::new(cleanup)));
        Ok(())
    }

    /// Create a computed value owned by this run.
    pub fn create_computed<T, F>(&mut self, name: &str, body: F) -> Result<ComputedValue<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<T, BoxError> + Send + 'static,
    {
        self.create_computed_with(name, ComputedOptions::new(), body)
    }

    pub fn create_computed_with<T, F>(
        &mut self,
        name: &str,
        options: ComputedOptions<T>,
        body: F,
    ) -> Result<ComputedValue<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<T, BoxError> + Send + 'static,
    {
        self.ensure_active()?;
        let child = ComputedValue::create(
            self.core.scheduler(),
            name,
            options,
            Some(Arc::clone(self.core.scope())),
            body,
        )?;
        self.owned.push(Box::new(child.clone()));
        Ok(child)
    }

    /// Create an effect owned by this run.
    pub fn create_effect<F>(&mut self, name: &str, body: F) -> Result<ReactiveEffect>
    where
        F: FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.create_effect_with(name, EffectOptions::new(), body)
    }

    pub fn create_effect_with<F>(
        &mut self,
        name: &str,
        options: EffectOptions,
        body: F,
    ) -> Result<ReactiveEffect>
    where
        F: FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.ensure_active()?;
        let child = ReactiveEffect::create(
            self.core.scheduler(),
            name,
            options,
            Some(Arc::clone(self.core.scope())),
            body,
        )?;
        self.owned.push(Box::new(child.clone()));
        Ok(child)
    }

    /// Make `value` visible to child computations created by this run.
    pub fn provide_context<T>(&mut self, value: T) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        self.ensure_active()?;
        self.core.scope().provide(value);
        Ok(())
    }

    /// Look up a context value provided by this run or an ancestor.
    pub fn context<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.core.scope().get::<T>()
    }

    /// Name of the running computation.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// How many times the computation has run, this run included.
    pub fn run_count(&self) -> u64 {
        self.core.run_count()
    }

    /// Dependencies recorded so far in this run.
    pub fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        self.core.scheduler()
    }

    /// Hand the collected edges and resources to the node.
    pub(crate) fn install(self) {
        self.core.install(self.dependencies, self.owned);
    }
}

impl std::fmt::Debug for ComputationBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputationBuilder")
            .field("node", &self.core.name())
            .field("dependencies", &self.dependencies.len())
            .field("owned", &self.owned.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    use crate::reactive::{ReactiveState, Source, SourceInfo, Subscription};

    #[test]
    fn tracking_a_source_twice_subscribes_once() {
        let scheduler = Scheduler::with_defaults();
        let state = scheduler.create_state(2);
        let state_clone = state.clone();

        let sum = scheduler
            .create_computed("sum", move |cx| {
                let a = cx.track(&state_clone)?;
                let b = cx.track(&state_clone)?;
                assert_eq!(cx.dependency_count(), 1);
                Ok(a + b)
            })
            .unwrap();

        assert_eq!(sum.current().unwrap(), 4);
        assert_eq!(sum.dependency_count(), 1);
        assert_eq!(state.subscriber_count(), 1);
    }

    #[test]
    fn untracked_reads_create_no_edge() {
        let scheduler = Scheduler::with_defaults();
        let tracked = scheduler.create_state(1);
        let untracked = scheduler.create_state(10);
        let runs = Arc::new(AtomicI32::new(0));

        let (t, u, runs_clone) = (tracked.clone(), untracked.clone(), runs.clone());
        let total = scheduler
            .create_computed("total", move |cx| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(cx.track(&t)? + u.get()?)
            })
            .unwrap();

        untracked.set(20).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(total.current().unwrap(), 11);

        tracked.set(2).unwrap();
        assert_eq!(total.current().unwrap(), 22);
    }

    #[test]
    fn foreign_sources_are_rejected() {
        let scheduler = Scheduler::with_defaults();
        let other = Scheduler::with_defaults();
        let foreign = other.create_state(1);

        let computed = scheduler
            .create_computed("bad", move |cx| Ok(cx.track(&foreign)?))
            .unwrap();
        let err = computed.current().unwrap_err();
        assert!(matches!(err, ReactiveError::NotComputed { .. }));
    }

    #[test]
    fn reading_self_is_reentrant() {
        let scheduler = Scheduler::with_defaults();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let slot: Arc<parking_lot::Mutex<Option<ComputedValue<i32>>>> =
            Arc::new(parking_lot::Mutex::new(None));

        let (seen_clone, slot_clone) = (seen.clone(), slot.clone());
        let node = scheduler
            .create_computed("selfish", move |cx| {
                let me = slot_clone.lock().clone();
                if let Some(me) = me {
                    *seen_clone.lock() = Some(cx.track(&me).map_err(|e| e.to_string()));
                }
                Ok(cx.run_count() as i32)
            })
            .unwrap();

        *slot.lock() = Some(node.clone());
        node.invalidate().unwrap();

        let seen = seen.lock().clone();
        assert!(matches!(seen, Some(Err(ref msg)) if msg.contains("currently running")));
        slot.lock().take();
    }

    #[test]
    fn owned_resources_are_released_before_rerun() {
        let scheduler = Scheduler::with_defaults();
        let state = scheduler.create_state(0);
        let released = Arc::new(AtomicI32::new(0));

        let (state_clone, released_clone) = (state.clone(), released.clone());
        let effect = scheduler
            .create_effect("resource", move |cx| {
                cx.track(&state_clone)?;
                let released = released_clone.clone();
                let handle = cx.use_disposable(Arc::new(DisposeFn::new(move || {
                    released.fetch_add(1, Ordering::SeqCst);
                })))?;
                assert!(!handle.is_disposed());
                Ok(())
            })
            .unwrap();

        assert_eq!(released.load(Ordering::SeqCst), 0);
        state.set(1).unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        effect.dispose();
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn context_flows_to_children() {
        #[derive(Debug, PartialEq)]
        struct Locale(&'static str);

        let scheduler = Scheduler::with_defaults();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen_clone = seen.clone();

        let _parent = scheduler
            .create_effect("parent", move |cx| {
                cx.provide_context(Locale("fr"))?;
                let seen = seen_clone.clone();
                let _child = cx.create_effect("child", move |cx| {
                    *seen.lock() = cx.context::<Locale>().map(|l| l.0);
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();

        assert_eq!(*seen.lock(), Some("fr"));
    }

    /// Writes on another thread right after reading, before returning.
    struct RacingRead {
        inner: ReactiveState<i32>,
        raced: AtomicBool,
    }

    impl Source for RacingRead {
        fn source_info(&self) -> SourceInfo {
            self.inner.source_info()
        }

        fn subscribe_change(&self, notifier: ChangeNotifier) -> Result<Subscription> {
            self.inner.subscribe_change(notifier)
        }
    }

    impl Trackable for RacingRead {
        type Value = i32;

        fn read(&self) -> Result<i32> {
            let value = self.inner.read()?;
            if !self.raced.swap(true, Ordering::SeqCst) {
                let writer = self.inner.clone();
                std::thread::spawn(move || writer.set(value + 1).unwrap())
                    .join()
                    .unwrap();
            }
            Ok(value)
        }
    }

    #[test]
    fn write_racing_a_tracked_read_is_not_lost() {
        let scheduler = Scheduler::with_defaults();
        let state = scheduler.create_state(1);
        let racing = Arc::new(RacingRead {
            inner: state.clone(),
            raced: AtomicBool::new(false),
        });

        let racing_clone = racing.clone();
        let seen = scheduler
            .create_computed("seen", move |cx| Ok(cx.track(&*racing_clone)?))
            .unwrap();

        assert_eq!(state.get().unwrap(), 2);
        assert_eq!(seen.current().unwrap(), 2);
        assert_eq!(seen.run_count(), 2);
    }
}
