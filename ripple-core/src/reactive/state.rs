//! State Cells
//!
//! A [`ReactiveState`] is the ground truth of the graph: a mutable value
//! with an equality comparer and an embedded [`EventSource`].
//!
//! # How State Cells Work
//!
//! 1. A computation reads the cell through
//!    [`ComputationBuilder::track`](super::ComputationBuilder::track), which
//!    subscribes the computation to the cell's event source.
//!
//! 2. A write that the comparer considers equal to the current value is a
//!    no-op: nothing is published.
//!
//! 3. Any other write stores the value, publishes it (marking subscribed
//!    computations dirty) and then asks the scheduler to flush, unless a
//!    batch or flush is already in progress.
//!
//! # Thread Safety
//!
//! Handles are `Send + Sync` and any thread may write. Writers are
//! serialized by a per-cell lock, so [`update`](ReactiveState::update) and
//! [`modify`](ReactiveState::modify) are atomic with respect to other
//! writers. Writes from a thread other than the scheduler's owner only
//! enqueue work; the owner flushes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::disposable::Disposable;
use super::source::{EventSource, Subscription};
use super::trackable::{ChangeNotifier, Source, SourceInfo, Trackable};
use crate::error::{ReactiveError, Result};
use crate::graph::{DepthProbe, NodeId, NodeKind, Scheduler};

/// Equality test deciding whether a write is a change.
pub type Comparer<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Construction options for a state cell.
pub struct StateOptions<T> {
    name: Option<String>,
    comparer: Comparer<T>,
}

impl<T: PartialEq + 'static> StateOptions<T> {
    /// Options comparing values with `PartialEq`.
    pub fn new() -> Self {
        Self {
            name: None,
            comparer: Arc::new(|a: &T, b: &T| a == b),
        }
    }
}

impl<T: PartialEq + 'static> Default for StateOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StateOptions<T> {
    /// Options using a custom comparer; `T` need not implement `PartialEq`.
    pub fn with_comparer<F>(comparer: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            name: None,
            comparer: Arc::new(comparer),
        }
    }

    /// Diagnostic name used in errors and logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the comparer.
    pub fn comparer<F>(mut self, comparer: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.comparer = Arc::new(comparer);
        self
    }
}

struct StateInner<T> {
    id: NodeId,
    name: Arc<str>,
    scheduler: Arc<Scheduler>,
    value: RwLock<T>,
    comparer: Comparer<T>,
    /// Serializes writers so read-modify-write is atomic.
    writes: Mutex<()>,
    source: EventSource<T>,
    disposed: AtomicBool,
}

/// A mutable, equality-checked, observable value.
///
/// Cloning a `ReactiveState` creates another handle to the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = scheduler.create_state(0);
/// count.set(5)?;
/// count.update(|v| v + 1)?;
/// assert_eq!(count.get()?, 6);
/// ```
pub struct ReactiveState<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<StateInner<T>>,
}

impl<T> ReactiveState<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(scheduler: &Arc<Scheduler>, initial: T, options: StateOptions<T>) -> Self {
        let id = NodeId::new();
        let name: Arc<str> = match options.name {
            Some(name) => Arc::from(name),
            None => Arc::from(format!("state{id}")),
        };
        Self {
            inner: Arc::new(StateInner {
                id,
                name,
                scheduler: Arc::clone(scheduler),
                value: RwLock::new(initial),
                comparer: options.comparer,
                writes: Mutex::new(()),
                source: EventSource::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The scheduler this cell belongs to.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.inner.scheduler
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(ReactiveError::disposed("state", &self.inner.name));
        }
        Ok(())
    }

    /// Get the current value. Has no side effects.
    pub fn get(&self) -> Result<T> {
        self.ensure_live()?;
        Ok(self.inner.value.read().clone())
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.ensure_live()?;
        Ok(f(&self.inner.value.read()))
    }

    /// Store `value` and notify dependents, unless it equals the current value.
    pub fn set(&self, value: T) -> Result<()> {
        self.ensure_live()?;
        let changed = {
            let _writer = self.inner.writes.lock();
            self.replace(value)
        };
        self.publish(changed)
    }

    /// Replace the value with `f(current)`.
    ///
    /// `f` must not write to this same cell.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        self.ensure_live()?;
        let changed = {
            let _writer = self.inner.writes.lock();
            let current = self.inner.value.read().clone();
            self.replace(f(&current))
        };
        self.publish(changed)
    }

    /// Mutate a copy of the current value in place and store it.
    ///
    /// This is the explicit clone-and-with path for structured state: the
    /// copy is made with `T::clone`, changed by `f`, and compared against the
    /// original before being stored.
    pub fn modify(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        self.update(|current| {
            let mut next = current.clone();
            f(&mut next);
            next
        })
    }

    /// Store `value` if it differs. Caller holds the write lock.
    fn replace(&self, value: T) -> Option<T> {
        let mut current = self.inner.value.write();
        if (self.inner.comparer)(&current, &value) {
            return None;
        }
        *current = value.clone();
        Some(value)
    }

    fn publish(&self, changed: Option<T>) -> Result<()> {
        let Some(value) = changed else {
            return Ok(());
        };
        self.inner.source.emit(&value);
        self.inner.scheduler.flush_if_idle()
    }

    /// Register a plain callback invoked with every new value.
    pub fn subscribe<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.source.subscribe(callback))
    }

    /// Number of subscribers, computations included.
    pub fn subscriber_count(&self) -> usize {
        self.inner.source.subscriber_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Detach every subscriber. Further access fails with `Disposed`.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.source.clear();
        debug!(state = %self.inner.name, "disposed");
    }
}

impl<T> Clone for ReactiveState<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Source for ReactiveState<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn source_info(&self) -> SourceInfo {
        SourceInfo {
            id: self.inner.id,
            name: Arc::clone(&self.inner.name),
            kind: NodeKind::Source,
            scheduler: self.inner.scheduler.id(),
            depth: DepthProbe::root(),
        }
    }

    fn subscribe_change(&self, notifier: ChangeNotifier) -> Result<Subscription> {
        self.ensure_live()?;
        let alive = notifier.clone();
        Ok(self
            .inner
            .source
            .subscribe_while(move || alive.is_alive(), move |_| notifier.notify()))
    }
}

impl<T> Trackable for ReactiveState<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn read(&self) -> Result<T> {
        self.get()
    }
}

impl<T> Disposable for ReactiveState<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn dispose(&self) {
        ReactiveState::dispose(self);
    }
}

impl<T> std::fmt::Debug for ReactiveState<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveState")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("value", &*self.inner.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn state_get_and_set() {
        let scheduler = Scheduler::with_defaults();
        let state = scheduler.create_state(0);
        assert_eq!(state.get().unwrap(), 0);

        state.set(42).unwrap();
        assert_eq!(state.get().unwrap(), 42);
    }

    #[test]
    fn state_update_and_modify() {
        let scheduler = Scheduler::with_defaults();
        let state = scheduler.create_state(vec![1, 2]);

        state.update(|v| v.iter().map(|x| x * 10).collect()).unwrap();
        assert_eq!(state.get().unwrap(), vec![10, 20]);

        state.modify(|v| v.push(30)).unwrap();
        assert_eq!(state.with(|v| v.len()).unwrap(), 3);
    }

    #[test]
    fn equal_set_does_not_publish() {
        let scheduler = Scheduler::with_defaults();
        let state = scheduler.create_state(7);
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let _sub = state
            .subscribe(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        state.set(7).unwrap();
        state.update(|v| *v).unwrap();
        state.modify(|_| {}).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        state.set(8).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_comparer_decides_changes() {
        let scheduler = Scheduler::with_defaults();
        let state = scheduler.create_state_with(
            1.0_f64,
            StateOptions::with_comparer(|a: &f64, b: &f64| (a - b).abs() < 0.5).name("temperature"),
        );
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let _sub = state
            .subscribe(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        state.set(1.2).unwrap();
        assert_eq!(state.get().unwrap(), 1.0);
        state.set(2.0).unwrap();
        assert_eq!(state.get().unwrap(), 2.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.name(), "temperature");
    }

    #[test]
    fn state_clone_shares_value() {
        let scheduler = Scheduler::with_defaults();
        let state1 = scheduler.create_state(0);
        let state2 = state1.clone();

        state1.set(42).unwrap();
        assert_eq!(state2.get().unwrap(), 42);
        assert_eq!(state1.id(), state2.id());
    }

    #[test]
    fn disposed_state_fails_fast() {
        let scheduler = Scheduler::with_defaults();
        let state = scheduler.create_state(1);
        let _sub = state.subscribe(|_| {}).unwrap();

        state.dispose();
        state.dispose();

        assert!(state.is_disposed());
        assert_eq!(state.subscriber_count(), 0);
        assert!(state.get().unwrap_err().is_disposed());
        assert!(state.set(2).unwrap_err().is_disposed());
        assert!(state.subscribe(|_| {}).unwrap_err().is_disposed());
    }

    #[test]
    fn concurrent_updates_are_serialized() {
        let scheduler = Scheduler::with_defaults();
        let state = scheduler.create_state(0_u32);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        state.update(|v| v + 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(state.get().unwrap(), 1000);
    }

    #[test]
    fn default_names_include_id() {
        let scheduler = Scheduler::with_defaults();
        let state = scheduler.create_state(());
        assert_eq!(state.name(), format!("state{}", state.id()));
    }
}
