//! Graph Nodes
//!
//! This module defines the bookkeeping shared by every computation in the
//! dependency graph. Computed values and effects each embed a [`NodeCore`]
//! and implement [`Runnable`], supplying only their own run-and-store (or
//! run-only) behaviour.
//!
//! # State machine
//!
//! ```text
//!            dependency changed           picked by flush
//!   Clean ─────────────────────▶ Dirty ─────────────────▶ Running
//!     ▲                            ▲                        │
//!     │           success          │  dependency changed     │
//!     └────────────────────────────┼────────────────────────┤
//!                                  │                        │ failure
//!                                  └──────── Errored ◀──────┘
//!
//!   any state ── dispose() ──▶ Disposed (terminal)
//! ```

use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use smallvec::SmallVec;
use tracing::debug;

use super::scheduler::Scheduler;
use super::snapshot::NodeSnapshot;
use crate::error::{BodyError, BoxError, ReactiveError, Result};
use crate::reactive::scope::ContextScope;
use crate::reactive::source::Subscription;
use crate::reactive::{ChangeNotifier, Disposable, Source};

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A state cell. These are the leaves the graph is built on.
    Source,

    /// A computed value. Has dependencies and may have dependents.
    Computed,

    /// An effect. Has dependencies but produces no value.
    Effect,
}

impl NodeKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            NodeKind::Source => "state",
            NodeKind::Computed => "computed",
            NodeKind::Effect => "effect",
        }
    }
}

/// Lifecycle state of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Up to date.
    Clean,

    /// Queued with the scheduler.
    Dirty,

    /// Body currently executing.
    Running,

    /// The last run failed and no fallback applied.
    Errored,

    /// Torn down; no further transitions.
    Disposed,
}

/// Reads the current depth of a dependency at flush time.
///
/// State cells always sit at depth 0; computed values publish the depth
/// recorded after their latest run.
#[derive(Debug, Clone)]
pub struct DepthProbe(Option<Arc<AtomicUsize>>);

impl DepthProbe {
    /// Probe for a leaf source.
    pub fn root() -> Self {
        Self(None)
    }

    pub(crate) fn node(depth: &Arc<AtomicUsize>) -> Self {
        Self(Some(Arc::clone(depth)))
    }

    /// Current depth of the probed source.
    pub fn get(&self) -> usize {
        self.0
            .as_ref()
            .map_or(0, |depth| depth.load(Ordering::Acquire))
    }
}

/// One edge from a computation to something it read.
pub(crate) struct Dependency {
    pub(crate) source: NodeId,
    pub(crate) depth: DepthProbe,
    /// Dropping the edge unsubscribes from the source.
    _subscription: Subscription,
}

impl Dependency {
    pub(crate) fn new(source: NodeId, depth: DepthProbe, subscription: Subscription) -> Self {
        Self {
            source,
            depth,
            _subscription: subscription,
        }
    }
}

/// Public description of a node, handed to error boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    /// Consecutive failed runs, including the one being reported.
    pub failures: u32,
}

/// Result of a single run.
pub(crate) enum RunOutcome {
    Completed,
    /// The body failed and a fallback value was applied.
    Recovered(BodyError),
    Failed(BodyError),
    /// The node was disposed before it could run.
    Skipped,
}

impl RunOutcome {
    pub(crate) fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }
}

/// A computation the scheduler can execute.
pub(crate) trait Runnable: Send + Sync {
    fn core(&self) -> &NodeCore;

    /// Run the body once, rebuilding dependencies.
    fn run(self: Arc<Self>) -> RunOutcome;

    fn dispose(&self);
}

/// Run `body`, optionally containing panics.
pub(crate) fn invoke<R>(
    catch_panics: bool,
    body: impl FnOnce() -> std::result::Result<R, BoxError>,
) -> std::result::Result<R, BodyError> {
    if !catch_panics {
        return body().map_err(BodyError::Failed);
    }
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result.map_err(BodyError::Failed),
        Err(payload) => Err(BodyError::from_panic(payload)),
    }
}

/// Bookkeeping shared by computed values and effects.
pub(crate) struct NodeCore {
    id: NodeId,
    name: Arc<str>,
    kind: NodeKind,
    scheduler: Arc<Scheduler>,
    state: Mutex<NodeState>,
    /// Distance from the leaf state cells, refreshed after each run.
    depth: Arc<AtomicUsize>,
    runs: AtomicU64,
    failures: AtomicU32,
    /// Rebuilt from scratch on every run.
    dependencies: Mutex<SmallVec<[Dependency; 4]>>,
    /// Declared at construction and kept for the node's lifetime.
    static_dependencies: Mutex<SmallVec<[Dependency; 2]>>,
    /// Resources and child computations released on re-run and disposal.
    owned: Mutex<Vec<Box<dyn Disposable>>>,
    scope: Arc<ContextScope>,
}

impl NodeCore {
    pub(crate) fn new(
        kind: NodeKind,
        name: &str,
        scheduler: Arc<Scheduler>,
        parent_scope: Option<Arc<ContextScope>>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            name: Arc::from(name),
            kind,
            scheduler,
            // Construction runs the body right away.
            state: Mutex::new(NodeState::Dirty),
            depth: Arc::new(AtomicUsize::new(1)),
            runs: AtomicU64::new(0),
            failures: AtomicU32::new(0),
            dependencies: Mutex::new(SmallVec::new()),
            static_dependencies: Mutex::new(SmallVec::new()),
            owned: Mutex::new(Vec::new()),
            scope: ContextScope::child_of(parent_scope),
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub(crate) fn scope(&self) -> &Arc<ContextScope> {
        &self.scope
    }

    pub(crate) fn state(&self) -> NodeState {
        *self.state.lock()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state() == NodeState::Disposed
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(ReactiveError::disposed(self.kind.label(), &self.name));
        }
        Ok(())
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub(crate) fn depth_probe(&self) -> DepthProbe {
        DepthProbe::node(&self.depth)
    }

    pub(crate) fn run_count(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.dependencies.lock().len() + self.static_dependencies.lock().len()
    }

    pub(crate) fn info(&self) -> NodeInfo {
        NodeInfo {
            id: self.id,
            name: self.name.to_string(),
            kind: self.kind,
            failures: self.failures(),
        }
    }

    pub(crate) fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id.raw(),
            name: self.name.to_string(),
            kind: self.kind,
            state: self.state(),
            depth: self.depth(),
            dependencies: self.dependency_count(),
            runs: self.run_count(),
            failures: self.failures(),
        }
    }

    /// Subscribe to the sources declared at construction.
    pub(crate) fn attach_static(
        &self,
        sources: &[Box<dyn Source>],
        node: &Arc<dyn Runnable>,
    ) -> Result<()> {
        let mut attached = SmallVec::new();
        for source in sources {
            let notifier = ChangeNotifier::new(Arc::downgrade(node));
            attached.push(connect(source.as_ref(), &self.scheduler, notifier)?);
        }
        *self.static_dependencies.lock() = attached;
        Ok(())
    }

    /// Transition into `Dirty`. Returns true only on the transition, so a
    /// node is queued at most once per flush.
    pub(crate) fn try_mark_dirty(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            NodeState::Clean | NodeState::Errored | NodeState::Running => {
                *state = NodeState::Dirty;
                true
            }
            NodeState::Dirty | NodeState::Disposed => false,
        }
    }

    /// Enter `Running` and release everything the previous run acquired.
    ///
    /// Returns false if the node has been disposed.
    pub(crate) fn begin_run(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == NodeState::Disposed {
                return false;
            }
            *state = NodeState::Running;
        }

        let stale = mem::take(&mut *self.dependencies.lock());
        drop(stale);
        self.release_owned();
        self.scope.clear();
        self.runs.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Store what the builder collected during the run.
    pub(crate) fn install(
        &self,
        dependencies: SmallVec<[Dependency; 4]>,
        owned: Vec<Box<dyn Disposable>>,
    ) {
        if self.is_disposed() {
            drop(dependencies);
            owned.iter().for_each(|resource| resource.dispose());
            return;
        }
        *self.dependencies.lock() = dependencies;
        self.owned.lock().extend(owned);
        self.refresh_depth();
    }

    /// Leave `Running`. A node dirtied mid-run stays `Dirty`.
    pub(crate) fn finish_run(&self, succeeded: bool) -> NodeState {
        if succeeded {
            self.failures.store(0, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut state = self.state.lock();
        if *state == NodeState::Running {
            *state = if succeeded {
                NodeState::Clean
            } else {
                NodeState::Errored
            };
        }
        *state
    }

    /// Drop out of the pending set after an aborted flush.
    pub(crate) fn abandon(&self) {
        let mut state = self.state.lock();
        if *state == NodeState::Dirty {
            *state = NodeState::Errored;
        }
    }

    /// Recompute depth from the live dependency edges.
    pub(crate) fn refresh_depth(&self) -> usize {
        let upstream = {
            let dynamic = self.dependencies.lock();
            let fixed = self.static_dependencies.lock();
            dynamic
                .iter()
                .chain(fixed.iter())
                .map(|dependency| dependency.depth.get())
                .max()
                .unwrap_or(0)
        };
        let depth = upstream + 1;
        self.depth.store(depth, Ordering::Release);
        depth
    }

    /// Tear the node down. Returns false if it was already disposed.
    pub(crate) fn dispose(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == NodeState::Disposed {
                return false;
            }
            *state = NodeState::Disposed;
        }

        let dynamic = mem::take(&mut *self.dependencies.lock());
        let fixed = mem::take(&mut *self.static_dependencies.lock());
        drop(dynamic);
        drop(fixed);
        self.release_owned();
        self.scope.clear();
        self.scheduler.forget(self.id);

        debug!(node = %self.name, id = %self.id, kind = self.kind.label(), "disposed");
        true
    }

    fn release_owned(&self) {
        let owned = mem::take(&mut *self.owned.lock());
        for resource in owned {
            resource.dispose();
        }
    }
}

impl Drop for NodeCore {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Subscribe `notifier` to `source`, refusing sources owned by another scheduler.
pub(crate) fn connect(
    source: &dyn Source,
    scheduler: &Scheduler,
    notifier: ChangeNotifier,
) -> Result<Dependency> {
    let info = source.source_info();
    if info.scheduler != scheduler.id() {
        return Err(ReactiveError::ForeignSource {
            name: info.name.to_string(),
        });
    }
    let subscription = source.subscribe_change(notifier)?;
    Ok(Dependency::new(info.id, info.depth, subscription))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> NodeCore {
        NodeCore::new(NodeKind::Computed, "test", Scheduler::with_defaults(), None)
    }

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn new_node_starts_dirty() {
        let node = core();
        assert_eq!(node.state(), NodeState::Dirty);
        assert_eq!(node.depth(), 1);
        assert_eq!(node.run_count(), 0);
    }

    #[test]
    fn dirty_marking_is_idempotent() {
        let node = core();
        assert!(node.begin_run());
        node.finish_run(true);
        assert_eq!(node.state(), NodeState::Clean);

        assert!(node.try_mark_dirty());
        assert!(!node.try_mark_dirty());
        assert_eq!(node.state(), NodeState::Dirty);
    }

    #[test]
    fn state_transitions() {
        let node = core();

        assert!(node.begin_run());
        assert_eq!(node.state(), NodeState::Running);
        assert_eq!(node.finish_run(false), NodeState::Errored);
        assert_eq!(node.failures(), 1);

        // Errored nodes can be queued again.
        assert!(node.try_mark_dirty());
        assert!(node.begin_run());
        assert_eq!(node.finish_run(true), NodeState::Clean);
        assert_eq!(node.failures(), 0);
        assert_eq!(node.run_count(), 2);
    }

    #[test]
    fn dirtied_while_running_stays_dirty() {
        let node = core();
        assert!(node.begin_run());
        assert!(node.try_mark_dirty());
        assert_eq!(node.finish_run(true), NodeState::Dirty);
    }

    #[test]
    fn disposal_is_terminal_and_idempotent() {
        let node = core();
        assert!(node.dispose());
        assert!(!node.dispose());
        assert!(!node.try_mark_dirty());
        assert!(!node.begin_run());
        assert!(node.ensure_live().unwrap_err().is_disposed());
    }

    #[test]
    fn abandon_moves_dirty_to_errored() {
        let node = core();
        node.abandon();
        assert_eq!(node.state(), NodeState::Errored);
    }

    #[test]
    fn depth_probe_reads_live_depth() {
        let node = core();
        let probe = node.depth_probe();
        assert_eq!(probe.get(), 1);
        node.depth.store(4, Ordering::Release);
        assert_eq!(probe.get(), 4);
        assert_eq!(DepthProbe::root().get(), 0);
    }

    #[test]
    fn invoke_contains_panics() {
        let result: std::result::Result<(), BodyError> = invoke(true, || panic!("boom"));
        assert!(matches!(result, Err(BodyError::Panicked(ref msg)) if msg == "boom"));

        let result = invoke(true, || Err::<(), BoxError>("nope".into()));
        assert!(matches!(result, Err(BodyError::Failed(_))));

        assert_eq!(invoke(false, || Ok::<_, BoxError>(3)).unwrap(), 3);
    }
}
