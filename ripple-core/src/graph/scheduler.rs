//! Update Scheduler
//!
//! The scheduler collects dirty computations and runs them in dependency
//! order. It ensures that a computation never runs before an upstream
//! computation it was invalidated by in the same pass.
//!
//! # Algorithm
//!
//! 1. A source change marks each subscribed computation dirty. Marking is
//!    idempotent: only the transition into `Dirty` enqueues the node.
//! 2. Outside a batch, the writer then flushes. Inside a batch the flush is
//!    deferred until the outermost batch closes.
//! 3. A flush repeatedly picks the shallowest dirty node, refreshing depths
//!    from the current edges, and runs it. Equal depths run in queue order.
//! 4. Nodes dirtied by a run (a computed value changed, or a body wrote to a
//!    state cell) join the same pass and are picked in depth order, so a
//!    deep node never runs ahead of a shallower upstream dirtied by the same
//!    write. The flush ends when nothing is dirty, or fails once a single
//!    node would run more than `max_flush_iterations` times.
//!
//! Shallow-first ordering approximates a topological sort without
//! materializing the whole graph on every change.
//!
//! # Threads
//!
//! Any thread may write state cells. Bodies and flushes run only on the
//! thread that created the scheduler; writes from elsewhere enqueue work
//! and wake [`Scheduler::wait_for_pending`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, debug_span, error, trace, warn};

use super::boundary::{ErrorAction, ErrorBoundary, LogBoundary};
use super::node::{NodeId, NodeState, RunOutcome, Runnable};
use super::snapshot::GraphSnapshot;
use crate::config::SchedulerConfig;
use crate::error::{BodyError, BoxError, ReactiveError, Result};
use crate::reactive::{
    ComputationBuilder, ComputedOptions, ComputedValue, EffectOptions, ReactiveEffect,
    ReactiveState, StateOptions,
};

/// Identifies a scheduler; sources record which one they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulerId(u64);

impl SchedulerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Counters describing one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Distinct nodes that ran.
    pub nodes: usize,
    /// Number of node runs, reruns included.
    pub runs: usize,
    /// Runs that failed without a fallback.
    pub failures: usize,
}

#[derive(Default)]
struct PendingQueue {
    /// Insertion-ordered so equal-depth nodes run first come, first served.
    pending: IndexMap<NodeId, Weak<dyn Runnable>>,
    batch_depth: usize,
    flushing: bool,
}

/// Coordinates dirty tracking, batching and depth-ordered execution.
pub struct Scheduler {
    id: SchedulerId,
    config: SchedulerConfig,
    owner: ThreadId,
    queue: Mutex<PendingQueue>,
    registry: DashMap<NodeId, Weak<dyn Runnable>>,
    boundary: RwLock<Arc<dyn ErrorBoundary>>,
    pending_notify: Notify,
}

impl Scheduler {
    /// Create a scheduler owned by the calling thread.
    pub fn new(config: SchedulerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create a scheduler with the default configuration.
    pub fn with_defaults() -> Arc<Self> {
        Self::build(SchedulerConfig::default())
    }

    /// Create a scheduler that only flushes when told to.
    pub fn manual() -> Arc<Self> {
        Self::build(SchedulerConfig::manual())
    }

    /// The presets above are valid by construction; anything else goes
    /// through [`Scheduler::new`].
    fn build(config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            id: SchedulerId::new(),
            config,
            owner: thread::current().id(),
            queue: Mutex::new(PendingQueue::default()),
            registry: DashMap::new(),
            boundary: RwLock::new(Arc::new(LogBoundary)),
            pending_notify: Notify::new(),
        })
    }

    pub fn id(&self) -> SchedulerId {
        self.id
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether the caller is on the thread allowed to run computations.
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub(crate) fn ensure_owner(&self, operation: &'static str) -> Result<()> {
        if self.is_owner_thread() {
            Ok(())
        } else {
            Err(ReactiveError::WrongThread { operation })
        }
    }

    /// Replace the error boundary that receives failed runs.
    pub fn set_error_boundary<B>(&self, boundary: B)
    where
        B: ErrorBoundary + 'static,
    {
        *self.boundary.write() = Arc::new(boundary);
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a state cell compared with `PartialEq`.
    pub fn create_state<T>(self: &Arc<Self>, initial: T) -> ReactiveState<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        ReactiveState::new(self, initial, StateOptions::new())
    }

    /// Create a state cell with a name and/or custom comparer.
    pub fn create_state_with<T>(self: &Arc<Self>, initial: T, options: StateOptions<T>) -> ReactiveState<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        ReactiveState::new(self, initial, options)
    }

    /// Create a computed value and run it once.
    pub fn create_computed<T, F>(self: &Arc<Self>, name: &str, body: F) -> Result<ComputedValue<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<T, BoxError> + Send + 'static,
    {
        ComputedValue::create(self, name, ComputedOptions::new(), None, body)
    }

    /// Create a computed value with static dependencies and/or a fallback.
    pub fn create_computed_with<T, F>(
        self: &Arc<Self>,
        name: &str,
        options: ComputedOptions<T>,
        body: F,
    ) -> Result<ComputedValue<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<T, BoxError> + Send + 'static,
    {
        ComputedValue::create(self, name, options, None, body)
    }

    /// Create an effect and run it once.
    pub fn create_effect<F>(self: &Arc<Self>, name: &str, body: F) -> Result<ReactiveEffect>
    where
        F: FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        ReactiveEffect::create(self, name, EffectOptions::new(), None, body)
    }

    /// Create an effect with static dependencies.
    pub fn create_effect_with<F>(
        self: &Arc<Self>,
        name: &str,
        options: EffectOptions,
        body: F,
    ) -> Result<ReactiveEffect>
    where
        F: FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        ReactiveEffect::create(self, name, options, None, body)
    }

    pub(crate) fn register(&self, node: &Arc<dyn Runnable>) {
        self.registry.insert(node.core().id(), Arc::downgrade(node));
    }

    /// Remove a node from the registry and the pending set.
    pub(crate) fn forget(&self, id: NodeId) {
        self.registry.remove(&id);
        self.queue.lock().pending.shift_remove(&id);
    }

    /// Run a freshly built node for the first time.
    ///
    /// The run is wrapped in a batch so writes made by the body are flushed
    /// after the node has finished constructing.
    pub(crate) fn run_initial(&self, node: &Arc<dyn Runnable>) -> Result<()> {
        self.execute_batch(|| {
            self.execute(node);
        })
    }

    // ------------------------------------------------------------------
    // Dirty tracking
    // ------------------------------------------------------------------

    /// Queue `node` if this is its transition into `Dirty`.
    pub(crate) fn enqueue(&self, node: &Arc<dyn Runnable>) -> bool {
        let core = node.core();
        if !core.try_mark_dirty() {
            return false;
        }
        self.queue
            .lock()
            .pending
            .insert(core.id(), Arc::downgrade(node));
        self.pending_notify.notify_one();
        trace!(node = core.name(), "marked dirty");
        true
    }

    /// Queue `node` and flush unless a batch or flush is in progress.
    pub(crate) fn mark_dirty(&self, node: &Arc<dyn Runnable>) -> Result<()> {
        self.enqueue(node);
        self.flush_if_idle()
    }

    /// Flush if nothing defers it. Called after every write.
    pub(crate) fn flush_if_idle(&self) -> Result<()> {
        {
            let queue = self.queue.lock();
            if queue.batch_depth > 0 || queue.flushing || queue.pending.is_empty() {
                return Ok(());
            }
        }
        if self.config.manual_flush || !self.is_owner_thread() {
            // The owner picks this up via `flush()`.
            return Ok(());
        }
        self.flush().map(|_| ())
    }

    /// Number of nodes waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// Current batch nesting level.
    pub fn batch_depth(&self) -> usize {
        self.queue.lock().batch_depth
    }

    pub fn is_batching(&self) -> bool {
        self.batch_depth() > 0
    }

    pub fn is_flushing(&self) -> bool {
        self.queue.lock().flushing
    }

    /// Resolve once at least one node is pending.
    ///
    /// Lets an owner-thread event loop react to writes made on other threads:
    ///
    /// ```rust,ignore
    /// loop {
    ///     scheduler.wait_for_pending().await;
    ///     scheduler.flush()?;
    /// }
    /// ```
    pub async fn wait_for_pending(&self) {
        loop {
            if self.pending_count() > 0 {
                return;
            }
            self.pending_notify.notified().await;
        }
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    /// Run `f` with flushing deferred; flush once when the outermost batch closes.
    ///
    /// Batches are owner-thread only: the depth counter is shared by the
    /// whole scheduler, so a batch held open elsewhere would stall the
    /// owner's automatic flushes. Other threads just write.
    pub fn execute_batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.ensure_owner("execute_batch")?;
        self.queue.lock().batch_depth += 1;
        let guard = BatchGuard(self);
        let result = f();
        drop(guard);
        self.flush_if_idle()?;
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Flushing
    // ------------------------------------------------------------------

    /// Run every pending node, shallowest first, until nothing is dirty.
    ///
    /// Calling this while a flush is already running (from inside a body)
    /// returns immediately; the running flush picks up the new work.
    pub fn flush(&self) -> Result<FlushReport> {
        self.ensure_owner("flush")?;
        {
            let mut queue = self.queue.lock();
            if queue.flushing {
                return Ok(FlushReport::default());
            }
            queue.flushing = true;
        }
        let _flushing = FlushGuard(self);

        let span = debug_span!("flush", scheduler = self.id.raw());
        let _entered = span.enter();

        let mut report = FlushReport::default();
        let mut ready: Vec<Arc<dyn Runnable>> = Vec::new();
        let mut runs_per_node: HashMap<NodeId, usize> = HashMap::new();
        loop {
            ready.extend(self.take_pending());
            let Some(node) = Self::pop_shallowest(&mut ready) else {
                break;
            };
            if node.core().state() != NodeState::Dirty {
                continue;
            }

            let runs = runs_per_node.entry(node.core().id()).or_insert(0);
            if *runs >= self.config.max_flush_iterations {
                let iterations = *runs;
                return Err(self.abandon_flush(node, ready, iterations));
            }
            *runs += 1;

            trace!(node = node.core().name(), depth = node.core().depth(), "running node");
            let outcome = self.execute(&node);
            if !matches!(outcome, RunOutcome::Skipped) {
                report.runs += 1;
            }
            if outcome.is_failure() {
                report.failures += 1;
            }
        }

        report.nodes = runs_per_node.len();
        debug!(nodes = report.nodes, runs = report.runs, failures = report.failures, "flush complete");
        Ok(report)
    }

    /// Move everything queued so far into the flush's working set.
    fn take_pending(&self) -> Vec<Arc<dyn Runnable>> {
        let drained: Vec<Weak<dyn Runnable>> = self
            .queue
            .lock()
            .pending
            .drain(..)
            .map(|(_, node)| node)
            .collect();
        drained.into_iter().filter_map(|node| node.upgrade()).collect()
    }

    /// Remove the shallowest node, earliest queued first among equals.
    ///
    /// Depths are refreshed on every pick since an upstream rerun may have
    /// rewired the edges below a waiting node.
    fn pop_shallowest(ready: &mut Vec<Arc<dyn Runnable>>) -> Option<Arc<dyn Runnable>> {
        let (_, position) = ready
            .iter()
            .enumerate()
            .map(|(position, node)| (node.core().refresh_depth(), position))
            .min()?;
        Some(ready.remove(position))
    }

    fn abandon_flush(
        &self,
        culprit: Arc<dyn Runnable>,
        waiting: Vec<Arc<dyn Runnable>>,
        iterations: usize,
    ) -> ReactiveError {
        let mut abandoned = vec![culprit];
        abandoned.extend(waiting);
        abandoned.extend(self.take_pending());

        let nodes: Vec<String> = abandoned
            .iter()
            .filter(|node| node.core().state() == NodeState::Dirty)
            .map(|node| node.core().name().to_string())
            .collect();
        for node in &abandoned {
            node.core().abandon();
        }

        error!(iterations, nodes = ?nodes, "dependency cycle suspected; abandoning flush");
        ReactiveError::CycleSuspected { iterations, nodes }
    }

    /// Run one node and route a failure to the error boundary.
    pub(crate) fn execute(&self, node: &Arc<dyn Runnable>) -> RunOutcome {
        let outcome = Arc::clone(node).run();
        match &outcome {
            RunOutcome::Recovered(err) => {
                debug!(node = node.core().name(), error = %err, "run failed; fallback applied");
            }
            RunOutcome::Failed(err) => self.report_failure(node, err),
            RunOutcome::Completed | RunOutcome::Skipped => {}
        }
        outcome
    }

    fn report_failure(&self, node: &Arc<dyn Runnable>, err: &BodyError) {
        let info = node.core().info();
        let boundary = Arc::clone(&*self.boundary.read());
        match boundary.on_error(&info, err) {
            ErrorAction::Ignore => {}
            ErrorAction::Retry if info.failures <= self.config.max_retries => {
                debug!(node = %info.name, attempt = info.failures, "retrying failed run");
                self.enqueue(node);
            }
            ErrorAction::Retry => {
                warn!(node = %info.name, failures = info.failures, "retry budget exhausted");
            }
            ErrorAction::Dispose => {
                debug!(node = %info.name, "error boundary disposed node");
                node.dispose();
            }
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics and teardown
    // ------------------------------------------------------------------

    fn live_nodes(&self) -> Vec<Arc<dyn Runnable>> {
        let weak: Vec<Weak<dyn Runnable>> = self
            .registry
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        weak.into_iter().filter_map(|node| node.upgrade()).collect()
    }

    /// Number of live computations.
    pub fn node_count(&self) -> usize {
        self.registry.len()
    }

    /// Describe every live computation.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<_> = self
            .live_nodes()
            .iter()
            .map(|node| node.core().snapshot())
            .collect();
        nodes.sort_by_key(|node| node.id);

        let queue = self.queue.lock();
        GraphSnapshot {
            scheduler: self.id.raw(),
            batch_depth: queue.batch_depth,
            pending: queue.pending.len(),
            nodes,
        }
    }

    /// Dispose every computation owned by this scheduler.
    pub fn dispose_all(&self) -> usize {
        let nodes = self.live_nodes();
        let count = nodes.len();
        for node in nodes {
            node.dispose();
        }
        debug!(scheduler = self.id.raw(), count, "disposed all nodes");
        count
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("Scheduler")
            .field("id", &self.id)
            .field("nodes", &self.registry.len())
            .field("pending", &queue.pending.len())
            .field("batch_depth", &queue.batch_depth)
            .field("flushing", &queue.flushing)
            .finish()
    }
}

struct BatchGuard<'a>(&'a Scheduler);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let mut queue = self.0.queue.lock();
        queue.batch_depth = queue.batch_depth.saturating_sub(1);
    }
}

struct FlushGuard<'a>(&'a Scheduler);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.queue.lock().flushing = false;
    }
}
