//! Reactive Runtime
//!
//! Every handle belongs to an explicit [`Scheduler`]. For applications that
//! only ever need one, the runtime keeps a process-wide default instance and
//! offers free functions that create nodes on it.
//!
//! # How It Works
//!
//! 1. [`Runtime::init`] installs a scheduler built from a configuration. If
//!    nothing was installed, the first call to [`Runtime::global`] (or to any
//!    free function) creates one with the default configuration.
//!
//! 2. The default scheduler's owner thread is whichever thread created it.
//!    Computations must be created, and flushes run, on that thread.
//!
//! 3. [`Runtime::teardown`] disposes every node of the default scheduler and
//!    uninstalls it, so the next use starts fresh.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::builder::ComputationBuilder;
use super::computed::ComputedValue;
use super::effect::ReactiveEffect;
use super::state::ReactiveState;
use crate::config::SchedulerConfig;
use crate::error::{BoxError, ReactiveError, Result};
use crate::graph::Scheduler;

static DEFAULT: RwLock<Option<Arc<Scheduler>>> = parking_lot::const_rwlock(None);

/// Access point for the process-wide default scheduler.
pub struct Runtime;

impl Runtime {
    /// Install a default scheduler owned by the calling thread.
    pub fn init(config: SchedulerConfig) -> Result<Arc<Scheduler>> {
        let mut slot = DEFAULT.write();
        if slot.is_some() {
            return Err(ReactiveError::AlreadyInitialized);
        }
        let scheduler = Scheduler::new(config)?;
        *slot = Some(Arc::clone(&scheduler));
        debug!(scheduler = scheduler.id().raw(), "default runtime initialized");
        Ok(scheduler)
    }

    /// The default scheduler, created on first use.
    pub fn global() -> Arc<Scheduler> {
        if let Some(scheduler) = Self::try_global() {
            return scheduler;
        }
        let mut slot = DEFAULT.write();
        let scheduler = slot.get_or_insert_with(Scheduler::with_defaults);
        Arc::clone(scheduler)
    }

    /// The default scheduler, if one is installed.
    pub fn try_global() -> Option<Arc<Scheduler>> {
        DEFAULT.read().clone()
    }

    /// Dispose every node of the default scheduler and uninstall it.
    ///
    /// Returns the number of nodes disposed.
    pub fn teardown() -> usize {
        let scheduler = DEFAULT.write().take();
        match scheduler {
            Some(scheduler) => {
                let count = scheduler.dispose_all();
                debug!(scheduler = scheduler.id().raw(), count, "default runtime torn down");
                count
            }
            None => 0,
        }
    }
}

/// Create a state cell on the default scheduler.
pub fn create_state<T>(initial: T) -> ReactiveState<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Runtime::global().create_state(initial)
}

/// Create a computed value on the default scheduler.
pub fn create_computed<T, F>(name: &str, body: F) -> Result<ComputedValue<T>>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<T, BoxError> + Send + 'static,
{
    Runtime::global().create_computed(name, body)
}

/// Create an effect on the default scheduler.
pub fn create_effect<F>(name: &str, body: F) -> Result<ReactiveEffect>
where
    F: FnMut(&mut ComputationBuilder<'_>) -> std::result::Result<(), BoxError> + Send + 'static,
{
    Runtime::global().create_effect(name, body)
}

/// Batch writes on the default scheduler.
pub fn execute_batch<R>(f: impl FnOnce() -> R) -> Result<R> {
    Runtime::global().execute_batch(f)
}
