//! Reactive Primitives
//!
//! This module implements the user-facing reactive system: state cells,
//! computed values, and effects, plus the plumbing that connects them.
//!
//! # Concepts
//!
//! ## State Cells
//!
//! A [`ReactiveState`] is a container for mutable state. Writes that the
//! cell's comparer considers equal are ignored; every other write notifies
//! the computations that tracked the cell.
//!
//! ## Computed Values
//!
//! A [`ComputedValue`] is a derived value that caches its result. It is
//! re-evaluated by the scheduler when one of its dependencies changes, and
//! notifies its own dependents only when the result actually differs.
//!
//! ## Effects
//!
//! A [`ReactiveEffect`] is a side-effecting computation that runs whenever
//! its dependencies change. Effects synchronize reactive state with
//! external systems.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered at run time. Each body receives a
//! [`ComputationBuilder`]; every source read through
//! [`ComputationBuilder::track`] becomes an edge for that run only, and the
//! edge set is rebuilt from scratch on the next run. A thread-local
//! [`TrackingContext`] stack records which computation is currently
//! running, which is how reentrant reads are detected.
//!
//! Edges are plain [`EventSource`] subscriptions owned by the dependent
//! node. Sources never hold their dependents strongly, so dropping the last
//! handle to a computation is enough to detach it from the graph.

mod builder;
mod computed;
mod context;
mod disposable;
mod effect;
mod runtime;
pub(crate) mod scope;
pub(crate) mod source;
mod state;
mod subscriber;
mod trackable;

pub use builder::ComputationBuilder;
pub use computed::{ComputedOptions, ComputedValue};
pub use context::TrackingContext;
pub use disposable::{Disposable, DisposeFn};
pub use effect::{EffectOptions, ReactiveEffect};
pub use runtime::{create_computed, create_effect, create_state, execute_batch, Runtime};
pub use source::{EventSource, Subscription};
pub use state::{Comparer, ReactiveState, StateOptions};
pub use subscriber::{Callback, Liveness, SubscriptionId, SubscriptionRegistry};
pub use trackable::{ChangeNotifier, Source, SourceInfo, Trackable};
