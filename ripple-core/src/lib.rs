//! Ripple Core
//!
//! This crate provides a dependency-tracking reactive computation engine.
//! It implements:
//!
//! - Reactive primitives (state cells, computed values, effects)
//! - Automatic, per-run dependency discovery
//! - A batched scheduler that runs dirty computations in depth order
//! - Error boundaries, diagnostics snapshots and a default runtime
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Reactive primitives, event sources and dependency tracking
//! - `graph`: Computation nodes, the scheduler and error boundaries
//! - `config`: Scheduler configuration
//! - `error`: Error types shared by every module
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::Scheduler;
//!
//! let scheduler = Scheduler::with_defaults();
//!
//! // Create a state cell
//! let count = scheduler.create_state(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = scheduler.create_computed("doubled", move |cx| Ok(cx.track(&c)? * 2))?;
//!
//! // Create an effect
//! let (c, d) = (count.clone(), doubled.clone());
//! let _log = scheduler.create_effect("log", move |cx| {
//!     println!("Count: {}, Doubled: {}", cx.track(&c)?, cx.track(&d)?);
//!     Ok(())
//! })?;
//!
//! // Update the state cell
//! count.set(5)?;
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::SchedulerConfig;
pub use error::{BodyError, BoxError, ReactiveError, Result};
pub use graph::{ErrorAction, ErrorBoundary, FlushReport, GraphSnapshot, NodeState, Scheduler};
pub use reactive::{
    ComputationBuilder, ComputedOptions, ComputedValue, EffectOptions, ReactiveEffect,
    ReactiveState, Runtime, StateOptions,
};
