//! Dependency Graph
//!
//! This module implements the computation graph and its scheduler.
//!
//! # Overview
//!
//! - Nodes are computations (computed values and effects). State cells are
//!   the leaves they read from.
//! - Edges are discovered while a computation runs and are rebuilt on every
//!   run, so the graph is dynamic.
//!
//! When a state cell changes, its subscribed computations are marked dirty
//! and handed to the [`Scheduler`], which runs them shallowest first.
//!
//! # Design Decisions
//!
//! 1. Edges live with the nodes (each dependency holds its subscription)
//!    rather than in a central adjacency map; dropping a node drops its
//!    edges.
//!
//! 2. Depth is recorded per node after each run and refreshed at flush time
//!    from the live edges, which is enough to order a flush without a full
//!    topological sort.
//!
//! 3. Node kinds share one [`NodeCore`](node::NodeCore); each kind only
//!    supplies its run behaviour.

mod boundary;
pub(crate) mod node;
mod scheduler;
mod snapshot;

pub use boundary::{ErrorAction, ErrorBoundary, LogBoundary, RetryBoundary};
pub use node::{DepthProbe, NodeId, NodeInfo, NodeKind, NodeState};
pub use scheduler::{FlushReport, Scheduler, SchedulerId};
pub use snapshot::{GraphSnapshot, NodeSnapshot};
