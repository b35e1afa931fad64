//! Serializable view of a scheduler's graph, for diagnostics and tooling.

use serde::Serialize;

use super::node::{NodeKind, NodeState};
use crate::error::Result;

/// One computation as seen at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub id: u64,
    pub name: String,
    pub kind: NodeKind,
    pub state: NodeState,
    pub depth: usize,
    pub dependencies: usize,
    pub runs: u64,
    pub failures: u32,
}

/// Every live computation of one scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    pub scheduler: u64,
    pub batch_depth: usize,
    pub pending: usize,
    pub nodes: Vec<NodeSnapshot>,
}

impl GraphSnapshot {
    /// Find a node by name.
    pub fn node(&self, name: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
