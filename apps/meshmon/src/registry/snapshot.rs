use super::node::Node;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Point-in-time copy of the registry. Nodes are shared with the live map until the next
/// write to the same id, so taking a snapshot never copies node contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub nodes: BTreeMap<String, Arc<Node>>,
}

impl RegistrySnapshot {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id).map(Arc::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes
            .iter()
            .map(|(node_id, node)| (node_id.as_str(), node.as_ref()))
    }

    /// Reads a snapshot written by the persistence worker.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("read node state {}", path.display()))?;
        let snapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("parse node state {}", path.display()))?;
        Ok(snapshot)
    }
}
