mod node;
mod snapshot;


pub use node::{Flags, Node};
pub use snapshot::RegistrySnapshot;

use crate::data::UpdateRecord;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Used when no prune age is configured.
pub const DEFAULT_PRUNE_AFTER: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpireSummary {
    pub pruned: usize,
    pub marked_offline: usize,
}

/// Authoritative map of node id to last known state.
///
/// All mutation goes through [`NodeRegistry::update`] and [`NodeRegistry::expire`], each of
/// which holds the write lock for the whole merge and never performs I/O while holding it.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, Arc<Node>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        Self {
            nodes: RwLock::new(snapshot.nodes.into_iter().collect()),
        }
    }

    /// Warm restart from the state file. A missing or unreadable file yields an empty
    /// registry.
    pub fn load_or_empty(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::new();
        };
        if !path.exists() {
            tracing::info!(path = %path.display(), "no node state found; starting empty");
            return Self::new();
        }
        match RegistrySnapshot::load(path) {
            Ok(snapshot) => {
                tracing::info!(path = %path.display(), nodes = snapshot.len(), "loaded node state");
                Self::from_snapshot(snapshot)
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "failed to load node state; starting empty"
                );
                Self::new()
            }
        }
    }

    pub async fn update(&self, node_id: &str, record: UpdateRecord) -> Arc<Node> {
        self.update_at(node_id, record, Utc::now()).await
    }

    /// Merges `record` into the node, creating it on first sight.
    pub async fn update_at(
        &self,
        node_id: &str,
        record: UpdateRecord,
        now: DateTime<Utc>,
    ) -> Arc<Node> {
        let mut nodes = self.nodes.write().await;
        let entry = nodes
            .entry(node_id.to_string())
            .or_insert_with(|| Arc::new(Node::new(now)));
        Arc::make_mut(entry).merge(record, now);
        entry.clone()
    }

    /// Removes nodes not seen within `prune_after` and marks nodes not seen within
    /// `offline_after` as offline. A zero `prune_after` falls back to
    /// [`DEFAULT_PRUNE_AFTER`].
    pub async fn expire(
        &self,
        now: DateTime<Utc>,
        offline_after: Duration,
        prune_after: Duration,
    ) -> ExpireSummary {
        let prune_after = if prune_after.is_zero() {
            DEFAULT_PRUNE_AFTER
        } else {
            prune_after
        };
        let prune_before = cutoff(now, prune_after);
        let offline_before = cutoff(now, offline_after);

        let mut summary = ExpireSummary::default();
        let mut nodes = self.nodes.write().await;
        nodes.retain(|_, node| {
            if prune_before.is_some_and(|before| node.lastseen < before) {
                summary.pruned += 1;
                return false;
            }
            if node.flags.online && offline_before.is_some_and(|before| node.lastseen < before) {
                Arc::make_mut(node).flags.online = false;
                summary.marked_offline += 1;
            }
            true
        });
        summary
    }

    pub async fn get(&self, node_id: &str) -> Option<Arc<Node>> {
        self.nodes.read().await.get(node_id).cloned()
    }

    /// Nodes matching `predicate`, ordered by id.
    pub async fn select<F>(&self, predicate: F) -> Vec<(String, Arc<Node>)>
    where
        F: Fn(&Node) -> bool,
    {
        let nodes = self.nodes.read().await;
        let mut selected: Vec<(String, Arc<Node>)> = nodes
            .iter()
            .filter(|(_, node)| predicate(node))
            .map(|(node_id, node)| (node_id.clone(), node.clone()))
            .collect();
        selected.sort_by(|a, b| a.0.cmp(&b.0));
        selected
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let nodes = self.nodes.read().await;
        RegistrySnapshot {
            nodes: nodes
                .iter()
                .map(|(node_id, node)| (node_id.clone(), node.clone()))
                .collect(),
        }
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> Option<DateTime<Utc>> {
    ChronoDuration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
}
