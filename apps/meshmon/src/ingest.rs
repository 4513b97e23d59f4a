//! Collector-facing entry point: merges announcements into the registry and forwards
//! per-node points to the time-series sink.

use crate::data::{Neighbours, NodeInfo, Statistics, UpdateRecord};
use crate::registry::{Node, NodeRegistry};
use crate::shutdown::shutdown_requested;
use crate::sink::PointSender;
use anyhow::Result;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct NodeIngest {
    registry: Arc<NodeRegistry>,
    sink: Option<PointSender>,
}

impl NodeIngest {
    pub fn new(registry: Arc<NodeRegistry>, sink: Option<PointSender>) -> Self {
        Self { registry, sink }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Applies one record. A record carrying statistics also yields a node point.
    pub async fn apply(&self, node_id: &str, record: UpdateRecord) -> Arc<Node> {
        let has_statistics = record.statistics.is_some();
        let node = self.registry.update(node_id, record).await;
        if has_statistics {
            if let Some(sink) = self.sink.as_ref() {
                if let Err(err) = sink.add_node(node_id, &node).await {
                    tracing::warn!(node_id, error = %err, "failed to queue node point");
                }
            }
        }
        node
    }
}

#[derive(Debug, Deserialize)]
struct Announcement {
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    address: Option<IpAddr>,
    #[serde(default)]
    statistics: Option<Statistics>,
    #[serde(default)]
    nodeinfo: Option<NodeInfo>,
    #[serde(default)]
    neighbours: Option<Neighbours>,
}

impl Announcement {
    /// Explicit id first, then whichever group names the node.
    fn node_id(&self) -> Option<String> {
        let embedded = [
            self.nodeinfo.as_ref().map(|info| info.node_id.as_str()),
            self.statistics.as_ref().map(|stats| stats.node_id.as_str()),
            self.neighbours.as_ref().map(|n| n.node_id.as_str()),
        ];
        self.node_id
            .as_deref()
            .into_iter()
            .chain(embedded.into_iter().flatten())
            .map(str::trim)
            .find(|id| !id.is_empty())
            .map(str::to_string)
    }
}

/// Parses one JSON announcement. Returns `None` when no node id can be found.
pub fn parse_announcement(payload: &mut [u8]) -> Result<Option<(String, UpdateRecord)>> {
    let announcement: Announcement = simd_json::serde::from_slice(payload)?;
    let Some(node_id) = announcement.node_id() else {
        return Ok(None);
    };
    let record = UpdateRecord {
        address: announcement.address,
        statistics: announcement.statistics,
        nodeinfo: announcement.nodeinfo,
        neighbours: announcement.neighbours,
    };
    Ok(Some((node_id, record)))
}

/// Feeds newline-delimited announcements from `reader` until EOF or shutdown.
pub fn spawn_line_feed<R>(
    reader: R,
    ingest: NodeIngest,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        let mut applied: u64 = 0;
        loop {
            let line = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "announcement feed read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let mut bytes = line.into_bytes();
            match parse_announcement(&mut bytes) {
                Ok(Some((node_id, record))) => {
                    ingest.apply(&node_id, record).await;
                    applied += 1;
                }
                Ok(None) => tracing::debug!("announcement without node id skipped"),
                Err(err) => tracing::warn!(error = %err, "invalid announcement skipped"),
            }
        }
        tracing::info!(applied, "announcement feed stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use crate::sink::{LogFileBackend, TimeSeriesWriter, WriterOptions};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn id_falls_back_to_embedded_groups() {
        let mut payload = br#"{"nodeinfo": {"node_id": "c0ffee", "hostname": "alpha"}}"#.to_vec();
        let (node_id, record) = parse_announcement(&mut payload).unwrap().unwrap();
        assert_eq!(node_id, "c0ffee");
        assert_eq!(record.nodeinfo.unwrap().hostname, "alpha");
        assert!(record.statistics.is_none());

        let mut anonymous = br#"{"statistics": {"uptime": 3.0}}"#.to_vec();
        assert!(parse_announcement(&mut anonymous).unwrap().is_none());

        let mut broken = b"{not json".to_vec();
        assert!(parse_announcement(&mut broken).is_err());
    }

    #[tokio::test]
    async fn statistics_are_forwarded_to_sink() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("points.log");
        let backend = Arc::new(LogFileBackend::open(&log_path).await.unwrap());
        let writer = TimeSeriesWriter::spawn(
            backend,
            WriterOptions {
                delete_interval: Duration::ZERO,
                ..WriterOptions::default()
            },
        );
        let ingest = NodeIngest::new(Arc::new(NodeRegistry::new()), Some(writer.sender()));

        ingest
            .apply("a", UpdateRecord::default().with_nodeinfo(NodeInfo::default()))
            .await;
        ingest
            .apply("b", UpdateRecord::default().with_statistics(Statistics::default()))
            .await;
        drop(ingest);
        writer.close().await.unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains(" node [nodeid=b] "));
    }

    #[tokio::test]
    async fn line_feed_applies_until_eof() {
        let registry = Arc::new(NodeRegistry::new());
        let ingest = NodeIngest::new(registry.clone(), None);
        let input = concat!(
            r#"{"node_id": "a", "statistics": {"clients": {"total": 4}}}"#,
            "\n\n",
            "garbage\n",
            r#"{"node_id": "b", "nodeinfo": {"vpn": true}}"#,
            "\n",
        );
        let (_tx, rx) = shutdown::channel();
        spawn_line_feed(input.as_bytes(), ingest, rx).await.unwrap();

        assert_eq!(registry.len().await, 2);
        let a = registry.get("a").await.unwrap();
        assert_eq!(a.statistics.as_ref().unwrap().clients.total, 4);
        assert!(registry.get("b").await.unwrap().flags.gateway);
    }
}
