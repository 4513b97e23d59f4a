use crate::config::ConfigError;
use crate::data::{NodeInfo, Statistics, Traffic};
use crate::registry::{Flags, Node, RegistrySnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Container shape of the node-list export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeListVersion {
    /// Object keyed by node id.
    V1,
    /// Array of nodes.
    V2,
}

impl NodeListVersion {
    pub fn number(self) -> u8 {
        match self {
            NodeListVersion::V1 => 1,
            NodeListVersion::V2 => 2,
        }
    }
}

impl TryFrom<u64> for NodeListVersion {
    type Error = ConfigError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(NodeListVersion::V1),
            2 => Ok(NodeListVersion::V2),
            other => Err(ConfigError::UnknownNodesVersion(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub node_id: String,
    pub firstseen: DateTime<Utc>,
    pub lastseen: DateTime<Utc>,
    pub flags: Flags,
    pub statistics: StatisticsView,
    pub nodeinfo: Option<NodeInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsView {
    pub clients: u32,
    pub clients_wifi: u32,
    pub clients_wifi24: u32,
    pub clients_wifi5: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    pub uptime: f64,
    pub loadavg: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,
    pub rootfs_usage: f64,
    pub traffic: Traffic,
}

impl StatisticsView {
    fn project(statistics: &Statistics) -> Self {
        Self {
            clients: statistics.clients.total,
            clients_wifi: statistics.clients.wifi,
            clients_wifi24: statistics.clients.wifi24,
            clients_wifi5: statistics.clients.wifi5,
            gateway: Some(statistics.gateway.clone()).filter(|gw| !gw.is_empty()),
            uptime: statistics.uptime,
            loadavg: statistics.load_average,
            memory_usage: statistics.memory.usage(),
            rootfs_usage: statistics.rootfs_usage,
            traffic: statistics.traffic.clone(),
        }
    }
}

impl NodeView {
    /// Nodes that never sent statistics are not exported.
    fn project(node_id: &str, node: &Node) -> Option<Self> {
        let statistics = node.statistics.as_ref()?;
        Some(Self {
            node_id: node_id.to_string(),
            firstseen: node.firstseen,
            lastseen: node.lastseen,
            flags: node.flags,
            statistics: StatisticsView::project(statistics),
            nodeinfo: node.nodeinfo.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodesV1 {
    pub version: u8,
    pub timestamp: DateTime<Utc>,
    pub nodes: BTreeMap<String, NodeView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodesV2 {
    pub version: u8,
    pub timestamp: DateTime<Utc>,
    pub nodes: Vec<NodeView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeList {
    V1(NodesV1),
    V2(NodesV2),
}

fn projected(snapshot: &RegistrySnapshot) -> impl Iterator<Item = NodeView> + '_ {
    snapshot
        .iter()
        .filter_map(|(node_id, node)| NodeView::project(node_id, node))
}

pub fn nodes_v1(snapshot: &RegistrySnapshot, generated_at: DateTime<Utc>) -> NodesV1 {
    NodesV1 {
        version: NodeListVersion::V1.number(),
        timestamp: generated_at,
        nodes: projected(snapshot)
            .map(|view| (view.node_id.clone(), view))
            .collect(),
    }
}

pub fn nodes_v2(snapshot: &RegistrySnapshot, generated_at: DateTime<Utc>) -> NodesV2 {
    NodesV2 {
        version: NodeListVersion::V2.number(),
        timestamp: generated_at,
        nodes: projected(snapshot).collect(),
    }
}

pub fn node_list(
    snapshot: &RegistrySnapshot,
    version: NodeListVersion,
    generated_at: DateTime<Utc>,
) -> NodeList {
    match version {
        NodeListVersion::V1 => NodeList::V1(nodes_v1(snapshot, generated_at)),
        NodeListVersion::V2 => NodeList::V2(nodes_v2(snapshot, generated_at)),
    }
}
