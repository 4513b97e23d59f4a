use super::wireless::WirelessStatistics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Latest telemetry sample reported by a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub clients: Clients,
    #[serde(default)]
    pub rootfs_usage: f64,
    #[serde(default, rename = "loadavg")]
    pub load_average: f64,
    #[serde(default)]
    pub memory: Memory,
    #[serde(default)]
    pub uptime: f64,
    #[serde(default)]
    pub idletime: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway_nexthop: String,
    #[serde(default)]
    pub processes: Option<Processes>,
    #[serde(default)]
    pub traffic: Traffic,
    #[serde(default)]
    pub mesh_vpn: Option<MeshVpn>,
    #[serde(default)]
    pub wireless: Option<WirelessStatistics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clients {
    #[serde(default)]
    pub wifi: u32,
    #[serde(default)]
    pub wifi24: u32,
    #[serde(default)]
    pub wifi5: u32,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub free: u64,
    #[serde(default)]
    pub buffers: u64,
    #[serde(default)]
    pub cached: u64,
}

impl Memory {
    /// Used memory as a fraction of total, where 1.0 means fully used.
    pub fn usage(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let available = self.free as f64 + self.buffers as f64 + self.cached as f64;
        Some(1.0 - available / self.total as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Processes {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub running: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Traffic {
    #[serde(default)]
    pub rx: Option<TrafficCounter>,
    #[serde(default)]
    pub tx: Option<TrafficCounter>,
    #[serde(default)]
    pub forward: Option<TrafficCounter>,
    #[serde(default)]
    pub mgmt_rx: Option<TrafficCounter>,
    #[serde(default)]
    pub mgmt_tx: Option<TrafficCounter>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounter {
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub packets: u64,
    #[serde(default)]
    pub dropped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshVpn {
    #[serde(default)]
    pub groups: BTreeMap<String, MeshVpnPeerGroup>,
}

impl MeshVpn {
    /// Peers with an established tunnel.
    pub fn established_peers(&self) -> usize {
        self.groups
            .values()
            .flat_map(|group| group.peers.values())
            .filter(|link| link.as_ref().is_some_and(|link| link.established > 1.0))
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshVpnPeerGroup {
    #[serde(default)]
    pub peers: BTreeMap<String, Option<MeshVpnPeerLink>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshVpnPeerLink {
    #[serde(default)]
    pub established: f64,
}
