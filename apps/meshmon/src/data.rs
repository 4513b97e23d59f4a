mod neighbours;
mod nodeinfo;
mod statistics;
mod wireless;

pub use neighbours::{BatadvNeighbours, BatmanLink, LldpLink, Neighbours};
pub use nodeinfo::{
    Autoupdater, BatInterface, Firmware, Hardware, Location, MeshInterfaces, Network, NodeInfo,
    Owner, Software, System, WirelessSettings,
};
pub use statistics::{
    Clients, Memory, MeshVpn, MeshVpnPeerGroup, MeshVpnPeerLink, Processes, Statistics, Traffic,
    TrafficCounter,
};
pub use wireless::{WirelessAirtime, WirelessStatistics};

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A partial announcement for one node as handed over by the collector.
///
/// Every group is optional; a group that is `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    #[serde(default)]
    pub address: Option<IpAddr>,
    #[serde(default)]
    pub statistics: Option<Statistics>,
    #[serde(default)]
    pub nodeinfo: Option<NodeInfo>,
    #[serde(default)]
    pub neighbours: Option<Neighbours>,
}

impl UpdateRecord {
    pub fn with_statistics(mut self, statistics: Statistics) -> Self {
        self.statistics = Some(statistics);
        self
    }

    pub fn with_nodeinfo(mut self, nodeinfo: NodeInfo) -> Self {
        self.nodeinfo = Some(nodeinfo);
        self
    }

    pub fn with_neighbours(mut self, neighbours: Neighbours) -> Self {
        self.neighbours = Some(neighbours);
        self
    }
}

pub(crate) fn normalize_mac(mac: &str) -> String {
    mac.trim().to_ascii_lowercase()
}
