use crate::data::{Neighbours, NodeInfo, Statistics, UpdateRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Online/gateway status bits derived from the announcements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub online: bool,
    pub gateway: bool,
}

/// Last known state of one mesh participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub address: Option<IpAddr>,
    pub firstseen: DateTime<Utc>,
    pub lastseen: DateTime<Utc>,
    #[serde(default)]
    pub flags: Flags,
    #[serde(default)]
    pub statistics: Option<Statistics>,
    #[serde(default)]
    pub nodeinfo: Option<NodeInfo>,
    #[serde(default)]
    pub neighbours: Option<Neighbours>,
}

impl Node {
    pub(super) fn new(now: DateTime<Utc>) -> Self {
        Self {
            address: None,
            firstseen: now,
            lastseen: now,
            flags: Flags::default(),
            statistics: None,
            nodeinfo: None,
            neighbours: None,
        }
    }

    /// Applies one record. Each group present in the record replaces the stored one.
    pub(super) fn merge(&mut self, record: UpdateRecord, now: DateTime<Utc>) {
        if now > self.lastseen {
            self.lastseen = now;
        }
        self.flags.online = true;

        if let Some(address) = record.address {
            self.address = Some(address);
        }

        if let Some(neighbours) = record.neighbours {
            self.neighbours = Some(neighbours);
        }

        if let Some(nodeinfo) = record.nodeinfo {
            self.flags.gateway = nodeinfo.vpn;
            self.nodeinfo = Some(nodeinfo);
        }

        if let Some(mut statistics) = record.statistics {
            let previous = self
                .statistics
                .as_ref()
                .and_then(|stats| stats.wireless.as_ref());
            if let (Some(previous), Some(current)) = (previous, statistics.wireless.as_mut()) {
                current.set_utilization(previous);
            }
            self.statistics = Some(statistics);
        }
    }

    pub fn hostname(&self) -> Option<&str> {
        self.nodeinfo
            .as_ref()
            .map(|info| info.hostname.as_str())
            .filter(|name| !name.is_empty())
    }
}
