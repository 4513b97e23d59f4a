use crate::registry::RegistrySnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Frequency table: value string to number of occurrences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterMap(BTreeMap<String, u32>);

impl CounterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `key` once. Blank keys are not counted.
    pub fn increment(&mut self, key: &str) {
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        *self.0.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, key: &str) -> u32 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(key, count)| (key.as_str(), *count))
    }
}

/// Aggregate over all online nodes, recomputed every export cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub nodes: u32,
    pub gateways: u32,
    pub clients: u32,
    pub clients_wifi: u32,
    pub clients_wifi24: u32,
    pub clients_wifi5: u32,
    pub models: CounterMap,
    pub firmwares: CounterMap,
}

impl GlobalStats {
    pub fn from_snapshot(snapshot: &RegistrySnapshot) -> Self {
        let mut stats = Self::default();
        for (_, node) in snapshot.iter().filter(|(_, node)| node.flags.online) {
            stats.nodes += 1;
            if node.flags.gateway {
                stats.gateways += 1;
            }
            if let Some(statistics) = node.statistics.as_ref() {
                let clients = &statistics.clients;
                stats.clients += clients.total;
                stats.clients_wifi += clients.wifi;
                stats.clients_wifi24 += clients.wifi24;
                stats.clients_wifi5 += clients.wifi5;
            }
            if let Some(info) = node.nodeinfo.as_ref() {
                stats.models.increment(&info.hardware.model);
                stats.firmwares.increment(&info.software.firmware.release);
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Clients, Hardware, NodeInfo, Statistics, UpdateRecord};
    use crate::registry::NodeRegistry;
    use chrono::Utc;
    use std::time::Duration;

    fn model_info(model: &str, vpn: bool) -> NodeInfo {
        NodeInfo {
            vpn,
            hardware: Hardware {
                model: model.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn clients(total: u32) -> Statistics {
        Statistics {
            clients: Clients {
                total,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn sample_registry() -> NodeRegistry {
        let registry = NodeRegistry::new();
        let mut first = model_info("TP-Link 841", false);
        first.software.firmware.release = "2016.1.6+entenhausen1".to_string();
        registry
            .update(
                "abcdef012345",
                UpdateRecord::default()
                    .with_statistics(clients(23))
                    .with_nodeinfo(first),
            )
            .await;
        registry
            .update(
                "112233445566",
                UpdateRecord::default()
                    .with_statistics(clients(2))
                    .with_nodeinfo(model_info("TP-Link 841", false)),
            )
            .await;
        registry
            .update(
                "0xdeadbeef0x",
                UpdateRecord::default().with_nodeinfo(model_info("Xeon Multi-Core", true)),
            )
            .await;
        registry
    }

    #[tokio::test]
    async fn aggregates_online_nodes() {
        let registry = sample_registry().await;
        let stats = GlobalStats::from_snapshot(&registry.snapshot().await);

        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.gateways, 1);
        assert_eq!(stats.clients, 25);
        assert_eq!(stats.models.get("TP-Link 841"), 2);
        assert_eq!(stats.models.get("Xeon Multi-Core"), 1);
        assert_eq!(stats.firmwares.len(), 1);
        assert_eq!(stats.firmwares.get("2016.1.6+entenhausen1"), 1);
    }

    #[tokio::test]
    async fn offline_nodes_are_not_counted() {
        let registry = sample_registry().await;
        let later = Utc::now() + chrono::Duration::hours(1);
        registry
            .expire(later, Duration::from_secs(60), Duration::from_secs(86_400))
            .await;
        registry
            .update_at("fresh", UpdateRecord::default().with_statistics(clients(4)), later)
            .await;

        let stats = GlobalStats::from_snapshot(&registry.snapshot().await);
        assert_eq!(stats.nodes, 1);
        assert_eq!(stats.clients, 4);
        assert!(stats.models.is_empty());
    }
}
