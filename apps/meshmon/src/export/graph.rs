use crate::data::normalize_mac;
use crate::registry::RegistrySnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

/// Discovery protocol an edge was learned from.
///
/// When one node pair is reported by several protocols the edge from the protocol with the
/// higher [`LinkProtocol::priority`] wins: the routing metric from batman-adv over passive
/// LLDP discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkProtocol {
    Batadv,
    Lldp,
}

impl LinkProtocol {
    pub fn priority(self) -> u8 {
        match self {
            LinkProtocol::Batadv => 2,
            LinkProtocol::Lldp => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkProtocol::Batadv => "batadv",
            LinkProtocol::Lldp => "lldp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    #[serde(rename = "type")]
    pub protocol: LinkProtocol,
    pub source: String,
    pub target: String,
    pub source_tq: f32,
    pub target_tq: f32,
    pub source_mac: String,
    pub target_mac: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Graph {
    pub timestamp: DateTime<Utc>,
    pub nodes: Vec<String>,
    pub links: Vec<Link>,
}

impl Graph {
    pub fn link_between(&self, a: &str, b: &str) -> Option<&Link> {
        self.links.iter().find(|link| {
            (link.source == a && link.target == b) || (link.source == b && link.target == a)
        })
    }
}

/// One directed observation: `source` sees `target` with `metric`.
struct Candidate<'a> {
    protocol: LinkProtocol,
    source: &'a str,
    source_mac: String,
    target: String,
    target_mac: String,
    metric: f32,
}

struct Edge {
    protocol: LinkProtocol,
    source: String,
    target: String,
    source_mac: String,
    target_mac: String,
    source_metric: f32,
    target_metric: Option<f32>,
}

impl Edge {
    fn from_candidate(candidate: Candidate<'_>) -> Self {
        Self {
            protocol: candidate.protocol,
            source: candidate.source.to_string(),
            target: candidate.target,
            source_mac: candidate.source_mac,
            target_mac: candidate.target_mac,
            source_metric: candidate.metric,
            target_metric: None,
        }
    }

    /// Folds in another observation of the same pair from the same protocol.
    fn absorb(&mut self, candidate: Candidate<'_>) {
        if candidate.source == self.source {
            if candidate.metric > self.source_metric {
                self.source_metric = candidate.metric;
                self.source_mac = candidate.source_mac;
                self.target_mac = candidate.target_mac;
            }
            return;
        }
        if self.target_metric.map_or(true, |metric| candidate.metric > metric) {
            self.target_metric = Some(candidate.metric);
            self.target_mac = candidate.source_mac;
        }
    }

    fn into_link(self) -> Link {
        Link {
            protocol: self.protocol,
            source: self.source,
            target: self.target,
            source_tq: self.source_metric,
            target_tq: self.target_metric.unwrap_or(self.source_metric),
            source_mac: self.source_mac,
            target_mac: self.target_mac,
        }
    }
}

/// Link-layer address to owning node id, built from every address a node announces.
struct MacIndex(HashMap<String, String>);

impl MacIndex {
    fn from_snapshot(snapshot: &RegistrySnapshot) -> Self {
        let mut index = HashMap::new();
        for (node_id, node) in snapshot.iter() {
            if let Some(info) = node.nodeinfo.as_ref() {
                for mac in info.mac_addresses() {
                    index.insert(mac, node_id.to_string());
                }
            }
            if let Some(neighbours) = node.neighbours.as_ref() {
                let own = neighbours.batadv.keys().chain(neighbours.lldp.keys());
                for mac in own {
                    index.insert(normalize_mac(mac), node_id.to_string());
                }
            }
        }
        Self(index)
    }

    /// Owning node id, or the raw address for nodes outside the collected set.
    fn resolve(&self, mac: &str) -> String {
        let mac = normalize_mac(mac);
        self.0.get(&mac).cloned().unwrap_or(mac)
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn insert(edges: &mut BTreeMap<(String, String), Edge>, candidate: Candidate<'_>) {
    if candidate.source == candidate.target {
        return;
    }
    match edges.entry(pair_key(candidate.source, &candidate.target)) {
        Entry::Vacant(slot) => {
            slot.insert(Edge::from_candidate(candidate));
        }
        Entry::Occupied(mut slot) => {
            let edge = slot.get_mut();
            let incoming = candidate.protocol.priority();
            let existing = edge.protocol.priority();
            if incoming > existing {
                *edge = Edge::from_candidate(candidate);
            } else if incoming == existing {
                edge.absorb(candidate);
            }
        }
    }
}

/// Builds the deduplicated topology graph. Each unordered node pair yields at most one link.
pub fn build_graph(snapshot: &RegistrySnapshot, generated_at: DateTime<Utc>) -> Graph {
    let index = MacIndex::from_snapshot(snapshot);
    let mut edges: BTreeMap<(String, String), Edge> = BTreeMap::new();

    for (node_id, node) in snapshot.iter() {
        let Some(neighbours) = node.neighbours.as_ref() else {
            continue;
        };

        for (own_mac, interface) in &neighbours.batadv {
            for (neighbour_mac, link) in &interface.neighbours {
                insert(
                    &mut edges,
                    Candidate {
                        protocol: LinkProtocol::Batadv,
                        source: node_id,
                        source_mac: normalize_mac(own_mac),
                        target: index.resolve(neighbour_mac),
                        target_mac: normalize_mac(neighbour_mac),
                        metric: f32::from(link.tq) / 255.0,
                    },
                );
            }
        }

        for (own_mac, peers) in &neighbours.lldp {
            for neighbour_mac in peers.keys() {
                insert(
                    &mut edges,
                    Candidate {
                        protocol: LinkProtocol::Lldp,
                        source: node_id,
                        source_mac: normalize_mac(own_mac),
                        target: index.resolve(neighbour_mac),
                        target_mac: normalize_mac(neighbour_mac),
                        metric: 1.0,
                    },
                );
            }
        }
    }

    Graph {
        timestamp: generated_at,
        nodes: snapshot.nodes.keys().cloned().collect(),
        links: edges.into_values().map(Edge::into_link).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        BatadvNeighbours, BatmanLink, LldpLink, Neighbours, Network, NodeInfo, UpdateRecord,
    };
    use crate::registry::NodeRegistry;

    fn info(mac: &str) -> NodeInfo {
        NodeInfo {
            network: Network {
                mac: mac.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn batadv(own: &str, links: &[(&str, u8)]) -> BTreeMap<String, BatadvNeighbours> {
        let neighbours = links
            .iter()
            .map(|(mac, tq)| {
                (
                    mac.to_string(),
                    BatmanLink {
                        lastseen: 0.5,
                        tq: *tq,
                    },
                )
            })
            .collect();
        BTreeMap::from([(own.to_string(), BatadvNeighbours { neighbours })])
    }

    fn lldp(own: &str, peers: &[&str]) -> BTreeMap<String, BTreeMap<String, LldpLink>> {
        let peers = peers
            .iter()
            .map(|mac| (mac.to_string(), LldpLink::default()))
            .collect();
        BTreeMap::from([(own.to_string(), peers)])
    }

    async fn add(registry: &NodeRegistry, id: &str, mac: &str, neighbours: Neighbours) {
        registry
            .update(
                id,
                UpdateRecord::default()
                    .with_nodeinfo(info(mac))
                    .with_neighbours(neighbours),
            )
            .await;
    }

    #[tokio::test]
    async fn both_directions_merge_into_one_link() {
        let registry = NodeRegistry::new();
        add(
            &registry,
            "a",
            "aa:00:00:00:00:01",
            Neighbours {
                batadv: batadv("aa:00:00:00:00:01", &[("bb:00:00:00:00:01", 255)]),
                ..Default::default()
            },
        )
        .await;
        add(
            &registry,
            "b",
            "bb:00:00:00:00:01",
            Neighbours {
                batadv: batadv("bb:00:00:00:00:01", &[("aa:00:00:00:00:01", 51)]),
                ..Default::default()
            },
        )
        .await;

        let graph = build_graph(&registry.snapshot().await, Utc::now());
        assert_eq!(graph.nodes, vec!["a", "b"]);
        assert_eq!(graph.links.len(), 1);
        let link = &graph.links[0];
        assert_eq!((link.source.as_str(), link.target.as_str()), ("a", "b"));
        assert!((link.source_tq - 1.0).abs() < 1e-6);
        assert!((link.target_tq - 0.2).abs() < 1e-6);
        assert_eq!(link.source_mac, "aa:00:00:00:00:01");
        assert_eq!(link.target_mac, "bb:00:00:00:00:01");
    }

    #[tokio::test]
    async fn pair_seen_by_two_protocols_keeps_batadv() {
        let registry = NodeRegistry::new();
        add(
            &registry,
            "a",
            "aa:00:00:00:00:01",
            Neighbours {
                lldp: lldp("aa:00:00:00:00:01", &["bb:00:00:00:00:01"]),
                ..Default::default()
            },
        )
        .await;
        add(
            &registry,
            "b",
            "bb:00:00:00:00:01",
            Neighbours {
                batadv: batadv("bb:00:00:00:00:01", &[("aa:00:00:00:00:01", 128)]),
                ..Default::default()
            },
        )
        .await;

        let graph = build_graph(&registry.snapshot().await, Utc::now());
        assert_eq!(graph.links.len(), 1);
        let link = graph.link_between("a", "b").unwrap();
        assert_eq!(link.protocol, LinkProtocol::Batadv);
        assert_eq!(link.source, "b");
        assert!((link.source_tq - 128.0 / 255.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn lower_priority_report_does_not_replace_existing_link() {
        let registry = NodeRegistry::new();
        add(
            &registry,
            "a",
            "aa:00:00:00:00:01",
            Neighbours {
                batadv: batadv("aa:00:00:00:00:01", &[("bb:00:00:00:00:01", 200)]),
                ..Default::default()
            },
        )
        .await;
        add(
            &registry,
            "b",
            "bb:00:00:00:00:01",
            Neighbours {
                lldp: lldp("bb:00:00:00:00:01", &["aa:00:00:00:00:01"]),
                ..Default::default()
            },
        )
        .await;

        let graph = build_graph(&registry.snapshot().await, Utc::now());
        assert_eq!(graph.links.len(), 1);
        let link = &graph.links[0];
        assert_eq!(link.protocol, LinkProtocol::Batadv);
        assert_eq!(link.source, "a");
        assert_eq!(link.target_tq, link.source_tq);
    }

    #[tokio::test]
    async fn unknown_neighbour_is_kept_as_external_link() {
        let registry = NodeRegistry::new();
        add(
            &registry,
            "a",
            "aa:00:00:00:00:01",
            Neighbours {
                batadv: batadv("aa:00:00:00:00:01", &[("DE:AD:BE:EF:00:01", 100)]),
                ..Default::default()
            },
        )
        .await;

        let graph = build_graph(&registry.snapshot().await, Utc::now());
        assert_eq!(graph.nodes, vec!["a"]);
        assert_eq!(graph.links.len(), 1);
        assert_eq!(graph.links[0].target, "de:ad:be:ef:00:01");
    }

    #[tokio::test]
    async fn mesh_interface_addresses_resolve_to_owner() {
        let registry = NodeRegistry::new();
        let mut owner = info("bb:00:00:00:00:01");
        owner.network.mesh_interfaces = vec!["bb:00:00:00:00:99".to_string()];
        registry
            .update("b", UpdateRecord::default().with_nodeinfo(owner))
            .await;
        add(
            &registry,
            "a",
            "aa:00:00:00:00:01",
            Neighbours {
                batadv: batadv(
                    "aa:00:00:00:00:01",
                    &[("bb:00:00:00:00:01", 90), ("bb:00:00:00:00:99", 180)],
                ),
                ..Default::default()
            },
        )
        .await;

        let graph = build_graph(&registry.snapshot().await, Utc::now());
        assert_eq!(graph.links.len(), 1);
        let link = &graph.links[0];
        assert_eq!(link.target, "b");
        assert!((link.source_tq - 180.0 / 255.0).abs() < 1e-6);
        assert_eq!(link.target_mac, "bb:00:00:00:00:99");
    }

    #[test]
    fn link_serializes_protocol_as_type() {
        let link = Link {
            protocol: LinkProtocol::Lldp,
            source: "a".to_string(),
            target: "b".to_string(),
            source_tq: 1.0,
            target_tq: 1.0,
            source_mac: String::new(),
            target_mac: String::new(),
        };
        let value = serde_json::to_value(&link).unwrap();
        assert_eq!(value["type"], "lldp");
    }
}
