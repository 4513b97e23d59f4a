use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw adjacency as reported by a node, grouped per discovery protocol.
///
/// Outer map keys are the reporting node's own interface addresses, inner keys the
/// neighbour's link-layer address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Neighbours {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub batadv: BTreeMap<String, BatadvNeighbours>,
    #[serde(default)]
    pub lldp: BTreeMap<String, BTreeMap<String, LldpLink>>,
}

impl Neighbours {
    pub fn batadv_count(&self) -> usize {
        self.batadv.values().map(|iface| iface.neighbours.len()).sum()
    }

    pub fn lldp_count(&self) -> usize {
        self.lldp.values().map(BTreeMap::len).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatadvNeighbours {
    #[serde(default)]
    pub neighbours: BTreeMap<String, BatmanLink>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatmanLink {
    #[serde(default)]
    pub lastseen: f64,
    /// Transmit quality, 0..=255.
    #[serde(default)]
    pub tq: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LldpLink {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}
