use super::normalize_mac;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mostly static description of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub system: System,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub software: Software,
    #[serde(default)]
    pub hardware: Hardware,
    #[serde(default)]
    pub vpn: bool,
    #[serde(default)]
    pub wireless: Option<WirelessSettings>,
}

impl NodeInfo {
    /// Every link-layer address this node announces for itself, lowercased.
    pub fn mac_addresses(&self) -> Vec<String> {
        let mut macs = Vec::new();
        if !self.network.mac.trim().is_empty() {
            macs.push(normalize_mac(&self.network.mac));
        }
        for interface in self.network.mesh.values() {
            macs.extend(interface.interfaces.all().map(normalize_mac));
        }
        macs.extend(self.network.mesh_interfaces.iter().map(|mac| normalize_mac(mac)));
        macs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub mesh: BTreeMap<String, BatInterface>,
    #[serde(default)]
    pub mesh_interfaces: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatInterface {
    #[serde(default)]
    pub interfaces: MeshInterfaces,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshInterfaces {
    #[serde(default)]
    pub wireless: Vec<String>,
    #[serde(default)]
    pub other: Vec<String>,
    #[serde(default)]
    pub tunnel: Vec<String>,
}

impl MeshInterfaces {
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.wireless
            .iter()
            .chain(self.other.iter())
            .chain(self.tunnel.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub contact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub site_code: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Software {
    #[serde(default)]
    pub autoupdater: Autoupdater,
    #[serde(default)]
    pub firmware: Firmware,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autoupdater {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Firmware {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hardware {
    #[serde(default)]
    pub nproc: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirelessSettings {
    #[serde(default)]
    pub txpower24: u32,
    #[serde(default)]
    pub txpower5: u32,
    #[serde(default)]
    pub channel24: u32,
    #[serde(default)]
    pub channel5: u32,
}
