use crate::export::{CounterMap, GlobalStats};
use crate::registry::Node;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const MEASUREMENT_NODE: &str = "node";
pub const MEASUREMENT_GLOBAL: &str = "global";
pub const MEASUREMENT_MODEL: &str = "model";
pub const MEASUREMENT_FIRMWARE: &str = "firmware";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        FieldValue::Float(f64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// One timestamped measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub time: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            time,
        }
    }

    /// Adds a tag. Empty values are skipped since line protocol cannot carry them.
    pub fn tag(mut self, key: &str, value: impl AsRef<str>) -> Self {
        let value = value.as_ref();
        if !value.is_empty() {
            self.tags.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Renders the point in InfluxDB line protocol with nanosecond precision.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }
        for (index, (key, value)) in self.fields.iter().enumerate() {
            line.push(if index == 0 { ' ' } else { ',' });
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            match value {
                FieldValue::Float(value) => {
                    let _ = write!(line, "{value}");
                }
                FieldValue::Integer(value) => {
                    let _ = write!(line, "{value}i");
                }
                FieldValue::Boolean(value) => {
                    let _ = write!(line, "{value}");
                }
                FieldValue::Text(value) => {
                    let _ = write!(line, "\"{}\"", escape(value, &['"']));
                }
            }
        }
        let nanos = self
            .time
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.time.timestamp().saturating_mul(1_000_000_000));
        let _ = write!(line, " {nanos}");
        line
    }
}

/// Escapes backslashes and `special`. Line breaks become spaces since a point must stay on one
/// line.
fn escape(raw: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let ch = if matches!(ch, '\n' | '\r') { ' ' } else { ch };
        if ch == '\\' || special.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Points flushed to a backend as one write, in arrival order.
pub type Batch = Vec<Point>;

/// Per-node point. Nodes that have not reported statistics yet have nothing to record.
pub fn node_point(node_id: &str, node: &Node, time: DateTime<Utc>) -> Option<Point> {
    let stats = node.statistics.as_ref()?;
    let mut point = Point::new(MEASUREMENT_NODE, time)
        .tag("nodeid", node_id)
        .field("load", stats.load_average)
        .field("time.up", stats.uptime)
        .field("time.idle", stats.idletime)
        .field("clients.total", stats.clients.total)
        .field("clients.wifi", stats.clients.wifi)
        .field("clients.wifi24", stats.clients.wifi24)
        .field("clients.wifi5", stats.clients.wifi5)
        .field("memory.total", stats.memory.total)
        .field("memory.free", stats.memory.free)
        .field("memory.buffers", stats.memory.buffers)
        .field("memory.cached", stats.memory.cached);

    if let Some(processes) = stats.processes {
        point = point.field("proc.running", processes.running);
    }

    if let Some(info) = node.nodeinfo.as_ref() {
        point = point
            .tag("hostname", &info.hostname)
            .tag("model", &info.hardware.model)
            .tag("firmware_base", &info.software.firmware.base)
            .tag("firmware_release", &info.software.firmware.release);
        if let Some(owner) = info.owner.as_ref() {
            point = point.tag("owner", &owner.contact);
        }
        if let Some(wireless) = info.wireless {
            point = point
                .field("wireless.txpower24", wireless.txpower24)
                .field("wireless.txpower5", wireless.txpower5);
        }
    }

    let vpn = stats
        .mesh_vpn
        .as_ref()
        .map(|vpn| vpn.established_peers())
        .unwrap_or(0);
    let (batadv, lldp) = node
        .neighbours
        .as_ref()
        .map(|neighbours| (neighbours.batadv_count(), neighbours.lldp_count()))
        .unwrap_or((0, 0));
    point = point
        .field("neighbours.vpn", vpn)
        .field("neighbours.batadv", batadv)
        .field("neighbours.lldp", lldp)
        .field("neighbours.total", batadv + lldp);

    let traffic = [
        ("rx", stats.traffic.rx),
        ("tx", stats.traffic.tx),
        ("forward", stats.traffic.forward),
        ("mgmt_rx", stats.traffic.mgmt_rx),
        ("mgmt_tx", stats.traffic.mgmt_tx),
    ];
    for (direction, counter) in traffic {
        let Some(counter) = counter else {
            continue;
        };
        point = point
            .field(&format!("traffic.{direction}.bytes"), counter.bytes)
            .field(&format!("traffic.{direction}.packets"), counter.packets);
        if direction == "tx" {
            point = point.field("traffic.tx.dropped", counter.dropped);
        }
    }

    if let Some(wireless) = stats.wireless.as_ref() {
        for airtime in wireless.iter() {
            let band = airtime.band_suffix();
            point = point
                .tag(&format!("frequency{band}"), airtime.frequency.to_string())
                .field(&format!("airtime{band}.chan_util"), airtime.chan_util)
                .field(&format!("airtime{band}.rx_util"), airtime.rx_util)
                .field(&format!("airtime{band}.tx_util"), airtime.tx_util)
                .field(&format!("airtime{band}.noise"), airtime.noise)
                .field(&format!("airtime{band}.frequency"), airtime.frequency);
        }
    }

    Some(point)
}

pub fn global_point(stats: &GlobalStats, time: DateTime<Utc>) -> Point {
    Point::new(MEASUREMENT_GLOBAL, time)
        .field("nodes", stats.nodes)
        .field("gateways", stats.gateways)
        .field("clients.total", stats.clients)
        .field("clients.wifi", stats.clients_wifi)
        .field("clients.wifi24", stats.clients_wifi24)
        .field("clients.wifi5", stats.clients_wifi5)
}

/// One point per key: tag `value` carries the key, field `count` the occurrences.
pub fn counter_points(measurement: &str, counts: &CounterMap, time: DateTime<Utc>) -> Vec<Point> {
    counts
        .iter()
        .map(|(value, count)| {
            Point::new(measurement, time)
                .tag("value", value)
                .field("count", count)
        })
        .collect()
}
