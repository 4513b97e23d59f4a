use serde::{Deserialize, Serialize};

/// Airtime counters of one radio channel.
///
/// `active`, `busy`, `rx` and `tx` are cumulative counters as reported by the node. The
/// utilization fields are derived from two consecutive samples, see
/// [`WirelessAirtime::set_utilization`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WirelessAirtime {
    #[serde(default)]
    pub chan_util: f32,
    #[serde(default)]
    pub rx_util: f32,
    #[serde(default)]
    pub tx_util: f32,
    #[serde(default, rename = "active")]
    pub active_time: u64,
    #[serde(default, rename = "busy")]
    pub busy_time: u64,
    #[serde(default, rename = "rx")]
    pub rx_time: u64,
    #[serde(default, rename = "tx")]
    pub tx_time: u64,
    #[serde(default)]
    pub noise: i32,
    #[serde(default)]
    pub frequency: u32,
}

impl WirelessAirtime {
    /// Band suffix used in measurement field names: `24` for 2.4 GHz, `5` otherwise.
    pub fn band_suffix(&self) -> &'static str {
        if self.frequency < 5000 {
            "24"
        } else {
            "5"
        }
    }

    /// Derives the utilization percentages from the delta against the previous sample of
    /// the same channel. A counter reset or an idle interval leaves the fields untouched.
    pub fn set_utilization(&mut self, prev: &WirelessAirtime) {
        if prev.frequency != self.frequency {
            return;
        }
        let (Some(active), Some(busy), Some(rx), Some(tx)) = (
            self.active_time.checked_sub(prev.active_time),
            self.busy_time.checked_sub(prev.busy_time),
            self.rx_time.checked_sub(prev.rx_time),
            self.tx_time.checked_sub(prev.tx_time),
        ) else {
            return;
        };
        if active == 0 {
            return;
        }
        let active = active as f64;
        self.chan_util = (busy as f64 / active * 100.0) as f32;
        self.rx_util = (rx as f64 / active * 100.0) as f32;
        self.tx_util = (tx as f64 / active * 100.0) as f32;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WirelessStatistics(pub Vec<WirelessAirtime>);

impl WirelessStatistics {
    pub fn iter(&self) -> impl Iterator<Item = &WirelessAirtime> {
        self.0.iter()
    }

    /// Pairs every channel with the previous sample on the same frequency.
    pub fn set_utilization(&mut self, prev: &WirelessStatistics) {
        for airtime in &mut self.0 {
            if let Some(previous) = prev.0.iter().find(|p| p.frequency == airtime.frequency) {
                airtime.set_utilization(previous);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(frequency: u32, active: u64, busy: u64, rx: u64, tx: u64) -> WirelessAirtime {
        WirelessAirtime {
            active_time: active,
            busy_time: busy,
            rx_time: rx,
            tx_time: tx,
            frequency,
            ..Default::default()
        }
    }

    #[test]
    fn utilization_uses_counter_deltas() {
        let prev = sample(2412, 1000, 400, 100, 50);
        let mut cur = sample(2412, 2000, 900, 300, 150);
        cur.set_utilization(&prev);
        assert!((cur.chan_util - 50.0).abs() < 1e-4);
        assert!((cur.rx_util - 20.0).abs() < 1e-4);
        assert!((cur.tx_util - 10.0).abs() < 1e-4);
    }

    #[test]
    fn counter_reset_leaves_utilization_unset() {
        let prev = sample(5180, 5000, 2000, 10, 10);
        let mut cur = sample(5180, 100, 50, 5, 5);
        cur.set_utilization(&prev);
        assert_eq!(cur.chan_util, 0.0);
        assert_eq!(cur.rx_util, 0.0);
    }

    #[test]
    fn channels_are_matched_by_frequency() {
        let prev = WirelessStatistics(vec![sample(5180, 0, 0, 0, 0), sample(2412, 100, 0, 0, 0)]);
        let mut cur = WirelessStatistics(vec![sample(2412, 200, 25, 0, 0)]);
        cur.set_utilization(&prev);
        assert!((cur.0[0].chan_util - 25.0).abs() < 1e-4);
        assert_eq!(cur.0[0].band_suffix(), "24");
    }
}
