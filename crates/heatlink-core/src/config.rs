//! Link configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::DEFAULT_BAUD_RATE;

/// Serial parity selection. The controller speaks 8E1; some hardware
/// revisions run with no parity instead, and the setting must match the
/// connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// Even parity (default).
    Even,
    /// No parity.
    None,
}

/// Configuration for one heat pump link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial port name, or `tcp://host:port` for a serial bridge.
    pub port_name: String,
    /// Serial line speed.
    pub baud_rate: u32,
    /// Serial parity.
    pub parity: Parity,
    /// Mirror every frame to the debug log.
    pub dump_packets: bool,
    /// Cadence of the periodic status refresh while connected.
    pub refresh_interval: Duration,
    /// Cadence of connect retries while disconnected.
    pub reconnect_interval: Duration,
    /// Receive silence after which a connected link is declared lost.
    pub silence_timeout: Duration,
}

impl LinkConfig {
    /// Default configuration for the given port.
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::Even,
            dump_packets: false,
            refresh_interval: Duration::from_secs(60),
            reconnect_interval: Duration::from_secs(10),
            silence_timeout: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_controller_line() {
        let config = LinkConfig::default();
        assert_eq!(config.baud_rate, 2400);
        assert_eq!(config.parity, Parity::Even);
        assert!(!config.dump_packets);
    }

    #[test]
    fn config_survives_serde() {
        let config = LinkConfig::for_port("/dev/ttyUSB0");
        let json = serde_json::to_string(&config).unwrap();
        let back: LinkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port_name, "/dev/ttyUSB0");
        assert_eq!(back.refresh_interval, config.refresh_interval);
    }
}
