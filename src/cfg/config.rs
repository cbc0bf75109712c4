// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// How to reach the bus: a local serial port, or a ser2net-style TCP
    /// relay (§4.8). Exactly one must be set.
    pub gateway: GatewayConfig,
    /// Fault-log retrieval limits (§4.3).
    pub fault_log: FaultLogConfig,
    /// Toggles for the passive discovery state machine (§4.6).
    pub discovery: DiscoveryConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct GatewayConfig {
    #[serde(default, rename = "SerialPort")]
    pub serial_port: Option<String>,
    #[serde(default, rename = "TcpBridgeAddr")]
    pub tcp_bridge_addr: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FaultLogConfig {
    #[serde(rename = "Limit")]
    pub limit: usize,
    #[serde(rename = "TimeoutSecs", with = "serde_secs")]
    pub timeout: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true", rename = "HeatRelay")]
    pub heat_relay: bool,
    #[serde(default = "default_true", rename = "DhwSensor")]
    pub dhw_sensor: bool,
    #[serde(default = "default_true", rename = "ZoneSensor")]
    pub zone_sensor: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { heat_relay: true, dhw_sensor: true, zone_sensor: true }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    pub fn validate_and_normalize(&mut self) -> Result<()> {
        let has_serial = self.gateway.serial_port.is_some();
        let has_tcp = self.gateway.tcp_bridge_addr.is_some();
        ensure!(
            has_serial != has_tcp,
            "exactly one of gateway.SerialPort or gateway.TcpBridgeAddr must be set"
        );
        ensure!(self.fault_log.limit >= 1, "fault_log.Limit must be >= 1");
        Ok(())
    }
}

mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_both_serial_and_tcp() {
        let mut cfg = Config {
            gateway: GatewayConfig {
                serial_port: Some("/dev/ttyUSB0".into()),
                tcp_bridge_addr: Some("127.0.0.1:8000".into()),
            },
            fault_log: FaultLogConfig { limit: 64, timeout: Duration::from_secs(30) },
            discovery: DiscoveryConfig { heat_relay: true, dhw_sensor: true, zone_sensor: true },
        };
        assert!(cfg.validate_and_normalize().is_err());
    }

    #[test]
    fn accepts_serial_only() {
        let mut cfg = Config {
            gateway: GatewayConfig { serial_port: Some("/dev/ttyUSB0".into()), tcp_bridge_addr: None },
            fault_log: FaultLogConfig { limit: 64, timeout: Duration::from_secs(30) },
            discovery: DiscoveryConfig { heat_relay: true, dhw_sensor: true, zone_sensor: true },
        };
        assert!(cfg.validate_and_normalize().is_ok());
    }
}
