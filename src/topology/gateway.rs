// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::trace;

use crate::{
    cfg::config::DiscoveryConfig,
    protocol::{address::Address, message::Message},
    topology::{device::Device, discovery, system::System},
    transport::engine::Transport,
};

/// The process-lifetime registry of devices and systems (§3). `transport` is
/// attached after construction to break the `Gateway -> Transport ->
/// Gateway` ownership cycle: the transport is built holding `Arc<Gateway>`,
/// then hands itself back here as a `Weak<Transport>` (mirrors the
/// `pool.attach_self()` idiom for session/pool back-references).
pub struct Gateway {
    devices: DashMap<Address, Arc<Device>>,
    systems: DashMap<Address, Arc<System>>,
    transport: OnceCell<Weak<Transport>>,
    discovery: DiscoveryConfig,
}

impl Gateway {
    pub fn new() -> Arc<Self> {
        Self::with_discovery_config(DiscoveryConfig::default())
    }

    /// Construct a gateway with the discovery toggles from `config.yaml`'s
    /// `discovery` section (§4.6, §4.9): each of heat-relay/DHW-sensor/
    /// zone-sensor inference can be independently disabled.
    pub fn with_discovery_config(discovery: DiscoveryConfig) -> Arc<Self> {
        Arc::new(Self {
            devices: DashMap::new(),
            systems: DashMap::new(),
            transport: OnceCell::new(),
            discovery,
        })
    }

    /// Attach the transport this gateway issues discovery commands through.
    /// Idempotent: a second call is a no-op.
    pub fn attach_transport(&self, transport: &Arc<Transport>) {
        let _ = self.transport.set(Arc::downgrade(transport));
    }

    pub fn transport(&self) -> Option<Arc<Transport>> {
        self.transport.get()?.upgrade()
    }

    pub fn get_or_create_device(&self, addr: &Address) -> Arc<Device> {
        if let Some(d) = self.devices.get(addr) {
            return Arc::clone(&d);
        }
        let device = Arc::new(Device::new(addr.clone()));
        self.devices.insert(addr.clone(), Arc::clone(&device));
        device
    }

    pub fn get_or_create_system(&self, ctl_addr: &Address) -> Arc<System> {
        if let Some(s) = self.systems.get(ctl_addr) {
            return Arc::clone(&s);
        }
        let system = Arc::new(System::new(ctl_addr.clone()));
        self.systems.insert(ctl_addr.clone(), Arc::clone(&system));
        system
    }

    pub fn system_for(&self, ctl_addr: &Address) -> Option<Arc<System>> {
        self.systems.get(ctl_addr).map(|s| Arc::clone(&s))
    }

    /// Devices eligible to serve as a zone's temperature sensor (§4.6 step 4):
    /// bound to `system` or not yet bound to any system, of a sensor-capable
    /// type, with a recorded temperature reported after `after`.
    pub async fn zone_sensor_candidates(
        &self,
        system: &System,
        after: DateTime<Utc>,
    ) -> Vec<(Address, f64, Option<String>)> {
        let mut out = Vec::new();
        for entry in self.devices.iter() {
            let device = Arc::clone(entry.value());
            if !crate::protocol::address::DEVICE_HAS_ZONE_SENSOR.contains(&device.addr.device_type.as_str()) {
                continue;
            }
            if let Some(ctl) = device.controller().await
                && ctl != system.ctl_addr
            {
                continue;
            }
            let Some(temp) = device.temperature().await else { continue };
            let Some(last) = device.last_30c9_dtm().await else { continue };
            if last <= after {
                continue;
            }
            out.push((device.addr.clone(), temp, device.zone_idx().await));
        }
        out
    }

    /// Entry point for every decoded inbound message (§4.5): updates the
    /// device registry, then (when the message belongs to a known or
    /// inferable system) runs the topology dispatch in §4.5/§4.6.
    pub async fn handle_message(self: &Arc<Self>, msg: Message) {
        let device = self.get_or_create_device(&msg.src);
        device.record_message(&msg).await;

        // Any addressed (non-broadcast) exchange between the controller and
        // a device establishes that device's system membership, regardless
        // of which side this particular message dispatches through §4.5.
        if msg.src.is_controller() && !msg.dst.is_none() && !msg.dst.is_controller() {
            self.get_or_create_device(&msg.dst).set_controller(msg.src.clone()).await;
        } else if msg.dst.is_controller() && !msg.src.is_controller() {
            device.set_controller(msg.dst.clone()).await;
        }

        // A sensor-capable device's own 30C9 report is recorded against the
        // device itself regardless of whether it is bound to a system yet —
        // zone-sensor matching (§4.6) depends on it being available early.
        if msg.code == "30C9"
            && !msg.src.is_controller()
            && let Some(reading) = msg.payload.as_array().and_then(|a| a.first())
        {
            let temp = reading.get("temperature").and_then(serde_json::Value::as_f64);
            device.set_temperature(temp, msg.dtm).await;
        }

        let system = if msg.src.is_controller() {
            Some(self.get_or_create_system(&msg.src))
        } else if let Some(ctl) = device.controller().await {
            self.system_for(&ctl)
        } else {
            None
        };

        let Some(system) = system else {
            trace!(code = %msg.code, src = %msg.src, "message has no known system yet, dropping from topology");
            return;
        };

        discovery::dispatch(self, &system, &msg, &self.discovery).await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value};

    use super::*;
    use crate::protocol::{message::Payload, packet::Verb};

    fn raw_msg(src: Address, dst: Address, verb: Verb, code: &str) -> Message {
        Message { src, dst, verb, code: code.to_string(), payload: Payload::Raw(String::new()), payload_hex: String::new(), dtm: Utc::now() }
    }

    fn temp_msg(src: Address, temp: f64) -> Message {
        let mut m = Map::new();
        m.insert("temperature".to_string(), Value::from(temp));
        Message { src, dst: Address::none(), verb: Verb::I, code: "30C9".to_string(), payload: Payload::Array(vec![m]), payload_hex: String::new(), dtm: Utc::now() }
    }

    /// An addressed exchange between the controller and a device establishes
    /// that device's system membership, regardless of which side initiated it.
    #[tokio::test]
    async fn handle_message_binds_device_to_controller_from_either_direction() {
        let gateway = Gateway::new();
        let ctl = Address::parse("01:145038").expect("addr");
        let zone_dev = Address::parse("04:111111").expect("addr");

        gateway.handle_message(raw_msg(ctl.clone(), zone_dev.clone(), Verb::RQ, "2309")).await;
        let device = gateway.get_or_create_device(&zone_dev);
        assert_eq!(device.controller().await, Some(ctl.clone()));

        let other_dev = Address::parse("04:222222").expect("addr");
        gateway.handle_message(raw_msg(other_dev.clone(), ctl.clone(), Verb::RQ, "2309")).await;
        let other = gateway.get_or_create_device(&other_dev);
        assert_eq!(other.controller().await, Some(ctl));
    }

    /// End-to-end through `handle_message`: S4 heat-relay binding via a
    /// `3B00` pair (TPI then controller) must reach the same system the TPI
    /// was bound to.
    #[tokio::test]
    async fn handle_message_binds_heat_relay_via_3b00_pair() {
        let gateway = Gateway::new();
        let ctl = Address::parse("01:145038").expect("addr");
        let tpi = Address::parse("13:237335").expect("addr");

        // Establish system membership first, as a real bus capture would.
        gateway.handle_message(raw_msg(ctl.clone(), tpi.clone(), Verb::RQ, "3EF1")).await;
        gateway.handle_message(raw_msg(tpi.clone(), Address::none(), Verb::I, "3B00")).await;
        gateway.handle_message(raw_msg(ctl.clone(), Address::none(), Verb::I, "3B00")).await;

        let system = gateway.system_for(&ctl).expect("system must exist");
        assert_eq!(*system.boiler_control.lock().await, Some(tpi));
    }

    /// §8 invariant 7 end-to-end: once bound via `3220`, a later `3EF0`
    /// naming a different device must not rebind it, even routed through the
    /// full `handle_message` pipeline.
    #[tokio::test]
    async fn handle_message_rejects_heat_relay_rebind() {
        let gateway = Gateway::new();
        let ctl = Address::parse("01:145038").expect("addr");
        let otb = Address::parse("10:067219").expect("addr");
        let other = Address::parse("13:999999").expect("addr");

        gateway.handle_message(raw_msg(ctl.clone(), otb.clone(), Verb::RQ, "3220")).await;
        let system = gateway.system_for(&ctl).expect("system must exist");
        assert_eq!(*system.boiler_control.lock().await, Some(otb.clone()));

        gateway.handle_message(raw_msg(ctl.clone(), other.clone(), Verb::RQ, "3EF0")).await;
        assert_eq!(*system.boiler_control.lock().await, Some(otb), "sticky assignment must survive a conflicting rebind attempt");
    }

    /// §4.6 step 4: a device already bound to a different system is not a
    /// zone-sensor candidate, even if it otherwise qualifies.
    #[tokio::test]
    async fn zone_sensor_candidates_excludes_devices_bound_elsewhere() {
        let gateway = Gateway::new();
        let ctl_a = Address::parse("01:145038").expect("addr");
        let ctl_b = Address::parse("01:999999").expect("addr");
        let system_a = gateway.get_or_create_system(&ctl_a);
        let sensor = Address::parse("04:111111").expect("addr");

        let before = Utc::now() - chrono::Duration::seconds(5);
        gateway.handle_message(raw_msg(ctl_b.clone(), sensor.clone(), Verb::RQ, "2309")).await;
        gateway.handle_message(temp_msg(sensor.clone(), 19.5)).await;

        let candidates = gateway.zone_sensor_candidates(&system_a, before).await;
        assert!(candidates.is_empty(), "device bound to a different system must not be offered as a candidate");
    }
}
