// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::protocol::{address::Address, message::Message};

/// A device as seen on the bus: its address, its (non-owning) back-references
/// to a controlling system and zone, and the last message seen per code.
///
/// Devices live in an id-keyed registry owned by the [`crate::topology::gateway::Gateway`];
/// systems and zones hold `Address`es, not owning references, collapsing the
/// system↔zone↔device cycle (§9 design notes).
pub struct Device {
    pub addr: Address,
    state: Mutex<DeviceState>,
}

#[derive(Default)]
struct DeviceState {
    controller: Option<Address>,
    zone_idx: Option<String>,
    temperature: Option<f64>,
    last_code_dtm: std::collections::HashMap<String, DateTime<Utc>>,
}

impl Device {
    pub fn new(addr: Address) -> Self {
        Self { addr, state: Mutex::new(DeviceState::default()) }
    }

    pub async fn controller(&self) -> Option<Address> {
        self.state.lock().await.controller.clone()
    }

    /// Bind this device to a controlling system, unless it is already bound
    /// to a different one (non-owning back-reference, never silently moved).
    pub async fn set_controller(&self, ctl: Address) {
        let mut st = self.state.lock().await;
        if st.controller.is_none() {
            st.controller = Some(ctl);
        }
    }

    pub async fn zone_idx(&self) -> Option<String> {
        self.state.lock().await.zone_idx.clone()
    }

    pub async fn set_zone_idx(&self, idx: String) {
        let mut st = self.state.lock().await;
        if st.zone_idx.is_none() {
            st.zone_idx = Some(idx);
        }
    }

    pub async fn temperature(&self) -> Option<f64> {
        self.state.lock().await.temperature
    }

    pub async fn record_message(&self, msg: &Message) {
        let mut st = self.state.lock().await;
        st.last_code_dtm.insert(msg.code.clone(), msg.dtm);
    }

    pub async fn set_temperature(&self, temp: Option<f64>, dtm: DateTime<Utc>) {
        let mut st = self.state.lock().await;
        st.temperature = temp;
        st.last_code_dtm.insert("30C9".to_string(), dtm);
    }

    pub async fn last_30c9_dtm(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_code_dtm.get("30C9").copied()
    }

    pub fn type_is(&self, device_type: &str) -> bool {
        self.addr.device_type == device_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(device_type: &str, device_id: &str) -> Address {
        Address::new(device_type, device_id)
    }

    #[tokio::test]
    async fn set_controller_is_sticky_against_a_different_controller() {
        let device = Device::new(addr("04", "111111"));
        let first = addr("01", "145038");
        let second = addr("01", "999999");

        device.set_controller(first.clone()).await;
        device.set_controller(second).await;

        assert_eq!(device.controller().await, Some(first), "first controller binding must not be overwritten");
    }

    #[tokio::test]
    async fn set_zone_idx_is_sticky() {
        let device = Device::new(addr("04", "111111"));

        device.set_zone_idx("01".to_string()).await;
        device.set_zone_idx("02".to_string()).await;

        assert_eq!(device.zone_idx().await, Some("01".to_string()));
    }

    #[tokio::test]
    async fn set_temperature_records_the_30c9_timestamp() {
        let device = Device::new(addr("04", "111111"));
        let dtm = Utc::now();

        device.set_temperature(Some(19.5), dtm).await;

        assert_eq!(device.temperature().await, Some(19.5));
        assert_eq!(device.last_30c9_dtm().await, Some(dtm));
    }

    #[tokio::test]
    async fn record_message_tracks_last_dtm_per_code() {
        let device = Device::new(addr("04", "111111"));
        let dtm = Utc::now();
        let msg = Message {
            src: device.addr.clone(),
            dst: Address::none(),
            verb: crate::protocol::packet::Verb::I,
            code: "1060".to_string(),
            payload: crate::protocol::message::Payload::Raw(String::new()),
            payload_hex: String::new(),
            dtm,
        };

        device.record_message(&msg).await;

        assert_eq!(device.state.lock().await.last_code_dtm.get("1060"), Some(&dtm));
    }
}
