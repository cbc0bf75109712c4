// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tokio::sync::Mutex;

use crate::{drivers::schedule::Schedule, protocol::address::Address};

/// A zone: `{idx (00..MAX_ZONES-1), zone_type?, temp_sensor?, actuators,
/// schedule?}`. DHW is modeled as a special zone with domain id `FA`.
pub struct Zone {
    pub idx: String,
    state: Mutex<ZoneState>,
}

#[derive(Default)]
struct ZoneState {
    zone_type: Option<String>,
    temp_sensor: Option<Address>,
    actuators: Vec<Address>,
    schedule: Option<Schedule>,
}

impl Zone {
    pub fn new(idx: impl Into<String>) -> Self {
        Self { idx: idx.into(), state: Mutex::new(ZoneState::default()) }
    }

    pub fn is_dhw(&self) -> bool {
        self.idx == crate::protocol::codes::DOMAIN_DHW
    }

    pub async fn zone_type(&self) -> Option<String> {
        self.state.lock().await.zone_type.clone()
    }

    pub async fn set_zone_type(&self, zone_type: String) {
        self.state.lock().await.zone_type = Some(zone_type);
    }

    pub async fn temp_sensor(&self) -> Option<Address> {
        self.state.lock().await.temp_sensor.clone()
    }

    /// Bind this zone's sensor, unless one is already bound (§3 invariant:
    /// once bound by an authoritative exchange, not silently replaced).
    pub async fn bind_sensor(&self, sensor: Address) -> bool {
        let mut st = self.state.lock().await;
        if st.temp_sensor.is_some() {
            return false;
        }
        st.temp_sensor = Some(sensor);
        true
    }

    pub async fn add_actuator(&self, addr: Address) {
        let mut st = self.state.lock().await;
        if !st.actuators.contains(&addr) {
            st.actuators.push(addr);
        }
    }

    pub async fn schedule(&self) -> Option<Schedule> {
        self.state.lock().await.schedule.clone()
    }

    pub async fn set_schedule(&self, schedule: Schedule) {
        self.state.lock().await.schedule = Some(schedule);
    }
}
