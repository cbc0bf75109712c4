// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{
    error::{RamsesError, Result},
    protocol::{address::Address, codes::DOMAIN_DHW, message::Message},
    topology::zone::Zone,
};

/// A system is 1:1 with a controller device (§3). Zones are created lazily
/// and live for the process lifetime.
pub struct System {
    pub ctl_addr: Address,
    pub boiler_control: Mutex<Option<Address>>,
    pub dhw: Mutex<Option<Address>>,
    pub zones: Mutex<Vec<String>>,
    pub zone_by_idx: DashMap<String, Arc<Zone>>,
    pub prev_30c9: Mutex<Option<Message>>,
    pub prev_3b00: Mutex<Option<Message>>,
    last_1f09_remaining: Mutex<Option<u16>>,
    pub fault_log: Mutex<BTreeMap<String, Message>>,
    /// Synchronous, held only across slot updates (never across an await) —
    /// see [`System::acquire_zone_lock`].
    zone_lock_idx: StdMutex<Option<String>>,
}

impl System {
    pub fn new(ctl_addr: Address) -> Self {
        Self {
            ctl_addr,
            boiler_control: Mutex::new(None),
            dhw: Mutex::new(None),
            zones: Mutex::new(Vec::new()),
            zone_by_idx: DashMap::new(),
            prev_30c9: Mutex::new(None),
            prev_3b00: Mutex::new(None),
            last_1f09_remaining: Mutex::new(None),
            fault_log: Mutex::new(BTreeMap::new()),
            zone_lock_idx: StdMutex::new(None),
        }
    }

    /// Return (creating if necessary) the zone at `idx`. `idx == "FA"` is the
    /// special DHW zone.
    pub async fn get_or_create_zone(&self, idx: &str) -> Arc<Zone> {
        if let Some(z) = self.zone_by_idx.get(idx) {
            return Arc::clone(&z);
        }
        let zone = Arc::new(Zone::new(idx));
        self.zone_by_idx.insert(idx.to_string(), Arc::clone(&zone));
        if idx != DOMAIN_DHW {
            let mut zones = self.zones.lock().await;
            if !zones.contains(&idx.to_string()) {
                zones.push(idx.to_string());
                zones.sort();
            }
        }
        zone
    }

    /// Count zones (by `self.zones`, i.e. excluding DHW) with no bound
    /// temperature sensor (§4.6 step 6 exclusion test: `len([z for z in
    /// self.zones if z.temp_sensor is None])`).
    pub async fn sensorless_zone_count(&self) -> usize {
        let idxs = self.zones.lock().await.clone();
        let mut count = 0;
        for idx in idxs {
            if let Some(zone) = self.zone_by_idx.get(&idx)
                && zone.temp_sensor().await.is_none()
            {
                count += 1;
            }
        }
        count
    }

    /// Assign the boiler control (heat relay), unless already assigned to a
    /// different device (§3 invariant, §4.6 monotonicity).
    pub async fn set_boiler_control(&self, device: Address) -> Result<()> {
        let mut slot = self.boiler_control.lock().await;
        match &*slot {
            Some(existing) if *existing != device => Err(RamsesError::TopologyConflict(format!(
                "boiler_control already bound to {existing}, cannot rebind to {device}"
            ))),
            Some(_) => Ok(()),
            None => {
                *slot = Some(device);
                Ok(())
            },
        }
    }

    /// Assign the DHW sensor's system, creating the DHW zone if absent, and
    /// bind the sensor. The DHW "zone" itself can only belong to one system.
    pub async fn set_dhw_sensor(&self, sensor: Address) -> Result<()> {
        self.get_or_create_zone(DOMAIN_DHW).await;
        let mut slot = self.dhw.lock().await;
        match &*slot {
            Some(existing) if *existing != sensor => Err(RamsesError::TopologyConflict(format!(
                "dhw sensor already bound to {existing}, cannot rebind to {sensor}"
            ))),
            Some(_) => Ok(()),
            None => {
                *slot = Some(sensor);
                Ok(())
            },
        }
    }

    pub async fn record_fault_log_entry(&self, log_idx: String, msg: Message) {
        self.fault_log.lock().await.insert(log_idx, msg);
    }

    pub async fn take_prev_30c9(&self, current: Message) -> Option<Message> {
        let mut slot = self.prev_30c9.lock().await;
        slot.replace(current)
    }

    pub async fn set_last_1f09_remaining(&self, remaining: u16) {
        *self.last_1f09_remaining.lock().await = Some(remaining);
    }

    pub async fn last_1f09_remaining(&self) -> Option<u16> {
        *self.last_1f09_remaining.lock().await
    }

    /// Block until this zone's schedule transaction can proceed, then hold
    /// the lock until the returned guard is dropped (§4.4, §5).
    pub async fn acquire_zone_lock(self: &Arc<Self>, idx: &str) -> ZoneLockGuard {
        loop {
            {
                let mut lock = self.zone_lock_idx.lock().unwrap_or_else(|p| p.into_inner());
                if lock.is_none() {
                    *lock = Some(idx.to_string());
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        ZoneLockGuard { system: Arc::clone(self) }
    }

    pub fn zone_lock_idx(&self) -> Option<String> {
        self.zone_lock_idx.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Released automatically on drop, covering every exit path of a schedule
/// transaction — success, timeout, or an early return (§4.4: "lock is
/// always released on all exit paths").
pub struct ZoneLockGuard {
    system: Arc<System>,
}

impl Drop for ZoneLockGuard {
    fn drop(&mut self) {
        let mut lock = self.system.zone_lock_idx.lock().unwrap_or_else(|p| p.into_inner());
        *lock = None;
    }
}
