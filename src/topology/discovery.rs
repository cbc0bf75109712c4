// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Passive inference of heat-relay, DHW-sensor, and zone↔sensor bindings
//! from traffic that was never an authoritative request/reply exchange for
//! this crate (§4.6).

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, warn};

use crate::{
    cfg::config::DiscoveryConfig,
    protocol::{
        address::{DHW_SENSOR_TYPE, OTB_TYPE, TPI_TYPE},
        message::Message,
        packet::Verb,
    },
    topology::{gateway::Gateway, system::System},
};

/// The §4.5 per-code topology dispatch, called once per message that
/// belongs to a known (or controller-sourced) system. Each discovery branch
/// is individually gated by `cfg` (§4.9): disabling a toggle stops that
/// inference from running, but never affects the other dispatch branches
/// (fault-log recording, `1F09` cycle tracking) which are not discovery.
pub async fn dispatch(gateway: &Arc<Gateway>, system: &Arc<System>, msg: &Message, cfg: &DiscoveryConfig) {
    match msg.code.as_str() {
        "0418" if matches!(msg.verb, Verb::I | Verb::RP) => {
            if let Some(log_idx) = msg.payload.get_str("log_idx") {
                system.record_fault_log_entry(log_idx.to_string(), msg.clone()).await;
            }
        },
        "1F09" => {
            if let Some(remaining) = msg.payload.as_fields().and_then(|f| f.get("remaining_seconds")).and_then(serde_json::Value::as_u64) {
                system.set_last_1f09_remaining(remaining as u16).await;
            }
        },
        "30C9" if cfg.zone_sensor && msg.src.is_controller() => zone_sensor_discovery(gateway, system, msg).await,
        "3220" if cfg.heat_relay => heat_relay_3220(system, msg).await,
        "3EF0" if cfg.heat_relay => heat_relay_3ef0(system, msg).await,
        "3B00" if cfg.heat_relay => heat_relay_3b00(system, msg).await,
        "3EF1" if cfg.heat_relay && msg.verb == Verb::RQ && matches!(msg.dst.device_type.as_str(), "10" | "13") => {
            debug!(dst = %msg.dst, "3EF1 heat-relay role hint observed");
        },
        "10A0" | "1260" if cfg.dhw_sensor => dhw_sensor_discovery(system, msg).await,
        _ => {},
    }
}

/// `3220` RQ from the controller to a `10` (OpenTherm bridge) identifies the
/// heat relay directly (§4.6, most reliable signal).
async fn heat_relay_3220(system: &Arc<System>, msg: &Message) {
    if msg.verb == Verb::RQ
        && msg.dst.device_type == OTB_TYPE
        && let Err(e) = system.set_boiler_control(msg.dst.clone()).await
    {
        warn!(error = %e, "3220 heat-relay assignment conflict");
    }
}

/// `3EF0` RQ from the controller to a `10` or `13` also identifies the heat
/// relay, one rung less reliable than `3220`.
async fn heat_relay_3ef0(system: &Arc<System>, msg: &Message) {
    if msg.verb == Verb::RQ
        && matches!(msg.dst.device_type.as_str(), "10" | "13")
        && let Err(e) = system.set_boiler_control(msg.dst.clone()).await
    {
        warn!(error = %e, "3EF0 heat-relay assignment conflict");
    }
}

/// A `13` followed by the controller, both sending `I 3B00`, is a TPI cycle
/// correlation pair that identifies the `13` as the heat relay.
async fn heat_relay_3b00(system: &Arc<System>, msg: &Message) {
    let mut prev = system.prev_3b00.lock().await;
    if msg.verb == Verb::I {
        if let Some(prior) = prev.as_ref()
            && prior.src.device_type == TPI_TYPE
            && msg.src.is_controller()
            && let Err(e) = system.set_boiler_control(prior.src.clone()).await
        {
            warn!(error = %e, "3B00 heat-relay assignment conflict");
        }
        *prev = Some(msg.clone());
    }
}

/// `10A0` RP from the controller to a `07` identifies the DHW temperature
/// sensor, creating the DHW zone. `1260` from that sensor records its
/// reported temperature.
async fn dhw_sensor_discovery(system: &Arc<System>, msg: &Message) {
    match msg.code.as_str() {
        "10A0" if msg.verb == Verb::RP && msg.dst.device_type == DHW_SENSOR_TYPE => {
            if let Err(e) = system.set_dhw_sensor(msg.dst.clone()).await {
                warn!(error = %e, "10A0 DHW-sensor assignment conflict");
            }
        },
        // "1260": temperature is recorded on the device by `Gateway::handle_message`.
        _ => {},
    }
}

/// Zone↔sensor matching (§4.6): correlates a controller's `30C9` temperature
/// array against the bus's sensor-capable devices to bind each sensorless
/// zone to the one device that explains its temperature change.
async fn zone_sensor_discovery(gateway: &Arc<Gateway>, system: &Arc<System>, msg: &Message) {
    let Some(array) = msg.payload.as_array() else { return };
    let Some(prev_msg) = system.take_prev_30c9(msg.clone()).await else { return };
    let Some(prev_array) = prev_msg.payload.as_array() else { return };

    let remaining = system.last_1f09_remaining().await.unwrap_or(300);
    let elapsed = (msg.dtm - prev_msg.dtm).num_seconds().max(0);
    if elapsed > i64::from(remaining) {
        return; // stale window, §4.6 step 1
    }

    let mut prev_temps: HashMap<String, Option<f64>> = HashMap::new();
    for entry in prev_array {
        let zone_idx = entry.get("zone_idx").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        prev_temps.insert(zone_idx, entry.get("temperature").and_then(serde_json::Value::as_f64));
    }

    let mut changed: Vec<(String, f64)> = Vec::new();
    for entry in array {
        let zone_idx = entry.get("zone_idx").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let Some(t) = entry.get("temperature").and_then(serde_json::Value::as_f64) else { continue };
        if prev_temps.get(&zone_idx).copied().flatten() != Some(t) {
            changed.push((zone_idx, t));
        }
    }
    if changed.is_empty() {
        return;
    }

    let mut value_counts: HashMap<u64, usize> = HashMap::new();
    for (_, t) in &changed {
        *value_counts.entry(t.to_bits()).or_insert(0) += 1;
    }

    let mut testable = Vec::new();
    for (zone_idx, t) in &changed {
        let zone = system.get_or_create_zone(zone_idx).await;
        if zone.temp_sensor().await.is_none() && value_counts.get(&t.to_bits()) == Some(&1) {
            testable.push((zone_idx.clone(), *t));
        }
    }
    if testable.is_empty() {
        return;
    }

    let candidates = gateway.zone_sensor_candidates(system, prev_msg.dtm).await;

    let mut unmatched_zone = None;
    for (zone_idx, t) in &testable {
        let hits: Vec<&crate::protocol::address::Address> = candidates
            .iter()
            .filter(|(_, ct, cz)| {
                (ct - t).abs() < f64::EPSILON && (cz.as_deref() == Some(zone_idx.as_str()) || cz.is_none())
            })
            .map(|(addr, _, _)| addr)
            .collect();

        match hits.as_slice() {
            [only] => {
                let zone = system.get_or_create_zone(zone_idx).await;
                if zone.bind_sensor((*only).clone()).await {
                    gateway.get_or_create_device(only).set_zone_idx(zone_idx.clone()).await;
                    debug!(zone_idx, sensor = %only, "zone sensor bound by temperature correlation");
                }
            },
            [] => unmatched_zone = Some(zone_idx.clone()),
            _ => {},
        }
    }

    // Exclusion step (§4.6 step 6): exactly one zone remains sensorless
    // system-wide (not just among this cycle's testable subset) and its idx
    // is the one unmatched this cycle — implicitly sensed by the controller.
    if system.sensorless_zone_count().await == 1
        && let Some(zone_idx) = unmatched_zone
    {
        let zone = system.get_or_create_zone(&zone_idx).await;
        if zone.bind_sensor(system.ctl_addr.clone()).await {
            debug!(zone_idx, "zone sensor bound to controller by elimination");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::{Map, Value};

    use super::*;
    use crate::protocol::{address::Address, message::Payload};

    fn enabled() -> DiscoveryConfig {
        DiscoveryConfig { heat_relay: true, dhw_sensor: true, zone_sensor: true }
    }

    fn raw_msg(src: Address, dst: Address, verb: Verb, code: &str, dtm: chrono::DateTime<Utc>) -> Message {
        Message { src, dst, verb, code: code.to_string(), payload: Payload::Raw(String::new()), payload_hex: String::new(), dtm }
    }

    fn zone_temps(entries: &[(&str, f64)]) -> Payload {
        Payload::Array(
            entries
                .iter()
                .map(|(idx, t)| {
                    let mut m = Map::new();
                    m.insert("zone_idx".to_string(), Value::String((*idx).to_string()));
                    m.insert("temperature".to_string(), Value::from(*t));
                    m
                })
                .collect(),
        )
    }

    fn array_msg(src: Address, entries: &[(&str, f64)], dtm: chrono::DateTime<Utc>) -> Message {
        Message { src, dst: Address::none(), verb: Verb::I, code: "30C9".to_string(), payload: zone_temps(entries), payload_hex: String::new(), dtm }
    }

    /// S4: a `13` sending `I 3B00` followed by the controller sending the
    /// same, both on the same system, identifies the `13` as the heat relay.
    #[tokio::test]
    async fn heat_relay_bound_via_3b00_pair() {
        let ctl = Address::parse("01:145038").expect("addr");
        let tpi = Address::parse("13:237335").expect("addr");
        let gateway = Gateway::new();
        let system = gateway.get_or_create_system(&ctl);
        let now = Utc::now();

        dispatch(&gateway, &system, &raw_msg(tpi.clone(), Address::none(), Verb::I, "3B00", now), &enabled()).await;
        dispatch(&gateway, &system, &raw_msg(ctl.clone(), Address::none(), Verb::I, "3B00", now), &enabled()).await;

        assert_eq!(*system.boiler_control.lock().await, Some(tpi));
    }

    /// §4.6/§8 invariant 7: once bound via `3220`, a later `3EF0` naming a
    /// different device must not rebind it.
    #[tokio::test]
    async fn heat_relay_rebind_via_different_code_is_rejected() {
        let ctl = Address::parse("01:145038").expect("addr");
        let otb = Address::parse("10:067219").expect("addr");
        let other = Address::parse("13:999999").expect("addr");
        let gateway = Gateway::new();
        let system = gateway.get_or_create_system(&ctl);
        let now = Utc::now();

        dispatch(&gateway, &system, &raw_msg(ctl.clone(), otb.clone(), Verb::RQ, "3220", now), &enabled()).await;
        assert_eq!(*system.boiler_control.lock().await, Some(otb.clone()));

        dispatch(&gateway, &system, &raw_msg(ctl.clone(), other.clone(), Verb::RQ, "3EF0", now), &enabled()).await;
        assert_eq!(*system.boiler_control.lock().await, Some(otb), "sticky assignment must survive a conflicting rebind attempt");
    }

    /// §4.9: disabling `discovery.heat_relay` must suppress the inference
    /// entirely, not just slow it down.
    #[tokio::test]
    async fn heat_relay_discovery_respects_config_toggle() {
        let ctl = Address::parse("01:145038").expect("addr");
        let otb = Address::parse("10:067219").expect("addr");
        let gateway = Gateway::new();
        let system = gateway.get_or_create_system(&ctl);
        let mut cfg = enabled();
        cfg.heat_relay = false;

        dispatch(&gateway, &system, &raw_msg(ctl, otb, Verb::RQ, "3220", Utc::now()), &cfg).await;

        assert!(system.boiler_control.lock().await.is_none());
    }

    /// Regression for the exclusion-step bug: two zones are sensorless
    /// system-wide, but only one reports a (uniquely) changed temperature
    /// this cycle. The exclusion step must not fire — it requires exactly
    /// one sensorless zone system-wide, not merely in this cycle's
    /// testable subset.
    #[tokio::test]
    async fn exclusion_step_does_not_fire_with_multiple_sensorless_zones() {
        let ctl = Address::parse("01:145038").expect("addr");
        let gateway = Gateway::new();
        let system = gateway.get_or_create_system(&ctl);

        let sensored = system.get_or_create_zone("00").await;
        sensored.bind_sensor(Address::parse("03:100000").expect("addr")).await;
        system.get_or_create_zone("01").await; // Z1: sensorless, reports this cycle
        system.get_or_create_zone("02").await; // Z2: sensorless, silent this cycle

        let t0 = Utc::now();
        let prev = array_msg(ctl.clone(), &[("00", 20.0), ("01", 18.0)], t0);
        dispatch(&gateway, &system, &prev, &enabled()).await;
        system.set_last_1f09_remaining(300).await;

        let t1 = t0 + Duration::seconds(30);
        let cur = array_msg(ctl.clone(), &[("00", 20.0), ("01", 19.0)], t1);
        dispatch(&gateway, &system, &cur, &enabled()).await;

        let zone1 = system.get_or_create_zone("01").await;
        assert!(zone1.temp_sensor().await.is_none(), "exclusion step fired despite 2 sensorless zones");
    }

    /// When only one zone is sensorless system-wide, the exclusion step
    /// should still bind it to the controller by elimination (§4.6 step 6).
    #[tokio::test]
    async fn exclusion_step_binds_sole_sensorless_zone_to_controller() {
        let ctl = Address::parse("01:145038").expect("addr");
        let gateway = Gateway::new();
        let system = gateway.get_or_create_system(&ctl);

        let sensored = system.get_or_create_zone("00").await;
        sensored.bind_sensor(Address::parse("03:100000").expect("addr")).await;
        system.get_or_create_zone("01").await; // the only sensorless zone

        let t0 = Utc::now();
        let prev = array_msg(ctl.clone(), &[("00", 20.0), ("01", 18.0)], t0);
        dispatch(&gateway, &system, &prev, &enabled()).await;
        system.set_last_1f09_remaining(300).await;

        let t1 = t0 + Duration::seconds(30);
        let cur = array_msg(ctl.clone(), &[("00", 20.0), ("01", 19.0)], t1);
        dispatch(&gateway, &system, &cur, &enabled()).await;

        let zone1 = system.get_or_create_zone("01").await;
        assert_eq!(zone1.temp_sensor().await, Some(ctl));
    }

    /// §4.9: disabling `discovery.zone_sensor` must suppress zone-sensor
    /// matching entirely.
    #[tokio::test]
    async fn zone_sensor_discovery_respects_config_toggle() {
        let ctl = Address::parse("01:145038").expect("addr");
        let gateway = Gateway::new();
        let system = gateway.get_or_create_system(&ctl);
        system.get_or_create_zone("01").await;

        let mut cfg = enabled();
        cfg.zone_sensor = false;

        let t0 = Utc::now();
        dispatch(&gateway, &system, &array_msg(ctl.clone(), &[("01", 18.0)], t0), &cfg).await;
        system.set_last_1f09_remaining(300).await;
        let t1 = t0 + Duration::seconds(30);
        dispatch(&gateway, &system, &array_msg(ctl, &[("01", 19.0)], t1), &cfg).await;

        let zone1 = system.get_or_create_zone("01").await;
        assert!(zone1.temp_sensor().await.is_none());
    }
}
