// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Multi-fragment `0404` schedule transactions (§4.4): a zone's weekly
//! schedule is carried as a zlib-compressed blob of 20-byte switchpoint
//! records, split across as many fragments as the payload needs. Fetching or
//! replacing a schedule holds the owning system's zone lock for the whole
//! transaction.

use std::{collections::BTreeMap, io::Read, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use std::io::Write as _;
use tracing::warn;

use crate::{
    command::model::{priority, CallbackSpec, Command, Qos},
    error::{RamsesError, Result},
    protocol::{address::Address, packet::Verb},
    topology::system::System,
    transport::engine::Transport,
};

const FRAGMENT_HEX_LEN: usize = 82 * 2;
const RECORD_LEN: usize = 20;
const MAX_FRAGMENTS: u8 = 255;
/// `frag_total == 255` on a reply means the zone has no schedule (§4.4 step 4).
const NO_SCHEDULE_SENTINEL: u8 = 255;
/// Cached fragments older than this, relative to the newest one received,
/// are pruned before the next request (§4.4, §9 design notes).
const FRAGMENT_STALE_AFTER: chrono::Duration = chrono::Duration::minutes(5);

#[derive(Debug, Clone, PartialEq)]
pub struct Switchpoint {
    pub time_of_day: String,
    pub heat_setpoint: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaySchedule {
    pub day_of_week: u8,
    pub switchpoints: Vec<Switchpoint>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    pub zone_idx: String,
    pub days: Vec<DaySchedule>,
}

impl Schedule {
    /// Deflate-compress (level 9, the wire's window) and fragment into
    /// `82`-byte (164 hex-char) chunks, the per-fragment size the controller
    /// accepts (§4.4).
    fn to_hex_fragments(&self) -> Vec<String> {
        let zone_idx = u8::from_str_radix(&self.zone_idx, 16).unwrap_or(0);
        let mut raw = Vec::new();
        for day in &self.days {
            for sp in &day.switchpoints {
                let minute_of_day = parse_time_of_day(&sp.time_of_day);
                let mut record = [0u8; RECORD_LEN];
                record[4] = zone_idx;
                record[8] = day.day_of_week;
                record[12..14].copy_from_slice(&minute_of_day.to_le_bytes());
                let centi = (sp.heat_setpoint * 100.0).round() as i16;
                record[16..18].copy_from_slice(&centi.to_le_bytes());
                raw.extend_from_slice(&record);
            }
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(9));
        encoder.write_all(&raw).expect("in-memory write cannot fail");
        let compressed = encoder.finish().expect("in-memory flush cannot fail");
        let hex = hex::encode_upper(compressed);

        if hex.is_empty() {
            return vec![String::new()];
        }
        hex.as_bytes()
            .chunks(FRAGMENT_HEX_LEN)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }

    /// Reassemble fragments (already ordered by `frag_index`) into a
    /// [`Schedule`], grouping decoded switchpoints by day of week in the
    /// order they appear in the packed stream (§4.4 decode format).
    fn from_hex_fragments(zone_idx: &str, fragments: &[String]) -> Result<Self> {
        let joined: String = fragments.concat();
        if joined.is_empty() {
            return Ok(Self { zone_idx: zone_idx.to_string(), days: Vec::new() });
        }

        let compressed =
            hex::decode(&joined).map_err(|e| RamsesError::Codec(format!("schedule hex decode: {e}")))?;

        let mut raw = Vec::new();
        ZlibDecoder::new(&compressed[..])
            .read_to_end(&mut raw)
            .map_err(|e| RamsesError::Codec(format!("schedule inflate: {e}")))?;

        if raw.len() % RECORD_LEN != 0 {
            return Err(RamsesError::Codec(format!(
                "schedule payload length {} is not a multiple of {RECORD_LEN}",
                raw.len()
            )));
        }

        let mut by_day: BTreeMap<u8, Vec<Switchpoint>> = BTreeMap::new();
        for record in raw.chunks(RECORD_LEN) {
            let day_of_week = record[8];
            let minute_of_day = u16::from_le_bytes([record[12], record[13]]);
            let centi = i16::from_le_bytes([record[16], record[17]]);
            by_day.entry(day_of_week).or_default().push(Switchpoint {
                time_of_day: format_time_of_day(minute_of_day),
                heat_setpoint: f64::from(centi) / 100.0,
            });
        }

        let days = by_day
            .into_iter()
            .map(|(day_of_week, switchpoints)| DaySchedule { day_of_week, switchpoints })
            .collect();
        Ok(Self { zone_idx: zone_idx.to_string(), days })
    }
}

fn format_time_of_day(minute_of_day: u16) -> String {
    format!("{:02}:{:02}", minute_of_day / 60, minute_of_day % 60)
}

fn parse_time_of_day(hhmm: &str) -> u16 {
    let (h, m) = hhmm.split_once(':').unwrap_or(("0", "0"));
    h.parse::<u16>().unwrap_or(0) * 60 + m.parse::<u16>().unwrap_or(0)
}

/// A fragment cached while a fetch is in flight, timestamped so stale
/// entries can be pruned relative to the newest arrival.
struct CachedFragment {
    hex: String,
    received_at: DateTime<Utc>,
}

/// Discard any cached fragment older than [`FRAGMENT_STALE_AFTER`] relative
/// to the newest received fragment, rewriting the slot to `None` so the next
/// request round re-fetches it (§4.4, §9: the source's prune loop was a
/// no-op; this is the explicit version).
fn prune_stale_fragments(fragments: &mut [Option<CachedFragment>]) {
    let Some(newest) = fragments.iter().flatten().map(|f| f.received_at).max() else { return };
    for slot in fragments.iter_mut() {
        if let Some(frag) = slot
            && newest - frag.received_at > FRAGMENT_STALE_AFTER
        {
            *slot = None;
        }
    }
}

/// Fetch a zone's schedule from the controller, fragment by fragment, while
/// holding that system's zone lock (§4.4, §5).
pub async fn get_schedule(
    transport: &Transport,
    system: &Arc<System>,
    ctl_addr: &Address,
    zone_idx: &str,
) -> Result<Schedule> {
    let _guard = system.acquire_zone_lock(zone_idx).await;

    let mut fragments: Vec<Option<CachedFragment>> = Vec::new();
    let mut frag_total_known: Option<u8> = None;

    loop {
        let next_idx = fragments
            .iter()
            .enumerate()
            .find(|(_, f)| f.is_none())
            .map(|(i, _)| i as u8 + 1)
            .unwrap_or(1);

        let payload_hex = format!("{zone_idx}00200008{next_idx:02X}{:02X}", frag_total_known.unwrap_or(0));
        let cmd = Command::new(Verb::RQ, ctl_addr.clone(), "0404", payload_hex)?
            .with_qos(Qos { priority: priority::HIGH, retries: 3, timeout: Duration::from_millis(300) })
            .with_callback(CallbackSpec::once(Duration::from_millis(300)));

        let rx = transport
            .send(cmd)
            .await
            .expect("callback was set, receiver must exist");
        let reply = rx.await.map_err(|_| RamsesError::ExpiredCallback("0404 RQ".into()))?;
        let Some(msg) = reply else {
            return Err(RamsesError::ExpiredCallback(format!(
                "schedule fragment {next_idx} for zone {zone_idx}"
            )));
        };

        let fields = msg.payload.as_fields().ok_or_else(|| {
            RamsesError::Codec("0404 reply did not decode to fields".into())
        })?;
        let total = fields
            .get("frag_total")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RamsesError::Codec("0404 reply missing frag_total".into()))? as u8;

        if total == NO_SCHEDULE_SENTINEL {
            return Ok(Schedule { zone_idx: zone_idx.to_string(), days: Vec::new() });
        }

        let frag_index = fields.get("frag_index").and_then(|v| v.as_u64()).unwrap_or(u64::from(next_idx)) as u8;
        let fragment = fields
            .get("fragment")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        if fragments.len() < total as usize {
            fragments.resize_with(total as usize, || None);
        }
        fragments[frag_index as usize - 1] = Some(CachedFragment { hex: fragment, received_at: msg.dtm });
        frag_total_known = Some(total);

        prune_stale_fragments(&mut fragments);

        if fragments.iter().all(Option::is_some) {
            break;
        }
        if frag_index == MAX_FRAGMENTS {
            return Err(RamsesError::Codec("schedule has too many fragments".into()));
        }
    }

    let ordered: Vec<String> = fragments.into_iter().map(|f| f.map(|f| f.hex).unwrap_or_default()).collect();
    match Schedule::from_hex_fragments(zone_idx, &ordered) {
        Ok(schedule) => Ok(schedule),
        Err(e) => {
            warn!(zone_idx, error = %e, "schedule codec failure, reporting empty schedule");
            Ok(Schedule { zone_idx: zone_idx.to_string(), days: Vec::new() })
        },
    }
}

/// Replace a zone's schedule, sending one `W` per fragment while holding the
/// zone lock for the whole transaction (§4.4).
pub async fn put_schedule(
    transport: &Transport,
    system: &Arc<System>,
    ctl_addr: &Address,
    zone_idx: &str,
    schedule: &Schedule,
) -> Result<()> {
    let _guard = system.acquire_zone_lock(zone_idx).await;

    let fragments = schedule.to_hex_fragments();
    let total = fragments.len() as u8;
    for (i, fragment) in fragments.iter().enumerate() {
        let frag_index = i as u8 + 1;
        let payload_hex = format!("{zone_idx}00200008{frag_index:02X}{total:02X}{fragment}");
        let cmd = Command::new(Verb::W, ctl_addr.clone(), "0404", payload_hex)?
            .with_qos(Qos { priority: priority::HIGH, retries: 3, timeout: Duration::from_millis(300) })
            .with_callback(CallbackSpec::once(Duration::from_millis(300)));

        let rx = transport
            .send(cmd)
            .await
            .expect("callback was set, receiver must exist");
        rx.await
            .map_err(|_| RamsesError::ExpiredCallback("0404 W".into()))?
            .ok_or_else(|| RamsesError::ExpiredCallback(format!("schedule put fragment {frag_index}")))?;
    }

    system.get_or_create_zone(zone_idx).await.set_schedule(schedule.clone()).await;
    Ok(())
}
