// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Protocol opcode tables: the bits of `const.py` that the command/response
//! engine and topology model consult directly.

use chrono::{DateTime, Utc};

/// Highest zone index + 1; zone indices run `00..MAX_ZONES-1`.
pub const MAX_ZONES: usize = 12;

/// Domain id for the DHW (stored hot water) "zone".
pub const DOMAIN_DHW: &str = "FA";
/// Reserved domain ids that are never real zones.
pub const DOMAIN_RESERVED: &[&str] = &["FC", "FF"];

/// Codes whose payload carries no leading domain/zone id byte.
pub const CODES_SANS_DOMAIN_ID: &[&str] = &[
    "0001", "0002", "0009", "1030", "1060", "10A0", "10E0", "1260", "1F09", "1F41",
    "2E04", "313F", "30C9", "3220", "3B00", "3EF0", "3EF1", "7FFF",
];

/// Codes with no RX header at all (fire-and-forget).
pub const CODES_NO_RX_HEADER: &[&str] = &["0001", "7FFF"];

/// The `0418` null-RP sentinel payload: "no more fault-log entries".
/// See DESIGN.md for the provenance of this value.
pub const NULL_RP_0418: &str =
    "000000B0000000000000000000007FFFFF7000000000";

/// Convert a temperature in °C to the protocol's signed fixed-point hex word
/// (`value * 100` as a 16-bit big-endian hex string), or `7FFF` for "none".
pub fn temp_to_hex(value: Option<f64>) -> String {
    match value {
        None => "7FFF".to_string(),
        Some(v) => {
            let centi = (v * 100.0).round() as i32;
            format!("{:04X}", (centi as i16) as u16)
        },
    }
}

/// Inverse of [`temp_to_hex`].
pub fn hex_to_temp(hex: &str) -> Option<f64> {
    if hex.eq_ignore_ascii_case("7FFF") {
        return None;
    }
    let raw = u16::from_str_radix(hex, 16).ok()?;
    Some((raw as i16) as f64 / 100.0)
}

/// Encode a timestamp into the wire's 14-byte-hex, little-endian field order:
/// `ss mm hh DD MM YYYY` (each field a 2-hex byte, year 2 bytes little-endian).
pub fn dtm_to_hex(dtm: DateTime<Utc>) -> String {
    use chrono::{Datelike, Timelike};
    format!(
        "{:02X}{:02X}{:02X}{:02X}{:02X}{:04X}",
        dtm.second(),
        dtm.minute(),
        dtm.hour(),
        dtm.day(),
        dtm.month(),
        dtm.year()
    )
}
