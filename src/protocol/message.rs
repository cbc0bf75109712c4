// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::protocol::{
    address::Address,
    codes::hex_to_temp,
    packet::{Packet, Verb},
};

/// A message payload is either a mapping (per-code schema), an ordered
/// sequence of per-zone entries (`30C9`, `000A`, `2309` arrays), or an
/// opaque hex blob for codes this crate does not decode.
#[derive(Debug, Clone)]
pub enum Payload {
    Fields(Map<String, Value>),
    Array(Vec<Map<String, Value>>),
    Raw(String),
}

impl Payload {
    pub fn as_fields(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Fields(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Map<String, Value>]> {
        match self {
            Payload::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.as_fields()?.get(key)?.as_str()
    }
}

/// A decoded packet: `src`, `dst`, `verb`, `code`, typed `payload`, and the
/// arrival timestamp.
#[derive(Debug, Clone)]
pub struct Message {
    pub src: Address,
    pub dst: Address,
    pub verb: Verb,
    pub code: String,
    pub payload: Payload,
    pub payload_hex: String,
    pub dtm: DateTime<Utc>,
}

impl Message {
    pub fn from_packet(pkt: &Packet) -> Self {
        let payload = decode_payload(&pkt.code, &pkt.payload_hex);
        Self {
            src: pkt.src.clone(),
            dst: pkt.dst.clone(),
            verb: pkt.verb,
            code: pkt.code.clone(),
            payload,
            payload_hex: pkt.payload_hex.clone(),
            dtm: pkt.dtm,
        }
    }
}

/// Decode a packet's hex payload into a typed [`Payload`] for the codes this
/// crate understands; anything else is carried as opaque hex.
pub fn decode_payload(code: &str, hex: &str) -> Payload {
    match code {
        "0418" => decode_0418(hex),
        "0404" => decode_0404(hex),
        "30C9" => decode_30c9(hex),
        "1F09" => decode_1f09(hex),
        "10A0" => decode_10a0(hex),
        "1260" => decode_1260(hex),
        "3220" => decode_3220(hex),
        "3B00" => decode_3b00(hex),
        "3EF0" => decode_3ef0(hex),
        "3EF1" => decode_3ef1(hex),
        _ => Payload::Raw(hex.to_string()),
    }
}

fn fields(pairs: Vec<(&str, Value)>) -> Payload {
    let mut m = Map::new();
    for (k, v) in pairs {
        m.insert(k.to_string(), v);
    }
    Payload::Fields(m)
}

fn decode_0418(hex: &str) -> Payload {
    if hex.len() < 6 {
        return Payload::Raw(hex.to_string());
    }
    let log_idx = &hex[4..6];
    fields(vec![
        ("log_idx", Value::String(log_idx.to_string())),
        ("raw", Value::String(hex.to_string())),
    ])
}

fn decode_0404(hex: &str) -> Payload {
    if hex.len() < 14 {
        return Payload::Raw(hex.to_string());
    }
    let zone_idx = &hex[0..2];
    let frag_index = u8::from_str_radix(&hex[10..12], 16).unwrap_or(0);
    let frag_total = u8::from_str_radix(&hex[12..14], 16).unwrap_or(0);
    let fragment = hex.get(14..).unwrap_or("").to_string();
    fields(vec![
        ("zone_idx", Value::String(zone_idx.to_string())),
        ("frag_index", Value::from(frag_index)),
        ("frag_total", Value::from(frag_total)),
        ("fragment", Value::String(fragment)),
    ])
}

fn decode_30c9(hex: &str) -> Payload {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 6 <= hex.len() {
        let zone_idx = hex[i..i + 2].to_string();
        let temperature = hex_to_temp(&hex[i + 2..i + 6]);
        let mut m = Map::new();
        m.insert("zone_idx".to_string(), Value::String(zone_idx));
        m.insert(
            "temperature".to_string(),
            temperature.map(Value::from).unwrap_or(Value::Null),
        );
        out.push(m);
        i += 6;
    }
    Payload::Array(out)
}

fn decode_1f09(hex: &str) -> Payload {
    if hex.len() < 6 {
        return Payload::Raw(hex.to_string());
    }
    let remaining = u16::from_str_radix(&hex[2..6], 16).unwrap_or(0);
    fields(vec![("remaining_seconds", Value::from(remaining))])
}

fn decode_10a0(hex: &str) -> Payload {
    if hex.len() < 6 {
        return Payload::Raw(hex.to_string());
    }
    let setpoint = hex_to_temp(&hex[2..6]);
    fields(vec![
        ("domain_id", Value::String(hex[0..2].to_string())),
        ("setpoint", setpoint.map(Value::from).unwrap_or(Value::Null)),
    ])
}

fn decode_1260(hex: &str) -> Payload {
    if hex.len() < 6 {
        return Payload::Raw(hex.to_string());
    }
    let temperature = hex_to_temp(&hex[2..6]);
    fields(vec![(
        "temperature",
        temperature.map(Value::from).unwrap_or(Value::Null),
    )])
}

fn decode_3220(hex: &str) -> Payload {
    fields(vec![("raw", Value::String(hex.to_string()))])
}

fn decode_3b00(hex: &str) -> Payload {
    fields(vec![("raw", Value::String(hex.to_string()))])
}

fn decode_3ef0(hex: &str) -> Payload {
    fields(vec![("raw", Value::String(hex.to_string()))])
}

fn decode_3ef1(hex: &str) -> Payload {
    fields(vec![("raw", Value::String(hex.to_string()))])
}
