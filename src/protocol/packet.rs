// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use chrono::{DateTime, Utc};

use crate::{
    error::{RamsesError, Result},
    protocol::address::Address,
};

/// One of the four RAMSES-II verbs. Kept at their wire width (`" I"`, `" W"`)
/// so formatting round-trips without re-padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    I,
    RQ,
    RP,
    W,
}

impl Verb {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Verb::I => " I",
            Verb::RQ => "RQ",
            Verb::RP => "RP",
            Verb::W => " W",
        }
    }

    /// Accepts both the wire-padded (`" I"`, `" W"`) and whitespace-collapsed
    /// (`"I"`, `"W"`) forms, since [`Packet::parse`] splits a line on runs of
    /// whitespace and loses the padding.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            " I" | "I" => Some(Verb::I),
            "RQ" => Some(Verb::RQ),
            "RP" => Some(Verb::RP),
            " W" | "W" => Some(Verb::W),
            _ => None,
        }
    }

    /// Rewrite this verb as it appears in the matching reply: `RQ -> RP`,
    /// `W -> I`. Any other verb is not rewritten (a response never answers
    /// an `I` or an `RP`).
    pub fn as_response(&self) -> Verb {
        match self {
            Verb::RQ => Verb::RP,
            Verb::W => Verb::I,
            other => *other,
        }
    }
}

/// A raw framed packet, as read off the wire: `rssi verb --- src dst ctx code len payload`.
#[derive(Debug, Clone)]
pub struct Packet {
    pub rssi: Option<u16>,
    pub verb: Verb,
    pub src: Address,
    pub dst: Address,
    pub ctx: Address,
    pub code: String,
    pub payload_hex: String,
    pub dtm: DateTime<Utc>,
}

impl Packet {
    /// Parse a single wire line (sans `\r\n`). Accepts both inbound frames
    /// (with an rssi prefix) and self-authored command echoes (without one).
    pub fn parse(line: &str, dtm: DateTime<Utc>) -> Result<Self> {
        let line = line.trim();
        let fields: Vec<&str> = line.split_whitespace().collect();

        // With rssi: rssi verb --- src dst ctx code len payload (8 fields + payload)
        // Without:         verb --- src dst ctx code len payload
        let (rssi, rest) = if fields.first().is_some_and(|f| f.len() == 3 && f.chars().all(|c| c.is_ascii_digit())) {
            (Some(fields[0].parse::<u16>().map_err(|e| RamsesError::Parse(e.to_string()))?), &fields[1..])
        } else {
            (None, &fields[..])
        };

        if rest.len() < 7 || rest[1] != "---" {
            return Err(RamsesError::Parse(format!("malformed packet line: {line}")));
        }

        let verb = Verb::parse(rest[0])
            .ok_or_else(|| RamsesError::Parse(format!("unknown verb: {}", rest[0])))?;
        let src = Address::parse(rest[2])
            .ok_or_else(|| RamsesError::Parse(format!("bad src address: {}", rest[2])))?;
        let dst = Address::parse(rest[3])
            .ok_or_else(|| RamsesError::Parse(format!("bad dst address: {}", rest[3])))?;
        let ctx = Address::parse(rest[4])
            .ok_or_else(|| RamsesError::Parse(format!("bad ctx address: {}", rest[4])))?;
        let code = rest[5].to_ascii_uppercase();
        let declared_len: usize = rest[6]
            .parse()
            .map_err(|e: std::num::ParseIntError| RamsesError::Parse(e.to_string()))?;
        let payload_hex = rest.get(7).copied().unwrap_or("").to_ascii_uppercase();

        if payload_hex.len() / 2 != declared_len {
            return Err(RamsesError::Parse(format!(
                "declared len {declared_len} does not match payload of {} bytes",
                payload_hex.len() / 2
            )));
        }

        Ok(Self { rssi, verb, src, dst, ctx, code, payload_hex, dtm })
    }

    /// Render this packet in the wire grammar, without an rssi prefix (the
    /// form used for outbound commands).
    pub fn to_wire(&self) -> String {
        format!(
            "{} --- {} {} {} {} {:03} {}",
            self.verb.as_wire(),
            self.src,
            self.dst,
            self.ctx,
            self.code,
            self.payload_hex.len() / 2,
            self.payload_hex
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_example_line() {
        let line = "045 RP --- 01:145038 07:030741 --:------ 10A0 006 0018380003E8";
        let pkt = Packet::parse(line, Utc::now()).expect("should parse");
        assert_eq!(pkt.rssi, Some(45));
        assert!(matches!(pkt.verb, Verb::RP));
        assert_eq!(pkt.src.to_string(), "01:145038");
        assert_eq!(pkt.dst.to_string(), "07:030741");
        assert_eq!(pkt.code, "10A0");
        assert_eq!(pkt.payload_hex, "0018380003E8");
    }

    #[test]
    fn rejects_length_mismatch() {
        let line = "045 RP --- 01:145038 07:030741 --:------ 10A0 099 0018380003E8";
        assert!(Packet::parse(line, Utc::now()).is_err());
    }

    #[test]
    fn round_trips_without_rssi() {
        let line = " I --- 01:145038 --:------ 01:145038 3B00 002 00C8";
        let pkt = Packet::parse(line, Utc::now()).expect("should parse");
        assert_eq!(pkt.to_wire(), line);
    }
}
