// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use crate::{
    error::{RamsesError, Result},
    protocol::{address::Address, header::correlation_header, packet::Verb},
};

/// Priority constants (lower = higher priority).
pub mod priority {
    pub const HIGHEST: i8 = 0;
    pub const HIGH: i8 = 2;
    pub const DEFAULT: i8 = 4;
    pub const LOW: i8 = 6;
    pub const LOWEST: i8 = 8;
}

/// Quality-of-service parameters attached to an outbound [`Command`].
#[derive(Debug, Clone, Copy)]
pub struct Qos {
    pub priority: i8,
    pub retries: u8,
    pub timeout: Duration,
}

impl Default for Qos {
    fn default() -> Self {
        Self { priority: priority::DEFAULT, retries: 3, timeout: Duration::from_millis(500) }
    }
}

/// How long the outbound loop waits for a matching reply on any one attempt
/// of a command (§4.2 step 2). `daemon` registrations (the `0418` null-RP
/// catcher) are a separate, out-of-band registration on the transport and
/// are not modeled here — see [`crate::transport::engine::Transport::register_daemon`].
#[derive(Debug, Clone, Copy)]
pub struct CallbackSpec {
    pub timeout: Duration,
}

impl CallbackSpec {
    pub fn once(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// An outbound request: the payload a driver or topology module wants to
/// send to the bus, along with its QoS and (optional) reply correlation.
#[derive(Debug, Clone)]
pub struct Command {
    pub verb: Verb,
    pub from_addr: Address,
    pub dest_addr: Address,
    pub code: String,
    pub payload_hex: String,
    pub qos: Qos,
    pub callback: Option<CallbackSpec>,
}

impl Command {
    pub fn new(verb: Verb, dest_addr: Address, code: impl Into<String>, payload_hex: impl Into<String>) -> Result<Self> {
        let code = code.into();
        let payload_hex = payload_hex.into();
        Self::validate(&payload_hex)?;
        let qos = default_qos(verb, &code);
        Ok(Self { verb, from_addr: Address::hgi(), dest_addr, code, payload_hex, qos, callback: None })
    }

    fn validate(payload_hex: &str) -> Result<()> {
        if payload_hex.len() > 96 {
            return Err(RamsesError::Validation(format!(
                "payload hex length {} exceeds 96",
                payload_hex.len()
            )));
        }
        if !payload_hex.len().is_multiple_of(2) || !payload_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RamsesError::Validation(format!("payload is not valid hex: {payload_hex}")));
        }
        Ok(())
    }

    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_callback(mut self, callback: CallbackSpec) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Apply this code's default QoS (§4.1), unless the caller has already
    /// set a custom one explicitly via [`Command::with_qos`].
    pub fn default_qos_for_code(code: &str, verb: Verb) -> Qos {
        default_qos(verb, code)
    }

    /// The TX correlation header: derivable purely from `(verb, dest, code,
    /// payload)`.
    pub fn tx_header(&self) -> Option<String> {
        correlation_header(self.verb, &self.dest_addr, &self.code, &self.payload_hex, false)
    }

    /// The RX correlation header: the TX header with the verb rewritten per
    /// the reply rule.
    pub fn rx_header(&self) -> Option<String> {
        correlation_header(self.verb, &self.dest_addr, &self.code, &self.payload_hex, true)
    }

    pub fn to_wire(&self) -> String {
        format!(
            "{} --- {} {} --:------ {} {:03} {}",
            self.verb.as_wire(),
            self.from_addr,
            self.dest_addr,
            self.code,
            self.payload_hex.len() / 2,
            self.payload_hex
        )
    }
}

fn default_qos(verb: Verb, code: &str) -> Qos {
    match (code, verb) {
        ("0016" | "1F09", Verb::RQ) => {
            Qos { priority: priority::HIGH, retries: 5, ..Qos::default() }
        },
        ("0404", Verb::RQ | Verb::W) => Qos {
            priority: priority::HIGH,
            timeout: Duration::from_millis(300),
            ..Qos::default()
        },
        ("0418", Verb::RQ) => Qos { priority: priority::LOW, retries: 3, ..Qos::default() },
        _ => Qos::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_zone_setpoint_headers() {
        let dest = Address::parse("01:145038").expect("addr");
        let cmd = Command::new(Verb::W, dest, "2309", "0107D0").expect("valid command");
        assert_eq!(cmd.tx_header().as_deref(), Some(" W|01:145038|2309|01"));
        assert_eq!(cmd.rx_header().as_deref(), Some(" I|01:145038|2309|01"));
    }

    #[test]
    fn rejects_oversized_payload() {
        let dest = Address::parse("01:145038").expect("addr");
        let huge = "AB".repeat(49);
        assert!(Command::new(Verb::RQ, dest, "0418", huge).is_err());
    }

    #[test]
    fn rejects_non_hex_payload() {
        let dest = Address::parse("01:145038").expect("addr");
        assert!(Command::new(Verb::RQ, dest, "0418", "ZZ").is_err());
    }

    #[test]
    fn default_qos_boosts_0418_rq() {
        let qos = Command::default_qos_for_code("0418", Verb::RQ);
        assert_eq!(qos.priority, priority::LOW);
        assert_eq!(qos.retries, 3);
    }

    #[test]
    fn default_qos_boosts_schedule() {
        let qos = Command::default_qos_for_code("0404", Verb::RQ);
        assert_eq!(qos.priority, priority::HIGH);
        assert_eq!(qos.timeout, Duration::from_millis(300));
    }
}
