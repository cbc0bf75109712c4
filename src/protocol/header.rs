// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The request/response header correlation that turns a stream of packets
//! into logical transactions (§3, §8 invariant 1).

use crate::protocol::{
    address::Address,
    codes::{CODES_NO_RX_HEADER, CODES_SANS_DOMAIN_ID, NULL_RP_0418},
    packet::Verb,
};

/// Compute the QoS correlation header for a packet.
///
/// `peer_addr` is the non-HGI party to the exchange (the `dest_addr` of a
/// `Command`, or the counterparty address of an inbound `Message`).
/// `as_response` rewrites the verb per the RX-header rule (`RQ -> RP`,
/// `W -> I`); pass `false` to get the TX header of an outbound command.
pub fn correlation_header(
    verb: Verb,
    peer_addr: &Address,
    code: &str,
    payload_hex: &str,
    as_response: bool,
) -> Option<String> {
    if as_response && CODES_NO_RX_HEADER.contains(&code) {
        return None;
    }

    let verb = if as_response { verb.as_response() } else { verb };
    let header = format!("{}|{}|{}", verb.as_wire(), peer_addr, code);

    match code {
        "0005" | "000C" => {
            let ctx = payload_hex.get(0..4)?;
            Some(format!("{header}|{ctx}"))
        },
        "0404" => {
            let zone_idx = payload_hex.get(0..2)?;
            let frag_idx = payload_hex.get(10..12)?;
            Some(format!("{header}|{zone_idx}{frag_idx}"))
        },
        "0418" => {
            if payload_hex.eq_ignore_ascii_case(NULL_RP_0418) {
                Some(header)
            } else {
                let log_idx = payload_hex.get(4..6)?;
                Some(format!("{header}|{log_idx}"))
            }
        },
        c if CODES_SANS_DOMAIN_ID.contains(&c) => Some(header),
        _ => {
            let domain_id = payload_hex.get(0..2)?;
            Some(format!("{header}|{domain_id}"))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_setpoint_headers() {
        let peer = Address::parse("01:145038").expect("addr");
        let tx = correlation_header(Verb::W, &peer, "2309", "0107D0", false).expect("tx");
        assert_eq!(tx, " W|01:145038|2309|01");
        let rx = correlation_header(Verb::W, &peer, "2309", "0107D0", true).expect("rx");
        assert_eq!(rx, " I|01:145038|2309|01");
    }

    #[test]
    fn fire_and_forget_codes_have_no_rx_header() {
        let peer = Address::parse("01:145038").expect("addr");
        assert!(correlation_header(Verb::I, &peer, "0001", "00", true).is_none());
        assert!(correlation_header(Verb::I, &peer, "0001", "00", false).is_some());
    }

    #[test]
    fn fault_log_null_rp_has_no_context() {
        let peer = Address::parse("01:145038").expect("addr");
        let h = correlation_header(Verb::RQ, &peer, "0418", NULL_RP_0418, true).expect("rp");
        assert_eq!(h, "RP|01:145038|0418");
    }

    #[test]
    fn fault_log_entry_uses_log_idx() {
        let peer = Address::parse("01:145038").expect("addr");
        let h = correlation_header(Verb::RQ, &peer, "0418", "00000000", true).expect("rp");
        assert_eq!(h, "RP|01:145038|0418|00");
    }

    #[test]
    fn schedule_uses_zone_and_frag_idx() {
        let peer = Address::parse("01:145038").expect("addr");
        let h = correlation_header(Verb::RQ, &peer, "0404", "00200008000103", true).expect("rp");
        assert_eq!(h, "RP|01:145038|0404|0001");
    }
}
