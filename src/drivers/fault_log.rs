// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Sequential `0418` fault-log retrieval (§4.3): pull log entries one at a
//! time by index until the controller replies with the null-RP sentinel, a
//! configured limit is hit, or the overall deadline expires.

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;

use crate::{
    command::model::{priority, CallbackSpec, Command, Qos},
    error::{RamsesError, Result},
    protocol::{
        address::Address,
        codes::NULL_RP_0418,
        header::correlation_header,
        message::Message,
        packet::Verb,
    },
    topology::system::System,
    transport::engine::Transport,
};

/// Fetch up to `limit` fault-log entries from `ctl_addr`, stopping early on
/// the null-RP sentinel. Each successfully retrieved entry is also recorded
/// on `system`.
pub async fn get_fault_log(
    transport: &Arc<Transport>,
    system: &Arc<System>,
    ctl_addr: &Address,
    limit: usize,
    overall_timeout: Duration,
) -> Result<Vec<Message>> {
    let null_header = correlation_header(Verb::RQ, ctl_addr, "0418", NULL_RP_0418, true)
        .ok_or_else(|| RamsesError::Codec("0418 null-RP header is unexpectedly absent".into()))?;
    let (null_tx, mut null_rx) = mpsc::unbounded_channel();
    transport.register_daemon(null_header, null_tx).await;

    let mut entries = Vec::new();
    let deadline = tokio::time::Instant::now() + overall_timeout;

    for idx in 0..limit {
        let payload_hex = format!("{idx:06X}");
        let cmd = Command::new(Verb::RQ, ctl_addr.clone(), "0418", payload_hex)?
            .with_qos(Qos { priority: priority::LOW, retries: 3, ..Qos::default() })
            .with_callback(CallbackSpec::once(Duration::from_millis(500)));
        let rx = transport.send(cmd).await.expect("callback was set, receiver must exist");

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            null_msg = null_rx.recv() => {
                if null_msg.is_some() {
                    break;
                }
            },
            reply = rx => {
                match reply {
                    Ok(Some(msg)) => {
                        let log_idx = msg.payload.get_str("log_idx").unwrap_or_default().to_string();
                        system.record_fault_log_entry(log_idx, msg.clone()).await;
                        entries.push(msg);
                    },
                    _ => break,
                }
            },
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    /// Payload is 3 bytes / 6 hex chars (`evohome_rf/command.py::_rq_log_entry`'s
    /// `f"{log_idx:06X}"`), not this crate's own 4-byte guess — but the
    /// log_idx still lands at the `header.rs` `payload[4..6]` offset because
    /// it occupies the low byte of that 3-byte value.
    #[test]
    fn request_payload_carries_log_idx_at_the_header_offset() {
        let payload_hex = format!("{:06X}", 5u8);
        assert_eq!(payload_hex.len(), 6);
        assert_eq!(&payload_hex[4..6], "05");
    }

    #[test]
    fn request_payload_encodes_larger_log_idx_across_full_3_bytes() {
        let payload_hex = format!("{:06X}", 0x1234u32);
        assert_eq!(payload_hex, "001234");
    }
}
