// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use crate::protocol::message::Message;

/// A registration for one correlation header: either a one-shot attempt,
/// consumed by the outbound loop's per-attempt wait (§4.2 step 2), or a
/// `daemon` registration that survives being invoked, e.g. the `0418`
/// null-RP catcher (§4.3).
enum Entry {
    Once(oneshot::Sender<Message>),
    Daemon(mpsc::UnboundedSender<Message>),
}

/// Maps a response correlation header to the handler awaiting it.
///
/// Single-threaded by design (§5): the transport's inbound dispatch is the
/// only writer and the only reader.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: HashMap<String, Entry>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Register a one-shot callback for `header`. Overwrites any stale entry
    /// left behind by a prior, now-expired attempt under the same header.
    pub fn register_once(&mut self, header: String, tx: oneshot::Sender<Message>) {
        self.entries.insert(header, Entry::Once(tx));
    }

    /// Register a `daemon` callback that is never removed by a match.
    pub fn register_daemon(&mut self, header: String, tx: mpsc::UnboundedSender<Message>) {
        self.entries.insert(header, Entry::Daemon(tx));
    }

    pub fn deregister(&mut self, header: &str) {
        self.entries.remove(header);
    }

    /// Dispatch `msg` to whatever is registered under its correlation header,
    /// if anything. Returns `true` if a registration matched (regardless of
    /// whether delivery succeeded, e.g. the receiver having been dropped).
    pub fn dispatch(&mut self, header: &str, msg: &Message) -> bool {
        match self.entries.remove(header) {
            Some(Entry::Once(tx)) => {
                let _ = tx.send(msg.clone());
                true
            },
            Some(Entry::Daemon(tx)) => {
                let matched = tx.send(msg.clone()).is_ok();
                self.entries.insert(header.to_string(), Entry::Daemon(tx));
                matched
            },
            None => false,
        }
    }
}
