// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tracing::{debug, warn};

use crate::{
    command::model::Command,
    protocol::message::Message,
    topology::gateway::Gateway,
    transport::{
        callback::CallbackRegistry,
        queue::{CommandQueue, QueueEntry},
    },
};

/// The prioritized command queue with QoS (§4.2): a single-consumer outbound
/// loop serializes transmission, tracks retries and per-attempt timeouts,
/// and correlates replies; a second task dispatches inbound messages to
/// registered callbacks and the topology model, strictly in arrival order.
pub struct Transport {
    queue: Mutex<CommandQueue>,
    queue_ready: Notify,
    callbacks: Mutex<CallbackRegistry>,
    line_tx: mpsc::UnboundedSender<String>,
    gateway: Arc<Gateway>,
}

impl Transport {
    pub fn new(line_tx: mpsc::UnboundedSender<String>, gateway: Arc<Gateway>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(CommandQueue::new()),
            queue_ready: Notify::new(),
            callbacks: Mutex::new(CallbackRegistry::new()),
            line_tx,
            gateway,
        })
    }

    /// Enqueue `cmd` without blocking. Returns a receiver for the eventual
    /// reply iff the command carries a callback; the receiver resolves to
    /// `None` if all retries are exhausted without a matching reply.
    pub async fn send(&self, cmd: Command) -> Option<oneshot::Receiver<Option<Message>>> {
        let (result_tx, result_rx) = if cmd.callback.is_some() {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        self.queue.lock().await.push(QueueEntry::new(cmd, result_tx));
        self.queue_ready.notify_one();
        result_rx
    }

    /// Register a callback that survives being invoked, e.g. the `0418`
    /// null-RP catcher (§4.2, §4.3).
    pub async fn register_daemon(&self, header: String, tx: mpsc::UnboundedSender<Message>) {
        self.callbacks.lock().await.register_daemon(header, tx);
    }

    /// Drive the outbound loop until the process shuts down. Pops the
    /// highest-priority command, transmits it, and retries per its QoS
    /// until a matching reply arrives or retries are exhausted (§4.2).
    pub async fn run_outbound_loop(self: Arc<Self>) {
        loop {
            let entry = loop {
                if let Some(entry) = self.queue.lock().await.pop() {
                    break entry;
                }
                self.queue_ready.notified().await;
            };

            let QueueEntry { command, result_tx, .. } = entry;
            let result = self.run_one_command(&command).await;
            if let Some(tx) = result_tx {
                let _ = tx.send(result);
            }
        }
    }

    async fn run_one_command(&self, command: &Command) -> Option<Message> {
        let Some(callback) = command.callback else {
            let _ = self.line_tx.send(command.to_wire());
            return None;
        };

        let Some(rx_header) = command.rx_header() else {
            let _ = self.line_tx.send(command.to_wire());
            return None;
        };

        let mut attempts_left = command.qos.retries as i32 + 1;
        loop {
            let (tx, rx) = oneshot::channel();
            self.callbacks.lock().await.register_once(rx_header.clone(), tx);

            debug!(code = %command.code, header = %rx_header, "transmitting command");
            if self.line_tx.send(command.to_wire()).is_err() {
                warn!("gateway write channel closed");
                self.callbacks.lock().await.deregister(&rx_header);
                return None;
            }

            match tokio::time::timeout(callback.timeout, rx).await {
                Ok(Ok(msg)) => return Some(msg),
                _ => {
                    self.callbacks.lock().await.deregister(&rx_header);
                    attempts_left -= 1;
                    if attempts_left <= 0 {
                        warn!(code = %command.code, header = %rx_header, "callback expired");
                        return None;
                    }
                },
            }
        }
    }

    /// Process one inbound message: correlate it against any registered
    /// callback, then forward it to the topology model (§4.2 inbound
    /// dispatch, §4.5).
    pub async fn on_message(&self, msg: Message) {
        let peer = if msg.src.device_type == crate::protocol::address::HGI_TYPE {
            &msg.dst
        } else {
            &msg.src
        };
        if let Some(header) = crate::protocol::header::correlation_header(
            msg.verb,
            peer,
            &msg.code,
            &msg.payload_hex,
            true,
        ) {
            self.callbacks.lock().await.dispatch(&header, &msg);
        }

        self.gateway.handle_message(msg).await;
    }
}
