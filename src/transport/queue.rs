// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::atomic::{AtomicU64, Ordering as AtomicOrdering},
};

use tokio::sync::oneshot;

use crate::{command::model::Command, protocol::message::Message};

static SEQ: AtomicU64 = AtomicU64::new(0);

/// A queued command, carrying a monotonic sequence number used as the FIFO
/// tiebreaker within a priority band, and the channel its final result (if
/// any) is delivered through.
pub struct QueueEntry {
    pub command: Command,
    seq: u64,
    pub result_tx: Option<oneshot::Sender<Option<Message>>>,
}

impl QueueEntry {
    pub fn new(command: Command, result_tx: Option<oneshot::Sender<Option<Message>>>) -> Self {
        let seq = SEQ.fetch_add(1, AtomicOrdering::Relaxed);
        Self { command, seq, result_tx }
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.command.qos.priority == other.command.qos.priority && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want lowest priority value (=highest
        // priority) and lowest seq (=earliest enqueued) to sort "greatest".
        other
            .command
            .qos
            .priority
            .cmp(&self.command.qos.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A priority queue with FIFO tiebreaking within a band (§8 invariants 2, 3).
#[derive(Default)]
pub struct CommandQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.heap.push(entry);
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        command::model::{priority, Command},
        protocol::{address::Address, packet::Verb},
        transport::queue::{CommandQueue, QueueEntry},
    };

    fn cmd(p: i8) -> Command {
        let dest = Address::parse("01:145038").expect("addr");
        Command::new(Verb::RQ, dest, "0016", "00")
            .expect("valid")
            .with_qos(crate::command::model::Qos {
                priority: p,
                retries: 0,
                timeout: std::time::Duration::from_millis(1),
            })
    }

    #[test]
    fn s6_pops_by_priority_then_fifo() {
        let mut q = CommandQueue::new();
        q.push(QueueEntry::new(cmd(priority::DEFAULT), None)); // A
        q.push(QueueEntry::new(cmd(priority::HIGH), None)); // B
        q.push(QueueEntry::new(cmd(priority::HIGH), None)); // C

        let first = q.pop().expect("first");
        let second = q.pop().expect("second");
        let third = q.pop().expect("third");

        assert_eq!(first.command.qos.priority, priority::HIGH); // B
        assert_eq!(second.command.qos.priority, priority::HIGH); // C
        assert_eq!(third.command.qos.priority, priority::DEFAULT); // A
    }

    #[test]
    fn s2_higher_priority_overtakes_earlier_default() {
        let mut q = CommandQueue::new();
        q.push(QueueEntry::new(cmd(priority::DEFAULT), None)); // b
        q.push(QueueEntry::new(cmd(priority::HIGH), None)); // a

        let first = q.pop().expect("first");
        assert_eq!(first.command.qos.priority, priority::HIGH);
    }
}
