// SPDX-License-Identifier: AGPL-3.0-or-later

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::model::{address::DeviceId, opcode::Code, verb::Verb};

/// Outbound command priority (spec.md §3, §4.5). Ordered so that
/// `Highest` sorts first in a max-heap-by-priority comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Lowest,
    Low,
    Default,
    High,
    Highest,
}

/// An outbound request with QoS attributes (spec.md §3 Command).
/// Retries re-use the same `Command`; it is consumed exactly once by the
/// dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub verb: Verb,
    pub dest: DeviceId,
    pub code: Code,
    pub payload: Vec<u8>,
    pub priority: Priority,
    pub retries: u8,
    pub disable_backoff: bool,
    pub enqueued_at: DateTime<Utc>,
    /// Tie-breaker for equal-priority, equal-timestamp enqueues.
    pub sequence: u64,
    /// Retries already spent; carried across the requeue-and-retransmit
    /// cycle so a command's retry budget actually exhausts (spec.md §4.6).
    pub attempt: u32,
}

impl Command {
    pub fn new(verb: Verb, dest: DeviceId, code: Code, payload: Vec<u8>) -> Self {
        Self {
            verb,
            dest,
            code,
            payload,
            priority: Priority::Default,
            retries: 0,
            disable_backoff: false,
            enqueued_at: Utc::now(),
            sequence: 0,
            attempt: 0,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retries = retries.min(7);
        self
    }
}

/// `(dest, code)` — the key the dispatcher enforces at-most-one-in-flight
/// on (spec.md §4.6) and the PendingReplyTable is keyed by (with verb).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub dest: DeviceId,
    pub code: Code,
    pub verb: Verb,
}

impl Command {
    pub fn pending_key(&self) -> PendingKey {
        PendingKey { dest: self.dest, code: self.code, verb: self.verb }
    }
}

/// Total order matching spec.md §8 "queue ordering": higher priority
/// first, then earlier enqueue timestamp, then lower sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry(pub Command);

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.enqueued_at.cmp(&self.0.enqueued_at))
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(priority: Priority, seq: u64) -> Command {
        let mut c = Command::new(Verb::RQ, "01:145038".parse().unwrap(), Code::SYSTEM_SYNC, vec![]);
        c.priority = priority;
        c.sequence = seq;
        c
    }

    #[test]
    fn higher_priority_orders_first_in_a_max_heap() {
        let a = QueueEntry(cmd(Priority::High, 0));
        let b = QueueEntry(cmd(Priority::Low, 1));
        assert!(a > b);
    }

    #[test]
    fn equal_priority_orders_by_earlier_enqueue_first() {
        let mut a = cmd(Priority::Default, 0);
        let mut b = cmd(Priority::Default, 1);
        a.enqueued_at = DateTime::from_timestamp(100, 0).expect("valid");
        b.enqueued_at = DateTime::from_timestamp(200, 0).expect("valid");
        assert!(QueueEntry(a) > QueueEntry(b));
    }
}
