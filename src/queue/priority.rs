// SPDX-License-Identifier: AGPL-3.0-or-later

//! A bounded priority queue with fairness and cancellation (spec.md §4.5).

use std::collections::BinaryHeap;

use thiserror::Error;
use tokio::sync::Notify;

use super::command::{Command, QueueEntry};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("command queue is at capacity")]
pub struct QueueFull;

/// Bounded priority queue (capacity 200 by default). Ordering is
/// `(priority ascending-by-importance, enqueue_ts ascending)`, ties broken
/// by a monotonically increasing counter (spec.md §4.5, §8).
pub struct CommandQueue {
    heap: BinaryHeap<QueueEntry>,
    capacity: usize,
    next_sequence: u64,
    notify: Notify,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self { heap: BinaryHeap::new(), capacity, next_sequence: 0, notify: Notify::new() }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Assigns the tie-break sequence and enqueues. Fails with `QueueFull`
    /// at capacity; the caller decides whether to drop or back off.
    pub fn enqueue(&mut self, mut cmd: Command) -> Result<(), QueueFull> {
        if self.heap.len() >= self.capacity {
            return Err(QueueFull);
        }
        cmd.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueueEntry(cmd));
        self.notify.notify_one();
        Ok(())
    }

    /// Pops the highest-priority, earliest-enqueued command, if any.
    pub fn try_dequeue(&mut self) -> Option<Command> {
        self.heap.pop().map(|e| e.0)
    }

    /// Blocks cooperatively until a command is available, then pops it.
    pub async fn dequeue(&mut self) -> Command {
        loop {
            if let Some(cmd) = self.try_dequeue() {
                return cmd;
            }
            self.notify.notified().await;
        }
    }

    /// Removes queued (not in-flight) entries matching `predicate`.
    /// Returns the number removed.
    pub fn cancel(&mut self, predicate: impl Fn(&Command) -> bool) -> usize {
        let before = self.heap.len();
        let remaining: Vec<QueueEntry> =
            self.heap.drain().filter(|e| !predicate(&e.0)).collect();
        self.heap = BinaryHeap::from(remaining);
        before - self.heap.len()
    }
}
