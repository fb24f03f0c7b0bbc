// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ties the command queue, the pending-reply table, and the per-command
//! state machine together with duty-cycle gating (spec.md §4.6).

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, warn};

use crate::cfg::config::QosConfig;
use crate::dispatcher::pending::PendingReplyTable;
use crate::dispatcher::state_machine::{self, CommandState, Event, Outcome};
use crate::model::message::Message;
use crate::queue::command::{Command, PendingKey};
use crate::queue::priority::CommandQueue;
use crate::utils::jitter_millis;

/// One transmitted-bytes sample in the rolling duty-cycle window.
struct AirtimeSample {
    at: DateTime<Utc>,
    bytes: u32,
}

/// Drives outbound commands through queue -> wire -> reply, enforcing
/// at-most-one-in-flight per `(dest, code, verb)` and a duty-cycle
/// ceiling over a rolling 60s window (spec.md §4.6).
pub struct QosDispatcher {
    queue: CommandQueue,
    pending: PendingReplyTable,
    config: QosConfig,
    airtime: VecDeque<AirtimeSample>,
}

/// What the dispatcher wants the transport layer to do next.
pub enum Action {
    /// Write this command's encoded line to the wire now.
    Transmit(Command),
    /// Nothing is ready: duty cycle is saturated, or the queue is empty.
    Idle,
}

impl QosDispatcher {
    pub fn new(config: QosConfig) -> Self {
        Self {
            queue: CommandQueue::new(config.queue_capacity),
            pending: PendingReplyTable::new(),
            config,
            airtime: VecDeque::new(),
        }
    }

    pub fn queue_mut(&mut self) -> &mut CommandQueue {
        &mut self.queue
    }

    pub fn pending(&self) -> &PendingReplyTable {
        &self.pending
    }

    /// Approximate on-air time in bytes spent within the last 60s,
    /// scaled by `bytes_overhead_per_byte` (spec.md §4.6, §9).
    fn airtime_used(&mut self, now: DateTime<Utc>) -> f64 {
        let window_start = now - ChronoDuration::seconds(60);
        while let Some(front) = self.airtime.front() {
            if front.at < window_start {
                self.airtime.pop_front();
            } else {
                break;
            }
        }
        self.airtime.iter().map(|s| f64::from(s.bytes) * self.config.bytes_overhead_per_byte).sum()
    }

    fn duty_cycle_allows(&mut self, now: DateTime<Utc>, candidate_bytes: u32) -> bool {
        let used = self.airtime_used(now);
        let ceiling_bytes = self.config.duty_cycle_ceiling * 60.0 * 100.0;
        used + f64::from(candidate_bytes) * self.config.bytes_overhead_per_byte <= ceiling_bytes
    }

    /// Pulls the next eligible command off the queue: one whose
    /// `(dest, code, verb)` is not already awaiting a reply, and whose
    /// transmission keeps the duty cycle under its ceiling. Ineligible
    /// commands are requeued rather than dropped.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Action {
        let mut deferred = Vec::new();
        let action = loop {
            let Some(cmd) = self.queue.try_dequeue() else {
                break Action::Idle;
            };
            if self.pending.contains(&cmd.pending_key()) {
                deferred.push(cmd);
                continue;
            }
            if !self.duty_cycle_allows(now, cmd.payload.len() as u32 + 20) {
                deferred.push(cmd);
                break Action::Idle;
            }
            break Action::Transmit(cmd);
        };
        for cmd in deferred {
            let _ = self.queue.enqueue(cmd);
        }
        action
    }

    /// Records that `cmd` was just written to the wire and starts its
    /// reply deadline (spec.md §4.6). A command already carrying a spent
    /// attempt (i.e. a retry) gets the shorter retry deadline.
    pub fn on_transmitted(&mut self, cmd: Command, now: DateTime<Utc>) {
        self.airtime.push_back(AirtimeSample { at: now, bytes: cmd.payload.len() as u32 + 20 });
        let deadline_ms = if cmd.attempt > 0 {
            self.config.reply_deadline_retry_ms
        } else {
            self.config.reply_deadline_initial_ms
        };
        let deadline = now + ChronoDuration::milliseconds(deadline_ms as i64);
        self.pending.insert(cmd, deadline);
    }

    /// Feeds an inbound message through the pending table, completing any
    /// command it answers. Returns the completed key, if any.
    pub fn on_message(&mut self, msg: &Message) -> Option<PendingKey> {
        let key = self.pending.matching_key(msg)?;
        if let Some(entry) = self.pending.get_mut(&key) {
            entry.state = state_machine::step(entry.state, Event::ReplyRx, 0, false);
        }
        self.pending.remove(&key);
        debug!(?key, "command acknowledged");
        Some(key)
    }

    /// Advances timed-out entries: retries those with attempts remaining,
    /// drops the rest. Retries are re-enqueued at their original priority.
    pub fn sweep_timeouts(&mut self, now: DateTime<Utc>) -> Vec<PendingKey> {
        let mut given_up = Vec::new();
        for key in self.pending.expired(now) {
            let Some(entry) = self.pending.get_mut(&key) else { continue };
            let retries_left = entry.command.retries.saturating_sub(entry.command.attempt as u8);
            let next = state_machine::step(entry.state, Event::Timeout, retries_left, false);
            match next {
                CommandState::Retry => {
                    entry.command.attempt += 1;
                    entry.state = CommandState::Retry;
                    let delay = state_machine::backoff_delay(
                        entry.command.attempt,
                        self.config.backoff_base_ms,
                        self.config.backoff_ceiling_ms,
                        entry.command.disable_backoff,
                    );
                    // Spreads commands that timed out on the same tick so
                    // their retries don't all wake at once.
                    let jitter = if entry.command.disable_backoff {
                        0
                    } else {
                        jitter_millis(self.config.backoff_base_ms)
                    };
                    entry.retry_backoff_until = Some(
                        now + ChronoDuration::from_std(delay).unwrap_or_default()
                            + ChronoDuration::milliseconds(jitter as i64),
                    );
                },
                CommandState::Done(Outcome::Timeout) => {
                    warn!(dest = %entry.command.dest, code = %entry.command.code, "command exhausted retries");
                    given_up.push(key);
                },
                _ => {},
            }
        }
        for key in &given_up {
            self.pending.remove(key);
        }
        given_up
    }

    /// Re-enqueues commands whose backoff has elapsed, for the next
    /// `poll()` to pick up.
    pub fn requeue_ready_retries(&mut self, now: DateTime<Utc>) {
        for key in self.pending.ready_to_retry(now) {
            if let Some(entry) = self.pending.remove(&key) {
                let _ = self.queue.enqueue(entry.command);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{address::DeviceId, opcode::Code, payload::DecodedPayload, verb::Verb};

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid")
    }

    fn config() -> QosConfig {
        QosConfig {
            reply_deadline_initial_ms: 2_500,
            reply_deadline_retry_ms: 1_000,
            backoff_base_ms: 100,
            backoff_ceiling_ms: 5_000,
            max_retries_default: 3,
            duty_cycle_ceiling: 1.0,
            bytes_overhead_per_byte: 1.3,
            fragment_expiry_secs: 30,
            queue_capacity: 10,
        }
    }

    #[test]
    fn at_most_one_command_per_dest_code_in_flight() {
        let mut d = QosDispatcher::new(config());
        let a = Command::new(Verb::RQ, "01:145038".parse().unwrap(), Code::SYSTEM_SYNC, vec![]);
        let b = a.clone();
        d.queue_mut().enqueue(a.clone()).unwrap();
        d.queue_mut().enqueue(b).unwrap();

        match d.poll(ts(0)) {
            Action::Transmit(cmd) => d.on_transmitted(cmd, ts(0)),
            Action::Idle => panic!("expected a command"),
        }
        assert!(matches!(d.poll(ts(0)), Action::Idle));
    }

    #[test]
    fn reply_clears_the_pending_entry() {
        let mut d = QosDispatcher::new(config());
        let cmd = Command::new(Verb::RQ, "01:145038".parse().unwrap(), Code::SYSTEM_SYNC, vec![]).with_retries(3);
        d.on_transmitted(cmd, ts(0));
        assert_eq!(d.pending().len(), 1);

        let reply = Message {
            recv_ts: ts(1),
            verb: Verb::RP,
            src: "01:145038".parse().unwrap(),
            dest: DeviceId::NONE,
            code: Code::SYSTEM_SYNC,
            payload: DecodedPayload::SystemSync { period_ms: 100 },
            zone_idx: None,
            domain: None,
        };
        assert!(d.on_message(&reply).is_some());
        assert!(d.pending().is_empty());
    }

    #[test]
    fn timeout_with_retries_left_schedules_a_retry() {
        let mut d = QosDispatcher::new(config());
        let cmd = Command::new(Verb::RQ, "01:145038".parse().unwrap(), Code::SYSTEM_SYNC, vec![]).with_retries(3);
        d.on_transmitted(cmd, ts(0));

        let given_up = d.sweep_timeouts(ts(3));
        assert!(given_up.is_empty());
        assert_eq!(d.pending().len(), 1);
    }

    #[test]
    fn timeout_exhausted_gives_up() {
        let mut d = QosDispatcher::new(config());
        let cmd = Command::new(Verb::RQ, "01:145038".parse().unwrap(), Code::SYSTEM_SYNC, vec![]).with_retries(0);
        d.on_transmitted(cmd, ts(0));

        let given_up = d.sweep_timeouts(ts(3));
        assert_eq!(given_up.len(), 1);
        assert!(d.pending().is_empty());
    }
}
