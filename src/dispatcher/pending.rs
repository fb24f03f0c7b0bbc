// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracks commands awaiting a reply and matches inbound `RP`/`I` messages
//! back to the outbound `RQ`/`W` that triggered them (spec.md §3
//! PendingReply, §4.6).

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::dispatcher::state_machine::CommandState;
use crate::model::message::Message;
use crate::model::verb::Verb;
use crate::queue::command::{Command, PendingKey};

pub struct PendingReply {
    pub command: Command,
    pub state: CommandState,
    pub deadline: DateTime<Utc>,
    pub retry_backoff_until: Option<DateTime<Utc>>,
}

impl PendingReply {
    fn new(command: Command, deadline: DateTime<Utc>) -> Self {
        Self { command, state: CommandState::AwaitingReply, deadline, retry_backoff_until: None }
    }
}

/// At most one entry per `(dest, code, verb)` is ever in flight
/// (spec.md §4.6).
#[derive(Default)]
pub struct PendingReplyTable {
    entries: HashMap<PendingKey, PendingReply>,
}

impl PendingReplyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &PendingKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, command: Command, deadline: DateTime<Utc>) {
        let key = command.pending_key();
        self.entries.insert(key, PendingReply::new(command, deadline));
    }

    pub fn get(&self, key: &PendingKey) -> Option<&PendingReply> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &PendingKey) -> Option<&mut PendingReply> {
        self.entries.get_mut(key)
    }

    pub fn remove(&mut self, key: &PendingKey) -> Option<PendingReply> {
        self.entries.remove(key)
    }

    /// Finds the pending entry an inbound message satisfies: the message's
    /// source is the command's destination, the code matches, and the
    /// verb is `RP` (a direct reply) or `I` (an unsolicited announce that
    /// also answers an outstanding request for the same value).
    pub fn matching_key(&self, msg: &Message) -> Option<PendingKey> {
        if msg.verb != Verb::RP && msg.verb != Verb::I {
            return None;
        }
        [Verb::RQ, Verb::W].into_iter().find_map(|verb| {
            let key = PendingKey { dest: msg.src, code: msg.code, verb };
            self.entries.contains_key(&key).then_some(key)
        })
    }

    /// Entries past `now`, in no particular order.
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<PendingKey> {
        self.entries
            .iter()
            .filter(|(_, p)| p.state == CommandState::AwaitingReply && p.deadline <= now)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Entries whose backoff has elapsed and are ready to resend.
    pub fn ready_to_retry(&self, now: DateTime<Utc>) -> Vec<PendingKey> {
        self.entries
            .iter()
            .filter(|(_, p)| {
                p.state == CommandState::Retry && p.retry_backoff_until.map_or(true, |t| t <= now)
            })
            .map(|(k, _)| *k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{address::DeviceId, opcode::Code, payload::DecodedPayload};

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_000, 0).expect("valid")
    }

    fn cmd() -> Command {
        Command::new(Verb::RQ, "01:145038".parse().unwrap(), Code::SYSTEM_SYNC, vec![])
    }

    #[test]
    fn reply_matches_outstanding_request_by_dest_and_code() {
        let mut table = PendingReplyTable::new();
        table.insert(cmd(), ts());

        let reply = Message {
            recv_ts: ts(),
            verb: Verb::RP,
            src: "01:145038".parse().unwrap(),
            dest: DeviceId::NONE,
            code: Code::SYSTEM_SYNC,
            payload: DecodedPayload::SystemSync { period_ms: 100 },
            zone_idx: None,
            domain: None,
        };
        assert!(table.matching_key(&reply).is_some());
    }

    #[test]
    fn unrelated_code_does_not_match() {
        let mut table = PendingReplyTable::new();
        table.insert(cmd(), ts());

        let reply = Message {
            recv_ts: ts(),
            verb: Verb::RP,
            src: "01:145038".parse().unwrap(),
            dest: DeviceId::NONE,
            code: Code::DHW_STATE,
            payload: DecodedPayload::DhwState { state: crate::model::payload::DhwState::Off },
            zone_idx: None,
            domain: None,
        };
        assert!(table.matching_key(&reply).is_none());
    }

    #[test]
    fn expired_entries_are_reported_past_their_deadline() {
        let mut table = PendingReplyTable::new();
        table.insert(cmd(), ts());
        assert!(table.expired(ts() + chrono::Duration::seconds(1)).len() == 1);
        assert!(table.expired(ts() - chrono::Duration::seconds(1)).is_empty());
    }
}
