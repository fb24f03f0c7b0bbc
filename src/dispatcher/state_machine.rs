// SPDX-License-Identifier: AGPL-3.0-or-later

//! The per-command state machine of spec.md §4.6. Transitions are driven
//! by one shared dispatcher loop rather than recursive per-command
//! stepping, so this is a plain data transition rather than the boxed-
//! future `StateMachine` trait used for the transport's login exchange.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Queued,
    Sending,
    AwaitingReply,
    Retry,
    Done(Outcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Timeout,
    Cancelled,
    WriteError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Dequeued,
    WriteOk,
    WriteErr,
    ReplyRx,
    Timeout,
    BackoffElapsed,
    Cancel,
}

/// Advances `state` given `event`. `retries_left` gates whether a timeout
/// retries or gives up; `fire_and_forget` short-circuits straight to
/// `Done(Acked)` once the write succeeds (spec.md §4.6 "retries == 0").
pub fn step(state: CommandState, event: Event, retries_left: u8, fire_and_forget: bool) -> CommandState {
    use CommandState::*;
    use Event::*;

    match (state, event) {
        (Queued, Dequeued) => Sending,
        (Sending, WriteOk) if fire_and_forget => Done(Outcome::Acked),
        (Sending, WriteOk) => AwaitingReply,
        (Sending, WriteErr) => Retry,
        (AwaitingReply, ReplyRx) => Done(Outcome::Acked),
        (AwaitingReply, Timeout) if retries_left > 0 => Retry,
        (AwaitingReply, Timeout) => Done(Outcome::Timeout),
        (Retry, BackoffElapsed) => Sending,
        (Queued, Cancel) => Done(Outcome::Cancelled),
        (_, Cancel) => Done(Outcome::Cancelled),
        (other, _) => other,
    }
}

/// Exponential backoff with a ceiling (spec.md §4.6): `min(2^attempt *
/// base, ceiling)`, skipped entirely when `disable_backoff` is set.
pub fn backoff_delay(attempt: u32, base_ms: u64, ceiling_ms: u64, disable_backoff: bool) -> std::time::Duration {
    if disable_backoff {
        return std::time::Duration::ZERO;
    }
    let scaled = base_ms.saturating_mul(1u64 << attempt.min(16));
    std::time::Duration::from_millis(scaled.min(ceiling_ms))
}
