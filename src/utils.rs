// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;

/// Format matching spec.md §6: `\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{6}`.
const REPLAY_TIMESTAMP_FMT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Parses a replay-file timestamp prefix. Returns `None` (never panics) when
/// the timestamp is malformed or missing microsecond precision, so the
/// replay reader can drop just that line (spec.md §8 scenario 3).
pub fn parse_replay_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, REPLAY_TIMESTAMP_FMT).ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

pub fn format_replay_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(REPLAY_TIMESTAMP_FMT).to_string()
}

/// Encodes bytes as uppercase hex, the wire's payload representation.
pub fn to_hex_upper(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(&mut s, "{b:02X}");
    }
    s
}

/// Decodes an even-length hex string. Rejects lower-case input: the wire
/// format mandates uppercase (spec.md §6).
pub fn from_hex_upper(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0
        || !s.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
    {
        return None;
    }
    hex::decode(s).ok()
}

/// Jitter added to backoff delays so that several commands retrying at once
/// do not all wake on the same tick (QosDispatcher, spec.md §4.6).
pub fn jitter_millis(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_timestamp_round_trip() {
        let s = "2023-11-05T12:30:00.123456";
        let ts = parse_replay_timestamp(s).expect("should parse");
        assert_eq!(format_replay_timestamp(&ts), s);
    }

    #[test]
    fn replay_timestamp_rejects_missing_micros() {
        assert!(parse_replay_timestamp("2023-11-05T12:30:00").is_none());
    }

    #[test]
    fn hex_round_trip() {
        let bytes = [0x07, 0x3F, 0xFF];
        let s = to_hex_upper(&bytes);
        assert_eq!(s, "073FFF");
        assert_eq!(from_hex_upper(&s).as_deref(), Some(bytes.as_slice()));
    }

    #[test]
    fn hex_rejects_lower_case() {
        assert!(from_hex_upper("073fff").is_none());
    }

    #[test]
    fn jitter_is_bounded() {
        for _ in 0..100 {
            assert!(jitter_millis(50) <= 50);
        }
    }
}
