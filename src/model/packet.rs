// SPDX-License-Identifier: AGPL-3.0-or-later

//! The frame codec: line ↔ `Packet`. Everything downstream assumes a
//! syntactically clean `Packet`, so all validation happens here.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    model::{
        address::{AddressTriple, DeviceId},
        opcode::Code,
        verb::Verb,
    },
    utils::{from_hex_upper, to_hex_upper},
};

/// Maximum accepted line length (spec.md §4.1).
pub const MAX_LINE_LEN: usize = 200;
/// Maximum declared payload length, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 48;

/// Why a line did not become a `Packet` (spec.md §4.1, §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DropReason {
    #[error("line exceeds {MAX_LINE_LEN} bytes")]
    TooLong,
    #[error("line does not match the wire grammar: {0:?}")]
    Malformed(String),
    #[error("payload hex length does not match declared length")]
    PayloadLengthMismatch,
    #[error("all three addresses are the sentinel")]
    NoRealAddress,
    #[error("rssi field is neither a sentinel nor three decimal digits")]
    BadRssi,
}

/// One line emitted by the adapter that is not a decodable RF frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterLine {
    /// A diagnostic line prefixed with `*` or `#`; discarded but logged.
    Diagnostic(String),
    /// An outbound echo (`!`-prefixed) routed to the dispatcher as an ack.
    Echo(String),
    /// An adapter control line (`!V`, `!T01`, ...) passed through verbatim.
    Control(String),
}

/// A validated RF frame (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub recv_ts: DateTime<Utc>,
    pub rssi: Option<u8>,
    pub verb: Verb,
    pub seq: Option<u16>,
    pub addresses: AddressTriple,
    pub code: Code,
    pub len: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Re-encodes this packet back to its wire line (no RSSI round-trip
    /// guarantee — spec.md §8 "modulo RSSI and timestamp").
    pub fn encode(&self) -> String {
        let rssi = match self.rssi {
            Some(r) => format!("{r:03}"),
            None => "---".to_string(),
        };
        let seq = match self.seq {
            Some(s) => format!("{s:03}"),
            None => "---".to_string(),
        };
        format!(
            "{rssi} {} {seq} {} {} {} {} {:03} {}",
            self.verb,
            self.addresses.addr0,
            self.addresses.addr1,
            self.addresses.addr2,
            self.code,
            self.len,
            to_hex_upper(&self.payload),
        )
    }
}

/// Classifies a raw adapter line before attempting to decode it as a
/// `Packet` (spec.md §4.1: `*`/`#` diagnostics, `!` echoes/control lines).
pub fn classify_line(line: &str) -> Option<AdapterLine> {
    let trimmed = line.trim_end();
    if let Some(rest) = trimmed.strip_prefix('*').or_else(|| trimmed.strip_prefix('#')) {
        return Some(AdapterLine::Diagnostic(rest.to_string()));
    }
    if let Some(rest) = trimmed.strip_prefix('!') {
        // A bare `!` echo of an outbound line carries the same wire grammar
        // the dispatcher just sent; anything else is an adapter control line.
        if looks_like_wire_line(rest) {
            return Some(AdapterLine::Echo(rest.to_string()));
        }
        return Some(AdapterLine::Control(trimmed.to_string()));
    }
    None
}

fn looks_like_wire_line(s: &str) -> bool {
    s.split_whitespace().count() >= 7
}

/// Decodes one wire line into a `Packet`, given the timestamp it was
/// received at (spec.md §4.1).
pub fn decode(line: &str, recv_ts: DateTime<Utc>) -> Result<Packet, DropReason> {
    if line.len() > MAX_LINE_LEN {
        return Err(DropReason::TooLong);
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 9 {
        return Err(DropReason::Malformed(line.to_string()));
    }

    let [rssi_s, verb_s, seq_s, a0_s, a1_s, a2_s, code_s, len_s, payload_s] = [
        fields[0], fields[1], fields[2], fields[3], fields[4], fields[5], fields[6], fields[7],
        fields[8],
    ];

    let rssi = parse_rssi(rssi_s)?;
    let verb: Verb = verb_s.parse().map_err(|_| DropReason::Malformed(line.to_string()))?;
    let seq = parse_seq(seq_s)?;

    let addr0: DeviceId = a0_s.parse().map_err(|_| DropReason::Malformed(line.to_string()))?;
    let addr1: DeviceId = a1_s.parse().map_err(|_| DropReason::Malformed(line.to_string()))?;
    let addr2: DeviceId = a2_s.parse().map_err(|_| DropReason::Malformed(line.to_string()))?;
    let addresses = AddressTriple { addr0, addr1, addr2 };
    if !addresses.has_any_real_address() {
        return Err(DropReason::NoRealAddress);
    }

    let code: Code = code_s.parse().map_err(|_| DropReason::Malformed(line.to_string()))?;

    if len_s.len() != 3 || !len_s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DropReason::Malformed(line.to_string()));
    }
    let len: u8 = len_s.parse().map_err(|_| DropReason::Malformed(line.to_string()))?;
    if !(1..=MAX_PAYLOAD_LEN as u8).contains(&len) {
        return Err(DropReason::Malformed(line.to_string()));
    }

    if payload_s.len() != usize::from(len) * 2 {
        return Err(DropReason::PayloadLengthMismatch);
    }
    let payload = from_hex_upper(payload_s).ok_or(DropReason::PayloadLengthMismatch)?;

    Ok(Packet { recv_ts, rssi, verb, seq, addresses, code, len, payload })
}

fn parse_rssi(s: &str) -> Result<Option<u8>, DropReason> {
    if s == "---" || s == "..." {
        return Ok(None);
    }
    if s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<u8>().map(Some).map_err(|_| DropReason::BadRssi);
    }
    Err(DropReason::BadRssi)
}

fn parse_seq(s: &str) -> Result<Option<u16>, DropReason> {
    if s == "---" {
        return Ok(None);
    }
    if s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<u16>().map(Some).map_err(|_| DropReason::Malformed(s.to_string()));
    }
    Err(DropReason::Malformed(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(0, 0).expect("valid epoch")
    }

    #[test]
    fn decodes_scenario_1_from_the_wire_format() {
        let line = "045  I --- 01:145038 --:------ 01:145038 1F09 003 FF073F";
        let p = decode(line, ts()).expect("decodes");
        assert_eq!(p.rssi, Some(45));
        assert_eq!(p.verb, Verb::I);
        assert_eq!(p.code, Code::SYSTEM_SYNC);
        assert_eq!(p.len, 3);
        assert_eq!(to_hex_upper(&p.payload), "FF073F");
        assert_eq!(p.addresses.addr0.to_string(), "01:145038");
        assert!(p.addresses.addr1.is_none());
    }

    #[test]
    fn rejects_too_few_fields() {
        assert_eq!(decode("045 I --- 01:145038", ts()), Err(DropReason::Malformed("045 I --- 01:145038".to_string())));
    }

    #[test]
    fn rejects_payload_length_mismatch() {
        let line = "045  I --- 01:145038 --:------ 01:145038 1F09 003 FF07";
        assert_eq!(decode(line, ts()), Err(DropReason::PayloadLengthMismatch));
    }

    #[test]
    fn rejects_all_sentinel_addresses() {
        let line = "045  I --- --:------ --:------ --:------ 1F09 003 FF073F";
        assert_eq!(decode(line, ts()), Err(DropReason::NoRealAddress));
    }

    #[test]
    fn rejects_line_over_max_length() {
        let line = "x".repeat(MAX_LINE_LEN + 1);
        assert_eq!(decode(&line, ts()), Err(DropReason::TooLong));
    }

    #[test]
    fn round_trip_modulo_rssi_and_timestamp() {
        let line = "045  I --- 01:145038 --:------ 01:145038 1F09 003 FF073F";
        let p = decode(line, ts()).expect("decodes");
        let re_encoded = p.encode();
        let p2 = decode(&re_encoded, ts()).expect("re-decodes");
        assert_eq!(p.verb, p2.verb);
        assert_eq!(p.code, p2.code);
        assert_eq!(p.addresses, p2.addresses);
        assert_eq!(p.payload, p2.payload);
    }

    #[test]
    fn classifies_diagnostic_and_control_lines() {
        assert_eq!(
            classify_line("*this is noise"),
            Some(AdapterLine::Diagnostic("this is noise".to_string()))
        );
        assert_eq!(classify_line("!V"), Some(AdapterLine::Control("!V".to_string())));
    }
}
