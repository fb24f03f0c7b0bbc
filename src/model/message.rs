// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-code payload decoding, zone/domain indexing, and fragment
//! reassembly for large payloads (spec.md §4.3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::model::{
    address::DeviceId,
    opcode::Code,
    packet::Packet,
    payload::{DecodedPayload, DhwState, Domain, Fragment, Scope, SystemMode, ZoneMode, resolve_scope},
    verb::Verb,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Invalid {
    #[error("no decoder registered for code {0}")]
    UnknownCode(Code),
    #[error("code {code} does not accept verb {verb:?}")]
    WrongVerb { code: Code, verb: Verb },
    #[error("code {code} payload has unexpected shape: {reason}")]
    BadShape { code: Code, reason: &'static str },
}

/// A typed interpretation of a Packet (spec.md §3). Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub recv_ts: DateTime<Utc>,
    pub verb: Verb,
    pub src: DeviceId,
    pub dest: DeviceId,
    pub code: Code,
    pub payload: DecodedPayload,
    pub zone_idx: Option<u8>,
    pub domain: Option<Domain>,
}

type DecoderFn = fn(Verb, &[u8]) -> Result<DecodedPayload, Invalid>;

fn decode_system_sync(verb: Verb, payload: &[u8]) -> Result<DecodedPayload, Invalid> {
    if verb != Verb::I {
        return Err(Invalid::WrongVerb { code: Code::SYSTEM_SYNC, verb });
    }
    if payload.len() < 3 {
        return Err(Invalid::BadShape { code: Code::SYSTEM_SYNC, reason: "expected >=3 bytes" });
    }
    let period_raw = u16::from_be_bytes([payload[1], payload[2]]);
    Ok(DecodedPayload::SystemSync { period_ms: u32::from(period_raw) * 10 })
}

fn decode_system_mode(_verb: Verb, payload: &[u8]) -> Result<DecodedPayload, Invalid> {
    let b = *payload.first().ok_or(Invalid::BadShape { code: Code::SYSTEM_MODE, reason: "empty payload" })?;
    let mode = SystemMode::from_byte(b)
        .ok_or(Invalid::BadShape { code: Code::SYSTEM_MODE, reason: "unknown system mode byte" })?;
    Ok(DecodedPayload::SystemMode { mode })
}

fn decode_dhw_state(_verb: Verb, payload: &[u8]) -> Result<DecodedPayload, Invalid> {
    let b = *payload
        .get(2)
        .ok_or(Invalid::BadShape { code: Code::DHW_STATE, reason: "expected >=3 bytes" })?;
    let state = match b {
        0 => DhwState::Off,
        1 => DhwState::On,
        _ => return Err(Invalid::BadShape { code: Code::DHW_STATE, reason: "unknown dhw state byte" }),
    };
    Ok(DecodedPayload::DhwState { state })
}

/// Many codes carry a centi-degree-Celsius `i16`, with `0x7FFF` meaning "no
/// sensor"; this mirrors the common `ramses_rf` temperature encoding.
fn decode_temp_centidegrees(raw: [u8; 2]) -> Option<f32> {
    let v = i16::from_be_bytes(raw);
    if v == 0x7FFF { None } else { Some(f32::from(v) / 100.0) }
}

fn decode_zone_temperature(_verb: Verb, payload: &[u8]) -> Result<DecodedPayload, Invalid> {
    if payload.len() < 3 {
        return Err(Invalid::BadShape { code: Code::ZONE_TEMPERATURE, reason: "expected >=3 bytes" });
    }
    let zone_idx = payload[0];
    let temperature_c = decode_temp_centidegrees([payload[1], payload[2]]);
    Ok(DecodedPayload::ZoneTemperature { zone_idx, temperature_c })
}

fn decode_zone_setpoint(_verb: Verb, payload: &[u8]) -> Result<DecodedPayload, Invalid> {
    if payload.len() < 3 {
        return Err(Invalid::BadShape { code: Code::ZONE_SETPOINT, reason: "expected >=3 bytes" });
    }
    let zone_idx = payload[0];
    let setpoint_c = decode_temp_centidegrees([payload[1], payload[2]]);
    Ok(DecodedPayload::ZoneSetpoint { zone_idx, setpoint_c })
}

fn decode_zone_window(_verb: Verb, payload: &[u8]) -> Result<DecodedPayload, Invalid> {
    if payload.len() < 2 {
        return Err(Invalid::BadShape { code: Code::ZONE_WINDOW, reason: "expected >=2 bytes" });
    }
    Ok(DecodedPayload::ZoneWindow { zone_idx: payload[0], open: payload[1] != 0 })
}

fn decode_relay_demand(_verb: Verb, payload: &[u8]) -> Result<DecodedPayload, Invalid> {
    if payload.len() < 2 {
        return Err(Invalid::BadShape { code: Code::RELAY_DEMAND, reason: "expected >=2 bytes" });
    }
    let scope = resolve_scope(payload[0]);
    let demand_pct = (u16::from(payload[1]) * 100 / 200) as u8;
    Ok(DecodedPayload::RelayDemand { scope, demand_pct })
}

fn decode_heat_demand(_verb: Verb, payload: &[u8]) -> Result<DecodedPayload, Invalid> {
    if payload.len() < 2 {
        return Err(Invalid::BadShape { code: Code::HEAT_DEMAND, reason: "expected >=2 bytes" });
    }
    let scope = resolve_scope(payload[0]);
    let demand_pct = (u16::from(payload[1]) * 100 / 200) as u8;
    Ok(DecodedPayload::HeatDemand { scope, demand_pct })
}

fn decode_binding(verb: Verb, payload: &[u8]) -> Result<DecodedPayload, Invalid> {
    if payload.len() < 3 {
        return Err(Invalid::BadShape { code: Code::BINDING, reason: "expected >=3 bytes" });
    }
    let code = Code(u16::from_be_bytes([payload[1], payload[2]]));
    Ok(DecodedPayload::Binding { offer: verb == Verb::I, code })
}

static REGISTRY: Lazy<HashMap<Code, DecoderFn>> = Lazy::new(|| {
    let mut m: HashMap<Code, DecoderFn> = HashMap::new();
    m.insert(Code::SYSTEM_SYNC, decode_system_sync);
    m.insert(Code::SYSTEM_MODE, decode_system_mode);
    m.insert(Code::DHW_STATE, decode_dhw_state);
    m.insert(Code::ZONE_TEMPERATURE, decode_zone_temperature);
    m.insert(Code::ZONE_SETPOINT, decode_zone_setpoint);
    m.insert(Code::ZONE_WINDOW, decode_zone_window);
    m.insert(Code::RELAY_DEMAND, decode_relay_demand);
    m.insert(Code::HEAT_DEMAND, decode_heat_demand);
    m.insert(Code::BINDING, decode_binding);
    m
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FragmentKind {
    Schedule,
    FaultLog,
}

/// `(controller, kind, fragment_set_id)` — the scope byte stands in for a
/// fragment-set id since the source does not document a separate one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FragmentKey {
    controller: DeviceId,
    kind: FragmentKind,
    set_id: u8,
}

struct FragmentBuf {
    total: u8,
    parts: HashMap<u8, Vec<u8>>,
    last_activity: DateTime<Utc>,
}

/// Per-code payload parsing plus the stateful fragment reassembly for
/// `0404`/`0418` (spec.md §4.3). Not `Clone`: fragment buffers are mutated
/// in place as packets arrive.
pub struct MessageDecoder {
    fragments: HashMap<FragmentKey, FragmentBuf>,
    fragment_expiry: chrono::Duration,
}

impl MessageDecoder {
    pub fn new(fragment_expiry: std::time::Duration) -> Self {
        Self {
            fragments: HashMap::new(),
            fragment_expiry: chrono::Duration::from_std(fragment_expiry)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
        }
    }

    /// Decodes one Packet into zero or one Message. Fragment sets that are
    /// still incomplete after this call return `Ok(None)`.
    pub fn decode(&mut self, packet: &Packet) -> Result<Option<Message>, Invalid> {
        self.expire_stale_fragments(packet.recv_ts);

        let (src, dest) = resolve_src_dest(packet);

        if packet.code == Code::SCHEDULE || packet.code == Code::FAULT_LOG {
            return self.decode_fragmented(packet, src, dest);
        }

        let decoder = REGISTRY.get(&packet.code).ok_or(Invalid::UnknownCode(packet.code))?;
        let payload = decoder(packet.verb, &packet.payload)?;
        let (zone_idx, domain) = zone_and_domain(packet.code, &packet.payload);

        Ok(Some(Message {
            recv_ts: packet.recv_ts,
            verb: packet.verb,
            src,
            dest,
            code: packet.code,
            payload,
            zone_idx,
            domain,
        }))
    }

    fn decode_fragmented(
        &mut self,
        packet: &Packet,
        src: DeviceId,
        dest: DeviceId,
    ) -> Result<Option<Message>, Invalid> {
        let kind =
            if packet.code == Code::SCHEDULE { FragmentKind::Schedule } else { FragmentKind::FaultLog };

        if packet.payload.len() < 3 {
            return Err(Invalid::BadShape { code: packet.code, reason: "fragment header too short" });
        }
        let set_id = packet.payload[0];
        let total = packet.payload[1];
        let index = packet.payload[2];
        let bytes = packet.payload[3..].to_vec();
        if total == 0 || index == 0 || index > total {
            return Err(Invalid::BadShape { code: packet.code, reason: "invalid fragment index/total" });
        }

        let key = FragmentKey { controller: src, kind, set_id };
        let buf = self.fragments.entry(key).or_insert_with(|| FragmentBuf {
            total,
            parts: HashMap::new(),
            last_activity: packet.recv_ts,
        });
        buf.total = total;
        buf.last_activity = packet.recv_ts;
        buf.parts.insert(index, bytes);

        if buf.parts.len() < usize::from(total) {
            return Ok(None);
        }

        let buf = self.fragments.remove(&key).expect("just inserted");
        let mut combined = Vec::new();
        for i in 1..=total {
            let part = buf.parts.get(&i).expect("complete set checked above");
            combined.extend_from_slice(part);
        }

        let fragment = Fragment { index: total, total, bytes: combined };
        let payload = if packet.code == Code::SCHEDULE {
            DecodedPayload::Schedule { fragment }
        } else {
            DecodedPayload::FaultLog { fragment }
        };

        Ok(Some(Message {
            recv_ts: packet.recv_ts,
            verb: packet.verb,
            src,
            dest,
            code: packet.code,
            payload,
            zone_idx: None,
            domain: None,
        }))
    }

    fn expire_stale_fragments(&mut self, now: DateTime<Utc>) {
        self.fragments.retain(|_, buf| now - buf.last_activity < self.fragment_expiry);
    }
}

/// Resolves the effective source/destination from verb and address triple.
/// `I` broadcasts from addr0; `RQ`/`W` travel addr0 -> addr1 (or addr2 when
/// addr1 is the sentinel, the common "addr0==addr2" self-announcement
/// shape); `RP` travels addr1 -> addr0.
fn resolve_src_dest(packet: &Packet) -> (DeviceId, DeviceId) {
    let a = packet.addresses;
    match packet.verb {
        Verb::I => (a.addr0, a.addr0),
        Verb::RQ | Verb::W => {
            let dest = if a.addr1.is_none() { a.addr2 } else { a.addr1 };
            (a.addr0, dest)
        },
        Verb::RP => (a.addr1, a.addr0),
    }
}

fn zone_and_domain(code: Code, payload: &[u8]) -> (Option<u8>, Option<Domain>) {
    if !code.may_use_zone_idx() || payload.is_empty() {
        return (None, None);
    }
    match resolve_scope(payload[0]) {
        Scope::Zone(idx) => (Some(idx), None),
        Scope::Domain(d) => (None, Some(d)),
        Scope::System => (None, None),
    }
}

/// Decodes the single-byte zone-mode field (spec.md §3 Zone.mode).
pub fn decode_zone_mode(b: u8) -> Option<ZoneMode> {
    ZoneMode::from_byte(b)
}
