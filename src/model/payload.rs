// SPDX-License-Identifier: AGPL-3.0-or-later

use core::fmt;

/// Resolves the first-payload-byte ambiguity of spec.md §4.3
/// `MAY_USE_ZONE_IDX`: below `0xF0` it addresses a zone, at or above it
/// addresses a system-wide domain (`FF` is not a domain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Zone(u8),
    Domain(Domain),
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// `F9`: heating valve.
    HeatingValve,
    /// `FA`: hot-water valve.
    HotWaterValve,
    /// `FC`: heating control relay.
    HeatingControl,
    /// `FD`: unknown, seen on Hometronics systems only.
    Unknown,
}

impl Domain {
    pub fn from_byte(b: u8) -> Option<Domain> {
        match b {
            0xF9 => Some(Domain::HeatingValve),
            0xFA => Some(Domain::HotWaterValve),
            0xFC => Some(Domain::HeatingControl),
            0xFD => Some(Domain::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Domain::HeatingValve => "F9",
            Domain::HotWaterValve => "FA",
            Domain::HeatingControl => "FC",
            Domain::Unknown => "FD",
        })
    }
}

/// Resolves the leading byte of a `MAY_USE_ZONE_IDX` payload into a Scope.
pub fn resolve_scope(first_byte: u8) -> Scope {
    if first_byte < 0xF0 {
        Scope::Zone(first_byte)
    } else if first_byte == 0xFF {
        Scope::System
    } else if let Some(d) = Domain::from_byte(first_byte) {
        Scope::Domain(d)
    } else {
        // F8/FB reserved, or any other byte in the domain range: treat as
        // system scope rather than surfacing a nonexistent Domain.
        Scope::System
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemMode {
    Auto,
    HeatOff,
    EcoBoost,
    Away,
    DayOff,
    DayOffEco,
    AutoWithReset,
    Custom,
}

impl SystemMode {
    pub fn from_byte(b: u8) -> Option<SystemMode> {
        Some(match b {
            0x00 => SystemMode::Auto,
            0x01 => SystemMode::HeatOff,
            0x02 => SystemMode::EcoBoost,
            0x03 => SystemMode::Away,
            0x04 => SystemMode::DayOff,
            0x05 => SystemMode::DayOffEco,
            0x06 => SystemMode::AutoWithReset,
            0x07 => SystemMode::Custom,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneMode {
    FollowSchedule,
    AdvancedOverride,
    PermanentOverride,
    CountdownOverride,
    TemporaryOverride,
}

impl ZoneMode {
    pub fn from_byte(b: u8) -> Option<ZoneMode> {
        Some(match b {
            0x00 => ZoneMode::FollowSchedule,
            0x01 => ZoneMode::AdvancedOverride,
            0x02 => ZoneMode::PermanentOverride,
            0x03 => ZoneMode::CountdownOverride,
            0x04 => ZoneMode::TemporaryOverride,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhwState {
    Off,
    On,
}

/// A fragment of a large payload (schedule/fault log, spec.md §4.3) before
/// reassembly completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub index: u8,
    pub total: u8,
    pub bytes: Vec<u8>,
}

/// The decoded interpretation of a `Packet`'s payload, tagged by `code`
/// (spec.md §3 Message "decoded payload"). This is the tagged-variant
/// registry spec.md §9 calls for in place of dynamic dispatch by opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    SystemSync { period_ms: u32 },
    SystemMode { mode: SystemMode },
    DhwState { state: DhwState },
    ZoneTemperature { zone_idx: u8, temperature_c: Option<f32> },
    ZoneSetpoint { zone_idx: u8, setpoint_c: Option<f32> },
    ZoneWindow { zone_idx: u8, open: bool },
    RelayDemand { scope: Scope, demand_pct: u8 },
    HeatDemand { scope: Scope, demand_pct: u8 },
    Binding { offer: bool, code: super::opcode::Code },
    Schedule { fragment: Fragment },
    FaultLog { fragment: Fragment },
    /// A code the registry has no specific decoder for. Spec.md §4.3:
    /// absent codes yield `Invalid::UnknownCode`, but a code the registry
    /// *does* recognize with a generic shape still decodes to this.
    Raw { code: super::opcode::Code },
}
