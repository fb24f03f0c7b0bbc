// SPDX-License-Identifier: AGPL-3.0-or-later

//! The static DeviceTable and the mutable per-device state it seeds
//! (spec.md §3 Device; supplemented from `ramses_rf/const.py`).

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;

use crate::model::{address::DeviceId, opcode::Code};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTableEntry {
    pub slug: &'static str,
    pub has_battery: bool,
    pub has_zone_sensor: bool,
    pub is_actuator: Option<bool>,
    pub is_sensor: bool,
    pub is_controller: bool,
    pub archetype: &'static str,
    pub poll_codes: &'static [Code],
}

const TRV_POLL: &[Code] = &[Code::ZONE_TEMPERATURE];
const CTL_POLL: &[Code] = &[Code::SYSTEM_SYNC, Code::SYSTEM_MODE];
const BDR_POLL: &[Code] = &[Code::RELAY_DEMAND];

/// Keyed by two-digit class. `00`/`12` are legacy aliases resolved in
/// `lookup` rather than duplicated here (matches `ramses_rf`'s derivation
/// of the lower-case "legacy address space" entries from their canonical
/// counterparts).
static TABLE: Lazy<std::collections::HashMap<u8, DeviceTableEntry>> = Lazy::new(|| {
    let mut m = std::collections::HashMap::new();
    m.insert(1, DeviceTableEntry {
        slug: "CTL",
        has_battery: false,
        has_zone_sensor: false,
        is_actuator: Some(false),
        is_sensor: false,
        is_controller: true,
        archetype: "evohome controller",
        poll_codes: CTL_POLL,
    });
    m.insert(23, DeviceTableEntry {
        slug: "PRG",
        has_battery: false,
        has_zone_sensor: false,
        is_actuator: Some(false),
        is_sensor: false,
        is_controller: true,
        archetype: "Hometronics programmer",
        poll_codes: CTL_POLL,
    });
    m.insert(2, DeviceTableEntry {
        slug: "UFC",
        has_battery: false,
        has_zone_sensor: false,
        is_actuator: Some(true),
        is_sensor: false,
        is_controller: false,
        archetype: "underfloor heating controller",
        poll_codes: &[],
    });
    m.insert(4, DeviceTableEntry {
        slug: "TRV",
        has_battery: true,
        has_zone_sensor: true,
        is_actuator: Some(true),
        is_sensor: true,
        is_controller: false,
        archetype: "radiator valve actuator",
        poll_codes: TRV_POLL,
    });
    m.insert(7, DeviceTableEntry {
        slug: "DHW",
        has_battery: true,
        has_zone_sensor: false,
        is_actuator: Some(false),
        is_sensor: true,
        is_controller: false,
        archetype: "DHW cylinder sensor",
        poll_codes: &[],
    });
    m.insert(10, DeviceTableEntry {
        slug: "OTB",
        has_battery: false,
        has_zone_sensor: false,
        is_actuator: Some(true),
        is_sensor: false,
        is_controller: false,
        archetype: "OpenTherm boiler bridge",
        poll_codes: &[],
    });
    m.insert(13, DeviceTableEntry {
        slug: "BDR",
        has_battery: false,
        has_zone_sensor: false,
        is_actuator: Some(true),
        is_sensor: false,
        is_controller: false,
        archetype: "relay",
        poll_codes: BDR_POLL,
    });
    m.insert(22, DeviceTableEntry {
        slug: "THM",
        has_battery: true,
        has_zone_sensor: true,
        is_actuator: Some(false),
        is_sensor: true,
        is_controller: false,
        archetype: "wireless thermostat",
        poll_codes: &[],
    });
    m.insert(18, DeviceTableEntry {
        slug: "HGI",
        has_battery: false,
        has_zone_sensor: false,
        is_actuator: Some(false),
        is_sensor: false,
        is_controller: false,
        archetype: "USB gateway adapter",
        poll_codes: &[],
    });
    m.insert(30, DeviceTableEntry {
        slug: "GWY",
        has_battery: false,
        has_zone_sensor: false,
        is_actuator: None,
        is_sensor: false,
        is_controller: false,
        archetype: "internet gateway",
        poll_codes: &[],
    });
    m
});

/// `00`/`12` are the legacy aliases of `04`/`22` respectively.
pub fn lookup(class: u8) -> Option<DeviceTableEntry> {
    let canonical = match class {
        0 => 4,
        12 => 22,
        other => other,
    };
    TABLE.get(&canonical).copied()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub alias: Option<String>,
    pub blacklist: bool,
    pub last_seen: DateTime<Utc>,
    pub last_temperature_c: Option<f32>,
    pub last_setpoint_c: Option<f32>,
    pub last_heat_demand_pct: Option<u8>,
    pub last_battery_pct: Option<u8>,
    pub bound_zone: Option<u8>,
}

impl Device {
    pub fn new(id: DeviceId, seen_at: DateTime<Utc>) -> Self {
        Self {
            id,
            alias: None,
            blacklist: false,
            last_seen: seen_at,
            last_temperature_c: None,
            last_setpoint_c: None,
            last_heat_demand_pct: None,
            last_battery_pct: None,
            bound_zone: None,
        }
    }

    pub fn table_entry(&self) -> Option<DeviceTableEntry> {
        lookup(self.id.class)
    }

    /// spec.md §4.3a: battery-powered devices are excluded from polling.
    pub fn is_pollable(&self) -> bool {
        self.table_entry().map(|e| !e.has_battery && !e.poll_codes.is_empty()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_aliases_resolve_to_canonical_entries() {
        assert_eq!(lookup(0), lookup(4));
        assert_eq!(lookup(12), lookup(22));
    }

    #[test]
    fn trv_has_battery_and_is_not_pollable() {
        let d = Device::new("04:000001".parse().unwrap(), Utc::now());
        assert!(!d.is_pollable());
    }

    #[test]
    fn bdr_has_no_battery_and_is_pollable() {
        let d = Device::new("13:000001".parse().unwrap(), Utc::now());
        assert!(d.is_pollable());
    }
}
