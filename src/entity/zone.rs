// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::{
    model::{address::DeviceId, payload::ZoneMode},
    model::payload::Fragment,
};

/// Heating type of a Zone (spec.md §3; the `ZONE_TABLE`/`ZONE_CLASS_MAP` of
/// the original source, re-expressed as an enum with an actuator class).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneType {
    Radiator,
    Underfloor,
    Electric,
    ZoneValve,
    Mixing,
    StoredDhw,
}

impl ZoneType {
    /// The device class expected to actuate this zone type, where the
    /// type implies a single class (`StoredDhw` has a sensor, no actuator).
    pub fn actuator_class(self) -> Option<u8> {
        match self {
            ZoneType::Radiator => Some(4),
            ZoneType::Underfloor => Some(2),
            ZoneType::Electric | ZoneType::ZoneValve => Some(13),
            ZoneType::Mixing => None,
            ZoneType::StoredDhw => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub controller: DeviceId,
    pub zone_idx: u8,
    pub heating_type: Option<ZoneType>,
    pub sensor: Option<DeviceId>,
    pub actuators: Vec<DeviceId>,
    pub setpoint_c: Option<f32>,
    pub temperature_c: Option<f32>,
    pub mode: Option<ZoneMode>,
    pub schedule_fragment: Option<Fragment>,
}

impl Zone {
    pub fn new(controller: DeviceId, zone_idx: u8) -> Self {
        Self {
            controller,
            zone_idx,
            heating_type: None,
            sensor: None,
            actuators: Vec::new(),
            setpoint_c: None,
            temperature_c: None,
            mode: None,
            schedule_fragment: None,
        }
    }
}
