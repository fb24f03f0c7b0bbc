// SPDX-License-Identifier: AGPL-3.0-or-later

//! Materialises devices, zones and domains from the message stream and
//! enforces the structural invariants of spec.md §4.4.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{
    cfg::enums::RawOutputTier,
    entity::{
        device::{Device, lookup as device_table_lookup},
        domain::{DomainEntity, RelayRole},
        zone::Zone,
    },
    model::{
        address::DeviceId,
        message::Message,
        opcode::Code,
        payload::{DecodedPayload, Domain as DomainId},
        verb::Verb,
    },
    queue::command::{Command, Priority},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntityError {
    #[error("zone_idx {0} is out of range")]
    ZoneIndexOutOfRange(u8),
    #[error("device {device} is already the sensor for zone {existing}, cannot also sense {requested}")]
    SensorAlreadyBound { device: DeviceId, existing: u8, requested: u8 },
    #[error("message from {0} is a second controller, tagged as orphan")]
    OrphanController(DeviceId),
}

/// One entry of the known-devices file (spec.md §6), before serialization.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct KnownDeviceEntry {
    pub alias: Option<String>,
    pub class: Option<String>,
    pub blacklist: Option<bool>,
    pub faked: Option<bool>,
}

/// A stable-order snapshot of the known-devices list. Serializing this to
/// disk with 4-space indentation is the caller's job (spec.md §4.2a).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct KnownDevicesSnapshot(pub BTreeMap<String, KnownDeviceEntry>);

pub struct EntityStore {
    max_zones: u8,
    primary_controller: Option<DeviceId>,
    orphan_controllers: HashSet<DeviceId>,
    devices: HashMap<DeviceId, Device>,
    zones: HashMap<(DeviceId, u8), Zone>,
    domains: HashMap<(DeviceId, DomainId), DomainEntity>,
}

impl EntityStore {
    pub fn new(max_zones: u8) -> Self {
        Self {
            max_zones,
            primary_controller: None,
            orphan_controllers: HashSet::new(),
            devices: HashMap::new(),
            zones: HashMap::new(),
            domains: HashMap::new(),
        }
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn zone(&self, controller: &DeviceId, zone_idx: u8) -> Option<&Zone> {
        self.zones.get(&(*controller, zone_idx))
    }

    pub fn domain(&self, controller: &DeviceId, domain_id: DomainId) -> Option<&DomainEntity> {
        self.domains.get(&(*controller, domain_id))
    }

    pub fn primary_controller(&self) -> Option<DeviceId> {
        self.primary_controller
    }

    /// Applies a Message per the `raw_output` tier: tier 0 runs both create
    /// and update, tier 1 only create, tiers 2/3 skip both (spec.md §4.4).
    pub fn ingest(&mut self, msg: &Message, tier: RawOutputTier) -> Result<(), EntityError> {
        if tier.runs_create() {
            self.create_entities(msg)?;
        }
        if tier.runs_update() {
            self.update_entities(msg)?;
        }
        Ok(())
    }

    /// Idempotent: extends the graph with any devices/zones/domains a
    /// Message references, without mutating attributes.
    pub fn create_entities(&mut self, msg: &Message) -> Result<(), EntityError> {
        if msg.src.is_adapter() {
            return Ok(());
        }
        self.note_controller(msg)?;
        self.devices.entry(msg.src).or_insert_with(|| Device::new(msg.src, msg.recv_ts));
        if !msg.dest.is_none() && !msg.dest.is_adapter() {
            self.devices.entry(msg.dest).or_insert_with(|| Device::new(msg.dest, msg.recv_ts));
        }

        if let Some(controller) = self.resolve_controller_for(msg) {
            if let Some(idx) = msg.zone_idx {
                if idx >= self.max_zones {
                    return Err(EntityError::ZoneIndexOutOfRange(idx));
                }
                self.zones.entry((controller, idx)).or_insert_with(|| Zone::new(controller, idx));
            }
            if let Some(domain_id) = msg.domain {
                self.domains
                    .entry((controller, domain_id))
                    .or_insert_with(|| DomainEntity::new(controller, domain_id));
            }
        }
        Ok(())
    }

    /// Mutates attributes of already-created entities.
    pub fn update_entities(&mut self, msg: &Message) -> Result<(), EntityError> {
        if msg.src.is_adapter() {
            return Ok(());
        }

        if let Some(device) = self.devices.get_mut(&msg.src) {
            // Monotonic last_seen (spec.md §8).
            if msg.recv_ts > device.last_seen {
                device.last_seen = msg.recv_ts;
            }
        }

        let controller = self.resolve_controller_for(msg);

        match &msg.payload {
            DecodedPayload::ZoneTemperature { zone_idx, temperature_c } => {
                if let Some(controller) = controller {
                    self.bind_zone_sensor(controller, *zone_idx, msg.src)?;
                    if let Some(zone) = self.zones.get_mut(&(controller, *zone_idx)) {
                        zone.temperature_c = *temperature_c;
                    }
                    if let Some(d) = self.devices.get_mut(&msg.src) {
                        d.last_temperature_c = *temperature_c;
                    }
                }
            },
            DecodedPayload::ZoneSetpoint { zone_idx, setpoint_c } => {
                if let Some(controller) = controller {
                    if let Some(zone) = self.zones.get_mut(&(controller, *zone_idx)) {
                        zone.setpoint_c = *setpoint_c;
                    }
                }
            },
            DecodedPayload::HeatDemand { demand_pct, .. } => {
                if let Some(d) = self.devices.get_mut(&msg.src) {
                    d.last_heat_demand_pct = Some(*demand_pct);
                }
            },
            DecodedPayload::RelayDemand { scope, .. } => {
                if let (Some(controller), crate::model::payload::Scope::Domain(domain_id)) =
                    (controller, *scope)
                {
                    if let Some(entry) = self.domains.get_mut(&(controller, domain_id)) {
                        if let Some(role) = relay_role_for_domain(domain_id) {
                            entry.bind_relay_role(role);
                        }
                    }
                }
            },
            DecodedPayload::DhwState { state } => {
                if let Some(controller) = controller {
                    if let Some(entry) =
                        self.domains.get_mut(&(controller, DomainId::HotWaterValve))
                    {
                        entry.dhw_on =
                            Some(matches!(state, crate::model::payload::DhwState::On));
                    }
                }
            },
            _ => {},
        }
        Ok(())
    }

    fn bind_zone_sensor(
        &mut self,
        controller: DeviceId,
        zone_idx: u8,
        sensor: DeviceId,
    ) -> Result<(), EntityError> {
        if let Some(device) = self.devices.get(&sensor) {
            if let Some(existing) = device.bound_zone {
                if existing != zone_idx {
                    warn!(?sensor, existing, requested = zone_idx, "rejecting conflicting zone-sensor binding");
                    return Err(EntityError::SensorAlreadyBound {
                        device: sensor,
                        existing,
                        requested: zone_idx,
                    });
                }
            }
        }
        if let Some(device) = self.devices.get_mut(&sensor) {
            device.bound_zone = Some(zone_idx);
        }
        if let Some(zone) = self.zones.get_mut(&(controller, zone_idx)) {
            zone.sensor = Some(sensor);
        }
        Ok(())
    }

    /// spec.md §4.4 invariant 1: at most one active controller; a second
    /// controller's messages are tagged orphan and never merged.
    fn note_controller(&mut self, msg: &Message) -> Result<(), EntityError> {
        let is_controller_class = device_table_lookup(msg.src.class).map(|e| e.is_controller).unwrap_or(false);
        if !is_controller_class {
            return Ok(());
        }
        match self.primary_controller {
            None => {
                self.primary_controller = Some(msg.src);
                Ok(())
            },
            Some(primary) if primary == msg.src => Ok(()),
            Some(_) => {
                if self.orphan_controllers.insert(msg.src) {
                    warn!(controller = %msg.src, "second controller observed, tagging messages as orphan");
                }
                Err(EntityError::OrphanController(msg.src))
            },
        }
    }

    fn resolve_controller_for(&self, msg: &Message) -> Option<DeviceId> {
        match self.primary_controller {
            Some(primary) if !self.orphan_controllers.contains(&msg.src) => Some(primary),
            _ => None,
        }
    }

    /// spec.md §4.2a: a pure, side-effect-free conversion of the known
    /// devices. Stable key order is a `BTreeMap` property, not sorted here.
    pub fn known_devices_snapshot(&self) -> KnownDevicesSnapshot {
        let mut out = BTreeMap::new();
        for device in self.devices.values() {
            out.insert(
                device.id.to_string(),
                KnownDeviceEntry {
                    alias: device.alias.clone(),
                    class: device_table_lookup(device.id.class).map(|e| e.slug.to_string()),
                    blacklist: device.blacklist.then_some(true),
                    faked: None,
                },
            );
        }
        KnownDevicesSnapshot(out)
    }

    /// spec.md §4.2a: seeds aliases/blacklist/class hints at startup.
    /// Unknown devices are created from the snapshot so a pre-seeded
    /// known-devices file survives a fresh process start.
    pub fn apply_known_devices(&mut self, snapshot: &KnownDevicesSnapshot, seen_at: chrono::DateTime<chrono::Utc>) {
        for (id_str, entry) in &snapshot.0 {
            let Ok(id) = id_str.parse::<DeviceId>() else { continue };
            let device = self.devices.entry(id).or_insert_with(|| Device::new(id, seen_at));
            device.alias = entry.alias.clone();
            device.blacklist = entry.blacklist.unwrap_or(false);
        }
    }

    /// spec.md §4.3a: the next poll `Command` for a pollable device.
    /// Battery-powered devices are excluded. Returns an empty vec when the
    /// device has no registered poll codes.
    pub fn poll_commands_for(&self, id: &DeviceId) -> Vec<Command> {
        let Some(device) = self.devices.get(id) else { return Vec::new() };
        if !device.is_pollable() {
            return Vec::new();
        }
        let Some(entry) = device.table_entry() else { return Vec::new() };
        entry
            .poll_codes
            .iter()
            .map(|code| Command::new(Verb::RQ, *id, *code, Vec::new()).with_priority(Priority::Low))
            .collect()
    }

    /// spec.md §4.3a: a one-shot discovery burst for a newly sighted
    /// device, distinct from steady-state polling.
    pub fn discovery_commands_for(&self, id: &DeviceId) -> Vec<Command> {
        let Some(device) = self.devices.get(id) else { return Vec::new() };
        let Some(entry) = device.table_entry() else { return Vec::new() };
        entry
            .poll_codes
            .iter()
            .chain(std::iter::once(&Code::SYSTEM_SYNC).filter(|_| entry.is_controller))
            .map(|code| Command::new(Verb::RQ, *id, *code, Vec::new()).with_priority(Priority::Low))
            .collect()
    }
}

fn relay_role_for_domain(domain_id: DomainId) -> Option<RelayRole> {
    match domain_id {
        DomainId::HeatingValve => Some(RelayRole::HeatingControl),
        DomainId::HotWaterValve => Some(RelayRole::DhwValve),
        DomainId::HeatingControl => Some(RelayRole::HeatingControl),
        DomainId::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{payload::Scope, verb::Verb};

    fn ts() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp(0, 0).expect("epoch")
    }

    fn msg(src: &str, dest: &str, code: Code, payload: DecodedPayload, zone_idx: Option<u8>) -> Message {
        Message {
            recv_ts: ts(),
            verb: Verb::I,
            src: src.parse().unwrap(),
            dest: dest.parse().unwrap(),
            code,
            payload,
            zone_idx,
            domain: None,
        }
    }

    #[test]
    fn creates_device_and_zone_from_scenario_1() {
        let mut store = EntityStore::new(12);
        let m = msg(
            "01:145038",
            "01:145038",
            Code::SYSTEM_SYNC,
            DecodedPayload::SystemSync { period_ms: 0x073F * 10 },
            None,
        );
        store.create_entities(&m).expect("ok");
        assert!(store.device(&"01:145038".parse().unwrap()).is_some());
        assert_eq!(store.primary_controller(), Some("01:145038".parse().unwrap()));
    }

    #[test]
    fn second_controller_is_tagged_orphan_scenario_6() {
        let mut store = EntityStore::new(12);
        let m1 = msg("01:145038", "01:145038", Code::SYSTEM_MODE, DecodedPayload::SystemMode { mode: crate::model::payload::SystemMode::Auto }, None);
        store.create_entities(&m1).expect("ok");

        let m2 = msg("01:222222", "01:222222", Code::SYSTEM_MODE, DecodedPayload::SystemMode { mode: crate::model::payload::SystemMode::Auto }, None);
        let err = store.create_entities(&m2);
        assert_eq!(err, Err(EntityError::OrphanController("01:222222".parse().unwrap())));
        assert_eq!(store.primary_controller(), Some("01:145038".parse().unwrap()));
    }

    #[test]
    fn zone_index_out_of_range_is_rejected() {
        let mut store = EntityStore::new(4);
        let m = msg(
            "01:145038",
            "01:145038",
            Code::SYSTEM_MODE,
            DecodedPayload::SystemMode { mode: crate::model::payload::SystemMode::Auto },
            None,
        );
        store.create_entities(&m).expect("controller set");

        let zone_msg = msg(
            "04:000001",
            "01:145038",
            Code::ZONE_TEMPERATURE,
            DecodedPayload::ZoneTemperature { zone_idx: 9, temperature_c: Some(20.0) },
            Some(9),
        );
        assert_eq!(store.create_entities(&zone_msg), Err(EntityError::ZoneIndexOutOfRange(9)));
    }

    #[test]
    fn device_cannot_sense_two_zones() {
        let mut store = EntityStore::new(12);
        let ctrl = msg("01:145038", "01:145038", Code::SYSTEM_MODE, DecodedPayload::SystemMode { mode: crate::model::payload::SystemMode::Auto }, None);
        store.create_entities(&ctrl).expect("ok");

        let sensor = "04:000001";
        for idx in [0u8, 1u8] {
            let m = msg(sensor, "01:145038", Code::ZONE_TEMPERATURE, DecodedPayload::ZoneTemperature { zone_idx: idx, temperature_c: Some(20.0) }, Some(idx));
            store.create_entities(&m).expect("create ok");
        }

        let m0 = msg(sensor, "01:145038", Code::ZONE_TEMPERATURE, DecodedPayload::ZoneTemperature { zone_idx: 0, temperature_c: Some(20.0) }, Some(0));
        store.update_entities(&m0).expect("first binding ok");

        let m1 = msg(sensor, "01:145038", Code::ZONE_TEMPERATURE, DecodedPayload::ZoneTemperature { zone_idx: 1, temperature_c: Some(21.0) }, Some(1));
        assert!(store.update_entities(&m1).is_err());
    }

    #[test]
    fn relay_demand_binds_domain_role_monotonically() {
        let mut store = EntityStore::new(12);
        let ctrl = msg("01:145038", "01:145038", Code::SYSTEM_MODE, DecodedPayload::SystemMode { mode: crate::model::payload::SystemMode::Auto }, None);
        store.create_entities(&ctrl).expect("ok");

        let relay = msg(
            "13:000001",
            "01:145038",
            Code::RELAY_DEMAND,
            DecodedPayload::RelayDemand { scope: Scope::Domain(DomainId::HeatingControl), demand_pct: 100 },
            None,
        );
        let mut relay_with_domain = relay.clone();
        relay_with_domain.domain = Some(DomainId::HeatingControl);
        store.create_entities(&relay_with_domain).expect("ok");
        store.update_entities(&relay_with_domain).expect("ok");

        let entry = store.domain(&"01:145038".parse().unwrap(), DomainId::HeatingControl).expect("exists");
        assert_eq!(entry.relay_role, Some(RelayRole::HeatingControl));
    }
}
