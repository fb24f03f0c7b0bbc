// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::model::{address::DeviceId, payload::Domain as DomainId};

/// The six BDR relay roles (spec.md §3 `BDR_ROLES`). Binding is monotonic
/// once set (spec.md §4.4 invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayRole {
    HeatingControl,
    HeatingPump,
    DhwValve,
    DhwValveHeating,
    ZoneValve,
    ElectricHeat,
}

/// A system-wide actuator domain (spec.md §3 Domain).
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEntity {
    pub controller: DeviceId,
    pub domain_id: DomainId,
    pub demand_pct: Option<u8>,
    pub relay_role: Option<RelayRole>,
    pub dhw_on: Option<bool>,
}

impl DomainEntity {
    pub fn new(controller: DeviceId, domain_id: DomainId) -> Self {
        Self { controller, domain_id, demand_pct: None, relay_role: None, dhw_on: None }
    }

    /// spec.md §4.4 invariant 4: the first definitive role wins.
    pub fn bind_relay_role(&mut self, role: RelayRole) {
        if self.relay_role.is_none() {
            self.relay_role = Some(role);
        }
    }
}
