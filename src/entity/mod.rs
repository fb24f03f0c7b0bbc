//! The entity state store: devices, zones, domains, and the controller
//! discovered from the live packet stream (spec.md §3, §4.4).

// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod device;
pub mod domain;
pub mod store;
pub mod zone;
