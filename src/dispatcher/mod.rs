//! Outbound QoS: the command queue drained under retry, backoff, and
//! duty-cycle control (spec.md §4.6).

// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod pending;
pub mod qos;
pub mod state_machine;
