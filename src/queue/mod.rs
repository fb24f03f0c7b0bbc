//! The outbound command queue: priority, fairness, and cancellation.

// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod command;
pub mod priority;
