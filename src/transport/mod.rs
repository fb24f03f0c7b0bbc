//! The serial/replay boundary: raw line production and command
//! transmission (spec.md §2, §4.1, §4.6).

// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod line_source;
pub mod writer;
