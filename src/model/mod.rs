//! The frame codec and message layer: line ↔ `Packet` ↔ `Message`.

// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod address;
pub mod message;
pub mod opcode;
pub mod packet;
pub mod payload;
pub mod verb;
