// SPDX-License-Identifier: AGPL-3.0-or-later

use core::fmt;

use thiserror::Error;

/// The sentinel serial carried by `DeviceId::NONE` (`--:------`).
const SENTINEL_SERIAL: u32 = 0xFF_FFFF;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed device id {0:?}")]
pub struct InvalidDeviceId(pub String);

/// A device address: a two-digit class plus a six-digit serial
/// (spec.md §3 Device, §6 wire format `AA:BBBBBB`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    pub class: u8,
    pub serial: u32,
}

impl DeviceId {
    /// The `--:------` sentinel meaning "no device".
    pub const NONE: DeviceId = DeviceId { class: 0, serial: SENTINEL_SERIAL };

    /// Class `18`, the HGI adapter itself.
    pub const ADAPTER_CLASS: u8 = 18;

    /// The gateway's own source address on outbound command lines
    /// (spec.md §6). RAMSES-II does not require the adapter's serial to
    /// be known to address it; any class-18 source is accepted as "this
    /// adapter" by the receiving devices.
    pub const ADAPTER: DeviceId = DeviceId { class: Self::ADAPTER_CLASS, serial: 0 };

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    pub fn is_adapter(&self) -> bool {
        self.class == Self::ADAPTER_CLASS
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "--:------")
        } else {
            write!(f, "{:02}:{:06}", self.class, self.serial)
        }
    }
}

impl std::str::FromStr for DeviceId {
    type Err = InvalidDeviceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "--:------" {
            return Ok(Self::NONE);
        }
        let (class_s, serial_s) =
            s.split_once(':').ok_or_else(|| InvalidDeviceId(s.to_string()))?;
        if class_s.len() != 2 || serial_s.len() != 6 {
            return Err(InvalidDeviceId(s.to_string()));
        }
        let class = class_s.parse::<u8>().map_err(|_| InvalidDeviceId(s.to_string()))?;
        let serial = serial_s.parse::<u32>().map_err(|_| InvalidDeviceId(s.to_string()))?;
        Ok(Self { class, serial })
    }
}

/// The three address slots of a Packet (spec.md §3). Which slot carries
/// the effective source/destination depends on the verb and is resolved
/// by the caller, not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressTriple {
    pub addr0: DeviceId,
    pub addr1: DeviceId,
    pub addr2: DeviceId,
}

impl AddressTriple {
    pub fn has_any_real_address(&self) -> bool {
        !self.addr0.is_none() || !self.addr1.is_none() || !self.addr2.is_none()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        &self.addr0 == id || &self.addr1 == id || &self.addr2 == id
    }

    pub fn iter(&self) -> impl Iterator<Item = DeviceId> + '_ {
        [self.addr0, self.addr1, self.addr2].into_iter()
    }
}
