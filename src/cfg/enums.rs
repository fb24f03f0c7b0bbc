// SPDX-License-Identifier: AGPL-3.0-or-later

use core::fmt;

use serde::{Deserialize, Serialize};

/// How far a Message travels through the decode pipeline (spec.md §4.4,
/// §6 `raw_output`). Lower tiers do more work.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum RawOutputTier {
    /// Create and update entities from every decoded Message.
    #[default]
    Full,
    /// Create entities but never mutate existing attributes.
    CreateOnly,
    /// Decode but never touch the EntityStore; packets still flow to logs.
    LogOnly,
    /// Skip message decoding entirely; only the FrameCodec/FilterGate run.
    PacketOnly,
}

impl TryFrom<u8> for RawOutputTier {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(RawOutputTier::Full),
            1 => Ok(RawOutputTier::CreateOnly),
            2 => Ok(RawOutputTier::LogOnly),
            3 => Ok(RawOutputTier::PacketOnly),
            other => Err(format!("raw_output must be 0..=3, got {other}")),
        }
    }
}

impl From<RawOutputTier> for u8 {
    fn from(t: RawOutputTier) -> Self {
        match t {
            RawOutputTier::Full => 0,
            RawOutputTier::CreateOnly => 1,
            RawOutputTier::LogOnly => 2,
            RawOutputTier::PacketOnly => 3,
        }
    }
}

impl fmt::Display for RawOutputTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

impl RawOutputTier {
    pub fn runs_create(self) -> bool {
        matches!(self, RawOutputTier::Full | RawOutputTier::CreateOnly)
    }

    pub fn runs_update(self) -> bool {
        matches!(self, RawOutputTier::Full)
    }

    pub fn decodes_messages(self) -> bool {
        !matches!(self, RawOutputTier::PacketOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_output_tier_round_trips_through_u8() {
        for v in 0u8..=3 {
            let tier = RawOutputTier::try_from(v).expect("valid tier");
            assert_eq!(u8::from(tier), v);
        }
    }

    #[test]
    fn raw_output_tier_rejects_out_of_range() {
        assert!(RawOutputTier::try_from(4).is_err());
    }
}
