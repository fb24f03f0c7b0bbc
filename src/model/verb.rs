// SPDX-License-Identifier: AGPL-3.0-or-later

use core::fmt;

use thiserror::Error;

/// One of the four RAMSES-II verbs (spec.md GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Inform / broadcast.
    I,
    /// Request.
    RQ,
    /// Reply to a request.
    RP,
    /// Write.
    W,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown verb {0:?}")]
pub struct UnknownVerb(pub String);

impl std::str::FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "I" => Ok(Verb::I),
            "RQ" => Ok(Verb::RQ),
            "RP" => Ok(Verb::RP),
            "W" => Ok(Verb::W),
            other => Err(UnknownVerb(other.to_string())),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Two-character, space-padded, matching the wire grammar (spec.md §6).
        f.write_str(match self {
            Verb::I => " I",
            Verb::RQ => "RQ",
            Verb::RP => "RP",
            Verb::W => " W",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_verbs() {
        assert_eq!(" I".parse::<Verb>().unwrap(), Verb::I);
        assert_eq!("RQ".parse::<Verb>().unwrap(), Verb::RQ);
        assert_eq!("RP".parse::<Verb>().unwrap(), Verb::RP);
        assert_eq!(" W".parse::<Verb>().unwrap(), Verb::W);
    }

    #[test]
    fn rejects_unknown() {
        assert!("XX".parse::<Verb>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for v in [Verb::I, Verb::RQ, Verb::RP, Verb::W] {
            assert_eq!(v.to_string().parse::<Verb>().unwrap(), v);
        }
    }
}
