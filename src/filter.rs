// SPDX-License-Identifier: AGPL-3.0-or-later

//! Allow/block list enforcement keyed on device addresses (spec.md §4.2).
//! The gate never inspects payload; admittance is a pure function of the
//! address triple.

use std::collections::HashSet;

use crate::{
    cfg::config::FilterConfig,
    model::address::{AddressTriple, DeviceId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Whitelist,
    Blacklist,
}

pub struct FilterGate {
    mode: Mode,
    known: HashSet<DeviceId>,
    blocked: HashSet<DeviceId>,
}

impl FilterGate {
    pub fn new(cfg: &FilterConfig) -> Self {
        let parse_keys = |ids: &std::collections::HashMap<String, crate::cfg::config::DeviceTraits>| {
            ids.keys().filter_map(|s| s.parse::<DeviceId>().ok()).collect::<HashSet<_>>()
        };
        let known = parse_keys(&cfg.known_list);
        let blocked = parse_keys(&cfg.block_list);
        let mode = if cfg.enforce_known_list && !known.is_empty() { Mode::Whitelist } else { Mode::Blacklist };
        Self { mode, known, blocked }
    }

    /// Returns `true` iff the packet's addresses should be admitted.
    pub fn admit(&self, addresses: &AddressTriple) -> bool {
        match self.mode {
            Mode::Whitelist => addresses
                .iter()
                .any(|id| id.is_adapter() || self.known.contains(&id)),
            Mode::Blacklist => !addresses.iter().any(|id| self.blocked.contains(&id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::config::{DeviceTraits, FilterConfig};

    fn triple(a0: &str, a1: &str, a2: &str) -> AddressTriple {
        AddressTriple {
            addr0: a0.parse().unwrap(),
            addr1: a1.parse().unwrap(),
            addr2: a2.parse().unwrap(),
        }
    }

    #[test]
    fn whitelist_admits_known_and_adapter_scenario_4() {
        let mut known = std::collections::HashMap::new();
        known.insert("01:145038".to_string(), DeviceTraits::default());
        let cfg = FilterConfig { enforce_known_list: true, known_list: known, block_list: Default::default() };
        let gate = FilterGate::new(&cfg);

        assert!(gate.admit(&triple("01:145038", "--:------", "04:000001")));
        assert!(!gate.admit(&triple("30:111111", "--:------", "30:222222")));
    }

    #[test]
    fn blacklist_is_the_default_mode() {
        let mut blocked = std::collections::HashMap::new();
        blocked.insert("30:111111".to_string(), DeviceTraits::default());
        let cfg = FilterConfig { enforce_known_list: false, known_list: Default::default(), block_list: blocked };
        let gate = FilterGate::new(&cfg);

        assert!(!gate.admit(&triple("30:111111", "--:------", "30:222222")));
        assert!(gate.admit(&triple("01:145038", "--:------", "01:145038")));
    }

    #[test]
    fn empty_known_list_falls_back_to_blacklist_mode() {
        let cfg = FilterConfig { enforce_known_list: true, known_list: Default::default(), block_list: Default::default() };
        let gate = FilterGate::new(&cfg);
        assert!(gate.admit(&triple("01:145038", "--:------", "01:145038")));
    }
}
