// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::RawOutputTier;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GatewayConfig {
    /// Serial port or file-replay source; exactly one must be set.
    pub source: SourceConfig,
    /// Outbound command queue, dispatcher, and duty-cycle timings.
    pub qos: QosConfig,
    /// Filter lists and the mode they're applied in.
    pub filter: FilterConfig,
    /// Entity-store limits and decode depth.
    pub entity: EntityConfig,
    /// Paths the core emits `tracing` events for; rotation and file
    /// handling belong to the external logging layer.
    #[serde(default)]
    pub logs: LogPathsConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SourceConfig {
    /// Serial device path or URL (e.g. `/dev/ttyUSB0`, `rfc2217://host:port`).
    #[serde(default)]
    pub serial_port: Option<SerialPortConfig>,
    /// Replay file path, read instead of a live serial port.
    #[serde(default)]
    pub input_file: Option<String>,
    /// Adapter control line sent once at startup (e.g. `!V`, `!T01`).
    #[serde(default)]
    pub evofw_flag: Option<String>,
    /// When false, the gateway listens only and never transmits.
    #[serde(default = "default_true")]
    pub probe_system: bool,
    /// Single outbound command to execute once at startup, then exit.
    #[serde(default)]
    pub execute_cmd: Option<String>,
    /// Global transmit kill switch, independent of `probe_system`.
    #[serde(default)]
    pub disable_sending: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SerialPortConfig {
    pub port_name: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default)]
    pub dsrdtr: bool,
    #[serde(default)]
    pub rtscts: bool,
    #[serde(default)]
    pub xonxoff: bool,
}

fn default_baudrate() -> u32 {
    115_200
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct QosConfig {
    /// Reply deadline for a command's first attempt, in milliseconds.
    #[serde(default = "default_reply_deadline_initial_ms")]
    pub reply_deadline_initial_ms: u64,
    /// Reply deadline for each retry attempt, in milliseconds.
    #[serde(default = "default_reply_deadline_retry_ms")]
    pub reply_deadline_retry_ms: u64,
    /// Base of the exponential backoff, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff ceiling, in milliseconds.
    #[serde(default = "default_backoff_ceiling_ms")]
    pub backoff_ceiling_ms: u64,
    /// Default `Command.retries` when a caller does not set one.
    #[serde(default = "default_max_retries")]
    pub max_retries_default: u8,
    /// Fraction of a rolling 60s window permitted to be spent transmitting.
    #[serde(default = "default_duty_cycle_ceiling")]
    pub duty_cycle_ceiling: f64,
    /// Adapter overhead added to each transmitted byte for the duty-cycle
    /// estimate (§9 Open Question: no documented value, chosen conservative).
    #[serde(default = "default_bytes_overhead_per_byte")]
    pub bytes_overhead_per_byte: f64,
    /// Inactivity expiry for an incomplete fragment set, in seconds.
    #[serde(default = "default_fragment_expiry_secs")]
    pub fragment_expiry_secs: u64,
    /// Bounded capacity of the command queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_reply_deadline_initial_ms() -> u64 {
    2_500
}
fn default_reply_deadline_retry_ms() -> u64 {
    1_000
}
fn default_backoff_base_ms() -> u64 {
    100
}
fn default_backoff_ceiling_ms() -> u64 {
    5_000
}
fn default_max_retries() -> u8 {
    3
}
fn default_duty_cycle_ceiling() -> f64 {
    1.0
}
fn default_bytes_overhead_per_byte() -> f64 {
    1.3
}
fn default_fragment_expiry_secs() -> u64 {
    30
}
fn default_queue_capacity() -> usize {
    200
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            reply_deadline_initial_ms: default_reply_deadline_initial_ms(),
            reply_deadline_retry_ms: default_reply_deadline_retry_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_ceiling_ms: default_backoff_ceiling_ms(),
            max_retries_default: default_max_retries(),
            duty_cycle_ceiling: default_duty_cycle_ceiling(),
            bytes_overhead_per_byte: default_bytes_overhead_per_byte(),
            fragment_expiry_secs: default_fragment_expiry_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Traits recorded for one address in `known_list`/`block_list`.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct DeviceTraits {
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub blacklist: Option<bool>,
    #[serde(default)]
    pub faked: Option<bool>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct FilterConfig {
    #[serde(default)]
    pub enforce_known_list: bool,
    #[serde(default)]
    pub known_list: HashMap<String, DeviceTraits>,
    #[serde(default)]
    pub block_list: HashMap<String, DeviceTraits>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EntityConfig {
    #[serde(default = "default_max_zones")]
    pub max_zones: u8,
    #[serde(default)]
    pub raw_output: RawOutputTier,
    #[serde(default)]
    pub known_devices: Option<String>,
}

fn default_max_zones() -> u8 {
    12
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self { max_zones: default_max_zones(), raw_output: RawOutputTier::default(), known_devices: None }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct LogPathsConfig {
    #[serde(default)]
    pub packet_log: Option<String>,
    #[serde(default)]
    pub message_log: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

impl GatewayConfig {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: GatewayConfig =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants spec.md §6 leaves implicit.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            (1..=16).contains(&self.entity.max_zones),
            "max_zones must be in 1..=16"
        );
        ensure!(
            self.qos.duty_cycle_ceiling > 0.0 && self.qos.duty_cycle_ceiling <= 1.0,
            "duty_cycle_ceiling must be in (0.0, 1.0]"
        );
        ensure!(
            self.source.serial_port.is_some() || self.source.input_file.is_some(),
            "exactly one of source.serial_port or source.input_file must be set"
        );
        ensure!(
            self.source.serial_port.is_none() || self.source.input_file.is_none(),
            "source.serial_port and source.input_file are mutually exclusive"
        );
        ensure!(
            self.qos.max_retries_default <= 7,
            "qos.max_retries_default must be in 0..=7"
        );
        ensure!(
            self.qos.queue_capacity > 0,
            "qos.queue_capacity must be non-zero"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml(source: &str) -> String {
        format!(
            "source:\n  {source}\nqos: {{}}\nfilter: {{}}\nentity: {{}}\n"
        )
    }

    #[test]
    fn defaults_validate_with_a_serial_port() {
        let yaml = minimal_yaml("serial_port:\n    port_name: /dev/ttyUSB0");
        let mut cfg: GatewayConfig = serde_yaml::from_str(&yaml).expect("parses");
        cfg.validate_and_normalize().expect("valid");
        assert_eq!(cfg.qos.duty_cycle_ceiling, 1.0);
        assert_eq!(cfg.entity.max_zones, 12);
    }

    #[test]
    fn rejects_missing_source() {
        let yaml = "source: {}\nqos: {}\nfilter: {}\nentity: {}\n";
        let mut cfg: GatewayConfig = serde_yaml::from_str(yaml).expect("parses");
        assert!(cfg.validate_and_normalize().is_err());
    }

    #[test]
    fn rejects_both_sources_set() {
        let yaml = minimal_yaml(
            "serial_port:\n    port_name: /dev/ttyUSB0\n  input_file: replay.log",
        );
        let mut cfg: GatewayConfig = serde_yaml::from_str(&yaml).expect("parses");
        assert!(cfg.validate_and_normalize().is_err());
    }

    #[test]
    fn rejects_max_zones_out_of_range() {
        let yaml = "source:\n  input_file: replay.log\nqos: {}\nfilter: {}\nentity:\n  max_zones: 20\n";
        let mut cfg: GatewayConfig = serde_yaml::from_str(yaml).expect("parses");
        assert!(cfg.validate_and_normalize().is_err());
    }
}
