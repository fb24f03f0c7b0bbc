// SPDX-License-Identifier: AGPL-3.0-or-later

//! Produces raw adapter lines, either from a live serial port or from a
//! timestamped replay file (spec.md §4, §6 "Replay file format").

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, ReadHalf, WriteHalf};
use tokio_serial::SerialPortBuilderExt;
use tracing::warn;

use crate::cfg::config::SerialPortConfig;
use crate::transport::writer::LineWriter;
use crate::utils::parse_replay_timestamp;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open serial port {0}: {1}")]
    SerialOpen(String, std::io::Error),
    #[error("unrecoverable I/O error: {0}")]
    Io(#[from] std::io::Error),
}

enum Inner {
    Serial(BufReader<ReadHalf<tokio_serial::SerialStream>>),
    Replay(BufReader<tokio::fs::File>),
}

/// One producer of wire lines, abstracting over a live serial port and a
/// recorded replay file (spec.md §2 "one producer of raw lines"). A live
/// serial source also yields the write half, since the port is a single
/// duplex stream; a replay source has none.
pub struct LineSource {
    inner: Inner,
    is_replay: bool,
}

impl LineSource {
    /// Opens the serial port and returns the read half as a `LineSource`
    /// plus the write half ready for a `LineWriter`.
    pub async fn open_serial(
        cfg: &SerialPortConfig,
    ) -> Result<(Self, LineWriter<WriteHalf<tokio_serial::SerialStream>>), SourceError> {
        let port = tokio_serial::new(&cfg.port_name, cfg.baudrate)
            .open_native_async()
            .map_err(|e| SourceError::SerialOpen(cfg.port_name.clone(), e.into()))?;
        let (read_half, write_half) = tokio::io::split(port);
        let source = Self { inner: Inner::Serial(BufReader::new(read_half)), is_replay: false };
        Ok((source, LineWriter::new(write_half)))
    }

    pub async fn open_replay<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = tokio::fs::File::open(path.as_ref())
            .await
            .with_context(|| format!("opening replay file {:?}", path.as_ref()))?;
        Ok(Self { inner: Inner::Replay(BufReader::new(file)), is_replay: true })
    }

    /// Reads the next line. A live serial line is timestamped at arrival;
    /// a replay line carries its own leading timestamp, and is silently
    /// skipped when that prefix is missing or malformed (spec.md §8
    /// scenario 3) rather than raising an error. Returns `Ok(None)` at
    /// end-of-file (replay only; the serial port never signals EOF).
    pub async fn next_line(&mut self) -> Result<Option<(String, DateTime<Utc>)>, SourceError> {
        loop {
            let mut raw = String::new();
            let n = match &mut self.inner {
                Inner::Serial(r) => r.read_line(&mut raw).await?,
                Inner::Replay(r) => r.read_line(&mut raw).await?,
            };
            if n == 0 {
                return Ok(None);
            }
            let raw = raw.trim_end_matches(['\r', '\n']);
            if raw.is_empty() {
                continue;
            }

            if !self.is_replay {
                return Ok(Some((raw.to_string(), Utc::now())));
            }

            let Some((ts_str, wire)) = raw.split_once(' ') else {
                warn!(line = raw, "replay line missing timestamp prefix, dropped");
                continue;
            };
            let Some(ts) = parse_replay_timestamp(ts_str) else {
                warn!(line = raw, "replay line timestamp unparsable, dropped");
                continue;
            };
            // Keep the replay source interruptible (spec.md §4 backpressure).
            tokio::time::sleep(Duration::from_millis(1)).await;
            return Ok(Some((wire.to_string(), ts)));
        }
    }

    pub fn is_replay(&self) -> bool {
        self.is_replay
    }
}
