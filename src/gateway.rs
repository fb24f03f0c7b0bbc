// SPDX-License-Identifier: AGPL-3.0-or-later

//! The facade that wires `FrameCodec -> FilterGate -> MessageDecoder ->
//! EntityStore` and `CommandQueue -> QosDispatcher -> serial writer`
//! into one run loop (spec.md §2, §4.7).

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::{interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cfg::config::GatewayConfig;
use crate::dispatcher::qos::{Action, QosDispatcher};
use crate::entity::store::EntityStore;
use crate::filter::FilterGate;
use crate::model::{message::MessageDecoder, packet};
use crate::transport::line_source::LineSource;
use crate::transport::writer::LineWriter;

/// The outbound half, present only when transmitting on a live serial
/// port; a replay source or a listen-only run has none.
type SerialWriter = LineWriter<tokio::io::WriteHalf<tokio_serial::SerialStream>>;

/// Process exit codes (spec.md §6 "Exit codes").
pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG_ERROR: i32 = 1;
pub const EXIT_SERIAL_OPEN_FAILURE: i32 = 2;
pub const EXIT_IO_ERROR: i32 = 3;

/// The assembled pipeline, owning every component between the raw line
/// and the outbound wire (spec.md §2).
pub struct Gateway {
    config: GatewayConfig,
    filter: FilterGate,
    decoder: MessageDecoder,
    store: EntityStore,
    dispatcher: QosDispatcher,
    cancel: CancellationToken,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let filter = FilterGate::new(&config.filter);
        let decoder = MessageDecoder::new(Duration::from_secs(config.qos.fragment_expiry_secs));
        let store = EntityStore::new(config.entity.max_zones);
        let dispatcher = QosDispatcher::new(config.qos.clone());
        Self { config, filter, decoder, store, dispatcher, cancel: CancellationToken::new() }
    }

    pub fn entity_store(&self) -> &EntityStore {
        &self.store
    }

    pub fn queue_command(&mut self, cmd: crate::queue::command::Command) -> Result<(), crate::queue::priority::QueueFull> {
        self.dispatcher.queue_mut().enqueue(cmd)
    }

    /// Opens the configured source, spawns the run loop, and awaits
    /// termination by shutdown signal or replay end-of-file.
    pub async fn start(mut self) -> i32 {
        let (mut source, mut writer) = match self.open_source().await {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "failed to open source");
                return EXIT_SERIAL_OPEN_FAILURE;
            },
        };

        if let (Some(flag), Some(writer)) = (self.config.source.evofw_flag.clone(), writer.as_mut()) {
            if let Err(e) = writer.write_line(&flag).await {
                warn!(error = %e, "failed to send adapter control flag");
            }
        }

        match self.run_loop(&mut source, &mut writer).await {
            Ok(()) => EXIT_OK,
            Err(e) => {
                warn!(error = %e, "unrecoverable I/O error");
                EXIT_IO_ERROR
            },
        }
    }

    async fn open_source(&self) -> Result<(LineSource, Option<SerialWriter>)> {
        if let Some(serial_cfg) = &self.config.source.serial_port {
            let (source, writer) =
                LineSource::open_serial(serial_cfg).await.context("opening serial port")?;
            return Ok((source, Some(writer)));
        }
        let input_file = self
            .config
            .source
            .input_file
            .as_ref()
            .context("neither serial_port nor input_file configured")?;
        Ok((LineSource::open_replay(input_file).await?, None))
    }

    /// The single-threaded cooperative run loop (spec.md §5): one
    /// `select!` over the line source, dispatcher timers, and shutdown
    /// signals. Never spawns a second worker task.
    async fn run_loop(&mut self, source: &mut LineSource, writer: &mut Option<SerialWriter>) -> Result<()> {
        let mut shutdown = shutdown_signals()?;
        let mut timeout_tick = interval(Duration::from_millis(250));
        let disable_sending = self.config.source.disable_sending || !self.config.source.probe_system;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("shutdown requested, draining in-flight commands");
                    sleep(Duration::from_millis(250)).await;
                    return Ok(());
                },

                sig = shutdown.recv() => {
                    match sig {
                        ShutdownSignal::Terminate => {
                            info!("termination signal received");
                            self.cancel.cancel();
                        },
                        ShutdownSignal::DumpState => self.dump_state(),
                        ShutdownSignal::DumpDebug => self.dump_debug(),
                    }
                },

                _ = timeout_tick.tick() => {
                    let now = Utc::now();
                    let given_up = self.dispatcher.sweep_timeouts(now);
                    for key in given_up {
                        debug!(?key, "command cancelled after exhausting retries");
                    }
                    self.dispatcher.requeue_ready_retries(now);
                },

                line = source.next_line() => {
                    match line? {
                        Some((raw, recv_ts)) => self.handle_line(&raw, recv_ts),
                        None => {
                            info!("replay source reached end of file");
                            return Ok(());
                        },
                    }
                },
            }

            if !disable_sending {
                self.try_transmit(writer).await?;
            }
        }
    }

    fn handle_line(&mut self, raw: &str, recv_ts: chrono::DateTime<Utc>) {
        if let Some(adapter_line) = packet::classify_line(raw) {
            debug!(?adapter_line, "adapter line, not a frame");
            return;
        }

        let pkt = match packet::decode(raw, recv_ts) {
            Ok(p) => p,
            Err(reason) => {
                debug!(line = raw, %reason, "dropped");
                return;
            },
        };
        tracing::event!(target: "packet_log", tracing::Level::INFO, line = %pkt.encode());

        if !self.filter.admit(&pkt.addresses) {
            return;
        }

        let tier = self.config.entity.raw_output;
        if !tier.decodes_messages() {
            return;
        }

        match self.decoder.decode(&pkt) {
            Ok(Some(msg)) => {
                tracing::event!(target: "message_log", tracing::Level::INFO, code = %msg.code, verb = ?msg.verb);
                if let Some(key) = self.dispatcher.on_message(&msg) {
                    debug!(?key, "reply matched to a pending command");
                }
                if let Err(e) = self.store.ingest(&msg, tier) {
                    warn!(error = %e, "message tagged orphan, not merged");
                }
            },
            Ok(None) => {},
            Err(e) => debug!(%e, "could not decode payload"),
        }
    }

    async fn try_transmit(&mut self, writer: &mut Option<SerialWriter>) -> Result<()> {
        match self.dispatcher.poll(Utc::now()) {
            Action::Transmit(cmd) => {
                let line = command_to_wire_line(&cmd);
                debug!(line, "transmitting command");
                if let Some(writer) = writer.as_mut() {
                    writer.write_line(&line).await?;
                }
                self.dispatcher.on_transmitted(cmd, Utc::now());
            },
            Action::Idle => {},
        }
        Ok(())
    }

    fn dump_state(&self) {
        info!(
            devices = self.store.primary_controller().is_some(),
            "state dump requested (SIGUSR1)"
        );
    }

    fn dump_debug(&self) {
        info!(pending = self.dispatcher.pending().len(), "debug dump requested (SIGUSR2)");
    }
}

/// Re-encodes a `Command` as the outbound wire line (spec.md §6, same
/// grammar as inbound minus the RSSI field): verb, seq, all three
/// addresses (this adapter, the destination, the sentinel), code, len,
/// payload.
fn command_to_wire_line(cmd: &crate::queue::command::Command) -> String {
    use crate::model::address::DeviceId;
    use crate::utils::to_hex_upper;
    format!(
        "{} --- {} {} --:------ {} {:03} {}",
        cmd.verb,
        DeviceId::ADAPTER,
        cmd.dest,
        cmd.code,
        cmd.payload.len(),
        to_hex_upper(&cmd.payload),
    )
}

enum ShutdownSignal {
    Terminate,
    DumpState,
    DumpDebug,
}

struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
    dump_state: tokio::signal::unix::Signal,
    dump_debug: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    async fn recv(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownSignal::Terminate,
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
            _ = self.hangup.recv() => ShutdownSignal::Terminate,
            _ = self.dump_state.recv() => ShutdownSignal::DumpState,
            _ = self.dump_debug.recv() => ShutdownSignal::DumpDebug,
        }
    }
}

fn shutdown_signals() -> Result<ShutdownSignals> {
    Ok(ShutdownSignals {
        interrupt: signal(SignalKind::interrupt())?,
        terminate: signal(SignalKind::terminate())?,
        hangup: signal(SignalKind::hangup())?,
        dump_state: signal(SignalKind::user_defined1())?,
        dump_debug: signal(SignalKind::user_defined2())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{address::DeviceId, opcode::Code, verb::Verb};
    use crate::queue::command::Command;

    #[test]
    fn command_encodes_to_the_wire_grammar_minus_rssi() {
        let cmd = Command::new(Verb::RQ, "01:145038".parse::<DeviceId>().unwrap(), Code::SYSTEM_SYNC, vec![0xFF]);
        let line = command_to_wire_line(&cmd);
        assert_eq!(line, "RQ --- 18:000000 01:145038 --:------ 1F09 001 FF");
        assert_eq!(line.split_whitespace().count(), 8, "outbound grammar is 9 fields minus RSSI");
    }
}
