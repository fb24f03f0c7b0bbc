// SPDX-License-Identifier: AGPL-3.0-or-later

//! Writes encoded command lines to the adapter (spec.md §4.6 "serial
//! writer must not be given a new command while the adapter still holds
//! bytes").

use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_serial::SerialPort;
use tracing::debug;

/// The outbound half of the transport. Generic over `AsyncWrite` so tests
/// can substitute an in-memory buffer for a real serial port.
pub struct LineWriter<W> {
    sink: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Writes one already-encoded wire line, appending the adapter's line
    /// terminator.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        debug!(line, "writing command line");
        self.sink.write_all(line.as_bytes()).await?;
        self.sink.write_all(b"\r\n").await?;
        self.sink.flush().await?;
        Ok(())
    }
}

/// `in_waiting == 0` guard: true when the adapter has no buffered bytes
/// left to drain, so a new command may be sent (spec.md §4.6).
pub fn clear_to_send(port: &dyn SerialPort) -> bool {
    port.bytes_to_read().map(|n| n == 0).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_line_with_crlf_terminator() {
        let mut writer = LineWriter::new(Vec::new());
        writer.write_line("045  I --- 01:145038 --:------ 01:145038 1F09 003 FF073F").await.unwrap();
        let buf = writer.into_inner();
        assert!(buf.ends_with(b"\r\n"));
        assert!(String::from_utf8_lossy(&buf).starts_with("045  I"));
    }
}
