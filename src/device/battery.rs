use std::future::Future;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::at::{self, LineOutcome};

const READ_CHUNK: usize = 1024;
/// Longest unterminated line kept before it is discarded.
const MAX_LINE: usize = 4096;

/// Outcome of one battery poll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", content = "percent", rename_all = "lowercase")]
pub enum BatterySample {
    /// Raw value as reported; may fall outside 0..=100 on odd devices.
    Level(f64),
    Unknown,
}

impl BatterySample {
    pub fn level(&self) -> Option<f64> {
        match self {
            Self::Level(v) => Some(*v),
            Self::Unknown => None,
        }
    }

    /// Level rounded and clamped for display.
    pub fn display_percent(&self) -> Option<u8> {
        self.level().map(|v| v.round().clamp(0.0, 100.0) as u8)
    }
}

impl std::fmt::Display for BatterySample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.display_percent() {
            Some(p) => write!(f, "{}%", p),
            None => f.write_str("unknown"),
        }
    }
}

/// Hands-free AT exchange that ends at the first battery report.
///
/// The headset drives the conversation: it sends capability probes which we
/// answer from the dialect table in [`at`], then starts emitting status lines.
/// The session holds its stream exclusively and closes it when it ends.
pub struct BatterySession<S> {
    stream: S,
    pending: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> BatterySession<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    /// Run until a battery value arrives or `stop` resolves.
    ///
    /// `stop` is the cancellation point: a timeout or an explicit signal.
    /// Cancellation yields [`BatterySample::Unknown`]; a dropped or refused
    /// connection yields an offline error.
    pub async fn run_until<F: Future<Output = ()>>(mut self, stop: F) -> Result<BatterySample> {
        let result = tokio::select! {
            level = self.run() => level.map(BatterySample::Level),
            _ = stop => {
                info!("Battery session stopped before a report arrived");
                Ok(BatterySample::Unknown)
            }
        };
        let _ = self.stream.shutdown().await;
        result
    }

    async fn run(&mut self) -> Result<f64> {
        loop {
            let line = self.next_line().await?;
            debug!("AT RX: {}", line);

            match at::classify(&line) {
                LineOutcome::Reply(lines) => {
                    for reply in lines {
                        self.send(reply).await?;
                    }
                }
                LineOutcome::Battery(level) => {
                    info!("Battery level: {}", level);
                    return Ok(level);
                }
                LineOutcome::Consumed => {}
                LineOutcome::Malformed(e) => warn!("Ignoring line: {}", e),
            }
        }
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        debug!("AT TX: {}", text);
        self.stream
            .write_all(&at::frame(text))
            .await
            .map_err(Error::DeviceOffline)?;
        self.stream.flush().await.map_err(Error::DeviceOffline)
    }

    async fn next_line(&mut self) -> Result<String> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self
                .stream
                .read(&mut chunk)
                .await
                .map_err(Error::DeviceOffline)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.pending.extend_from_slice(&chunk[..n]);

            if self.pending.len() > MAX_LINE
                && !self.pending.iter().any(|&b| b == b'\r' || b == b'\n')
            {
                warn!(
                    "Dropping {} bytes without a line terminator",
                    self.pending.len()
                );
                self.pending.clear();
            }
        }
    }

    /// Pop the next non-empty line terminated by `\r` or `\n`.
    fn take_line(&mut self) -> Option<String> {
        loop {
            let end = self
                .pending
                .iter()
                .position(|&b| b == b'\r' || b == b'\n')?;
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..end]).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }
}
