//! Error types for headset control and battery polling.

use bluer::Address;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Service {uuid} not found on {address}")]
    ServiceNotFound { address: Address, uuid: Uuid },

    #[error("RFCOMM connect to {address} channel {channel} failed: {source}")]
    ConnectFailed {
        address: Address,
        channel: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("Write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("Device offline: {0}")]
    DeviceOffline(#[source] std::io::Error),

    #[error("Connection closed by device")]
    ConnectionClosed,

    #[error("Malformed status line: {0}")]
    MalformedStatusLine(String),

    #[error("Service discovery error: {0}")]
    Sdp(String),

    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown mode '{0}' (expected noise-cancelling, wind-cancelling, ambient-sound or disable)")]
    UnknownMode(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Connection-level failures the caller may retry later.
    pub fn is_offline(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. } | Self::DeviceOffline(_) | Self::ConnectionClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
