//! Errors surfaced by [`Connection`](crate::Connection) operations.
//!
//! Port-level failures keep their [`PortError`] as the source so callers can
//! still tell a missing device from a claimed one.

use crate::port::PortError;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The device is missing or already claimed.
    #[error("Failed to open {port}: {source}")]
    DeviceOpen {
        port: String,
        #[source]
        source: PortError,
    },

    /// The device rejected one of the configuration calls made by `open`.
    #[error("Device rejected {step}: {source}")]
    Configuration {
        step: &'static str,
        #[source]
        source: PortError,
    },

    #[error("Listener could not be started: {0}")]
    ListenerStart(String),

    #[error("I/O error: {0}")]
    Io(#[from] PortError),

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection is not open")]
    NotOpen,

    /// Resources from an earlier open are still held; close first.
    #[error("Connection is already open")]
    AlreadyOpen,
}

impl ConnectionError {
    /// Stable name of the error category, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeviceOpen { .. } => "device_open",
            Self::Configuration { .. } => "configuration",
            Self::ListenerStart(_) => "listener_start",
            Self::Io(_) => "io",
            Self::WriteTimeout(_) => "write_timeout",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotOpen => "not_open",
            Self::AlreadyOpen => "already_open",
        }
    }

    /// Whether the error came from the device or its driver rather than from
    /// how the connection was used.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceOpen { .. } | Self::Configuration { .. } | Self::Io(_) | Self::WriteTimeout(_)
        )
    }
}
