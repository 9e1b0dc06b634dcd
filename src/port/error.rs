//! Transport-level error types.
//!
//! These describe what went wrong while talking to a device. The connection
//! layer wraps them into [`ConnectionError`](crate::ConnectionError) variants
//! that say which step of the connection lifecycle failed.

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a [`SerialTransport`](super::SerialTransport) or
/// [`SerialDriver`](super::SerialDriver).
#[derive(Debug, Error)]
pub enum PortError {
    /// The named device does not exist.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// The device exists but another handle holds it exclusively.
    #[error("Serial port is busy: {0}")]
    Busy(String),

    /// An I/O error occurred during a device operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device rejected a configuration request.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested setting cannot be expressed by this transport.
    #[error("Unsupported setting: {0}")]
    Unsupported(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The handle was closed; pending and future operations fail with this.
    #[error("Port is not open")]
    NotOpen,

    /// The operation's completion signal was released before it finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Busy error from a port name.
    pub fn busy(port_name: impl Into<String>) -> Self {
        Self::Busy(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an Unsupported error from a message.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Create a Timeout error from a duration.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout(duration)
    }

    /// True when the error means the handle or its signal went away, which is
    /// how a pending operation observes shutdown.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::NotOpen | Self::Cancelled)
    }
}

/// Map a `serialport` open failure onto our taxonomy.
pub(crate) fn classify_open_error(port_name: &str, err: serialport::Error) -> PortError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => PortError::not_found(port_name),
        serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => PortError::not_found(port_name),
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied)
        | serialport::ErrorKind::Io(std::io::ErrorKind::AddrInUse) => PortError::busy(port_name),
        serialport::ErrorKind::InvalidInput => PortError::config(err.to_string()),
        _ => PortError::Serial(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PortError::not_found("/dev/ttyUSB0");
        assert_eq!(err.to_string(), "Serial port not found: /dev/ttyUSB0");

        let err = PortError::busy("COM3");
        assert_eq!(err.to_string(), "Serial port is busy: COM3");

        let err = PortError::config("Invalid baud rate");
        assert_eq!(err.to_string(), "Configuration error: Invalid baud rate");

        let err = PortError::NotOpen;
        assert_eq!(err.to_string(), "Port is not open");
    }

    #[test]
    fn test_timeout_error() {
        let err = PortError::timeout(Duration::from_millis(500));
        assert!(err.to_string().contains("500ms"));
    }

    #[test]
    fn test_shutdown_classification() {
        assert!(PortError::NotOpen.is_shutdown());
        assert!(PortError::Cancelled.is_shutdown());
        assert!(!PortError::config("x").is_shutdown());
    }

    #[test]
    fn test_classify_no_device() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        assert!(matches!(
            classify_open_error("/dev/ttyACM9", err),
            PortError::NotFound(name) if name == "/dev/ttyACM9"
        ));
    }

    #[test]
    fn test_classify_busy() {
        let err = serialport::Error::new(
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
            "denied",
        );
        assert!(matches!(classify_open_error("COM4", err), PortError::Busy(_)));
    }
}
