//! Serial Link Library
//!
//! An asynchronous serial connection with a background listener. A
//! [`Connection`] owns one device, writes outbound payloads on request and
//! keeps the most recent inbound chunk in a single-slot mailbox that callers
//! poll.
//!
//! # Modules
//!
//! - `port`: Device abstraction, system and mock transports, port enumeration
//! - `connection`: The connection, its I/O contexts and listener task
//! - `config`: Configuration management with TOML support
//! - `error`: Connection error taxonomy

pub mod config;
pub mod connection;
pub mod error;
pub mod port;

// Re-export commonly used types for convenience
pub use connection::{
    Connection, ConnectionSettings, ConnectionStats, IoKind, ListenerState,
    RECEIVE_BUFFER_CAPACITY, SEND_BUFFER_CAPACITY,
};
pub use error::{ConnectionError, ConnectionResult};
pub use port::{
    enumerate_ports, list_ports, DataBits, MockDevice, MockDriver, Parity, PortConfig, PortError,
    SerialDriver, SerialTransport, StopBits, SystemDriver,
};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
