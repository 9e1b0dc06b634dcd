//! Transport layer for serial communication.
//!
//! Provides the driver/transport traits the connection is written against,
//! a hardware implementation over `serialport`, and an in-process mock.

pub mod enumerate;
pub mod error;
pub mod mock;
pub mod system;
pub mod traits;

pub use enumerate::{enumerate_ports, list_ports};
pub use error::PortError;
pub use mock::{MockDevice, MockDriver, MockStep, MockTransport};
pub use system::{SystemDriver, SystemTransport, DEFAULT_EVENT_POLL};
pub use traits::*;
