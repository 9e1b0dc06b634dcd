//! Core types and traits for the serial transport seam.
//!
//! [`SerialDriver`] opens devices and lists them; [`SerialTransport`] is one
//! open device handle. Both real hardware and the in-process mock implement
//! them, so the connection layer never touches the OS directly.

use super::error::PortError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::Duration;

/// Everything needed to open and configure a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// System path or name of the device (`/dev/ttyUSB0`, `COM3`).
    pub port: String,

    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Number of data bits per character.
    pub data_bits: DataBits,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Parity checking mode.
    pub parity: Parity,
}

impl PortConfig {
    /// 8N1 at the given baud rate.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }

    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    /// Parse the numeric form used on the command line and in config files.
    pub fn from_count(count: u8) -> Option<Self> {
        match count {
            5 => Some(Self::Five),
            6 => Some(Self::Six),
            7 => Some(Self::Seven),
            8 => Some(Self::Eight),
            _ => None,
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl TryFrom<StopBits> for serialport::StopBits {
    type Error = PortError;

    fn try_from(bits: StopBits) -> Result<Self, Self::Error> {
        match bits {
            StopBits::One => Ok(serialport::StopBits::One),
            StopBits::Two => Ok(serialport::StopBits::Two),
            StopBits::OnePointFive => Err(PortError::unsupported("1.5 stop bits")),
        }
    }
}

impl std::str::FromStr for StopBits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "one" => Ok(Self::One),
            "1.5" | "one_point_five" => Ok(Self::OnePointFive),
            "2" | "two" => Ok(Self::Two),
            other => Err(format!("invalid stop bits '{other}' (expected 1, 1.5 or 2)")),
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl TryFrom<Parity> for serialport::Parity {
    type Error = PortError;

    fn try_from(parity: Parity) -> Result<Self, Self::Error> {
        match parity {
            Parity::None => Ok(serialport::Parity::None),
            Parity::Odd => Ok(serialport::Parity::Odd),
            Parity::Even => Ok(serialport::Parity::Even),
            Parity::Mark | Parity::Space => {
                Err(PortError::unsupported(format!("{parity:?} parity")))
            }
        }
    }
}

/// Set of device events a wait can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub const EMPTY: Self = Self(0);
    /// At least one character arrived in the input queue.
    pub const RXCHAR: Self = Self(0x0001);
    /// A line-status error occurred (framing, overrun, parity).
    pub const ERR: Self = Self(0x0080);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Which queues and pending operations a purge discards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Purge(u8);

impl Purge {
    /// Abort an in-flight write.
    pub const TX_ABORT: Self = Self(0x01);
    /// Abort an in-flight read.
    pub const RX_ABORT: Self = Self(0x02);
    /// Discard the output queue.
    pub const TX_CLEAR: Self = Self(0x04);
    /// Discard the input queue.
    pub const RX_CLEAR: Self = Self(0x08);
    pub const ALL: Self = Self(0x0f);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn touches_input(self) -> bool {
        self.0 & (Self::RX_ABORT.0 | Self::RX_CLEAR.0) != 0
    }

    pub fn touches_output(self) -> bool {
        self.0 & (Self::TX_ABORT.0 | Self::TX_CLEAR.0) != 0
    }
}

impl BitOr for Purge {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Line error flags latched by the device since the last status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineErrors {
    pub overrun: bool,
    pub parity: bool,
    pub framing: bool,
    pub break_detected: bool,
}

impl LineErrors {
    pub fn any(&self) -> bool {
        self.overrun || self.parity || self.framing || self.break_detected
    }
}

/// Snapshot of the device's error state and queue depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommStatus {
    pub errors: LineErrors,
    /// Bytes waiting in the input queue.
    pub in_queue: usize,
    /// Bytes waiting in the output queue.
    pub out_queue: usize,
}

impl std::str::FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            "mark" | "m" => Ok(Self::Mark),
            "space" | "s" => Ok(Self::Space),
            other => Err(format!("invalid parity '{other}'")),
        }
    }
}

/// Read and write timeout policy applied at configuration time.
///
/// Reads have no inter-byte timeout: once the first byte is available a read
/// returns whatever is queued. Writes are bounded by a constant plus a per-byte
/// multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommTimeouts {
    pub write_constant: Duration,
    pub write_per_byte: Duration,
}

impl CommTimeouts {
    /// Total time a write of `len` bytes may take.
    pub fn write_budget(&self, len: usize) -> Duration {
        let per_byte = u32::try_from(len)
            .ok()
            .and_then(|n| self.write_per_byte.checked_mul(n))
            .unwrap_or(Duration::MAX);
        self.write_constant.saturating_add(per_byte)
    }
}

impl Default for CommTimeouts {
    fn default() -> Self {
        Self {
            write_constant: Duration::from_millis(5000),
            write_per_byte: Duration::from_millis(500),
        }
    }
}

/// One exclusively-held device handle.
///
/// All methods take `&self`: the listener task and caller threads use the same
/// handle concurrently, so implementations synchronise internally. After
/// [`close`](Self::close) every pending and future operation must fail with
/// [`PortError::NotOpen`].
#[async_trait]
pub trait SerialTransport: Send + Sync + fmt::Debug {
    /// Get the name/path of this serial port.
    fn name(&self) -> &str;

    /// Size the driver's input and output queues.
    fn setup_queues(&self, input: usize, output: usize) -> Result<(), PortError>;

    /// Apply baud rate, data bits, stop bits and parity.
    fn apply_settings(&self, config: &PortConfig) -> Result<(), PortError>;

    fn set_timeouts(&self, timeouts: &CommTimeouts) -> Result<(), PortError>;

    /// Discard queued data and/or abort in-flight operations.
    fn purge(&self, purge: Purge) -> Result<(), PortError>;

    /// Choose which events [`wait_event`](Self::wait_event) reports.
    fn set_event_mask(&self, mask: EventMask) -> Result<(), PortError>;

    /// Suspend until one of the masked events occurs.
    ///
    /// Has no timeout. Completes with an error once the handle is closed.
    async fn wait_event(&self) -> Result<EventMask, PortError>;

    /// Query and clear the latched line errors along with queue depths.
    fn status(&self) -> Result<CommStatus, PortError>;

    /// Read whatever is queued, up to `buffer.len()` bytes.
    async fn read_bytes(&self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Write all of `data`, returning the number of bytes the device accepted.
    async fn write_bytes(&self, data: &[u8]) -> Result<usize, PortError>;

    /// Release the handle. Returns `true` only for the call that released it.
    fn close(&self) -> bool;

    fn is_open(&self) -> bool;
}

/// Opens devices by name and lists the ones currently registered.
pub trait SerialDriver: Send + Sync + fmt::Debug {
    /// Acquire exclusive access to the named device.
    fn open(&self, port_name: &str) -> Result<Arc<dyn SerialTransport>, PortError>;

    /// Names of the devices the OS currently reports, in its order.
    fn available_ports(&self) -> Result<Vec<String>, PortError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_config_builder() {
        let config = PortConfig::new("COM7", 57600)
            .with_data_bits(DataBits::Seven)
            .with_parity(Parity::Even)
            .with_stop_bits(StopBits::Two);
        assert_eq!(config.port, "COM7");
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.data_bits, DataBits::Seven);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.stop_bits, StopBits::Two);
    }

    #[test]
    fn test_data_bits_from_count() {
        assert_eq!(DataBits::from_count(5), Some(DataBits::Five));
        assert_eq!(DataBits::from_count(8), Some(DataBits::Eight));
        assert_eq!(DataBits::from_count(9), None);
    }

    #[test]
    fn test_data_bits_conversion() {
        let serialport_bits: serialport::DataBits = DataBits::Eight.into();
        assert_eq!(serialport_bits, serialport::DataBits::Eight);
    }

    #[test]
    fn test_parity_conversion() {
        let parity = serialport::Parity::try_from(Parity::Even).unwrap();
        assert_eq!(parity, serialport::Parity::Even);
        assert!(matches!(
            serialport::Parity::try_from(Parity::Mark),
            Err(PortError::Unsupported(_))
        ));
    }

    #[test]
    fn test_stop_bits_conversion() {
        let bits = serialport::StopBits::try_from(StopBits::Two).unwrap();
        assert_eq!(bits, serialport::StopBits::Two);
        assert!(serialport::StopBits::try_from(StopBits::OnePointFive).is_err());
    }

    #[test]
    fn test_event_mask() {
        let mask = EventMask::ERR | EventMask::RXCHAR;
        assert!(mask.contains(EventMask::RXCHAR));
        assert!(mask.contains(EventMask::ERR));
        assert!(!EventMask::ERR.contains(EventMask::RXCHAR));
        assert!(!mask.contains(EventMask::EMPTY));
        assert!(EventMask::EMPTY.is_empty());
    }

    #[test]
    fn test_purge_flags() {
        let purge = Purge::TX_ABORT | Purge::TX_CLEAR;
        assert!(purge.touches_output());
        assert!(!purge.touches_input());
        assert!(Purge::ALL.contains(Purge::RX_CLEAR));
    }

    #[test]
    fn test_write_budget() {
        let timeouts = CommTimeouts::default();
        assert_eq!(timeouts.write_budget(0), Duration::from_millis(5000));
        assert_eq!(timeouts.write_budget(4), Duration::from_millis(7000));
    }

    #[test]
    fn test_port_config_serde() {
        let json = r#"{"port":"/dev/ttyS1","baud_rate":9600,"data_bits":"eight","stop_bits":"one_point_five","parity":"mark"}"#;
        let config: PortConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.stop_bits, StopBits::OnePointFive);
        assert_eq!(config.parity, Parity::Mark);
    }

    #[test]
    fn test_parse_line_settings() {
        assert_eq!("1.5".parse::<StopBits>(), Ok(StopBits::OnePointFive));
        assert_eq!("Two".parse::<StopBits>(), Ok(StopBits::Two));
        assert_eq!("E".parse::<Parity>(), Ok(Parity::Even));
        assert!("3".parse::<StopBits>().is_err());
        assert!("weird".parse::<Parity>().is_err());
    }
}
