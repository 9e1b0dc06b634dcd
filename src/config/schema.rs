//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! Every section has defaults, so an empty file is a valid configuration.

use super::error::{ConfigError, ConfigResult, Field};
use crate::connection::ConnectionSettings;
use crate::port::{CommTimeouts, DataBits, Parity, PortConfig, StopBits};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default line settings
    pub serial: SerialConfig,
    /// Write timeouts and polling intervals
    pub timeouts: TimeoutsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the connection cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        self.serial.validate()?;
        self.timeouts.validate()
    }
}

/// Serial line defaults, used when the command line leaves a setting out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device to use when none is given
    pub port: Option<String>,
    /// Baud rate (bits per second)
    pub baud_rate: u32,
    /// Data bits per character, 5 through 8
    pub data_bits: u8,
    /// Stop bits: "one", "one_point_five" or "two"
    pub stop_bits: StopBits,
    /// Parity: "none", "odd", "even", "mark" or "space"
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

impl SerialConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.baud_rate == 0 {
            return Err(ConfigError::invalid(Field::BaudRate, "must be non-zero"));
        }
        if DataBits::from_count(self.data_bits).is_none() {
            return Err(ConfigError::invalid(
                Field::DataBits,
                format!("{} is not between 5 and 8", self.data_bits),
            ));
        }
        Ok(())
    }

    /// Build a [`PortConfig`] for `port` from these defaults.
    pub fn port_config(&self, port: impl Into<String>) -> ConfigResult<PortConfig> {
        self.validate()?;
        let data_bits = DataBits::from_count(self.data_bits)
            .ok_or_else(|| ConfigError::invalid(Field::DataBits, "out of range"))?;
        Ok(PortConfig::new(port, self.baud_rate)
            .with_data_bits(data_bits)
            .with_stop_bits(self.stop_bits)
            .with_parity(self.parity))
    }

    /// Like [`port_config`](Self::port_config) for the configured default port.
    pub fn default_port_config(&self) -> ConfigResult<PortConfig> {
        let port = self
            .port
            .clone()
            .ok_or_else(|| ConfigError::Unset(Field::SerialPort))?;
        self.port_config(port)
    }
}

/// Timing configuration section. All values are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Fixed part of the write budget
    pub write_constant_ms: u64,
    /// Added to the write budget for every byte sent
    pub write_per_byte_ms: u64,
    /// How often the monitor command checks for new data
    pub poll_interval_ms: u64,
    /// Listener pause after a failed wait or read
    pub retry_backoff_ms: u64,
    /// How often the system transport samples the input queue while waiting
    pub event_poll_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            write_constant_ms: 5000,
            write_per_byte_ms: 500,
            poll_interval_ms: 50,
            retry_backoff_ms: 10,
            event_poll_ms: 5,
        }
    }
}

impl TimeoutsConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            (Field::PollInterval, self.poll_interval_ms),
            (Field::RetryBackoff, self.retry_backoff_ms),
            (Field::EventPoll, self.event_poll_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be non-zero"));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn event_poll(&self) -> Duration {
        Duration::from_millis(self.event_poll_ms)
    }

    /// Connection timing derived from this section.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            timeouts: CommTimeouts {
                write_constant: Duration::from_millis(self.write_constant_ms),
                write_per_byte: Duration::from_millis(self.write_per_byte_ms),
            },
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. "info" or "serial_link=debug"
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.timeouts.write_constant_ms, 5000);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[serial]"));
        assert!(toml_str.contains("[timeouts]"));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [serial]
            port = "/dev/ttyUSB0"
            baud_rate = 115200
            stop_bits = "two"
            parity = "even"

            [timeouts]
            write_per_byte_ms = 10
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.serial.stop_bits, StopBits::Two);
        assert_eq!(config.timeouts.write_per_byte_ms, 10);
        // Defaults should still work
        assert_eq!(config.timeouts.write_constant_ms, 5000);
        assert_eq!(config.serial.data_bits, 8);
    }

    #[test]
    fn test_port_config_from_defaults() {
        let serial = SerialConfig {
            data_bits: 7,
            parity: Parity::Odd,
            ..SerialConfig::default()
        };
        let config = serial.port_config("COM4").unwrap();
        assert_eq!(config.port, "COM4");
        assert_eq!(config.data_bits, DataBits::Seven);
        assert_eq!(config.parity, Parity::Odd);
    }

    #[test]
    fn test_missing_default_port() {
        let err = SerialConfig::default().default_port_config().unwrap_err();
        assert!(matches!(err, ConfigError::Unset(Field::SerialPort)));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = Config::default();
        config.serial.baud_rate = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField { field: Field::BaudRate, .. })
        ));

        let mut config = Config::default();
        config.serial.data_bits = 9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.timeouts.event_poll_ms = 0;
        assert_eq!(
            config.validate().unwrap_err().field(),
            Some(Field::EventPoll)
        );
    }

    #[test]
    fn test_connection_settings() {
        let timeouts = TimeoutsConfig {
            write_constant_ms: 100,
            write_per_byte_ms: 2,
            ..TimeoutsConfig::default()
        };
        let settings = timeouts.connection_settings();
        assert_eq!(settings.timeouts.write_budget(10), Duration::from_millis(120));
        assert_eq!(settings.retry_backoff, Duration::from_millis(10));
    }
}
