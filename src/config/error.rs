//! Errors raised while loading, checking or saving `serial-link.toml`.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A validated setting, named the way it is written in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    SerialPort,
    BaudRate,
    DataBits,
    PollInterval,
    RetryBackoff,
    EventPoll,
}

impl Field {
    /// `section.key` as it appears in the TOML file.
    pub fn key(self) -> &'static str {
        match self {
            Field::SerialPort => "serial.port",
            Field::BaudRate => "serial.baud_rate",
            Field::DataBits => "serial.data_bits",
            Field::PollInterval => "timeouts.poll_interval_ms",
            Field::RetryBackoff => "timeouts.retry_backoff_ms",
            Field::EventPoll => "timeouts.event_poll_ms",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file '{path}' is not valid TOML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot encode configuration: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("cannot write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A setting holds a value the connection cannot use.
    #[error("invalid {field}: {reason}")]
    InvalidField { field: Field, reason: String },

    /// A setting needed for this operation was left out.
    #[error("{0} is not set")]
    Unset(Field),

    /// A `SERIAL_LINK_*` variable could not be parsed into its setting.
    #[error("environment override {var}={value:?} rejected: {reason}")]
    EnvOverride {
        var: String,
        value: String,
        reason: String,
    },

    /// `save` on a loader that was not created from a file.
    #[error("no config file path to save to")]
    NoPath,
}

impl ConfigError {
    pub(crate) fn invalid(field: Field, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// The setting this error is about, if it concerns a single one.
    pub fn field(&self) -> Option<Field> {
        match self {
            Self::InvalidField { field, .. } => Some(*field),
            Self::Unset(field) => Some(*field),
            _ => None,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_setting() {
        let err = ConfigError::invalid(Field::DataBits, "9 is not between 5 and 8");
        assert_eq!(
            err.to_string(),
            "invalid serial.data_bits: 9 is not between 5 and 8"
        );
        assert_eq!(err.field(), Some(Field::DataBits));

        assert_eq!(
            ConfigError::Unset(Field::SerialPort).to_string(),
            "serial.port is not set"
        );
    }

    #[test]
    fn test_env_override_message_carries_variable() {
        let err = ConfigError::EnvOverride {
            var: "SERIAL_LINK_SERIAL_BAUD_RATE".into(),
            value: "fast".into(),
            reason: "invalid digit found in string".into(),
        };
        let message = err.to_string();
        assert!(message.contains("SERIAL_LINK_SERIAL_BAUD_RATE=\"fast\""));
        assert_eq!(err.field(), None);
    }
}
