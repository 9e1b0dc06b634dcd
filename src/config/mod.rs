//! Configuration module for serial-link.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_LINK_CONFIG` environment variable (explicit path)
//! 2. `./serial-link.toml` (current directory)
//! 3. `~/.config/serial-link/config.toml` on Linux, the equivalent
//!    platform config directory elsewhere
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Any value can be overridden with `SERIAL_LINK_<SECTION>_<KEY>`:
//! - `SERIAL_LINK_SERIAL_PORT=/dev/ttyUSB0`
//! - `SERIAL_LINK_SERIAL_BAUD_RATE=115200`
//! - `SERIAL_LINK_TIMEOUTS_WRITE_PER_BYTE_MS=2`
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_link::config::ConfigLoader;
//!
//! # fn main() -> Result<(), serial_link::config::ConfigError> {
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! println!("Default baud: {}", config.serial.baud_rate);
//! let settings = config.timeouts.connection_settings();
//! # let _ = settings;
//! # Ok(())
//! # }
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult, Field};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{Config, LogFormat, LoggingConfig, SerialConfig, TimeoutsConfig};
