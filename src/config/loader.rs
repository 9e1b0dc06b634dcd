//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_LINK";

/// Config file name looked up in the current directory
const LOCAL_CONFIG_FILE_NAME: &str = "serial-link.toml";

/// Config file name inside the platform config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_LINK_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_LINK_CONFIG` environment variable (explicit path)
    /// 2. `./serial-link.toml` (current directory)
    /// 3. `<platform config dir>/serial-link/config.toml`
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override file values, and the result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Still apply env overrides even with defaults
        if apply_env_overrides(&mut config).is_err() || config.validate().is_err() {
            config = Config::default();
        }

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to its file.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or(ConfigError::NoPath)?;

        save_to_file(&self.config, path)
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    get_default_config_path().filter(|path| path.exists())
}

/// Platform config directory for this tool, e.g. `~/.config/serial-link`.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-link").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Save configuration to a file.
fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Parse `SERIAL_LINK_<key>` into `target` if it is set.
fn override_from_env<T>(key: &str, target: &mut T) -> ConfigResult<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let var = format!("{ENV_PREFIX}_{key}");
    if let Ok(value) = std::env::var(&var) {
        *target = value
            .parse()
            .map_err(|e: T::Err| ConfigError::EnvOverride {
                reason: e.to_string(),
                var,
                value,
            })?;
    }
    Ok(())
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `SERIAL_LINK_<SECTION>_<KEY>`
/// For example:
/// - `SERIAL_LINK_SERIAL_PORT=/dev/ttyUSB0`
/// - `SERIAL_LINK_SERIAL_BAUD_RATE=115200`
/// - `SERIAL_LINK_TIMEOUTS_WRITE_CONSTANT_MS=1000`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_SERIAL_PORT")) {
        config.serial.port = Some(val);
    }
    override_from_env("SERIAL_BAUD_RATE", &mut config.serial.baud_rate)?;
    override_from_env("SERIAL_DATA_BITS", &mut config.serial.data_bits)?;
    override_from_env("SERIAL_STOP_BITS", &mut config.serial.stop_bits)?;
    override_from_env("SERIAL_PARITY", &mut config.serial.parity)?;

    // Timeout overrides
    let t = &mut config.timeouts;
    override_from_env("TIMEOUTS_WRITE_CONSTANT_MS", &mut t.write_constant_ms)?;
    override_from_env("TIMEOUTS_WRITE_PER_BYTE_MS", &mut t.write_per_byte_ms)?;
    override_from_env("TIMEOUTS_POLL_INTERVAL_MS", &mut t.poll_interval_ms)?;
    override_from_env("TIMEOUTS_RETRY_BACKOFF_MS", &mut t.retry_backoff_ms)?;
    override_from_env("TIMEOUTS_EVENT_POLL_MS", &mut t.event_poll_ms)?;

    // Logging overrides
    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_LOGGING_LEVEL")) {
        config.logging.level = val;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::error::Field;
    use crate::port::Parity;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().serial.baud_rate, 9600);
        assert!(loader.config_path.is_none());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("SERIAL_LINK_SERIAL_BAUD_RATE", "57600");
        env::set_var("SERIAL_LINK_SERIAL_PARITY", "odd");

        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().serial.baud_rate, 57600);
        assert_eq!(loader.config().serial.parity, Parity::Odd);

        env::remove_var("SERIAL_LINK_SERIAL_BAUD_RATE");
        env::remove_var("SERIAL_LINK_SERIAL_PARITY");
    }

    #[test]
    #[serial]
    fn test_bad_env_value_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial-link.toml");
        std::fs::write(&path, "").unwrap();

        env::set_var("SERIAL_LINK_TIMEOUTS_EVENT_POLL_MS", "soon");
        let result = ConfigLoader::load_from(&path);
        env::remove_var("SERIAL_LINK_TIMEOUTS_EVENT_POLL_MS");

        assert!(matches!(
            result,
            Err(ConfigError::EnvOverride { ref var, ref value, .. })
                if var == "SERIAL_LINK_TIMEOUTS_EVENT_POLL_MS" && value == "soon"
        ));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial-link.toml");
        std::fs::write(
            &path,
            "[serial]\nport = \"COM3\"\nbaud_rate = 19200\n\n[logging]\nformat = \"json\"\n",
        )
        .unwrap();

        let loader = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(loader.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(loader.config().serial.port.as_deref(), Some("COM3"));
        assert_eq!(loader.config().serial.baud_rate, 19200);
    }

    #[test]
    #[serial]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial-link.toml");
        std::fs::write(&path, "[serial]\nbaud_rate = 0\n").unwrap();

        assert!(matches!(
            ConfigLoader::load_from(&path),
            Err(ConfigError::InvalidField { field: Field::BaudRate, .. })
        ));
    }

    #[test]
    #[serial]
    fn test_malformed_file_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial-link.toml");
        std::fs::write(&path, "[serial\nbaud_rate = \"fast\"\n").unwrap();

        let err = ConfigLoader::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: ref p, .. } if p == &path));
    }

    #[test]
    #[serial]
    fn test_save_without_path() {
        let loader = ConfigLoader::with_defaults();
        assert!(matches!(loader.save(), Err(ConfigError::NoPath)));
    }

    #[test]
    #[serial]
    fn test_explicit_path_env_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[serial]\nbaud_rate = 4800\n").unwrap();

        env::set_var("SERIAL_LINK_CONFIG", &path);
        let resolved = resolve_config_path();
        let loader = ConfigLoader::load();
        env::remove_var("SERIAL_LINK_CONFIG");

        assert_eq!(resolved.as_deref(), Some(path.as_path()));
        assert_eq!(loader.unwrap().config().serial.baud_rate, 4800);
    }

    #[test]
    #[serial]
    fn test_save_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut loader = ConfigLoader::with_defaults();
        loader.config.serial.port = Some("/dev/ttyACM0".into());
        loader.save_to(&path).unwrap();

        let reloaded = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(reloaded.config().serial.port.as_deref(), Some("/dev/ttyACM0"));
    }
}
