//! Shared test utilities for serial-link integration tests.
//!
//! This module provides common test infrastructure including:
//! - A harness pairing a [`Connection`] with a simulated device
//! - Polling helpers for state the listener updates in the background
//! - Common test data builders

#![allow(dead_code)]

use serial_link::port::{MockDevice, MockDriver, PortConfig};
use serial_link::{Connection, ConnectionSettings};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Name every harness device is registered under.
pub const MOCK_PORT: &str = "MOCK0";

/// Upper bound for anything the listener is expected to do promptly.
pub const SETTLE: Duration = Duration::from_secs(2);

/// A connection wired to a mock driver with one registered device.
pub struct TestHarness {
    pub driver: MockDriver,
    pub device: MockDevice,
    pub conn: Arc<Connection>,
}

impl TestHarness {
    /// Create a harness with default connection settings. The port is not opened.
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: ConnectionSettings) -> Self {
        let driver = MockDriver::new();
        let device = driver.add_device(MOCK_PORT);
        let conn = Arc::new(Connection::with_settings(Arc::new(driver.clone()), settings));
        Self {
            driver,
            device,
            conn,
        }
    }

    /// Create a harness and open the mock port at 9600 8N1.
    pub fn opened() -> Self {
        let harness = Self::new();
        harness
            .conn
            .open(PortConfigBuilder::new(MOCK_PORT).build())
            .expect("mock port should open");
        harness
    }

    /// Inject `data` and wait until the listener has published it.
    pub async fn deliver(&self, data: &[u8]) {
        let before = self.conn.stats().frames_received;
        self.device.inject(data);
        let conn = Arc::clone(&self.conn);
        wait_until(move || conn.stats().frames_received > before).await;
    }
}

/// Settings with a short retry backoff so failure tests run quickly.
pub fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        retry_backoff: Duration::from_millis(1),
        ..ConnectionSettings::default()
    }
}

/// Poll `condition` until it holds, panicking after [`SETTLE`].
pub async fn wait_until(condition: impl Fn() -> bool) {
    let polled = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(SETTLE, polled)
        .await
        .expect("condition not reached in time");
}

/// Run `fut`, panicking if it does not finish within [`SETTLE`].
pub async fn within_settle<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(SETTLE, fut)
        .await
        .expect("operation did not finish in time")
}

/// Builder for creating test port configurations.
pub struct PortConfigBuilder {
    port: String,
    baud_rate: u32,
}

impl PortConfigBuilder {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: 9600,
        }
    }

    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    pub fn build(self) -> PortConfig {
        PortConfig::new(self.port, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_config_builder() {
        let config = PortConfigBuilder::new("COM1").baud_rate(115200).build();

        assert_eq!(config.port, "COM1");
        assert_eq!(config.baud_rate, 115200);
    }

    #[tokio::test]
    async fn test_harness_creation() {
        let harness = TestHarness::new();
        assert!(!harness.conn.is_open());
        assert_eq!(harness.driver.outstanding_handles(), 0);
    }

    #[tokio::test]
    async fn test_harness_opened() {
        let harness = TestHarness::opened();
        assert!(harness.conn.is_open());
        assert!(harness.device.is_claimed());
        harness.conn.close().await;
    }
}
