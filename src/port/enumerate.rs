//! Port discovery.

use super::error::PortError;
use super::system::SystemDriver;
use super::traits::SerialDriver;
use std::collections::BTreeMap;

/// Snapshot of the devices `driver` reports, keyed by sequential index in the
/// order the driver lists them. Read fresh on every call.
pub fn enumerate_ports(driver: &dyn SerialDriver) -> Result<BTreeMap<usize, String>, PortError> {
    let names = driver.available_ports()?;
    Ok(names.into_iter().enumerate().collect())
}

/// [`enumerate_ports`] over the serial devices attached to this machine.
pub fn list_ports() -> Result<BTreeMap<usize, String>, PortError> {
    enumerate_ports(&SystemDriver::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockDriver;

    #[test]
    fn test_indices_follow_driver_order() {
        let driver = MockDriver::new();
        driver.add_device("COM3");
        driver.add_device("COM1");

        let ports = enumerate_ports(&driver).unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[&0], "COM3");
        assert_eq!(ports[&1], "COM1");
    }

    #[test]
    fn test_snapshot_reflects_changes() {
        let driver = MockDriver::new();
        driver.add_device("COM1");
        assert_eq!(enumerate_ports(&driver).unwrap().len(), 1);

        driver.remove_device("COM1");
        assert!(enumerate_ports(&driver).unwrap().is_empty());
    }
}
