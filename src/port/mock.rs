//! In-process serial devices for testing.
//!
//! A [`MockDriver`] holds a registry of named [`MockDevice`]s. Opening one
//! through the driver claims it exclusively and hands out a [`MockTransport`]
//! handle; the test keeps the `MockDevice` to inject input, inspect what was
//! written and provoke failures. The driver counts handles that are still
//! open, so tests can assert nothing leaked.
//!
//! # Example
//! ```
//! use serial_link::port::{MockDriver, SerialDriver, SerialTransport};
//!
//! # tokio_test::block_on(async {
//! let driver = MockDriver::new();
//! let device = driver.add_device("MOCK0");
//!
//! let port = driver.open("MOCK0").unwrap();
//! device.inject(b"Hello");
//!
//! let mut buffer = [0u8; 16];
//! let n = port.read_bytes(&mut buffer).await.unwrap();
//! assert_eq!(&buffer[..n], b"Hello");
//!
//! port.write_bytes(b"Response").await.unwrap();
//! assert_eq!(device.written(), vec![b"Response".to_vec()]);
//!
//! assert!(port.close());
//! assert_eq!(driver.outstanding_handles(), 0);
//! # });
//! ```

use super::error::PortError;
use super::traits::{
    CommStatus, CommTimeouts, EventMask, LineErrors, PortConfig, Purge, SerialDriver,
    SerialTransport,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Configuration steps a mock device can be told to reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStep {
    Queues,
    Settings,
    Timeouts,
    Purge,
    EventMask,
}

#[derive(Debug, Default)]
struct MockDeviceState {
    /// Bytes waiting to be read.
    input: VecDeque<u8>,
    /// Every buffer handed to a write, in order.
    write_log: Vec<Vec<u8>>,
    purges: Vec<Purge>,
    settings: Option<PortConfig>,
    queue_sizes: Option<(usize, usize)>,
    timeouts: Option<CommTimeouts>,
    event_mask: EventMask,
    line_errors: LineErrors,
    claimed: bool,
    echo: bool,
    stall_writes: bool,
    deaf_wait: bool,
    rejected: Vec<MockStep>,
    fail_next_wait: bool,
    fail_next_read: bool,
    fail_next_write: bool,
    waits_started: usize,
}

#[derive(Debug, Default)]
struct MockDeviceInner {
    state: Mutex<MockDeviceState>,
    changed: Notify,
}

/// Test-side view of a simulated device. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MockDevice {
    name: Arc<str>,
    inner: Arc<MockDeviceInner>,
}

impl MockDevice {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            inner: Arc::new(MockDeviceInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn update<T>(&self, f: impl FnOnce(&mut MockDeviceState) -> T) -> T {
        let result = f(&mut self.inner.state.lock());
        self.inner.changed.notify_waiters();
        result
    }

    fn read_state<T>(&self, f: impl FnOnce(&MockDeviceState) -> T) -> T {
        f(&self.inner.state.lock())
    }

    /// Simulate bytes arriving on the line.
    pub fn inject(&self, data: &[u8]) {
        self.update(|st| st.input.extend(data));
    }

    /// Latch a line error so the next wait reports `ERR`.
    pub fn inject_line_error(&self, errors: LineErrors) {
        self.update(|st| st.line_errors = errors);
    }

    /// Every buffer written to the device, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.read_state(|st| st.write_log.clone())
    }

    /// All written bytes concatenated.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.read_state(|st| st.write_log.concat())
    }

    pub fn clear_written(&self) {
        self.update(|st| st.write_log.clear());
    }

    /// Loop writes straight back into the input queue.
    pub fn set_echo(&self, echo: bool) {
        self.update(|st| st.echo = echo);
    }

    /// Make writes hang until the handle is closed.
    pub fn set_stall_writes(&self, stall: bool) {
        self.update(|st| st.stall_writes = stall);
    }

    /// Make waits ignore handle closure, like a transport that never
    /// completes pending operations when its handle goes away.
    pub fn set_deaf_wait(&self, deaf: bool) {
        self.update(|st| st.deaf_wait = deaf);
    }

    /// Reject the given configuration step on every subsequent attempt.
    pub fn reject(&self, step: MockStep) {
        self.update(|st| st.rejected.push(step));
    }

    pub fn fail_next_wait(&self) {
        self.update(|st| st.fail_next_wait = true);
    }

    pub fn fail_next_read(&self) {
        self.update(|st| st.fail_next_read = true);
    }

    pub fn fail_next_write(&self) {
        self.update(|st| st.fail_next_write = true);
    }

    pub fn is_claimed(&self) -> bool {
        self.read_state(|st| st.claimed)
    }

    /// Bytes still waiting in the input queue.
    pub fn pending_input(&self) -> usize {
        self.read_state(|st| st.input.len())
    }

    pub fn purges(&self) -> Vec<Purge> {
        self.read_state(|st| st.purges.clone())
    }

    pub fn settings(&self) -> Option<PortConfig> {
        self.read_state(|st| st.settings.clone())
    }

    pub fn queue_sizes(&self) -> Option<(usize, usize)> {
        self.read_state(|st| st.queue_sizes)
    }

    pub fn timeouts(&self) -> Option<CommTimeouts> {
        self.read_state(|st| st.timeouts)
    }

    pub fn event_mask(&self) -> EventMask {
        self.read_state(|st| st.event_mask)
    }

    /// Number of event waits issued against this device.
    pub fn waits_started(&self) -> usize {
        self.read_state(|st| st.waits_started)
    }
}

#[derive(Debug, Default)]
struct Registry {
    devices: Mutex<Vec<MockDevice>>,
    outstanding: AtomicUsize,
}

/// Driver over a set of simulated devices.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    registry: Arc<Registry>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device, or return the existing one with that name.
    pub fn add_device(&self, name: &str) -> MockDevice {
        let mut devices = self.registry.devices.lock();
        if let Some(existing) = devices.iter().find(|d| d.name() == name) {
            return existing.clone();
        }
        let device = MockDevice::new(name);
        devices.push(device.clone());
        device
    }

    /// Unregister a device. Open handles keep working until closed.
    pub fn remove_device(&self, name: &str) -> bool {
        let mut devices = self.registry.devices.lock();
        let before = devices.len();
        devices.retain(|d| d.name() != name);
        devices.len() != before
    }

    /// Handles opened through this driver and not yet closed.
    pub fn outstanding_handles(&self) -> usize {
        self.registry.outstanding.load(Ordering::SeqCst)
    }
}

impl SerialDriver for MockDriver {
    fn open(&self, port_name: &str) -> Result<Arc<dyn SerialTransport>, PortError> {
        let device = self
            .registry
            .devices
            .lock()
            .iter()
            .find(|d| d.name() == port_name)
            .cloned()
            .ok_or_else(|| PortError::not_found(port_name))?;

        {
            let mut st = device.inner.state.lock();
            if st.claimed {
                return Err(PortError::busy(port_name));
            }
            st.claimed = true;
        }

        self.registry.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockTransport {
            device,
            registry: Arc::clone(&self.registry),
            open: AtomicBool::new(true),
        }))
    }

    fn available_ports(&self) -> Result<Vec<String>, PortError> {
        let devices = self.registry.devices.lock();
        Ok(devices.iter().map(|d| d.name().to_string()).collect())
    }
}

/// An open handle on a [`MockDevice`].
#[derive(Debug)]
pub struct MockTransport {
    device: MockDevice,
    registry: Arc<Registry>,
    open: AtomicBool,
}

impl MockTransport {
    fn check(&self, step: MockStep) -> Result<(), PortError> {
        if !self.is_open() {
            return Err(PortError::NotOpen);
        }
        if self.device.read_state(|st| st.rejected.contains(&step)) {
            return Err(PortError::config(format!("{step:?} rejected by device")));
        }
        Ok(())
    }
}

#[async_trait]
impl SerialTransport for MockTransport {
    fn name(&self) -> &str {
        self.device.name()
    }

    fn setup_queues(&self, input: usize, output: usize) -> Result<(), PortError> {
        self.check(MockStep::Queues)?;
        self.device.update(|st| st.queue_sizes = Some((input, output)));
        Ok(())
    }

    fn apply_settings(&self, config: &PortConfig) -> Result<(), PortError> {
        self.check(MockStep::Settings)?;
        if config.baud_rate == 0 {
            return Err(PortError::config("baud rate must be non-zero"));
        }
        self.device.update(|st| st.settings = Some(config.clone()));
        Ok(())
    }

    fn set_timeouts(&self, timeouts: &CommTimeouts) -> Result<(), PortError> {
        self.check(MockStep::Timeouts)?;
        self.device.update(|st| st.timeouts = Some(*timeouts));
        Ok(())
    }

    fn purge(&self, purge: Purge) -> Result<(), PortError> {
        self.check(MockStep::Purge)?;
        self.device.update(|st| {
            if purge.contains(Purge::RX_CLEAR) {
                st.input.clear();
            }
            st.purges.push(purge);
        });
        Ok(())
    }

    fn set_event_mask(&self, mask: EventMask) -> Result<(), PortError> {
        self.check(MockStep::EventMask)?;
        self.device.update(|st| st.event_mask = mask);
        Ok(())
    }

    async fn wait_event(&self) -> Result<EventMask, PortError> {
        self.device.inner.state.lock().waits_started += 1;
        loop {
            let notified = self.device.inner.changed.notified();
            {
                let mut st = self.device.inner.state.lock();
                if !self.is_open() && !st.deaf_wait {
                    return Err(PortError::NotOpen);
                }
                if st.fail_next_wait {
                    st.fail_next_wait = false;
                    return Err(PortError::Io(std::io::Error::other("injected wait failure")));
                }
                if self.is_open() {
                    let mut events = EventMask::EMPTY;
                    if st.event_mask.contains(EventMask::RXCHAR) && !st.input.is_empty() {
                        events |= EventMask::RXCHAR;
                    }
                    if st.event_mask.contains(EventMask::ERR) && st.line_errors.any() {
                        events |= EventMask::ERR;
                    }
                    if !events.is_empty() {
                        return Ok(events);
                    }
                }
            }
            notified.await;
        }
    }

    fn status(&self) -> Result<CommStatus, PortError> {
        if !self.is_open() {
            return Err(PortError::NotOpen);
        }
        let mut st = self.device.inner.state.lock();
        let errors = std::mem::take(&mut st.line_errors);
        Ok(CommStatus {
            errors,
            in_queue: st.input.len(),
            out_queue: 0,
        })
    }

    async fn read_bytes(&self, buffer: &mut [u8]) -> Result<usize, PortError> {
        if !self.is_open() {
            return Err(PortError::NotOpen);
        }
        let mut st = self.device.inner.state.lock();
        if st.fail_next_read {
            st.fail_next_read = false;
            return Err(PortError::Io(std::io::Error::other("injected read failure")));
        }
        let n = buffer.len().min(st.input.len());
        for (slot, byte) in buffer.iter_mut().zip(st.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn write_bytes(&self, data: &[u8]) -> Result<usize, PortError> {
        loop {
            let notified = self.device.inner.changed.notified();
            {
                let mut st = self.device.inner.state.lock();
                if !self.is_open() {
                    return Err(PortError::NotOpen);
                }
                if st.fail_next_write {
                    st.fail_next_write = false;
                    return Err(PortError::Io(std::io::Error::other("injected write failure")));
                }
                if !st.stall_writes {
                    st.write_log.push(data.to_vec());
                    if st.echo {
                        st.input.extend(data);
                    }
                    break;
                }
            }
            notified.await;
        }
        self.device.inner.changed.notify_waiters();
        Ok(data.len())
    }

    fn close(&self) -> bool {
        if !self.open.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.device.update(|st| st.claimed = false);
        self.registry.outstanding.fetch_sub(1, Ordering::SeqCst);
        true
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.close();
    }
}
