//! Hardware transport backed by the `serialport` crate.
//!
//! `serialport` exposes blocking handles, so every call that may block runs on
//! `tokio::task::spawn_blocking`. The device is opened once and cloned into
//! three handles: a control handle for configuration and status, a reader for
//! the listener and a writer for callers. The event wait has no OS counterpart
//! in `serialport`; it polls the input queue at a fixed interval instead.
//!
//! `serialport` does not report framing, overrun or parity errors either.
//! [`wait_event`](SerialTransport::wait_event) here therefore only ever returns
//! `RXCHAR`, and `status()` always carries empty [`LineErrors`](super::LineErrors).
//! The `ERR` bit of the event mask is accepted but has no effect on this
//! transport; line-error counting is only exercised through the mock.

use super::error::{classify_open_error, PortError};
use super::traits::{
    CommStatus, CommTimeouts, EventMask, PortConfig, Purge, SerialDriver, SerialTransport,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type Slot = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Default interval between input-queue polls while waiting for an event.
pub const DEFAULT_EVENT_POLL: Duration = Duration::from_millis(5);

/// Driver for the serial devices attached to this machine.
#[derive(Debug, Clone)]
pub struct SystemDriver {
    event_poll: Duration,
}

impl SystemDriver {
    pub fn new() -> Self {
        Self {
            event_poll: DEFAULT_EVENT_POLL,
        }
    }

    /// Override how often a pending event wait re-checks the input queue.
    pub fn with_event_poll(mut self, interval: Duration) -> Self {
        self.event_poll = interval;
        self
    }
}

impl Default for SystemDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialDriver for SystemDriver {
    fn open(&self, port_name: &str) -> Result<Arc<dyn SerialTransport>, PortError> {
        let transport = SystemTransport::open(port_name, self.event_poll)?;
        Ok(Arc::new(transport))
    }

    fn available_ports(&self) -> Result<Vec<String>, PortError> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}

/// An open hardware serial port.
pub struct SystemTransport {
    name: String,
    control: Slot,
    reader: Slot,
    writer: Slot,
    mask: Mutex<EventMask>,
    closed: CancellationToken,
    event_poll: Duration,
}

impl SystemTransport {
    /// Open `port_name` exclusively.
    ///
    /// Line settings are placeholders until
    /// [`apply_settings`](SerialTransport::apply_settings) runs.
    ///
    /// # Example
    /// ```no_run
    /// use serial_link::port::{SerialTransport, SystemTransport, DEFAULT_EVENT_POLL};
    ///
    /// let port = SystemTransport::open("/dev/ttyUSB0", DEFAULT_EVENT_POLL)?;
    /// assert!(port.is_open());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(port_name: &str, event_poll: Duration) -> Result<Self, PortError> {
        let control = serialport::new(port_name, 9600)
            .flow_control(serialport::FlowControl::None)
            .timeout(event_poll)
            .open()
            .map_err(|e| classify_open_error(port_name, e))?;
        let reader = control.try_clone()?;
        let writer = control.try_clone()?;

        debug!(port = %port_name, "serial device opened");

        Ok(Self {
            name: port_name.to_string(),
            control: Arc::new(Mutex::new(Some(control))),
            reader: Arc::new(Mutex::new(Some(reader))),
            writer: Arc::new(Mutex::new(Some(writer))),
            mask: Mutex::new(EventMask::EMPTY),
            closed: CancellationToken::new(),
            event_poll,
        })
    }

    fn with_control<T>(
        &self,
        op: impl FnOnce(&mut Box<dyn SerialPort>) -> Result<T, PortError>,
    ) -> Result<T, PortError> {
        if self.closed.is_cancelled() {
            return Err(PortError::NotOpen);
        }
        let mut guard = self.control.lock();
        let port = guard.as_mut().ok_or(PortError::NotOpen)?;
        op(port)
    }

    /// Run a blocking operation on one of the cloned handles.
    ///
    /// Closing the transport completes the returned future immediately; the
    /// blocking call finishes in the background and drops its handle.
    async fn blocking<T, F>(&self, slot: &Slot, op: F) -> Result<T, PortError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn SerialPort>) -> Result<T, PortError> + Send + 'static,
    {
        if self.closed.is_cancelled() {
            return Err(PortError::NotOpen);
        }
        let slot = Arc::clone(slot);
        let closed = self.closed.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock();
            let port = guard.as_mut().ok_or(PortError::NotOpen)?;
            let result = op(port);
            if closed.is_cancelled() {
                guard.take();
            }
            result
        });

        tokio::select! {
            _ = self.closed.cancelled() => Err(PortError::NotOpen),
            joined = task => joined.map_err(|e| PortError::Io(std::io::Error::other(e)))?,
        }
    }
}

fn release(slot: &Slot) {
    // A handle busy in a blocking call is dropped by that call when it returns.
    if let Some(mut guard) = slot.try_lock() {
        guard.take();
    }
}

#[async_trait]
impl SerialTransport for SystemTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup_queues(&self, input: usize, output: usize) -> Result<(), PortError> {
        // serialport leaves queue sizing to the OS driver.
        self.with_control(|_| {
            debug!(port = %self.name, input, output, "queue sizes left to driver");
            Ok(())
        })
    }

    fn apply_settings(&self, config: &PortConfig) -> Result<(), PortError> {
        let stop_bits = serialport::StopBits::try_from(config.stop_bits)?;
        let parity = serialport::Parity::try_from(config.parity)?;
        self.with_control(|port| {
            port.set_baud_rate(config.baud_rate)?;
            port.set_data_bits(config.data_bits.into())?;
            port.set_stop_bits(stop_bits)?;
            port.set_parity(parity)?;
            port.set_flow_control(serialport::FlowControl::None)?;
            Ok(())
        })
    }

    fn set_timeouts(&self, timeouts: &CommTimeouts) -> Result<(), PortError> {
        self.with_control(|_| Ok(()))?;
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.set_timeout(timeouts.write_constant)?;
        }
        if let Some(reader) = self.reader.lock().as_mut() {
            reader.set_timeout(self.event_poll)?;
        }
        Ok(())
    }

    fn purge(&self, purge: Purge) -> Result<(), PortError> {
        let which = match (purge.touches_input(), purge.touches_output()) {
            (true, true) => serialport::ClearBuffer::All,
            (true, false) => serialport::ClearBuffer::Input,
            (false, true) => serialport::ClearBuffer::Output,
            (false, false) => return Ok(()),
        };
        self.with_control(|port| Ok(port.clear(which)?))
    }

    fn set_event_mask(&self, mask: EventMask) -> Result<(), PortError> {
        self.with_control(|_| Ok(()))?;
        *self.mask.lock() = mask;
        Ok(())
    }

    async fn wait_event(&self) -> Result<EventMask, PortError> {
        loop {
            let status = self.status()?;
            let mask = *self.mask.lock();
            if mask.contains(EventMask::RXCHAR) && status.in_queue > 0 {
                return Ok(EventMask::RXCHAR);
            }
            tokio::select! {
                _ = self.closed.cancelled() => return Err(PortError::NotOpen),
                _ = tokio::time::sleep(self.event_poll) => {}
            }
        }
    }

    fn status(&self) -> Result<CommStatus, PortError> {
        self.with_control(|port| {
            Ok(CommStatus {
                // Not observable through serialport.
                errors: Default::default(),
                in_queue: port.bytes_to_read()? as usize,
                out_queue: port.bytes_to_write()? as usize,
            })
        })
    }

    async fn read_bytes(&self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let len = buffer.len();
        let (chunk, n) = self
            .blocking(&self.reader, move |port| {
                let mut chunk = vec![0u8; len];
                match port.read(&mut chunk) {
                    Ok(n) => Ok((chunk, n)),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok((chunk, 0)),
                    Err(e) => Err(PortError::Io(e)),
                }
            })
            .await?;
        buffer[..n].copy_from_slice(&chunk[..n]);
        Ok(n)
    }

    async fn write_bytes(&self, data: &[u8]) -> Result<usize, PortError> {
        let data = data.to_vec();
        self.blocking(&self.writer, move |port| {
            port.write_all(&data)?;
            port.flush()?;
            Ok(data.len())
        })
        .await
    }

    fn close(&self) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        self.closed.cancel();
        release(&self.reader);
        release(&self.writer);
        release(&self.control);
        debug!(port = %self.name, "serial device closed");
        true
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

impl Drop for SystemTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SystemTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemTransport")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}
