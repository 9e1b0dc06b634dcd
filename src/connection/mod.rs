//! The serial connection and its background listener.
//!
//! A [`Connection`] owns one device handle, three I/O contexts and the
//! listener task while it is open. Callers may share it across threads through
//! an `Arc`; all mutable state sits behind a single lock that is never held
//! across an `.await`.
//!
//! ```text
//! caller ── send ──> send buffer ──> write ctx ──> device
//! caller <─ receive ─ receive buffer <── listener <── wait/read ctx <── device
//! ```
//!
//! Reading the receive buffer does not consume it. Callers that want to know
//! whether something new arrived reset the flag themselves with
//! [`Connection::set_unread_data`].

mod buffers;
mod context;
mod listener;

pub use buffers::{ConnectionStats, RECEIVE_BUFFER_CAPACITY, SEND_BUFFER_CAPACITY};
pub use context::IoKind;
pub use listener::ListenerState;

use crate::error::{ConnectionError, ConnectionResult};
use crate::port::{
    CommTimeouts, EventMask, PortConfig, PortError, Purge, SerialDriver, SerialTransport,
    SystemDriver,
};
use buffers::{SendBuffer, SharedState};
use context::IoContext;
use listener::Listener;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timing knobs for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Write timeout policy handed to the device and enforced per send.
    pub timeouts: CommTimeouts,
    /// Pause after a failed listener operation before trying again.
    pub retry_backoff: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            timeouts: CommTimeouts::default(),
            retry_backoff: Duration::from_millis(10),
        }
    }
}

/// Resources acquired by `open`, each held until released exactly once.
#[derive(Default)]
struct Resources {
    config: Option<PortConfig>,
    device: Option<Arc<dyn SerialTransport>>,
    read: Option<Arc<IoContext>>,
    write: Option<Arc<IoContext>>,
    wait: Option<Arc<IoContext>>,
    shutdown: Option<CancellationToken>,
    /// Held until a closer has seen the listener finish, so a reopen cannot
    /// race a task that is still winding down.
    listener: Option<ListenerHandle>,
}

struct ListenerHandle {
    session: u64,
    join: Option<JoinHandle<()>>,
    done: watch::Receiver<bool>,
}

/// What a closer needs to wait for the listener of one session.
struct Closing {
    session: u64,
    join: Option<JoinHandle<()>>,
    done: watch::Receiver<bool>,
}

impl Resources {
    fn is_occupied(&self) -> bool {
        self.device.is_some() || self.listener.is_some()
    }

    /// Release the device and contexts and signal the listener to stop.
    /// Safe on partially initialised or already released resources.
    ///
    /// The listener slot stays occupied; only the first caller gets the join
    /// handle, later callers wait on the shared completion flag.
    fn release(&mut self) -> Option<Closing> {
        if let Some(device) = self.device.take() {
            if device.close() {
                debug!(port = %device.name(), "device handle released");
            }
        }
        for ctx in [self.read.take(), self.write.take(), self.wait.take()]
            .into_iter()
            .flatten()
        {
            if ctx.is_valid() {
                ctx.release();
            }
        }
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
        self.config = None;
        self.listener.as_mut().map(|l| Closing {
            session: l.session,
            join: l.join.take(),
            done: l.done.clone(),
        })
    }
}

/// One asynchronous serial connection.
///
/// # Example
/// ```
/// use serial_link::port::{MockDriver, PortConfig};
/// use serial_link::Connection;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let driver = MockDriver::new();
/// let device = driver.add_device("MOCK0");
///
/// let conn = Connection::new(Arc::new(driver));
/// conn.open(PortConfig::new("MOCK0", 115_200))?;
/// conn.send(b"PING").await?;
/// assert_eq!(device.written_bytes(), b"PING");
///
/// conn.close().await;
/// assert!(!conn.is_open());
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    driver: Arc<dyn SerialDriver>,
    settings: ConnectionSettings,
    shared: Arc<Mutex<SharedState>>,
    resources: Mutex<Resources>,
}

impl Connection {
    pub fn new(driver: Arc<dyn SerialDriver>) -> Self {
        Self::with_settings(driver, ConnectionSettings::default())
    }

    pub fn with_settings(driver: Arc<dyn SerialDriver>, settings: ConnectionSettings) -> Self {
        Self {
            driver,
            settings,
            shared: Arc::new(Mutex::new(SharedState::default())),
            resources: Mutex::new(Resources::default()),
        }
    }

    /// A connection over the serial devices attached to this machine.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemDriver::new()))
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Open, configure and start listening on `config.port`.
    ///
    /// Must be called from within a Tokio runtime, which hosts the listener.
    /// On failure the connection keeps whatever it had already acquired;
    /// call [`close`](Self::close) before trying again.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::AlreadyOpen`] if resources from an earlier open are still held
    /// - [`ConnectionError::DeviceOpen`] if the device is missing or claimed
    /// - [`ConnectionError::Configuration`] if the device rejects a setting
    /// - [`ConnectionError::ListenerStart`] if no runtime is available
    pub fn open(&self, config: PortConfig) -> ConnectionResult<()> {
        let mut res = self.resources.lock();
        if res.is_occupied() {
            return Err(ConnectionError::AlreadyOpen);
        }

        let device = self
            .driver
            .open(&config.port)
            .map_err(|source| ConnectionError::DeviceOpen {
                port: config.port.clone(),
                source,
            })?;
        res.device = Some(Arc::clone(&device));
        res.config = Some(config.clone());

        self.configure(&mut res, device.as_ref(), &config)?;

        let session = {
            let mut st = self.shared.lock();
            st.is_open = true;
            st.reset_for_open()
        };

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ConnectionError::ListenerStart(e.to_string()))?;
        let (Some(wait), Some(read), Some(shutdown)) =
            (res.wait.clone(), res.read.clone(), res.shutdown.clone())
        else {
            return Err(ConnectionError::ListenerStart(
                "I/O contexts missing after configuration".into(),
            ));
        };
        let (done_tx, done_rx) = watch::channel(false);
        let listener = Listener {
            port: config.port.clone(),
            device,
            wait,
            read,
            shared: Arc::clone(&self.shared),
            shutdown,
            retry_backoff: self.settings.retry_backoff,
            session,
            done: done_tx,
        };
        self.shared.lock().listener = ListenerState::Running;
        res.listener = Some(ListenerHandle {
            session,
            join: Some(runtime.spawn(listener.run())),
            done: done_rx,
        });

        info!(
            port = %config.port,
            baud = config.baud_rate,
            data_bits = ?config.data_bits,
            stop_bits = ?config.stop_bits,
            parity = ?config.parity,
            "serial connection open"
        );
        Ok(())
    }

    fn configure(
        &self,
        res: &mut Resources,
        device: &dyn SerialTransport,
        config: &PortConfig,
    ) -> ConnectionResult<()> {
        fn step(name: &'static str, result: Result<(), PortError>) -> ConnectionResult<()> {
            result.map_err(|source| ConnectionError::Configuration { step: name, source })
        }

        step(
            "queue setup",
            device.setup_queues(RECEIVE_BUFFER_CAPACITY, SEND_BUFFER_CAPACITY),
        )?;
        step("line settings", device.apply_settings(config))?;
        step("timeouts", device.set_timeouts(&self.settings.timeouts))?;
        step("purge", device.purge(Purge::ALL))?;

        let shutdown = CancellationToken::new();
        res.read = Some(Arc::new(IoContext::new(IoKind::Read, &shutdown)));
        res.write = Some(Arc::new(IoContext::new(IoKind::Write, &shutdown)));
        res.wait = Some(Arc::new(IoContext::new(IoKind::Wait, &shutdown)));
        res.shutdown = Some(shutdown);

        step(
            "event mask",
            device.set_event_mask(EventMask::ERR | EventMask::RXCHAR),
        )
    }

    /// Stop the listener and release every resource.
    ///
    /// Idempotent, and safe after a failed or missing open. Returns once the
    /// listener task has finished, including when another caller is closing
    /// concurrently. Until then [`open`](Self::open) keeps failing with
    /// [`ConnectionError::AlreadyOpen`].
    pub async fn close(&self) {
        let (closing, port) = {
            let mut res = self.resources.lock();
            self.shared.lock().is_open = false;
            let port = res.config.as_ref().map(|c| c.port.clone());
            (res.release(), port)
        };

        if let Some(mut closing) = closing {
            if let Some(handle) = closing.join.take() {
                if let Err(e) = handle.await {
                    warn!(error = %e, "listener task ended abnormally");
                }
            }
            // A dropped sender means the task is gone as well.
            let _ = closing.done.wait_for(|finished| *finished).await;

            let mut res = self.resources.lock();
            if res
                .listener
                .as_ref()
                .is_some_and(|l| l.session == closing.session)
            {
                res.listener = None;
            }
        }
        if let Some(port) = port {
            info!(port = %port, "serial connection closed");
        }
    }

    /// Store `data` as the pending outbound payload without writing it.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::InvalidArgument`] if `data` exceeds
    /// [`SEND_BUFFER_CAPACITY`]; the buffer is left unchanged.
    pub fn set_send_buffer(&self, data: &[u8]) -> ConnectionResult<()> {
        self.shared
            .lock()
            .send
            .store(data)
            .map_err(oversize)
    }

    /// Write the current send buffer to the device.
    pub async fn transmit(&self) -> ConnectionResult<usize> {
        let payload = {
            let st = self.shared.lock();
            debug!(pending = st.send.len(), "transmitting send buffer");
            st.send.as_slice().to_vec()
        };
        self.write_payload(&payload).await
    }

    /// Store `data` in the send buffer and write exactly those bytes.
    ///
    /// Returns once the device accepted the write or the write timeout
    /// (`constant + per_byte × len`) elapsed. Must not be called from the
    /// listener task.
    pub async fn send(&self, data: &[u8]) -> ConnectionResult<usize> {
        self.set_send_buffer(data)?;
        self.write_payload(data).await
    }

    async fn write_payload(&self, payload: &[u8]) -> ConnectionResult<usize> {
        let (device, write) = {
            let res = self.resources.lock();
            match (&res.device, &res.write) {
                (Some(device), Some(write)) => (Arc::clone(device), Arc::clone(write)),
                _ => return Err(ConnectionError::NotOpen),
            }
        };
        if !self.is_open() {
            return Err(ConnectionError::NotOpen);
        }
        if payload.is_empty() {
            return Ok(0);
        }

        device.purge(Purge::TX_ABORT | Purge::TX_CLEAR)?;

        let budget = self.settings.timeouts.write_budget(payload.len());
        let written = write
            .complete(device.write_bytes(payload), Some(budget))
            .await
            .map_err(|e| match e {
                PortError::Timeout(limit) => ConnectionError::WriteTimeout(limit),
                other => ConnectionError::Io(other),
            })?;
        write.advance(written);

        self.shared.lock().stats.bytes_sent += written as u64;
        debug!(port = %device.name(), bytes = written, "sent");
        Ok(written)
    }

    /// Copy the latest arrival into `out` and return how many bytes were
    /// copied. The mailbox and unread flag are left as they are.
    pub fn receive(&self, out: &mut [u8]) -> usize {
        self.shared.lock().receive.copy_to(out)
    }

    /// Owned copy of the latest arrival.
    pub fn received(&self) -> Vec<u8> {
        self.shared.lock().receive.as_slice().to_vec()
    }

    /// Copy the mailbox and clear the unread flag in one step, if it is set.
    pub fn take_unread(&self) -> Option<Vec<u8>> {
        let mut st = self.shared.lock();
        if !st.has_unread_data {
            return None;
        }
        st.has_unread_data = false;
        Some(st.receive.as_slice().to_vec())
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().is_open
    }

    /// Whether the listener published data since the flag was last cleared.
    pub fn has_unread_data(&self) -> bool {
        self.shared.lock().has_unread_data
    }

    pub fn set_unread_data(&self, unread: bool) {
        self.shared.lock().has_unread_data = unread;
    }

    pub fn stats(&self) -> ConnectionStats {
        self.shared.lock().stats
    }

    pub fn listener_state(&self) -> ListenerState {
        self.shared.lock().listener
    }

    /// Name of the device while resources from an open are held.
    pub fn port_name(&self) -> Option<String> {
        self.resources.lock().config.as_ref().map(|c| c.port.clone())
    }

    /// Bytes moved by the last completed operation of the given kind.
    pub fn last_transfer(&self, kind: IoKind) -> Option<u64> {
        let res = self.resources.lock();
        let ctx = match kind {
            IoKind::Read => res.read.as_ref(),
            IoKind::Write => res.write.as_ref(),
            IoKind::Wait => res.wait.as_ref(),
        };
        ctx.map(|c| c.offset())
    }
}

fn oversize(len: usize) -> ConnectionError {
    ConnectionError::InvalidArgument(format!(
        "payload of {len} bytes exceeds send buffer capacity of {} bytes",
        SendBuffer::CAPACITY
    ))
}

impl Drop for Connection {
    fn drop(&mut self) {
        let mut res = self.resources.lock();
        self.shared.lock().is_open = false;
        // The listener sees its contexts released and exits on its own.
        drop(res.release());
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("port", &self.port_name())
            .field("open", &self.is_open())
            .field("listener", &self.listener_state())
            .finish()
    }
}
