//! Background task that drains incoming data into the receive mailbox.
//!
//! One listener runs per open connection. Each pass waits for a device event,
//! checks the input queue, reads up to [`RECEIVE_BUFFER_CAPACITY`] bytes and
//! publishes them under the connection lock. Individual failures are logged
//! and counted but never end the task; only observing the connection's open
//! flag cleared, or its shutdown token cancelled, does.

use super::buffers::{ConnectionStats, SharedState, RECEIVE_BUFFER_CAPACITY};
use super::context::IoContext;
use crate::port::{EventMask, PortError, Purge, SerialTransport};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of the listener task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    /// No listener has been started since the last open.
    #[default]
    Idle,
    Running,
    /// The open flag was seen cleared; the task is on its way out.
    Stopping,
    Stopped,
}

pub(crate) struct Listener {
    pub port: String,
    pub device: Arc<dyn SerialTransport>,
    pub wait: Arc<IoContext>,
    pub read: Arc<IoContext>,
    pub shared: Arc<Mutex<SharedState>>,
    pub shutdown: CancellationToken,
    pub retry_backoff: Duration,
    /// Session this task was started for; state writes from other sessions are skipped.
    pub session: u64,
    /// Flipped to `true` as the task exits. Closers wait on the receiving side.
    pub done: watch::Sender<bool>,
}

impl Listener {
    pub async fn run(self) {
        info!(port = %self.port, session = self.session, "listener started");

        loop {
            if self.shutdown.is_cancelled() {
                self.set_state(ListenerState::Stopping);
                break;
            }
            {
                let mut st = self.shared.lock();
                if !st.is_open || st.session != self.session {
                    if st.session == self.session {
                        st.listener = ListenerState::Stopping;
                    }
                    break;
                }
            }

            if let Err(e) = self.service_event().await {
                if e.is_shutdown() {
                    debug!(port = %self.port, error = %e, "listener operation interrupted");
                } else {
                    warn!(port = %self.port, error = %e, "listener operation failed; retrying");
                }
                self.backoff().await;
            }
        }

        self.set_state(ListenerState::Stopped);
        self.done.send_replace(true);
        info!(port = %self.port, session = self.session, "listener stopped");
    }

    fn set_state(&self, state: ListenerState) {
        let mut st = self.shared.lock();
        if st.session == self.session {
            st.listener = state;
        }
    }

    /// One wait → status → read → publish pass.
    async fn service_event(&self) -> Result<(), PortError> {
        let events = self
            .wait
            .complete(self.device.wait_event(), None)
            .await
            .map_err(|e| self.fault(e, |s| s.wait_failures += 1))?;

        let status = self.device.status()?;
        if events.contains(EventMask::ERR) || status.errors.any() {
            debug!(port = %self.port, errors = ?status.errors, "line errors reported");
            self.count(|s| s.line_errors += 1);
        }
        if !events.contains(EventMask::RXCHAR) || status.in_queue == 0 {
            return Ok(());
        }

        let mut chunk = [0u8; RECEIVE_BUFFER_CAPACITY];
        let n = self
            .read
            .complete(self.device.read_bytes(&mut chunk), None)
            .await
            .map_err(|e| self.fault(e, |s| s.read_failures += 1))?;
        self.read.advance(n);

        // Anything beyond one buffer's worth is dropped with the queue.
        self.device.purge(Purge::RX_ABORT | Purge::RX_CLEAR)?;

        if n == 0 {
            return Ok(());
        }
        debug!(port = %self.port, bytes = n, queued = status.in_queue, ctx = ?self.read.kind(), "received");
        self.shared.lock().publish(&chunk[..n]);
        Ok(())
    }

    fn count(&self, update: impl FnOnce(&mut ConnectionStats)) {
        update(&mut self.shared.lock().stats);
    }

    /// Count a failure unless it is the shutdown path completing an operation.
    fn fault(&self, err: PortError, update: impl FnOnce(&mut ConnectionStats)) -> PortError {
        if !err.is_shutdown() {
            self.count(update);
        }
        err
    }

    async fn backoff(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.retry_backoff) => {}
        }
    }
}
