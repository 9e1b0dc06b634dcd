//! Fixed-capacity buffers and the lock-guarded state they live in.

use super::listener::ListenerState;
use serde::Serialize;

/// Largest payload a single send may carry.
pub const SEND_BUFFER_CAPACITY: usize = 1024;

/// Largest chunk the listener publishes per arrival.
pub const RECEIVE_BUFFER_CAPACITY: usize = 1024;

/// Byte storage of fixed capacity plus a valid-length count.
///
/// Only the first `len` bytes are ever exposed; stale bytes past that point
/// never leave the buffer.
#[derive(Clone)]
pub(crate) struct FixedBuffer<const N: usize> {
    data: [u8; N],
    len: usize,
}

impl<const N: usize> FixedBuffer<N> {
    pub const CAPACITY: usize = N;

    pub fn new() -> Self {
        Self {
            data: [0; N],
            len: 0,
        }
    }

    /// Replace the contents. Refuses input longer than the capacity.
    pub fn store(&mut self, bytes: &[u8]) -> Result<(), usize> {
        if bytes.len() > N {
            return Err(bytes.len());
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Copy as much of the valid contents as fits into `out`.
    pub fn copy_to(&self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        out[..n].copy_from_slice(&self.data[..n]);
        n
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl<const N: usize> Default for FixedBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> std::fmt::Debug for FixedBuffer<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedBuffer")
            .field("capacity", &N)
            .field("len", &self.len)
            .finish()
    }
}

pub(crate) type SendBuffer = FixedBuffer<SEND_BUFFER_CAPACITY>;
pub(crate) type ReceiveBuffer = FixedBuffer<RECEIVE_BUFFER_CAPACITY>;

/// Counters describing traffic since the connection was last opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Arrivals published into the receive mailbox.
    pub frames_received: u64,
    /// Arrivals that replaced data the caller had not marked as read.
    pub overwritten_frames: u64,
    /// Event notifications that carried line errors.
    pub line_errors: u64,
    pub wait_failures: u64,
    pub read_failures: u64,
}

/// Everything the single connection lock guards.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    pub is_open: bool,
    pub has_unread_data: bool,
    pub send: SendBuffer,
    pub receive: ReceiveBuffer,
    pub stats: ConnectionStats,
    pub listener: ListenerState,
    /// Bumped on every open so a late listener can tell it no longer owns the state.
    pub session: u64,
}

impl SharedState {
    /// Publish a fresh arrival into the receive mailbox.
    pub fn publish(&mut self, bytes: &[u8]) {
        if self.has_unread_data {
            self.stats.overwritten_frames += 1;
        }
        // The listener never reads more than the receive capacity.
        let n = bytes.len().min(RECEIVE_BUFFER_CAPACITY);
        let _ = self.receive.store(&bytes[..n]);
        self.has_unread_data = true;
        self.stats.bytes_received += n as u64;
        self.stats.frames_received += 1;
    }

    /// Forget traffic from a previous open and start a new session.
    pub fn reset_for_open(&mut self) -> u64 {
        self.has_unread_data = false;
        self.receive.clear();
        self.send.clear();
        self.stats = ConnectionStats::default();
        self.listener = ListenerState::Idle;
        self.session += 1;
        self.session
    }
}
