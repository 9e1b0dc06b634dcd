//! Per-operation I/O contexts.
//!
//! A connection owns three of these (read, write, event wait). Each pairs a
//! completion signal with a transfer offset. Every operation issued through a
//! context races against its signal, so releasing the context completes a
//! pending operation with [`PortError::Cancelled`] whether or not the device
//! itself ever reports completion.

use crate::port::PortError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Which operation a context serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Read,
    Write,
    Wait,
}

#[derive(Debug)]
pub(crate) struct IoContext {
    kind: IoKind,
    signal: CancellationToken,
    released: AtomicBool,
    offset: AtomicU64,
}

impl IoContext {
    /// Create a context whose signal also fires when `parent` is cancelled.
    pub fn new(kind: IoKind, parent: &CancellationToken) -> Self {
        Self {
            kind,
            signal: parent.child_token(),
            released: AtomicBool::new(false),
            offset: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> IoKind {
        self.kind
    }

    pub fn is_valid(&self) -> bool {
        !self.released.load(Ordering::SeqCst) && !self.signal.is_cancelled()
    }

    /// Release the completion signal. Returns `true` only for the first call.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.signal.cancel();
        true
    }

    /// Bytes moved by the most recent operation through this context.
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn advance(&self, bytes: usize) {
        self.offset.fetch_add(bytes as u64, Ordering::SeqCst);
    }

    /// Drive `op` to completion, bounded by `limit` if given.
    ///
    /// The offset is reset before the operation starts.
    pub async fn complete<T, F>(&self, op: F, limit: Option<Duration>) -> Result<T, PortError>
    where
        F: Future<Output = Result<T, PortError>>,
    {
        if !self.is_valid() {
            return Err(PortError::Cancelled);
        }
        self.offset.store(0, Ordering::SeqCst);

        let bounded = async {
            match limit {
                Some(limit) => match tokio::time::timeout(limit, op).await {
                    Ok(result) => result,
                    Err(_) => Err(PortError::timeout(limit)),
                },
                None => op.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.signal.cancelled() => Err(PortError::Cancelled),
            result = bounded => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_completes_operation() {
        let root = CancellationToken::new();
        let ctx = IoContext::new(IoKind::Read, &root);
        ctx.advance(3);

        let n = ctx.complete(async { Ok(7usize) }, None).await.unwrap();
        assert_eq!(n, 7);
        // Reset happened before the operation ran.
        assert_eq!(ctx.offset(), 0);
        ctx.advance(n);
        assert_eq!(ctx.offset(), 7);
    }

    #[tokio::test]
    async fn test_release_is_single_shot() {
        let root = CancellationToken::new();
        let ctx = IoContext::new(IoKind::Write, &root);
        assert!(ctx.is_valid());
        assert!(ctx.release());
        assert!(!ctx.release());
        assert!(!ctx.is_valid());
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_release_wakes_pending_operation() {
        let root = CancellationToken::new();
        let ctx = Arc::new(IoContext::new(IoKind::Wait, &root));

        let pending = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.complete(std::future::pending::<Result<(), PortError>>(), None)
                    .await
            })
        };
        tokio::task::yield_now().await;
        ctx.release();

        assert!(matches!(pending.await.unwrap(), Err(PortError::Cancelled)));
    }

    #[tokio::test]
    async fn test_parent_cancellation_invalidates() {
        let root = CancellationToken::new();
        let ctx = IoContext::new(IoKind::Wait, &root);
        root.cancel();
        assert!(!ctx.is_valid());
        let result = ctx.complete(async { Ok(()) }, None).await;
        assert!(matches!(result, Err(PortError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_produces_timeout() {
        let root = CancellationToken::new();
        let ctx = IoContext::new(IoKind::Write, &root);
        let limit = Duration::from_millis(250);

        let result = ctx
            .complete(std::future::pending::<Result<usize, PortError>>(), Some(limit))
            .await;
        assert!(matches!(result, Err(PortError::Timeout(d)) if d == limit));
    }
}
