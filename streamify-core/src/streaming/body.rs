//! Response body that holds a handle lease for its whole lifetime.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::engine::{ByteStream, InfoHash};
use crate::handles::HandleLease;

/// Byte stream carrying the lease of the handle it reads from.
///
/// The lease is dropped as soon as the stream ends or yields an error, and
/// otherwise when the body itself is dropped (client disconnect). Either
/// way exactly one release is issued.
pub struct LeasedByteStream {
    inner: ByteStream,
    lease: Option<HandleLease>,
    info_hash: InfoHash,
    expected: u64,
    sent: u64,
}

impl LeasedByteStream {
    pub fn new(inner: ByteStream, lease: HandleLease, expected: u64) -> Self {
        Self {
            inner,
            info_hash: lease.info_hash(),
            lease: Some(lease),
            expected,
            sent: 0,
        }
    }

    /// Whether the stream still holds its handle reference.
    pub fn holds_lease(&self) -> bool {
        self.lease.is_some()
    }

    fn settle(&mut self) {
        if self.lease.take().is_some() {
            tracing::debug!(
                info_hash = %self.info_hash,
                sent = self.sent,
                expected = self.expected,
                "Stream settled"
            );
        }
    }
}

impl Stream for LeasedByteStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.lease.is_none() {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => {
                tracing::warn!(info_hash = %this.info_hash, %error, "Stream read failed");
                this.settle();
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.settle();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for LeasedByteStream {
    fn drop(&mut self) {
        if self.lease.is_some() {
            tracing::debug!(
                info_hash = %self.info_hash,
                sent = self.sent,
                expected = self.expected,
                "Stream dropped before completion"
            );
        }
    }
}

impl std::fmt::Debug for LeasedByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeasedByteStream")
            .field("info_hash", &self.info_hash)
            .field("holds_lease", &self.holds_lease())
            .field("sent", &self.sent)
            .field("expected", &self.expected)
            .finish()
    }
}
