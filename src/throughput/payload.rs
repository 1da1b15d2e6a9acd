//! Upload payloads and the instrumented body that reports read progress.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use rand::distributions::Uniform;
use rand::Rng;
use thiserror::Error;

/// Failure raised by a [`ProgressSink`]. Never aborts a transfer.
#[derive(Debug, Error)]
#[error("progress report failed: {reason}")]
pub struct ReportError {
    pub reason: String,
}

impl ReportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Receives the length of every chunk the transport pulls from a payload.
pub trait ProgressSink: Send + Sync {
    fn record(&self, chunk_len: usize) -> Result<(), ReportError>;
}

/// Generate `size` bytes of random ASCII digits.
pub fn random_payload(size: usize) -> Bytes {
    let digits = Uniform::new_inclusive(b'0', b'9');
    let buf: Vec<u8> = rand::thread_rng().sample_iter(digits).take(size).collect();
    Bytes::from(buf)
}

/// Upload body that yields `read_size` slices of a payload and reports each
/// one to a [`ProgressSink`] as the transport consumes it.
pub struct InstrumentedPayload {
    payload: Bytes,
    offset: usize,
    read_size: usize,
    sink: Arc<dyn ProgressSink>,
}

impl InstrumentedPayload {
    pub fn new(payload: Bytes, read_size: usize, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            payload,
            offset: 0,
            read_size: read_size.max(1),
            sink,
        }
    }

    /// Total payload length, sent as `Content-Length`.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl std::fmt::Debug for InstrumentedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedPayload")
            .field("len", &self.payload.len())
            .field("offset", &self.offset)
            .field("read_size", &self.read_size)
            .finish()
    }
}

impl Stream for InstrumentedPayload {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.offset >= this.payload.len() {
            return Poll::Ready(None);
        }

        let end = (this.offset + this.read_size).min(this.payload.len());
        let chunk = this.payload.slice(this.offset..end);
        this.offset = end;

        if let Err(e) = this.sink.record(chunk.len()) {
            tracing::trace!(error = %e, "ignoring progress report failure");
        }

        Poll::Ready(Some(Ok(chunk)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.payload.len().saturating_sub(self.offset);
        let chunks = remaining.div_ceil(self.read_size);
        (chunks, Some(chunks))
    }
}
