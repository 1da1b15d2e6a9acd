//! Transfer workers: one task per endpoint, feeding one counter slot.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::config::{DownloadConfig, UploadConfig};

use super::counters::CounterSlot;
use super::payload::{random_payload, InstrumentedPayload};
use super::stop::StopSignal;
use super::transport::{TransferError, Transport};
use super::Direction;

/// Everything one worker needs, bound to a single endpoint.
#[derive(Clone)]
pub struct WorkerContext {
    pub url: String,
    pub transport: Arc<dyn Transport>,
    pub slot: CounterSlot,
    pub stop: StopSignal,
}

impl WorkerContext {
    pub fn index(&self) -> usize {
        self.slot.index()
    }
}

/// Per-direction transfer sizes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferSettings {
    pub download: DownloadConfig,
    pub upload: UploadConfig,
}

/// Why a worker stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "exit", rename_all = "snake_case")]
pub enum WorkerExit {
    /// Observed the stop signal.
    Stopped,
    /// A transfer attempt failed; the worker contributed nothing afterwards.
    Failed { reason: String },
    /// Did not report back within the shutdown grace and was aborted.
    Aborted,
}

/// Outcome of one worker, collected by the sampler after the session.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub index: usize,
    pub url: String,
    /// Downloads: body bytes read. Uploads: bytes of fully sent payloads.
    pub bytes_transferred: u64,
    pub attempts: u32,
    #[serde(flatten)]
    pub exit: WorkerExit,
}

impl WorkerReport {
    fn new(ctx: &WorkerContext) -> Self {
        Self {
            index: ctx.index(),
            url: ctx.url.clone(),
            bytes_transferred: 0,
            attempts: 0,
            exit: WorkerExit::Stopped,
        }
    }

    pub fn aborted(index: usize, url: &str) -> Self {
        Self {
            index,
            url: url.to_string(),
            bytes_transferred: 0,
            attempts: 0,
            exit: WorkerExit::Aborted,
        }
    }

    fn fail(mut self, err: &TransferError) -> Self {
        warn!(
            index = self.index,
            url = self.url.as_str(),
            attempts = self.attempts,
            error = %err,
            "transfer worker failed, dropping out of session"
        );
        self.exit = WorkerExit::Failed {
            reason: err.to_string(),
        };
        self
    }
}

/// How a single transfer attempt ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptEnd {
    /// The remote stream ended; open another.
    Exhausted,
    Stopped,
}

/// Run the worker for `direction` until the stop signal or a transfer failure.
pub async fn run(ctx: WorkerContext, direction: Direction, settings: TransferSettings) -> WorkerReport {
    match direction {
        Direction::Download => run_download(ctx, settings.download).await,
        Direction::Upload => run_upload(ctx, settings.upload).await,
    }
}

/// Repeatedly stream GET responses from the endpoint, counting body bytes in
/// `chunk_bytes` reads.
pub async fn run_download(ctx: WorkerContext, config: DownloadConfig) -> WorkerReport {
    let mut report = WorkerReport::new(&ctx);
    let mut buf = vec![0u8; config.chunk_bytes.max(1)];

    while !ctx.stop.is_raised() {
        report.attempts += 1;
        match download_attempt(&ctx, &mut buf, &mut report.bytes_transferred).await {
            Ok(AttemptEnd::Exhausted) => {
                debug!(index = report.index, "download stream ended, reopening");
                tokio::task::yield_now().await;
            }
            Ok(AttemptEnd::Stopped) => break,
            Err(e) => return report.fail(&e),
        }
    }

    report
}

async fn download_attempt(
    ctx: &WorkerContext,
    buf: &mut [u8],
    total: &mut u64,
) -> Result<AttemptEnd, TransferError> {
    let stream = tokio::select! {
        biased;
        _ = ctx.stop.raised() => return Ok(AttemptEnd::Stopped),
        opened = ctx.transport.open_download(&ctx.url) => opened?,
    };
    let mut reader = StreamReader::new(stream);

    loop {
        let n = tokio::select! {
            biased;
            _ = ctx.stop.raised() => return Ok(AttemptEnd::Stopped),
            read = read_chunk(&mut reader, buf) => read?,
        };
        if n == 0 {
            return Ok(AttemptEnd::Exhausted);
        }

        ctx.slot.add(n as u64);
        *total += n as u64;

        if ctx.stop.is_raised() {
            return Ok(AttemptEnd::Stopped);
        }
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Repeatedly upload a fresh random payload, counting bytes as the transport
/// reads them.
pub async fn run_upload(ctx: WorkerContext, config: UploadConfig) -> WorkerReport {
    let mut report = WorkerReport::new(&ctx);
    let sink = Arc::new(ctx.slot.clone());

    while !ctx.stop.is_raised() {
        report.attempts += 1;
        let payload = InstrumentedPayload::new(
            random_payload(config.payload_bytes),
            config.read_bytes,
            sink.clone(),
        );

        let sent = tokio::select! {
            biased;
            _ = ctx.stop.raised() => break,
            sent = ctx.transport.upload(&ctx.url, payload) => sent,
        };

        match sent {
            Ok(()) => report.bytes_transferred += config.payload_bytes as u64,
            Err(e) => return report.fail(&e),
        }
    }

    report
}
