//! Throughput sampling shared by the download and upload tests.
//!
//! A transfer is a [`ChunkStream`] of byte counts. [`Sampler`] turns those
//! counts into instantaneous and average rates and [`drive`] runs a stream
//! to completion, producing the final measurement.
//!
//! The clock starts at the first chunk carrying data, so connection setup
//! is not part of the rate. A sample covers at least
//! [`params::MIN_SAMPLE_INTERVAL`]; chunks that arrive sooner are folded into
//! the next one.

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::measurement::BandwidthMeasurement;
use crate::params;
use crate::transport::ChunkStream;

/// Which way the payload travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Server to client.
    Download,
    /// Client to server.
    Upload,
}

/// One progress observation during a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransferSample {
    /// Rate over the interval since the previous sample.
    pub instantaneous: BandwidthMeasurement,
    /// Rate over the whole transfer so far.
    pub average: BandwidthMeasurement,
    /// Bytes moved since the previous sample.
    pub bytes_delta: u64,
    /// Bytes moved since the transfer started.
    pub total_bytes: u64,
    /// Time since the first byte.
    pub elapsed: Duration,
}

/// Tracks byte counts and timestamps for a single transfer.
#[derive(Debug, Default)]
pub struct Sampler {
    start: Option<Instant>,
    previous: Option<Instant>,
    total_bytes: u64,
    pending_bytes: u64,
}

impl Sampler {
    /// Record a chunk of `bytes` observed at `now`.
    ///
    /// Returns a sample once at least [`params::MIN_SAMPLE_INTERVAL`] has
    /// passed since the previous one.
    pub fn record(&mut self, bytes: u64, now: Instant) -> Option<TransferSample> {
        if bytes == 0 {
            return None;
        }
        self.total_bytes += bytes;

        let (Some(start), Some(previous)) = (self.start, self.previous) else {
            self.start = Some(now);
            self.previous = Some(now);
            return None;
        };

        self.pending_bytes += bytes;
        if now.saturating_duration_since(previous) < params::MIN_SAMPLE_INTERVAL {
            return None;
        }

        let sample = TransferSample {
            instantaneous: BandwidthMeasurement::from_bytes(self.pending_bytes, now - previous),
            average: BandwidthMeasurement::from_bytes(self.total_bytes, now - start),
            bytes_delta: self.pending_bytes,
            total_bytes: self.total_bytes,
            elapsed: now - start,
        };
        self.previous = Some(now);
        self.pending_bytes = 0;
        Some(sample)
    }

    /// Bytes seen so far.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Final rate: all bytes over the time from the first byte to `now`.
    ///
    /// A transfer that never moved a byte, or moved everything at a single
    /// instant, has no measurable duration and yields [`Error::UnknownError`].
    pub fn finish(&self, now: Instant) -> Result<BandwidthMeasurement> {
        let start = self.start.ok_or(Error::UnknownError)?;
        let elapsed = now.saturating_duration_since(start);
        if elapsed.is_zero() {
            return Err(Error::UnknownError);
        }
        Ok(BandwidthMeasurement::from_bytes(self.total_bytes, elapsed).formatted())
    }
}

/// Consume `chunks` until the transfer ends, reporting samples on the way.
///
/// The first error ends the transfer and is returned as-is.
pub async fn drive<F>(mut chunks: ChunkStream, mut on_progress: F) -> Result<BandwidthMeasurement>
where
    F: FnMut(TransferSample),
{
    let mut sampler = Sampler::default();
    while let Some(chunk) = chunks.next().await {
        if let Some(sample) = sampler.record(chunk?, Instant::now()) {
            on_progress(sample);
        }
    }
    sampler.finish(Instant::now())
}

/// A transfer test running in the background.
///
/// Samples arrive on [`TransferHandle::progress`]; a slow reader loses
/// samples rather than slowing the transfer. Cancelling (or dropping the
/// handle) aborts the transfer and closes the progress channel.
pub struct TransferHandle {
    /// Progress samples, in order.
    pub progress: mpsc::Receiver<TransferSample>,
    cancel: CancellationToken,
    task: JoinHandle<Option<Result<BandwidthMeasurement>>>,
}

impl TransferHandle {
    pub(crate) fn spawn<F, Fut>(test: F) -> Self
    where
        F: FnOnce(mpsc::Sender<TransferSample>) -> Fut,
        Fut: Future<Output = Result<BandwidthMeasurement>> + Send + 'static,
    {
        let (tx, progress) = mpsc::channel(params::PROGRESS_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let fut = test(tx);
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = fut => Some(result),
            }
        });
        TransferHandle {
            progress,
            cancel,
            task,
        }
    }

    /// Abort the transfer. No further samples are delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the final measurement; `None` if the transfer was cancelled.
    pub async fn result(mut self) -> Option<Result<BandwidthMeasurement>> {
        match (&mut self.task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "transfer task failed");
                Some(Err(Error::UnknownError))
            }
        }
    }
}

impl Drop for TransferHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
