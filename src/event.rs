//! Run state and the events published while a run progresses.

use serde::Serialize;

use crate::error::Error;
use crate::host::Host;
use crate::measurement::BandwidthMeasurement;
use crate::summary::Summary;
use crate::transfer::TransferSample;

/// Stage of a measurement run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum Phase {
    /// No run, or the last run was cancelled.
    #[default]
    Idle,
    /// Discovering and ranking hosts.
    FindingHost,
    /// Measuring round-trip time to the selected host.
    MeasuringLatency,
    /// Download transfer running.
    TestingDownload,
    /// Upload transfer running.
    TestingUpload,
    /// The run finished.
    Completed,
    /// The run stopped at the first error.
    Failed(Error),
}

impl Phase {
    /// True for every phase between `start` and a terminal state.
    pub fn is_in_progress(&self) -> bool {
        !matches!(self, Phase::Idle | Phase::Completed | Phase::Failed(_))
    }
}

/// The single mutable record of the current (or last) run.
///
/// Reset at the start of every run. Results gathered before a failure stay
/// readable until the next run starts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestRun {
    /// Current phase.
    pub phase: Phase,
    /// Selected host.
    pub host: Option<Host>,
    /// Round-trip time to `host`.
    pub latency_ms: Option<u64>,
    /// Final download rate, kept even when it fails the sanity filter.
    pub download: Option<BandwidthMeasurement>,
    /// Final upload rate, kept even when it fails the sanity filter.
    pub upload: Option<BandwidthMeasurement>,
}

impl TestRun {
    /// See [`Phase::is_in_progress`].
    pub fn in_progress(&self) -> bool {
        self.phase.is_in_progress()
    }
}

/// Published on a run's event channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestEvent {
    /// The run entered a new phase.
    PhaseChanged {
        /// Phase entered.
        phase: Phase,
    },
    /// Host discovery picked a host.
    HostSelected {
        /// Selected host.
        host: Host,
    },
    /// Latency to the selected host is known.
    LatencyMeasured {
        /// Round-trip time in milliseconds.
        latency_ms: u64,
    },
    /// A plausible download progress sample.
    DownloadProgress {
        /// Rates and byte counts so far.
        sample: TransferSample,
    },
    /// Final download rate; not sent when it fails the sanity filter.
    DownloadFinished {
        /// Rate over the whole transfer.
        result: BandwidthMeasurement,
    },
    /// A plausible upload progress sample.
    UploadProgress {
        /// Rates and byte counts so far.
        sample: TransferSample,
    },
    /// Final upload rate; not sent when it fails the sanity filter.
    UploadFinished {
        /// Rate over the whole transfer.
        result: BandwidthMeasurement,
    },
    /// The run finished; last event of the run.
    Completed {
        /// What the run measured.
        summary: Summary,
    },
    /// The run failed; last event of the run.
    Failed {
        /// The error that stopped the run.
        error: Error,
    },
}
