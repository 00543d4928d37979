//! Caller-facing result of a finished run.

use serde::Serialize;

use crate::event::TestRun;
use crate::host::Host;
use crate::measurement::{BandwidthMeasurement, SanityFilter};
use crate::network::NetworkInfo;

/// One direction's throughput.
#[derive(Debug, Clone, Serialize)]
pub struct SubtestSummary {
    /// Throughput in Mbit/s.
    pub throughput_mbps: f64,
    /// Auto-scaled rendering such as `320.0 Mbps`.
    pub display: String,
}

impl From<&BandwidthMeasurement> for SubtestSummary {
    fn from(m: &BandwidthMeasurement) -> Self {
        SubtestSummary {
            throughput_mbps: m.megabits_per_second(),
            display: m.to_string(),
        }
    }
}

/// Everything a finished run measured.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    /// Host the run measured against.
    pub host: Host,
    /// Round-trip time to `host`.
    pub latency_ms: u64,
    /// Download throughput, absent when implausible.
    pub download: Option<SubtestSummary>,
    /// Upload throughput, absent when implausible.
    pub upload: Option<SubtestSummary>,
    /// Network the run happened on.
    pub network: NetworkInfo,
}

impl Summary {
    /// Build the caller-facing summary of a run.
    ///
    /// Throughputs rejected by `filter` are left out. Returns `None` until a
    /// host and its latency are known.
    pub fn from_run(run: &TestRun, filter: &SanityFilter, network: NetworkInfo) -> Option<Self> {
        let shown = |m: &Option<BandwidthMeasurement>| {
            m.as_ref().filter(|m| filter.accepts(m)).map(SubtestSummary::from)
        };
        Some(Summary {
            host: run.host.clone()?,
            latency_ms: run.latency_ms?,
            download: shown(&run.download),
            upload: shown(&run.upload),
            network,
        })
    }
}
