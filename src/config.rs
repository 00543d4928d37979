//! Engine tuning knobs.
//!
//! Everything here is passed explicitly to [`crate::orchestrator::SpeedTestBuilder`];
//! nothing is read from the environment.

use std::time::Duration;

use crate::measurement::SanityFilter;
use crate::params;

/// Timeouts, payload sizes and limits for a [`crate::orchestrator::SpeedTest`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Deadline for the discovery request.
    pub discovery_timeout: Duration,
    /// Deadline for each latency probe.
    pub latency_timeout: Duration,
    /// Deadline for each transfer.
    pub transfer_timeout: Duration,
    /// Bytes requested by the download test.
    pub download_size: u64,
    /// Bytes sent by the upload test.
    pub upload_size: u64,
    /// Port of the download endpoint.
    pub download_port: u16,
    /// Pause between download and upload.
    pub cooldown: Duration,
    /// Largest throughput, in Mbit/s, shown to callers.
    pub sanity_ceiling_mbps: f64,
    /// Number of discovered hosts ranked by latency.
    pub max_hosts: usize,
}

impl EngineConfig {
    /// Filter built from `sanity_ceiling_mbps`.
    pub fn sanity_filter(&self) -> SanityFilter {
        SanityFilter::new(self.sanity_ceiling_mbps)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            discovery_timeout: params::DISCOVERY_TIMEOUT,
            latency_timeout: params::LATENCY_TIMEOUT,
            transfer_timeout: params::TRANSFER_TIMEOUT,
            download_size: params::DEFAULT_DATA_SIZE,
            upload_size: params::DEFAULT_DATA_SIZE,
            download_port: params::DOWNLOAD_PORT,
            cooldown: params::PHASE_COOLDOWN,
            sanity_ceiling_mbps: params::SANITY_CEILING_MBPS,
            max_hosts: params::MAX_CANDIDATE_HOSTS,
        }
    }
}
