//! Default constants and tuning parameters.

use std::time::Duration;

/// Time allowed for the discovery request.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for a single latency probe.
pub const LATENCY_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for a whole download or upload transfer.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

/// Default payload size for both transfer directions (80 MB).
pub const DEFAULT_DATA_SIZE: u64 = 80_000_000;

/// Port the download endpoint listens on, regardless of the host URL's port.
pub const DOWNLOAD_PORT: u16 = 8080;

/// Pause between the download and upload phases so the link can settle.
pub const PHASE_COOLDOWN: Duration = Duration::from_millis(450);

/// Shortest interval a progress sample may cover. Chunks arriving sooner
/// are folded into the next sample.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Samples above this rate (Mbit/s) are treated as measurement artifacts.
pub const SANITY_CEILING_MBPS: f64 = 5000.0;

/// Maximum number of discovered hosts considered for latency ranking.
pub const MAX_CANDIDATE_HOSTS: usize = 5;

/// Size of a single upload body chunk (64 KiB).
pub const UPLOAD_CHUNK_SIZE: usize = 1 << 16;

/// Capacity of the per-run event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of a transfer handle's progress channel.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Discovery endpoint used when none is configured.
pub const DISCOVERY_URL: &str = "https://www.speedtest.net/api/js/servers?engine=js&limit=10";
