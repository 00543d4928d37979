//! Round-trip latency probes and host ranking.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::host::Host;
use crate::response;

/// Measures round-trip time to a host.
#[async_trait]
pub trait LatencyProber: Send + Sync {
    /// Probe `host` once and return the elapsed time in whole milliseconds.
    async fn measure_latency(&self, host: &Host, timeout: Duration) -> Result<u64>;
}

/// Probes with a body-less HEAD request to [`Host::probe_url`].
///
/// Elapsed time runs from issuing the request until response headers
/// arrive.
pub struct HttpLatencyProber {
    client: reqwest::Client,
}

impl HttpLatencyProber {
    /// Create a prober sending the given user agent.
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(HttpLatencyProber { client })
    }
}

#[async_trait]
impl LatencyProber for HttpLatencyProber {
    async fn measure_latency(&self, host: &Host, timeout: Duration) -> Result<u64> {
        let url = host.probe_url()?;
        let request = self.client.head(url).timeout(timeout);

        let start = Instant::now();
        let response = tokio::time::timeout(timeout, request.send()).await??;
        let elapsed = start.elapsed();

        response::classify(response.status(), response.headers(), false)?;
        Ok(elapsed.as_millis() as u64)
    }
}

/// Probe every host concurrently and pick the one with the lowest latency.
///
/// Each probe gets its own `timeout`. Hosts whose probe fails are dropped;
/// the selection waits until every probe has resolved. Ties go to the host
/// listed first. Fails with [`Error::HostNotFound`] if no probe succeeds.
pub async fn rank_hosts(
    prober: &dyn LatencyProber,
    hosts: Vec<Host>,
    timeout: Duration,
) -> Result<(Host, u64)> {
    let probes = hosts.iter().map(|host| async move {
        tokio::time::timeout(timeout, prober.measure_latency(host, timeout))
            .await
            .map_err(Error::from)
            .and_then(|r| r)
    });
    let results = join_all(probes).await;

    hosts
        .into_iter()
        .zip(results)
        .filter_map(|(host, result)| match result {
            Ok(ms) => {
                tracing::debug!(host = %host.address, latency_ms = ms, "probe succeeded");
                Some((host, ms))
            }
            Err(err) => {
                tracing::debug!(host = %host.address, %err, "discarding host after failed probe");
                None
            }
        })
        .min_by_key(|(_, ms)| *ms)
        .ok_or(Error::HostNotFound)
}
