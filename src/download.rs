//! Download throughput test.
//!
//! Fetches a payload of a requested size from the host's download endpoint,
//! counting bytes as they arrive and discarding them.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::Result;
use crate::host::download_endpoint;
use crate::measurement::BandwidthMeasurement;
use crate::params;
use crate::transfer::{self, TransferHandle, TransferSample};
use crate::transport::Transport;

/// Runs download tests over a [`Transport`].
#[derive(Clone)]
pub struct DownloadTester {
    transport: Arc<dyn Transport>,
    port: u16,
}

impl DownloadTester {
    /// Create a tester using the default download port.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        DownloadTester {
            transport,
            port: params::DOWNLOAD_PORT,
        }
    }

    /// Override the port the download endpoint is reached on.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Download `size` bytes from the endpoint derived from `url`.
    ///
    /// `url` is the host URL; the request goes to
    /// [`download_endpoint`]`(url, size, port)`. The whole transfer,
    /// connection included, is bounded by `timeout`.
    pub async fn perform_test<F>(
        &self,
        url: &Url,
        size: u64,
        timeout: Duration,
        on_progress: F,
    ) -> Result<BandwidthMeasurement>
    where
        F: FnMut(TransferSample) + Send,
    {
        let endpoint = download_endpoint(url, size, self.port)?;
        let run = async {
            let chunks = self.transport.download(endpoint, timeout).await?;
            transfer::drive(chunks, on_progress).await
        };
        let result = tokio::time::timeout(timeout, run).await?;
        match &result {
            Ok(m) => tracing::info!(size, rate = %m, "download finished"),
            Err(err) => tracing::warn!(size, %err, "download failed"),
        }
        result
    }

    /// Run [`DownloadTester::perform_test`] in the background.
    pub fn start(&self, url: Url, size: u64, timeout: Duration) -> TransferHandle {
        let tester = self.clone();
        TransferHandle::spawn(move |tx| async move {
            tester
                .perform_test(&url, size, timeout, move |sample| {
                    let _ = tx.try_send(sample);
                })
                .await
        })
    }
}
