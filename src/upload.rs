//! Upload throughput test.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::Result;
use crate::measurement::BandwidthMeasurement;
use crate::transfer::{self, TransferHandle, TransferSample};
use crate::transport::Transport;

/// Runs upload tests over a [`Transport`].
#[derive(Clone)]
pub struct UploadTester {
    transport: Arc<dyn Transport>,
}

impl UploadTester {
    /// Create a tester over `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        UploadTester { transport }
    }

    /// Post exactly `size` bytes to `url`, sampling the send rate.
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
        let run = async {
            let chunks = self.transport.upload(url.clone(), size, timeout).await?;
            transfer::drive(chunks, on_progress).await
        };
        let result = tokio::time::timeout(timeout, run).await?;
        match &result {
            Ok(m) => tracing::info!(size, rate = %m, "upload finished"),
            Err(err) => tracing::warn!(size, %err, "upload failed"),
        }
        result
    }

    /// Run [`UploadTester::perform_test`] in the background.
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
