//! Byte-moving transports for the transfer tests.
//!
//! A [`Transport`] only moves bytes and reports how many went by, one item
//! per chunk. Timing and rate computation live in [`crate::transfer`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use reqwest::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{Error, Result};
use crate::{params, response};

/// Byte counts of successive transport chunks. Dropping the stream aborts
/// the transfer.
pub type ChunkStream = BoxStream<'static, Result<u64>>;

/// Moves test payloads to and from a measurement host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start fetching `url`, yielding the size of each received chunk.
    async fn download(&self, url: Url, timeout: Duration) -> Result<ChunkStream>;

    /// Start posting exactly `size` bytes to `url`, yielding the size of each
    /// chunk handed to the connection.
    async fn upload(&self, url: Url, size: u64, timeout: Duration) -> Result<ChunkStream>;
}

/// reqwest-backed HTTP transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport sending the given user agent.
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, url: Url, timeout: Duration) -> Result<ChunkStream> {
        tracing::debug!(%url, "starting download transfer");
        let response = self.client.get(url).timeout(timeout).send().await?;
        response::classify(response.status(), response.headers(), false)?;

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.len() as u64).map_err(Error::from));
        Ok(chunks.boxed())
    }

    async fn upload(&self, url: Url, size: u64, timeout: Duration) -> Result<ChunkStream> {
        tracing::debug!(%url, size, "starting upload transfer");
        let (tx, rx) = mpsc::unbounded_channel::<Result<u64>>();

        let progress = tx.clone();
        let body = payload(size).map(move |chunk| {
            // the receiver may already be gone after cancellation
            let _ = progress.send(Ok(chunk.len() as u64));
            Ok::<_, std::io::Error>(chunk)
        });

        let request = self
            .client
            .post(url)
            .timeout(timeout)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, size)
            .header(CONNECTION, "keep-alive")
            .body(reqwest::Body::wrap_stream(body));

        let task = tokio::spawn(async move {
            let outcome = match request.send().await {
                Ok(response) => response::classify(response.status(), response.headers(), false),
                Err(e) => Err(Error::from(e)),
            };
            if let Err(e) = outcome {
                let _ = tx.send(Err(e));
            }
        });

        let guard = AbortOnDrop(task);
        let chunks = stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|item| (item, (rx, guard)))
        });
        Ok(chunks.boxed())
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Stream of exactly `size` bytes in [`params::UPLOAD_CHUNK_SIZE`] pieces.
///
/// One chunk of random data is generated and shared by every piece.
fn payload(size: u64) -> impl futures_util::Stream<Item = Bytes> + Send + 'static {
    let mut rng = StdRng::from_os_rng();
    let mut buf = vec![0u8; params::UPLOAD_CHUNK_SIZE];
    rng.fill_bytes(&mut buf);
    let block = Bytes::from(buf);

    let chunk = params::UPLOAD_CHUNK_SIZE as u64;
    let count = size.div_ceil(chunk);
    stream::iter(0..count).map(move |i| {
        let len = chunk.min(size - i * chunk) as usize;
        block.slice(..len)
    })
}
