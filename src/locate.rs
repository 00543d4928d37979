//! Measurement host discovery.
//!
//! A [`HostProvider`] returns candidate servers for a run. The HTTP provider
//! queries a discovery endpoint; the fallback provider always answers with
//! [`Host::fallback`].

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::host::Host;
use crate::{params, response};

/// Source of candidate measurement hosts.
#[async_trait]
pub trait HostProvider: Send + Sync {
    /// Fetch all candidate hosts, bounded by `timeout`.
    async fn fetch_hosts(&self, timeout: Duration) -> Result<Vec<Host>>;

    /// Fetch at most `max_count` candidate hosts, in discovery order.
    async fn fetch_hosts_limited(&self, max_count: usize, timeout: Duration) -> Result<Vec<Host>> {
        let mut hosts = self.fetch_hosts(timeout).await?;
        hosts.truncate(max_count);
        Ok(hosts)
    }
}

/// Queries a discovery endpoint that answers with a JSON array of hosts.
pub struct HttpHostProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpHostProvider {
    /// Create a provider for the given discovery URL.
    pub fn new(url: impl Into<String>, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(HttpHostProvider {
            client,
            url: url.into(),
        })
    }

    /// Provider for the default public discovery endpoint.
    pub fn public(user_agent: &str) -> Result<Self> {
        HttpHostProvider::new(params::DISCOVERY_URL, user_agent)
    }
}

#[async_trait]
impl HostProvider for HttpHostProvider {
    async fn fetch_hosts(&self, timeout: Duration) -> Result<Vec<Host>> {
        let fetch = async {
            let response = self.client.get(&self.url).timeout(timeout).send().await?;
            response::classify(response.status(), response.headers(), true)?;
            let hosts: Vec<Host> = response.json().await?;
            Ok::<_, Error>(hosts)
        };
        let hosts = tokio::time::timeout(timeout, fetch).await??;
        tracing::debug!(url = %self.url, count = hosts.len(), "discovery returned hosts");
        Ok(hosts)
    }
}

/// Always yields the single well-known fallback host.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackHostProvider;

#[async_trait]
impl HostProvider for FallbackHostProvider {
    async fn fetch_hosts(&self, _timeout: Duration) -> Result<Vec<Host>> {
        Ok(vec![Host::fallback()])
    }
}
