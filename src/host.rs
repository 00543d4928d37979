//! Measurement server descriptors.

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::params;

/// A candidate measurement server.
///
/// Field names follow the discovery payload: `cc`, `host` and `distance` are
/// renamed on the way in. Discovery services disagree on whether `id` and
/// `distance` are strings or numbers, so both are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Server identifier assigned by the discovery service.
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    /// Upload endpoint; the download endpoint is derived from it.
    pub url: String,
    /// City or site name.
    pub name: String,
    /// Country name.
    #[serde(default)]
    pub country: String,
    /// ISO country code.
    #[serde(rename(deserialize = "cc"), default)]
    pub country_code: String,
    /// `host:port` used for latency probes.
    #[serde(rename(deserialize = "host"))]
    pub address: String,
    /// Organisation operating the server.
    #[serde(default)]
    pub sponsor: String,
    /// Distance from the client as reported by discovery.
    #[serde(rename(deserialize = "distance"), default, deserialize_with = "float_or_string")]
    pub distance_km: f64,
}

impl Host {
    /// The well-known host used whenever discovery is unavailable.
    pub fn fallback() -> Self {
        Host {
            id: "fallback".into(),
            url: "http://speedtest.tele2.net:8080/speedtest/upload.php".into(),
            name: "Stockholm".into(),
            country: "Sweden".into(),
            country_code: "SE".into(),
            address: "speedtest.tele2.net:8080".into(),
            sponsor: "Tele2".into(),
            distance_km: 0.0,
        }
    }

    /// URL hit by latency probes: `http://{address}`.
    pub fn probe_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!("http://{}", self.address))?)
    }

    /// URL the upload transfer posts to.
    pub fn upload_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.url)?)
    }

    /// Download endpoint for a payload of `size` bytes; see [`download_endpoint`].
    pub fn download_url(&self, size: u64, port: u16) -> Result<Url> {
        download_endpoint(&self.upload_url()?, size, port)
    }

    /// Download endpoint on the default download port.
    pub fn default_download_url(&self, size: u64) -> Result<Url> {
        self.download_url(size, params::DOWNLOAD_PORT)
    }
}

/// Derive the download endpoint from a host URL.
///
/// The last two path segments are replaced by `download`, the port is
/// forced to `port` and `size` is passed as a query parameter.
pub fn download_endpoint(host_url: &Url, size: u64, port: u16) -> Result<Url> {
    let mut url = host_url.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::RequestFailed(format!("host URL {host_url} has no path")))?;
        segments.pop_if_empty().pop().pop().push("download");
    }
    url.set_port(Some(port))
        .map_err(|_| Error::RequestFailed(format!("host URL {host_url} cannot carry a port")))?;
    url.set_query(None);
    url.query_pairs_mut().append_pair("size", &size.to_string());
    Ok(url)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    Float(f64),
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(match StringOrNumber::deserialize(d)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Int(i) => i.to_string(),
        StringOrNumber::Float(f) => f.to_string(),
    })
}

fn float_or_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    match StringOrNumber::deserialize(d)? {
        StringOrNumber::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        StringOrNumber::Int(i) => Ok(i as f64),
        StringOrNumber::Float(f) => Ok(f),
    }
}
