//! Connection context attached to finished runs.
//!
//! The engine cannot inspect radios or carriers itself; platforms plug in a
//! [`NetworkInfoSource`] that knows how.

use serde::Serialize;

/// Kind of link the measurement ran over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Wireless LAN.
    Wifi,
    /// Mobile data.
    Cellular,
    /// Ethernet or similar.
    Wired,
    /// Not reported.
    #[default]
    Unknown,
}

/// Snapshot of the client's network at the time of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    /// Link type.
    pub kind: ConnectionKind,
    /// Mobile carrier name, cellular only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    /// Radio access technology such as `LTE` or `NR`, cellular only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radio_technology: Option<String>,
}

impl NetworkInfo {
    /// Info for a cellular link.
    pub fn cellular(carrier: impl Into<String>, radio_technology: impl Into<String>) -> Self {
        NetworkInfo {
            kind: ConnectionKind::Cellular,
            carrier: Some(carrier.into()),
            radio_technology: Some(radio_technology.into()),
        }
    }

    /// Short description used in human-readable output.
    pub fn describe(&self) -> String {
        match (self.kind, &self.carrier, &self.radio_technology) {
            (ConnectionKind::Cellular, Some(carrier), Some(radio)) => {
                format!("cellular ({carrier}, {radio})")
            }
            (ConnectionKind::Cellular, Some(carrier), None) => format!("cellular ({carrier})"),
            (ConnectionKind::Cellular, None, _) => "cellular".into(),
            (ConnectionKind::Wifi, ..) => "wifi".into(),
            (ConnectionKind::Wired, ..) => "wired".into(),
            (ConnectionKind::Unknown, ..) => "unknown".into(),
        }
    }
}

/// Supplies the current [`NetworkInfo`].
pub trait NetworkInfoSource: Send + Sync {
    /// Network in use right now.
    fn current(&self) -> NetworkInfo;
}

/// Reports [`ConnectionKind::Unknown`] with no details.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownNetwork;

impl NetworkInfoSource for UnknownNetwork {
    fn current(&self) -> NetworkInfo {
        NetworkInfo::default()
    }
}

/// Reports a fixed value, e.g. one supplied on the command line.
#[derive(Debug, Clone)]
pub struct StaticNetwork(pub NetworkInfo);

impl NetworkInfoSource for StaticNetwork {
    fn current(&self) -> NetworkInfo {
        self.0.clone()
    }
}
