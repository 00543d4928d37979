//! Error taxonomy shared by the whole crate.

use serde::Serialize;
use thiserror::Error;

/// Failure kinds shared by every stage of a measurement run.
///
/// The set is closed: discovery, probing and transfers all report one of
/// these. Payloads are kept as strings so the error can be cloned onto the
/// event channel and into [`crate::event::Phase::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Error {
    /// The request could not be made or the server answered with an error status.
    #[error("request failed: {0}")]
    RequestFailed(String),
    /// The response did not declare the expected content type.
    #[error("unexpected content type: {0}")]
    WrongContentType(String),
    /// The response body could not be decoded.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
    /// A deadline elapsed.
    #[error("timeout occured")]
    Timeout,
    /// No candidate host answered.
    #[error("no measurement host available")]
    HostNotFound,
    /// `start` was called while a run is active.
    #[error("a test is already in progress")]
    TestInProgress,
    /// Anything else, including transfers without a measurable duration.
    #[error("unknown error")]
    UnknownError,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidJson(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::RequestFailed(format!("bad URL: {e}"))
    }
}

// Deadline errors from tokio carry no detail worth keeping.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        crate::response::map_reqwest(&e)
    }
}

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
