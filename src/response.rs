//! Classification of HTTP responses and transport errors into [`Error`].

use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap};

use crate::error::{Error, Result};

/// Check a response's status and, when `expect_json` is set, its content type.
///
/// Any non-2xx status is a [`Error::RequestFailed`]. A JSON response must
/// declare `application/json` (or a `+json` suffix type); anything else is a
/// [`Error::WrongContentType`].
pub fn classify(status: StatusCode, headers: &HeaderMap, expect_json: bool) -> Result<()> {
    if !status.is_success() {
        return Err(Error::RequestFailed(format!("server responded {status}")));
    }
    if expect_json {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !is_json(content_type) {
            return Err(Error::WrongContentType(if content_type.is_empty() {
                "<missing>".into()
            } else {
                content_type.into()
            }));
        }
    }
    Ok(())
}

fn is_json(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

/// Map a reqwest error onto the closed taxonomy.
pub fn map_reqwest(e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else if e.is_decode() {
        Error::InvalidJson(e.to_string())
    } else if let Some(status) = e.status() {
        Error::RequestFailed(format!("server responded {status}"))
    } else {
        Error::RequestFailed(e.to_string())
    }
}
