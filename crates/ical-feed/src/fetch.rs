//! Retrieve the raw calendar text.
//!
//! `http://`, `https://` and `webcal://` sources are downloaded; `file://` URLs and
//! bare paths are read from disk.

use std::fs;
use std::time::Duration;

use tracing::debug;

use crate::error::{IcalError, Result};

/// Download or read the calendar at `source`.
pub fn fetch(source: &str, timeout: Duration) -> Result<String> {
    let fail = |message: String| IcalError::Fetch {
        source_url: source.to_string(),
        message,
    };

    if let Some(path) = source.strip_prefix("file://") {
        return fs::read_to_string(path).map_err(|e| fail(e.to_string()));
    }
    if !source.contains("://") {
        return fs::read_to_string(source).map_err(|e| fail(e.to_string()));
    }

    let url = match source.strip_prefix("webcal://") {
        Some(rest) => format!("https://{}", rest),
        None => source.to_string(),
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("knxcal/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| fail(e.to_string()))?;

    let response = client
        .get(&url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|e| fail(e.to_string()))?;
    let body = response.text().map_err(|e| fail(e.to_string()))?;
    debug!(url = %url, bytes = body.len(), "fetched calendar");
    Ok(body)
}
