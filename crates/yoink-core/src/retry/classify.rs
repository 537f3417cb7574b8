//! Turn failed upstream HTTP responses into `FetchError`s.
//!
//! Upstream error bodies look like `{"status":"error","error":{"code":"..."}}`.
//! When a code is present it is the most useful thing to surface; otherwise
//! the HTTP status is.

use super::error::FetchError;

/// Extracts `error.code` from an upstream JSON error body.
pub fn endpoint_error_code(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("code")?
        .as_str()
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Classify a non-2xx resolve response.
pub fn classify_http_failure(status: u32, body: &str) -> FetchError {
    match endpoint_error_code(body) {
        Some(code) => FetchError::Endpoint(code),
        None => FetchError::Http(status),
    }
}
