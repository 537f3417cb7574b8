//! libcurl-backed transport.
//!
//! Each request runs on a blocking thread. The async side races the join
//! handle against the job's cancel token, and the blocking side aborts from
//! its progress callback once the token flips, so a cancelled transfer stops
//! within about a second and writes nothing after the cancel.

use std::cell::RefCell;
use std::time::Duration;

use super::api::{ResolveBody, ResolveReply, Resolved};
use super::transport::{parse_status_line, ResponseSink, TransferReply, Transport};
use crate::control::CancelToken;
use crate::retry::{classify_http_failure, FetchError};
use crate::storage::PartWriter;

/// Upper bound on a resolve reply body.
const MAX_RESOLVE_BODY: usize = 1024 * 1024;

/// Timeouts and credentials for upstream requests.
#[derive(Debug, Clone)]
pub struct CurlOptions {
    /// Sent as `Authorization: Api-Key <key>` on resolve requests.
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub resolve_timeout: Duration,
    /// Abort a transfer whose throughput stays below `low_speed_limit` bytes/s for this long.
    pub low_speed_time: Duration,
    pub low_speed_limit: u32,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            connect_timeout: Duration::from_secs(30),
            resolve_timeout: Duration::from_secs(30),
            low_speed_time: Duration::from_secs(60),
            low_speed_limit: 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CurlTransport {
    options: CurlOptions,
}

impl CurlTransport {
    pub fn new(options: CurlOptions) -> Self {
        Self { options }
    }
}

impl Transport for CurlTransport {
    async fn resolve(
        &self,
        endpoint: &str,
        body: &ResolveBody,
        cancel: &CancelToken,
    ) -> Result<Resolved, FetchError> {
        let payload =
            serde_json::to_vec(body).map_err(|e| FetchError::InvalidResponse(e.to_string()))?;
        let endpoint = endpoint.to_string();
        let options = self.options.clone();
        let token = cancel.clone();
        let task = tokio::task::spawn_blocking(move || resolve_blocking(&endpoint, &payload, &options, &token));
        tokio::select! {
            joined = task => joined.map_err(|e| FetchError::Worker(e.to_string()))?,
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
        }
    }

    async fn download(&self, url: &str, writer: PartWriter) -> Result<TransferReply, FetchError> {
        let cancel = writer.cancel_token().clone();
        let url = url.to_string();
        let options = self.options.clone();
        let task = tokio::task::spawn_blocking(move || download_blocking(&url, writer, &options));
        tokio::select! {
            joined = task => joined.map_err(|e| FetchError::Worker(e.to_string()))?,
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
        }
    }
}

fn resolve_blocking(
    endpoint: &str,
    payload: &[u8],
    options: &CurlOptions,
    cancel: &CancelToken,
) -> Result<Resolved, FetchError> {
    let mut easy = curl::easy::Easy::new();
    easy.url(endpoint)?;
    easy.post(true)?;
    easy.post_fields_copy(payload)?;
    easy.follow_location(true)?;
    easy.connect_timeout(options.connect_timeout)?;
    easy.timeout(options.resolve_timeout)?;
    easy.progress(true)?;

    let mut list = curl::easy::List::new();
    list.append("Accept: application/json")?;
    list.append("Content-Type: application/json")?;
    if let Some(key) = options.api_key.as_deref().filter(|k| !k.is_empty()) {
        list.append(&format!("Authorization: Api-Key {}", key.trim()))?;
    }
    easy.http_headers(list)?;

    let mut body: Vec<u8> = Vec::new();
    let perform = {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            if body.len() + data.len() > MAX_RESOLVE_BODY {
                return Ok(0);
            }
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.progress_function(|_, _, _, _| !cancel.is_cancelled())?;
        transfer.perform()
    };
    if let Err(e) = perform {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if e.is_write_error() {
            return Err(FetchError::InvalidResponse("resolve reply too large".to_string()));
        }
        return Err(FetchError::Curl(e));
    }

    let code = easy.response_code()?;
    if !(200..300).contains(&code) {
        let text = String::from_utf8_lossy(&body);
        tracing::debug!(endpoint = %endpoint, status = code, "resolve failed: {}", truncate(&text, 200));
        return Err(classify_http_failure(code, &text));
    }
    let reply = ResolveReply::parse(&body)?;
    tracing::debug!(endpoint = %endpoint, status = %reply.status, "resolve reply");
    reply.into_resolved()
}

fn download_blocking(
    url: &str,
    writer: PartWriter,
    options: &CurlOptions,
) -> Result<TransferReply, FetchError> {
    let cancel = writer.cancel_token().clone();
    let start = writer.start();

    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(options.connect_timeout)?;
    easy.low_speed_limit(options.low_speed_limit)?;
    easy.low_speed_time(options.low_speed_time)?;
    easy.progress(true)?;
    if start > 0 {
        easy.range(&format!("{}-", start))?;
    }

    let sink = RefCell::new(ResponseSink::new(writer));
    let sink_error: RefCell<Option<FetchError>> = RefCell::new(None);
    let perform = {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            let Ok(line) = std::str::from_utf8(data) else {
                return true;
            };
            match sink.borrow_mut().on_header_line(line) {
                Ok(()) => true,
                Err(e) => {
                    sink_error.borrow_mut().replace(e);
                    false
                }
            }
        })?;
        transfer.write_function(|data| match sink.borrow_mut().on_body(data) {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                sink_error.borrow_mut().replace(e);
                Ok(0)
            }
        })?;
        transfer.progress_function(|_, _, _, _| !cancel.is_cancelled())?;
        transfer.perform()
    };

    if let Err(e) = perform {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if let Some(inner) = sink_error.into_inner() {
            return Err(inner);
        }
        return Err(FetchError::Curl(e));
    }

    let sink = sink.into_inner();
    let reply = sink.finish()?;
    // libcurl's own view wins if no status line reached the header callback.
    if reply.status == 0 {
        let code = easy.response_code()?;
        return Ok(TransferReply { status: code, ..reply });
    }
    Ok(reply)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
