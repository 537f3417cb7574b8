//! Transport seam between the failover loop and the network.

use std::future::Future;

use super::api::{ResolveBody, Resolved};
use crate::control::CancelToken;
use crate::retry::FetchError;
use crate::storage::PartWriter;

/// Outcome of one ranged GET. Body bytes were written only for 2xx statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReply {
    /// Final HTTP status after redirects.
    pub status: u32,
    /// Bytes now in the partial artifact.
    pub bytes: u64,
}

/// Network operations the resilient client needs from an upstream.
pub trait Transport: Send + Sync + 'static {
    /// POST `body` to `endpoint` and pick a transfer URL from the reply.
    fn resolve(
        &self,
        endpoint: &str,
        body: &ResolveBody,
        cancel: &CancelToken,
    ) -> impl Future<Output = Result<Resolved, FetchError>> + Send;

    /// GET `url` starting at `writer.start()`, feeding the body through a
    /// `ResponseSink` around `writer`.
    fn download(
        &self,
        url: &str,
        writer: PartWriter,
    ) -> impl Future<Output = Result<TransferReply, FetchError>> + Send;
}

/// Routes an HTTP response into a `PartWriter`.
///
/// Feed it status lines, headers and body chunks in arrival order. The last
/// status line wins (redirects). A 200 answer to a ranged request restarts
/// the artifact from zero; non-2xx bodies are discarded.
pub struct ResponseSink {
    writer: PartWriter,
    status: u32,
    accepting: bool,
}

impl ResponseSink {
    pub fn new(writer: PartWriter) -> Self {
        Self {
            writer,
            status: 0,
            accepting: false,
        }
    }

    pub fn status(&self) -> u32 {
        self.status
    }

    pub fn on_status(&mut self, status: u32) -> Result<(), FetchError> {
        self.status = status;
        self.writer.clear_content_length();
        self.accepting = (200..300).contains(&status);
        if status == 200 && self.writer.start() > 0 {
            tracing::debug!(path = %self.writer.path().display(), "range ignored by server, restarting");
            self.writer.restart_from_zero()?;
        }
        Ok(())
    }

    /// Feed one raw header line. Status lines and Content-Length are recognised.
    pub fn on_header_line(&mut self, line: &str) -> Result<(), FetchError> {
        let line = line.trim_end();
        if let Some(status) = parse_status_line(line) {
            return self.on_status(status);
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                if let Ok(len) = value.trim().parse::<u64>() {
                    if self.accepting {
                        self.writer.set_content_length(len);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn on_body(&mut self, data: &[u8]) -> Result<(), FetchError> {
        if self.writer.cancel_token().is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if !self.accepting {
            return Ok(());
        }
        self.writer.write_chunk(data)
    }

    pub fn finish(self) -> Result<TransferReply, FetchError> {
        let status = self.status;
        let bytes = self.writer.finish()?;
        Ok(TransferReply { status, bytes })
    }
}

/// `HTTP/1.1 206 Partial Content` -> 206.
pub(crate) fn parse_status_line(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("HTTP/")?;
    let mut parts = rest.split_whitespace();
    parts.next()?;
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(dir: &std::path::Path, existing: &[u8]) -> ResponseSink {
        let part = dir.join("x.part");
        std::fs::write(&part, existing).unwrap();
        let w = PartWriter::open(&part, existing.len() as u64, CancelToken::never(), None).unwrap();
        ResponseSink::new(w)
    }

    #[test]
    fn status_line_parsing() {
        assert_eq!(parse_status_line("HTTP/1.1 206 Partial Content"), Some(206));
        assert_eq!(parse_status_line("HTTP/2 200"), Some(200));
        assert_eq!(parse_status_line("Content-Length: 5"), None);
    }

    #[test]
    fn partial_content_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = sink(dir.path(), b"abc");
        s.on_header_line("HTTP/1.1 206 Partial Content\r\n").unwrap();
        s.on_header_line("Content-Length: 3\r\n").unwrap();
        s.on_body(b"def").unwrap();
        let reply = s.finish().unwrap();
        assert_eq!(reply, TransferReply { status: 206, bytes: 6 });
        assert_eq!(std::fs::read(dir.path().join("x.part")).unwrap(), b"abcdef");
    }

    #[test]
    fn full_body_for_ranged_request_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = sink(dir.path(), b"abc");
        s.on_header_line("HTTP/1.1 200 OK").unwrap();
        s.on_body(b"abcdef").unwrap();
        assert_eq!(s.finish().unwrap().bytes, 6);
        assert_eq!(std::fs::read(dir.path().join("x.part")).unwrap(), b"abcdef");
    }

    #[test]
    fn error_bodies_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = sink(dir.path(), b"abc");
        s.on_header_line("HTTP/1.1 302 Found").unwrap();
        s.on_body(b"<a href=...>").unwrap();
        s.on_header_line("HTTP/1.1 416 Range Not Satisfiable").unwrap();
        s.on_body(b"nope").unwrap();
        let reply = s.finish().unwrap();
        assert_eq!(reply.status, 416);
        assert_eq!(std::fs::read(dir.path().join("x.part")).unwrap(), b"abc");
    }
}
