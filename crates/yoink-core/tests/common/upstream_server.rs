//! Minimal HTTP/1.1 upstream for integration tests.
//!
//! `POST /` answers like a resolve endpoint, pointing at `GET /file`. The file
//! route serves one static body and honors `Range: bytes=X-`. Knobs simulate
//! flaky endpoints and dropped transfers.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct UpstreamOptions {
    /// The first N resolve requests answer 503.
    pub resolve_failures: usize,
    /// Logical error code returned by every resolve instead of a URL.
    pub error_code: Option<String>,
    /// The first ranged-or-not GET sends full headers but closes after this many bytes.
    pub drop_first_transfer_after: Option<usize>,
    /// Sleep between 1 KiB chunks of a transfer.
    pub chunk_delay: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct Observed {
    pub resolves: AtomicUsize,
    pub transfers: AtomicUsize,
    /// Range start of each transfer (None when no Range header was sent).
    pub ranges: Mutex<Vec<Option<u64>>>,
    pub api_keys: Mutex<Vec<Option<String>>>,
}

pub struct UpstreamServer {
    /// Resolve endpoint, e.g. "http://127.0.0.1:12345".
    pub endpoint: String,
    pub observed: Arc<Observed>,
}

/// Starts a server in a background thread serving `body`. It runs until the process exits.
pub fn start(body: Vec<u8>, opts: UpstreamOptions) -> UpstreamServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let endpoint = format!("http://127.0.0.1:{}", port);
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    let observed = Arc::new(Observed::default());
    let seen = Arc::clone(&observed);
    let base = endpoint.clone();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = Arc::clone(&opts);
            let seen = Arc::clone(&seen);
            let base = base.clone();
            thread::spawn(move || handle(stream, &body, &opts, &seen, &base));
        }
    });
    UpstreamServer { endpoint, observed }
}

struct Request {
    method: String,
    path: String,
    range_start: Option<u64>,
    api_key: Option<String>,
}

fn handle(mut stream: TcpStream, body: &[u8], opts: &UpstreamOptions, seen: &Observed, base: &str) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(req) = read_request(&mut stream) else {
        return;
    };

    if req.method.eq_ignore_ascii_case("POST") {
        let n = seen.resolves.fetch_add(1, Ordering::SeqCst);
        seen.api_keys.lock().unwrap().push(req.api_key.clone());
        if n < opts.resolve_failures {
            let _ = stream.write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            return;
        }
        let json = match &opts.error_code {
            Some(code) => format!(r#"{{"status":"error","error":{{"code":"{}"}}}}"#, code),
            None => format!(r#"{{"status":"tunnel","url":"{}/file","filename":"video.mp4"}}"#, base),
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            json.len(),
            json
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if req.method.eq_ignore_ascii_case("GET") && req.path == "/file" {
        let n = seen.transfers.fetch_add(1, Ordering::SeqCst);
        seen.ranges.lock().unwrap().push(req.range_start);
        let total = body.len() as u64;
        let (status, slice, content_range) = match req.range_start {
            Some(start) if start >= total => {
                let response = format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    total
                );
                let _ = stream.write_all(response.as_bytes());
                return;
            }
            Some(start) => (
                "206 Partial Content",
                &body[start as usize..],
                format!("Content-Range: bytes {}-{}/{}\r\n", start, total - 1, total),
            ),
            None => ("200 OK", body, String::new()),
        };
        let header = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}Accept-Ranges: bytes\r\nConnection: close\r\n\r\n",
            status,
            slice.len(),
            content_range
        );
        if stream.write_all(header.as_bytes()).is_err() {
            return;
        }
        let limit = match opts.drop_first_transfer_after {
            Some(cut) if n == 0 => cut.min(slice.len()),
            _ => slice.len(),
        };
        for chunk in slice[..limit].chunks(1024) {
            if stream.write_all(chunk).is_err() {
                return;
            }
            let _ = stream.flush();
            if let Some(delay) = opts.chunk_delay {
                thread::sleep(delay);
            }
        }
        if limit < slice.len() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        return;
    }

    let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
}

/// Reads the head and any Content-Length body of one request.
fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return None;
        }
    };
    let head = std::str::from_utf8(&buf[..head_end]).ok()?.to_string();

    let mut lines = head.lines();
    let mut first = lines.next()?.split_whitespace();
    let method = first.next()?.to_string();
    let path = first.next().unwrap_or("/").to_string();
    let mut range_start = None;
    let mut api_key = None;
    let mut content_length = 0usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("range") {
            range_start = value
                .strip_prefix("bytes=")
                .and_then(|v| v.split('-').next())
                .and_then(|v| v.trim().parse::<u64>().ok());
        } else if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().unwrap_or(0);
        } else if name.eq_ignore_ascii_case("authorization") {
            api_key = value.strip_prefix("Api-Key ").map(str::to_string);
        }
    }

    let mut have = buf.len() - (head_end + 4);
    while have < content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        have += n;
    }
    Some(Request {
        method,
        path,
        range_start,
        api_key,
    })
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
