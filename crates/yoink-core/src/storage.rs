//! Partial artifacts and their lifecycle.
//!
//! Transfers write to `<final>.part`, appending when resuming, and are
//! renamed to the final name only once complete. A `.part` left behind by a
//! failed attempt is the resume point for the next one.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::control::CancelToken;
use crate::retry::FetchError;

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `a.mp4` -> `a.mp4.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Size of an existing partial artifact, 0 if there is none.
pub fn partial_len(path: &Path) -> io::Result<u64> {
    match std::fs::metadata(path) {
        Ok(m) => Ok(m.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Rename a completed `.part` to its final name.
pub fn finalize(part: &Path, final_path: &Path) -> io::Result<()> {
    std::fs::rename(part, final_path)
}

/// Snapshot of transfer progress for one artifact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferStats {
    /// Bytes in the partial artifact so far, including resumed bytes.
    pub bytes_done: u64,
    /// Total artifact size, when the server told us.
    pub total_bytes: Option<u64>,
    /// Seconds since this attempt started.
    pub elapsed_secs: f64,
    /// Bytes that were already on disk when this attempt started.
    pub resumed_from: u64,
}

impl TransferStats {
    /// Rate of this attempt in bytes per second (0 if elapsed is 0).
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_done.saturating_sub(self.resumed_from) as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (None if unknown).
    pub fn eta_secs(&self) -> Option<f64> {
        let total = self.total_bytes?;
        let remaining = total.saturating_sub(self.bytes_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Whole percent complete, capped at 100. None if the total is unknown.
    pub fn percent(&self) -> Option<u8> {
        let total = self.total_bytes.filter(|t| *t > 0)?;
        let pct = (self.bytes_done as f64 / total as f64 * 100.0).round();
        Some(pct.min(100.0) as u8)
    }
}

/// Callback invoked after every written chunk.
pub type ProgressFn = Arc<dyn Fn(TransferStats) + Send + Sync>;

/// Append-mode writer for a partial artifact.
///
/// Checks the cancel token before every chunk so a transfer stops at the
/// next chunk boundary after a cancel.
pub struct PartWriter {
    file: File,
    path: PathBuf,
    start: u64,
    written: u64,
    total: Option<u64>,
    cancel: CancelToken,
    progress: Option<ProgressFn>,
    started_at: Instant,
}

impl PartWriter {
    /// Open `path` for a transfer starting at `start` (append), or truncate when `start == 0`.
    pub fn open(
        path: &Path,
        start: u64,
        cancel: CancelToken,
        progress: Option<ProgressFn>,
    ) -> io::Result<Self> {
        let file = if start > 0 {
            OpenOptions::new().append(true).open(path)?
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?
        };
        Ok(Self {
            file,
            path: path.to_path_buf(),
            start,
            written: start,
            total: None,
            cancel,
            progress,
            started_at: Instant::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset this transfer started from.
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn bytes_done(&self) -> u64 {
        self.written
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Record the Content-Length of the response body (relative to `start`).
    pub fn set_content_length(&mut self, body_len: u64) {
        self.total = Some(self.start + body_len);
    }

    pub fn clear_content_length(&mut self) {
        self.total = None;
    }

    /// The server ignored our Range request and is sending the whole body:
    /// drop the resumed bytes and write from zero.
    pub fn restart_from_zero(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.start = 0;
        self.written = 0;
        self.total = None;
        Ok(())
    }

    /// Append one chunk and report progress.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        if let Some(cb) = &self.progress {
            cb(self.stats());
        }
        Ok(())
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            bytes_done: self.written,
            total_bytes: self.total,
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
            resumed_from: self.start,
        }
    }

    /// Flush to disk. Returns the total bytes in the partial artifact.
    pub fn finish(mut self) -> Result<u64, FetchError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn temp_path_appends_part() {
        let p = temp_path(Path::new("job-cobalt.mp4"));
        assert_eq!(p.to_string_lossy(), "job-cobalt.mp4.part");
        let p2 = temp_path(Path::new("/tmp/yoink/a.mp3"));
        assert_eq!(p2.to_string_lossy(), "/tmp/yoink/a.mp3.part");
    }

    #[test]
    fn partial_len_of_missing_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(partial_len(&dir.path().join("nope.part")).unwrap(), 0);
    }

    #[test]
    fn resume_appends_after_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("a.mp4.part");
        std::fs::write(&part, b"hello ").unwrap();

        let start = partial_len(&part).unwrap();
        assert_eq!(start, 6);
        let seen: Arc<Mutex<Vec<TransferStats>>> = Arc::default();
        let seen_cb = Arc::clone(&seen);
        let cb: ProgressFn = Arc::new(move |s| seen_cb.lock().unwrap().push(s));
        let mut w = PartWriter::open(&part, start, CancelToken::never(), Some(cb)).unwrap();
        w.set_content_length(5);
        w.write_chunk(b"world").unwrap();
        assert_eq!(w.finish().unwrap(), 11);

        let final_path = dir.path().join("a.mp4");
        finalize(&part, &final_path).unwrap();
        assert_eq!(std::fs::read(&final_path).unwrap(), b"hello world");
        assert!(!part.exists());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].bytes_done, 11);
        assert_eq!(seen[0].total_bytes, Some(11));
        assert_eq!(seen[0].percent(), Some(100));
    }

    #[test]
    fn restart_discards_resumed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("b.part");
        std::fs::write(&part, b"stale").unwrap();
        let mut w = PartWriter::open(&part, 5, CancelToken::never(), None).unwrap();
        w.restart_from_zero().unwrap();
        w.write_chunk(b"fresh!").unwrap();
        w.finish().unwrap();
        assert_eq!(std::fs::read(&part).unwrap(), b"fresh!");
    }

    #[test]
    fn cancelled_writer_refuses_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("c.part");
        let registry = crate::control::ProcessRegistry::new();
        let handle = registry.register("c".into(), crate::job::JobType::Download);
        let mut w = PartWriter::open(&part, 0, handle.token(), None).unwrap();
        w.write_chunk(b"abc").unwrap();
        handle.cancel();
        assert!(matches!(w.write_chunk(b"def"), Err(FetchError::Cancelled)));
        assert_eq!(w.bytes_done(), 3);
    }

    #[test]
    fn stats_percent_and_eta() {
        let s = TransferStats {
            bytes_done: 50,
            total_bytes: Some(200),
            elapsed_secs: 1.0,
            resumed_from: 0,
        };
        assert_eq!(s.percent(), Some(25));
        assert_eq!(s.eta_secs(), Some(3.0));
        let unknown = TransferStats {
            total_bytes: None,
            ..s
        };
        assert_eq!(unknown.percent(), None);
        assert_eq!(unknown.eta_secs(), None);
    }
}
