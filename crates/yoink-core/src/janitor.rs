//! Reclaiming temp artifacts after jobs end.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::job::{JobId, JobOutcome};

/// Default age after which temp entries are swept.
pub const DEFAULT_FILE_RETENTION: Duration = Duration::from_secs(20 * 60);

/// Called exactly once per terminal job, after the cleanup grace delay.
pub trait Janitor: Send + Sync + 'static {
    fn reclaim(&self, job_id: &JobId, outcome: JobOutcome, temp_paths: &[PathBuf]);
}

/// The per-purpose temp directories under one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempDirs {
    root: PathBuf,
}

impl TempDirs {
    const SUBDIRS: [&'static str; 7] = [
        "downloads",
        "convert",
        "compress",
        "playlists",
        "gallery",
        "uploads",
        "bot",
    ];

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<system temp>/yoink`.
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("yoink")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn downloads(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn convert(&self) -> PathBuf {
        self.root.join("convert")
    }

    pub fn compress(&self) -> PathBuf {
        self.root.join("compress")
    }

    pub fn playlists(&self) -> PathBuf {
        self.root.join("playlists")
    }

    pub fn all(&self) -> Vec<PathBuf> {
        Self::SUBDIRS.iter().map(|d| self.root.join(d)).collect()
    }

    /// Clear the whole tree and recreate the subdirectories.
    pub fn prepare(&self) -> io::Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => tracing::info!(root = %self.root.display(), "cleared temp directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(root = %self.root.display(), "failed to clear temp directory: {}", e),
        }
        for dir in self.all() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Default janitor over a `TempDirs` tree.
///
/// Failed and cancelled jobs lose every entry whose name contains the job id.
/// Successful jobs only lose their tracked temp paths; their finished
/// artifacts stay until the retention sweep.
#[derive(Debug, Clone)]
pub struct TempDirJanitor {
    dirs: TempDirs,
}

impl TempDirJanitor {
    pub fn new(dirs: TempDirs) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &TempDirs {
        &self.dirs
    }

    /// Remove every entry in the tree named after `job_id` (`<id>`, `<id>-...`, `<id>.<ext>`).
    pub fn remove_job_files(&self, job_id: &JobId) -> usize {
        let mut removed = 0;
        for dir in self.dirs.all() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                if !named_after(&entry.file_name().to_string_lossy(), job_id) {
                    continue;
                }
                match remove_entry(&entry.path()) {
                    Ok(()) => {
                        tracing::debug!(job_id = %job_id.short(), path = %entry.path().display(), "removed");
                        removed += 1;
                    }
                    Err(e) => tracing::debug!(path = %entry.path().display(), "cleanup failed: {}", e),
                }
            }
        }
        if removed == 0 {
            tracing::debug!(job_id = %job_id.short(), "no files found for job");
        }
        removed
    }

    /// Remove entries older than `retention`.
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        self.sweep_expired_at(SystemTime::now(), retention)
    }

    pub fn sweep_expired_at(&self, now: SystemTime, retention: Duration) -> usize {
        let mut removed = 0;
        for dir in self.dirs.all() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                    continue;
                };
                let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
                if age <= retention {
                    continue;
                }
                if remove_entry(&entry.path()).is_ok() {
                    tracing::info!(path = %entry.path().display(), "cleaned up old temp entry");
                    removed += 1;
                }
            }
        }
        removed
    }
}

impl Janitor for TempDirJanitor {
    fn reclaim(&self, job_id: &JobId, outcome: JobOutcome, temp_paths: &[PathBuf]) {
        let mut removed = 0;
        for path in temp_paths {
            if remove_entry(path).is_ok() {
                removed += 1;
            }
        }
        if outcome != JobOutcome::Succeeded {
            removed += self.remove_job_files(job_id);
        }
        tracing::debug!(job_id = %job_id.short(), outcome = %outcome, removed, "reclaimed job files");
    }
}

fn remove_entry(path: &Path) -> io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// A job's entries start with its id followed by a separator, or are exactly the id.
fn named_after(name: &str, job_id: &JobId) -> bool {
    match name.strip_prefix(job_id.as_str()) {
        Some(rest) => rest.is_empty() || rest.starts_with(['-', '_', '.']),
        None => false,
    }
}
