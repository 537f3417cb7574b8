//! Job identity, job types and per-type concurrency limits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, unique job identifier. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Server-generated id: 128 random bits as lower-case hex.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one browser/client instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of requested work. Partitions capacity accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Download,
    Playlist,
    Convert,
    Compress,
    Transcribe,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::Download,
        JobType::Playlist,
        JobType::Convert,
        JobType::Compress,
        JobType::Transcribe,
    ];

    /// Heavy jobs are gated on total activity and sort behind light jobs.
    pub fn is_heavy(self) -> bool {
        !matches!(self, JobType::Download)
    }

    /// Jobs made of several sub-units; the only kind that can finish early.
    pub fn is_multi_item(self) -> bool {
        matches!(self, JobType::Playlist)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Download => "download",
            JobType::Playlist => "playlist",
            JobType::Convert => "convert",
            JobType::Compress => "compress",
            JobType::Transcribe => "transcribe",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            JobType::Download => 0,
            JobType::Playlist => 1,
            JobType::Convert => 2,
            JobType::Compress => 3,
            JobType::Transcribe => 4,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown job type: {}", s))
    }
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl JobOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
            JobOutcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum concurrently running jobs per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLimits {
    pub download: usize,
    pub playlist: usize,
    pub convert: usize,
    pub compress: usize,
    pub transcribe: usize,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            download: 6,
            playlist: 2,
            convert: 2,
            compress: 1,
            transcribe: 1,
        }
    }
}

impl JobLimits {
    pub fn limit(&self, job_type: JobType) -> usize {
        match job_type {
            JobType::Download => self.download,
            JobType::Playlist => self.playlist,
            JobType::Convert => self.convert,
            JobType::Compress => self.compress,
            JobType::Transcribe => self.transcribe,
        }
    }
}
