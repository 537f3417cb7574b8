//! Resilient fetch: resolve, ranged transfer with resume, failover and backoff.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::api::ResolveBody;
use super::transport::Transport;
use crate::control::CancelToken;
use crate::job::JobId;
use crate::retry::{run_rounds, FetchError, RetryPolicy};
use crate::storage::{self, PartWriter, ProgressFn};

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub audio: bool,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, audio: bool) -> Self {
        Self {
            url: url.into(),
            audio,
        }
    }

    pub fn ext(&self) -> &'static str {
        if self.audio {
            "mp3"
        } else {
            "mp4"
        }
    }
}

/// A completed artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    pub ext: &'static str,
    pub transfer_url: String,
    pub endpoint: String,
    pub bytes: u64,
    /// Bytes that were already in the partial artifact when the winning attempt began.
    pub resumed_from: u64,
}

/// Final artifact path for a job: `<dest>/<job>-cobalt.<ext>`.
pub fn artifact_path(dest_dir: &Path, job_id: &JobId, ext: &str) -> PathBuf {
    dest_dir.join(format!("{}-cobalt.{}", job_id, ext))
}

/// Fetches artifacts from a pool of interchangeable endpoints.
pub struct ResilientClient<T> {
    transport: Arc<T>,
    endpoints: Vec<String>,
    policy: RetryPolicy,
    video_quality: String,
}

impl<T: Transport> ResilientClient<T> {
    pub fn new(transport: T, endpoints: Vec<String>, policy: RetryPolicy) -> Self {
        Self {
            transport: Arc::new(transport),
            endpoints,
            policy,
            video_quality: "1080".to_string(),
        }
    }

    pub fn with_video_quality(mut self, quality: impl Into<String>) -> Self {
        self.video_quality = quality.into();
        self
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `request` into `dest_dir`.
    ///
    /// The partial artifact is shared across attempts and endpoints, so a
    /// failed attempt leaves a resume point for the next one.
    pub async fn fetch(
        &self,
        job_id: &JobId,
        request: &FetchRequest,
        dest_dir: &Path,
        cancel: &CancelToken,
        on_progress: Option<ProgressFn>,
    ) -> Result<FetchedArtifact, FetchError> {
        let final_path = artifact_path(dest_dir, job_id, request.ext());
        let body = ResolveBody::new(&request.url, request.audio, &self.video_quality);
        let started = tokio::time::Instant::now();

        let (result, stats) = run_rounds(&self.policy, &self.endpoints, cancel, |endpoint, attempt| {
            tracing::info!(
                job_id = %job_id.short(),
                endpoint = %endpoint,
                attempt,
                audio = request.audio,
                "fetch attempt"
            );
            self.attempt(endpoint, &body, request.ext(), &final_path, cancel, on_progress.clone())
        })
        .await;

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(artifact) => tracing::info!(
                job_id = %job_id.short(),
                endpoint = %artifact.endpoint,
                bytes = artifact.bytes,
                resumed_from = artifact.resumed_from,
                attempts = stats.attempts,
                "fetched in {:.1}s",
                elapsed
            ),
            Err(e) => tracing::warn!(
                job_id = %job_id.short(),
                attempts = stats.attempts,
                backoffs = stats.backoffs,
                "fetch failed after {:.1}s: {}",
                elapsed,
                e
            ),
        }
        result
    }

    async fn attempt(
        &self,
        endpoint: String,
        body: &ResolveBody,
        ext: &'static str,
        final_path: &Path,
        cancel: &CancelToken,
        on_progress: Option<ProgressFn>,
    ) -> Result<FetchedArtifact, FetchError> {
        let resolved = self.transport.resolve(&endpoint, body, cancel).await?;
        tracing::debug!(endpoint = %endpoint, status = %resolved.status, "got transfer url");

        let part = storage::temp_path(final_path);
        let start = storage::partial_len(&part)?;
        if start > 0 {
            tracing::info!(path = %part.display(), start, "resuming partial artifact");
        }
        let writer = PartWriter::open(&part, start, cancel.clone(), on_progress)?;
        let reply = self.transport.download(&resolved.url, writer).await?;

        if reply.status == 416 && start > 0 {
            tracing::info!(path = %part.display(), "partial artifact already complete");
        } else if !(200..300).contains(&reply.status) {
            return Err(FetchError::TransferHttp(reply.status));
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        storage::finalize(&part, final_path)?;
        let bytes = storage::partial_len(final_path)?;
        let resumed_from = if reply.status == 200 { 0 } else { start };
        Ok(FetchedArtifact {
            path: final_path.to_path_buf(),
            ext,
            transfer_url: resolved.url,
            endpoint,
            bytes,
            resumed_from,
        })
    }
}
