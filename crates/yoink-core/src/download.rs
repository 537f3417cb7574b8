//! Download job work: a resilient fetch reporting through the job's progress.

use anyhow::Context;
use serde_json::{json, Map};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::engine::JobContext;
use crate::progress::Stage;
use crate::storage::{self, ProgressFn, TransferStats};
use crate::upstream::{artifact_path, FetchRequest, FetchedArtifact, ResilientClient, Transport};

/// Fetch `request` into `dest_dir` as the job described by `ctx`.
///
/// The partial artifact is tracked on the handle so a failed or cancelled job
/// leaves nothing behind.
pub async fn run_download<T: Transport>(
    ctx: JobContext,
    client: Arc<ResilientClient<T>>,
    request: FetchRequest,
    dest_dir: PathBuf,
) -> anyhow::Result<FetchedArtifact> {
    let final_path = artifact_path(&dest_dir, ctx.job_id(), request.ext());
    ctx.handle().track_temp_path(storage::temp_path(&final_path));
    ctx.progress().publish(Stage::Downloading, "Downloading...", Some(0));

    let artifact = client
        .fetch(
            ctx.job_id(),
            &request,
            &dest_dir,
            &ctx.token(),
            Some(progress_reporter(&ctx)),
        )
        .await
        .with_context(|| format!("fetching {}", request.url))?;

    let mut extra = Map::new();
    extra.insert("file".into(), json!(artifact.path.display().to_string()));
    extra.insert("bytes".into(), json!(artifact.bytes));
    if artifact.resumed_from > 0 {
        extra.insert("resumedFrom".into(), json!(artifact.resumed_from));
    }
    ctx.progress().set_completion("Download complete", extra);
    Ok(artifact)
}

/// Publishes one `downloading` event per whole-percent change.
fn progress_reporter(ctx: &JobContext) -> ProgressFn {
    let publisher = ctx.progress().clone();
    let last = Arc::new(AtomicU8::new(u8::MAX));
    Arc::new(move |stats: TransferStats| {
        let Some(pct) = stats.percent() else {
            return;
        };
        if last.swap(pct, Ordering::Relaxed) == pct {
            return;
        }
        let mut extra = Map::new();
        extra.insert("speed".into(), json!(stats.bytes_per_sec().round() as u64));
        if let Some(eta) = stats.eta_secs() {
            extra.insert("eta".into(), json!(eta.round() as u64));
        }
        publisher.publish_with(Stage::Downloading, &format!("Downloading {}%", pct), Some(pct), extra);
    })
}
