//! Multi-item jobs: run sub-units in order with partial success.
//!
//! Cancel fails the whole job. Finish-early stops pulling new items and
//! succeeds with whatever completed. A failing item is recorded and skipped.

use std::future::Future;

use serde::Serialize;

use crate::control::{is_cancellation, Checkpoint, JobCancelled, ProcessHandle};
use crate::user_error::ErrorTranslator;

/// Most recent failures kept in an outcome.
pub const MAX_FAILED_ITEMS: usize = 50;

pub const NO_ITEMS_MESSAGE: &str = "No videos were successfully downloaded";

/// One sub-unit of a multi-item job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// 1-based position in the source list.
    pub index: usize,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub index: usize,
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialOutcome<T> {
    pub completed: Vec<T>,
    /// The last `MAX_FAILED_ITEMS` failures.
    pub failed: Vec<FailedItem>,
    pub failed_count: usize,
    pub finished_early: bool,
}

/// Run `per_item` for each item, polling the handle between items.
pub async fn run_items<T, F, Fut>(
    handle: &ProcessHandle,
    items: &[Item],
    translator: &dyn ErrorTranslator,
    mut per_item: F,
) -> anyhow::Result<PartialOutcome<T>>
where
    F: FnMut(&Item) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut completed = Vec::new();
    let mut failed: Vec<FailedItem> = Vec::new();
    let mut failed_count = 0usize;
    let mut finished_early = false;

    for item in items {
        match handle.checkpoint()? {
            Checkpoint::Continue => {}
            Checkpoint::FinishEarly => {
                tracing::info!(
                    job_id = %handle.job_id().short(),
                    completed = completed.len(),
                    "finishing early"
                );
                finished_early = true;
                break;
            }
        }

        match per_item(item).await {
            Ok(done) => {
                tracing::debug!(job_id = %handle.job_id().short(), index = item.index, "item complete");
                completed.push(done);
            }
            Err(err) => {
                if is_cancellation(&err) || handle.is_cancelled() {
                    return Err(JobCancelled.into());
                }
                tracing::warn!(job_id = %handle.job_id().short(), index = item.index, "item failed: {:#}", err);
                failed_count += 1;
                failed.push(FailedItem {
                    index: item.index,
                    title: item.title.clone(),
                    reason: translator.translate_error(&err),
                });
                if failed.len() > MAX_FAILED_ITEMS {
                    failed.remove(0);
                }
            }
        }
    }

    // Finish-early may land while the last item is in flight.
    if !finished_early && handle.checkpoint()? == Checkpoint::FinishEarly {
        finished_early = true;
    }
    if completed.is_empty() {
        anyhow::bail!(NO_ITEMS_MESSAGE);
    }
    Ok(PartialOutcome {
        completed,
        failed,
        failed_count,
        finished_early,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ProcessRegistry;
    use crate::job::JobType;
    use crate::user_error::DefaultTranslator;
    use std::sync::Arc;

    fn items(n: usize) -> Vec<Item> {
        (1..=n)
            .map(|i| Item {
                index: i,
                title: format!("Video {i}"),
                url: format!("https://v.example/{i}"),
            })
            .collect()
    }

    fn playlist_handle() -> Arc<ProcessHandle> {
        ProcessRegistry::new().register("pl".into(), JobType::Playlist)
    }

    #[tokio::test]
    async fn failures_are_recorded_and_skipped() {
        let h = playlist_handle();
        let out = run_items(&h, &items(4), &DefaultTranslator, |item| {
            let idx = item.index;
            async move {
                if idx % 2 == 0 {
                    anyhow::bail!("HTTP Error 404: Not Found");
                }
                Ok(idx)
            }
        })
        .await
        .unwrap();
        assert_eq!(out.completed, vec![1, 3]);
        assert_eq!(out.failed_count, 2);
        assert_eq!(out.failed[0].reason, "Video not found - it may have been deleted");
        assert_eq!(out.failed[1].title, "Video 4");
        assert!(!out.finished_early);
    }

    #[tokio::test]
    async fn finish_early_succeeds_with_completed_items() {
        let h = playlist_handle();
        let hh = Arc::clone(&h);
        let out = run_items(&h, &items(5), &DefaultTranslator, move |item| {
            let idx = item.index;
            let hh = Arc::clone(&hh);
            async move {
                if idx == 2 {
                    hh.finish_early();
                }
                Ok(idx)
            }
        })
        .await
        .unwrap();
        assert_eq!(out.completed, vec![1, 2]);
        assert!(out.finished_early);
    }

    #[tokio::test]
    async fn cancel_fails_the_whole_job() {
        let h = playlist_handle();
        let hh = Arc::clone(&h);
        let err = run_items(&h, &items(5), &DefaultTranslator, move |item| {
            let idx = item.index;
            let hh = Arc::clone(&hh);
            async move {
                if idx == 3 {
                    hh.cancel();
                    anyhow::bail!("process killed");
                }
                Ok(idx)
            }
        })
        .await
        .unwrap_err();
        assert!(is_cancellation(&err));
    }

    #[tokio::test]
    async fn zero_completed_items_is_a_failure() {
        let h = playlist_handle();
        let err = run_items::<(), _, _>(&h, &items(2), &DefaultTranslator, |_| async {
            anyhow::bail!("unsupported url")
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), NO_ITEMS_MESSAGE);
    }

    #[tokio::test]
    async fn failed_list_is_capped() {
        let h = playlist_handle();
        let out = run_items(&h, &items(60), &DefaultTranslator, |item| {
            let idx = item.index;
            async move {
                if idx == 60 {
                    return Ok(idx);
                }
                anyhow::bail!("boom {idx}")
            }
        })
        .await
        .unwrap();
        assert_eq!(out.failed_count, 59);
        assert_eq!(out.failed.len(), MAX_FAILED_ITEMS);
        assert_eq!(out.failed[0].index, 10);
    }
}
