//! Engine: one coordinator over the queue, sessions, process handles,
//! progress and cleanup.
//!
//! A job's handle is registered when it is submitted, so a cancel can reach it
//! while it still waits. Every job ends exactly once: whichever of the work
//! completion and a cancel request claims the handle first publishes the
//! terminal event, and the janitor runs once after the cleanup grace delay.

mod context;

pub use context::{JobContext, ProgressPublisher};

use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::YoinkConfig;
use crate::control::{is_cancellation, ProcessHandle, ProcessRegistry};
use crate::janitor::Janitor;
use crate::job::{ClientId, JobId, JobOutcome};
use crate::progress::{ProgressHub, ProgressSink, SinkId, Stage};
use crate::scheduler::{panic_message, JobPanicked, JobQueue, JobRequest, JobTicket, QueueFull, QueueStatus};
use crate::session::{SessionRegistry, SweepReport};
use crate::user_error::ErrorTranslator;
use context::{Completion, CompletionSlot};

pub const CANCELLED_MESSAGE: &str = "Download cancelled";
pub const CONNECTION_LOST_MESSAGE: &str = "Connection lost - task cancelled";
pub const FINISHING_EARLY_MESSAGE: &str = "Finishing early, packaging downloaded videos...";

/// Counters for status replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub queue: QueueStatus,
    pub sessions: usize,
    pub live_jobs: usize,
}

struct Inner {
    queue: JobQueue,
    sessions: Arc<SessionRegistry>,
    processes: ProcessRegistry,
    progress: Arc<ProgressHub>,
    janitor: Arc<dyn Janitor>,
    translator: Arc<dyn ErrorTranslator>,
    cleanup_grace: Duration,
    max_jobs_per_client: usize,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn new(config: &YoinkConfig, janitor: Arc<dyn Janitor>, translator: Arc<dyn ErrorTranslator>) -> Self {
        let sessions = Arc::new(SessionRegistry::new(config.sessions.timeouts()));
        let queue = JobQueue::new(config.limits, config.max_queue_size, Arc::clone(&sessions));
        Self {
            inner: Arc::new(Inner {
                queue,
                sessions,
                processes: ProcessRegistry::new(),
                progress: Arc::new(ProgressHub::new(config.resume_capacity)),
                janitor,
                translator,
                cleanup_grace: config.files.cleanup_grace(),
                max_jobs_per_client: config.max_jobs_per_client,
            }),
        }
    }

    /// Enqueue a job. `work` runs once the scheduler admits it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F, Fut, T>(&self, request: JobRequest, work: F) -> Result<JobTicket<T>, QueueFull>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let job_id = request.job_id.clone();
        let handle = self.inner.processes.register(job_id.clone(), request.job_type);
        let completion: CompletionSlot = Arc::new(Mutex::new(Completion::default()));
        let publisher = context::ProgressPublisher::new(
            job_id.clone(),
            Arc::clone(&self.inner.progress),
            Arc::clone(&handle),
            Arc::clone(&completion),
        );
        let ctx = JobContext::new(Arc::clone(&handle), publisher);

        self.inner.progress.publish(&job_id, Stage::Queued, "Waiting in queue...", None, None);
        let inner = Arc::clone(&self.inner);
        match self
            .inner
            .queue
            .submit(request, move || inner.run(ctx, completion, work))
        {
            Ok(ticket) => Ok(ticket),
            Err(full) => {
                self.inner.processes.release(&job_id);
                self.inner.progress.finish(&job_id);
                Err(full)
            }
        }
    }

    /// Cancel a waiting or running job. False if it is unknown or already ending.
    pub fn cancel_job(&self, job_id: &JobId) -> bool {
        self.inner.cancel(job_id, CANCELLED_MESSAGE)
    }

    /// Ask a running multi-item job to stop pulling items and package what it has.
    pub fn finish_early(&self, job_id: &JobId) -> bool {
        if self.inner.queue.is_queued(job_id) {
            return false;
        }
        let Some(handle) = self.inner.processes.get(job_id) else {
            return false;
        };
        if !handle.finish_early() {
            return false;
        }
        self.inner
            .progress
            .publish(job_id, Stage::FinishingEarly, FINISHING_EARLY_MESSAGE, None, None);
        tracing::info!(job_id = %job_id.short(), "finish early requested");
        true
    }

    /// Drop expired and idle sessions; cancel every job an expired session owned.
    pub fn sweep_sessions(&self, now: Instant) -> SweepReport {
        let report = self.inner.sessions.sweep(now);
        for (client, job_id) in report.jobs_to_cancel() {
            if self.inner.cancel(job_id, CONNECTION_LOST_MESSAGE) {
                tracing::info!(client = %client.short(), job_id = %job_id.short(), "cancelled job of lost client");
            }
        }
        report
    }

    /// Run `sweep_sessions` every `interval` until the task is aborted.
    pub fn spawn_heartbeat_monitor(&self, interval: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = engine.sweep_sessions(Instant::now());
                if !report.is_empty() {
                    tracing::debug!(removed = report.removals.len(), "session sweep");
                }
            }
        })
    }

    pub fn attach_progress(&self, job_id: &JobId, sink: Box<dyn ProgressSink>) -> SinkId {
        self.inner.progress.attach(job_id, sink)
    }

    pub fn detach_progress(&self, job_id: &JobId, sink_id: SinkId) -> bool {
        self.inner.progress.detach(job_id, sink_id)
    }

    pub fn register_client(&self, client: &ClientId) {
        self.inner.sessions.register_or_touch(client);
    }

    pub fn heartbeat(&self, client: &ClientId) -> bool {
        self.inner.sessions.heartbeat(client)
    }

    pub fn job_count_for(&self, client: &ClientId) -> usize {
        self.inner.sessions.job_count_for(client)
    }

    pub fn max_jobs_per_client(&self) -> usize {
        self.inner.max_jobs_per_client
    }

    /// True if `client` already owns `max_jobs_per_client` jobs.
    pub fn client_at_capacity(&self, client: &ClientId) -> bool {
        self.job_count_for(client) >= self.inner.max_jobs_per_client
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.inner.queue.status()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            queue: self.inner.queue.status(),
            sessions: self.inner.sessions.session_count(),
            live_jobs: self.inner.processes.len(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.inner.sessions
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.inner.processes
    }

    pub fn progress(&self) -> &Arc<ProgressHub> {
        &self.inner.progress
    }
}

impl Inner {
    async fn run<F, Fut, T>(self: Arc<Self>, ctx: JobContext, completion: CompletionSlot, work: F) -> anyhow::Result<T>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = Arc::clone(ctx.handle());
        let result = match handle.checkpoint() {
            Err(cancelled) => Err(cancelled.into()),
            Ok(_) => {
                ctx.progress().publish(Stage::Starting, "Starting...", None);
                match tokio::spawn(work(ctx)).await {
                    Ok(result) => result,
                    Err(join) => {
                        let message = if join.is_panic() {
                            panic_message(join.into_panic())
                        } else {
                            "task aborted".to_string()
                        };
                        tracing::error!(job_id = %handle.job_id().short(), "job panicked: {}", message);
                        Err(JobPanicked {
                            job_id: handle.job_id().clone(),
                            message,
                        }
                        .into())
                    }
                }
            }
        };
        self.conclude(&handle, &completion, result.as_ref().map(|_| ()));
        result
    }

    /// Terminal bookkeeping for a job whose work has returned.
    fn conclude(&self, handle: &ProcessHandle, completion: &CompletionSlot, result: Result<(), &anyhow::Error>) {
        let job_id = handle.job_id();
        let outcome = if !handle.claim_terminal() {
            // A cancel request already announced the end.
            JobOutcome::Cancelled
        } else {
            match result {
                Ok(()) => {
                    let done = std::mem::take(&mut *completion.lock().unwrap_or_else(PoisonError::into_inner));
                    let message = done.message.unwrap_or_else(|| "Complete".to_string());
                    self.progress
                        .publish(job_id, Stage::Complete, &message, Some(100), done.extra);
                    JobOutcome::Succeeded
                }
                Err(err) if handle.is_cancelled() || is_cancellation(err) => {
                    self.progress
                        .publish(job_id, Stage::Cancelled, CANCELLED_MESSAGE, None, None);
                    JobOutcome::Cancelled
                }
                Err(err) => {
                    let message = self.translator.translate_error(err);
                    tracing::warn!(job_id = %job_id.short(), user_message = %message, "job failed: {:#}", err);
                    self.progress.publish(job_id, Stage::Error, &message, None, None);
                    JobOutcome::Failed
                }
            }
        };
        self.processes.release(job_id);
        self.progress.finish(job_id);
        tracing::info!(job_id = %job_id.short(), job_type = %handle.job_type(), %outcome, "job finished");
        self.schedule_reclaim(job_id.clone(), outcome, handle.temp_paths());
    }

    fn cancel(&self, job_id: &JobId, message: &str) -> bool {
        if self.queue.withdraw(job_id) {
            let paths = match self.processes.release(job_id) {
                Some(handle) => {
                    handle.cancel();
                    handle.claim_terminal();
                    handle.temp_paths()
                }
                None => Vec::new(),
            };
            self.progress.publish(job_id, Stage::Cancelled, message, None, None);
            self.progress.finish(job_id);
            self.schedule_reclaim(job_id.clone(), JobOutcome::Cancelled, paths);
            return true;
        }

        let Some(handle) = self.processes.get(job_id) else {
            return false;
        };
        if !handle.cancel() {
            return false;
        }
        if handle.claim_terminal() {
            self.progress.publish(job_id, Stage::Cancelled, message, None, None);
        }
        self.processes.release(job_id);
        tracing::info!(job_id = %job_id.short(), "cancelled running job");
        true
    }

    fn schedule_reclaim(&self, job_id: JobId, outcome: JobOutcome, temp_paths: Vec<PathBuf>) {
        let janitor = Arc::clone(&self.janitor);
        let grace = self.cleanup_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let reclaimed = tokio::task::spawn_blocking(move || janitor.reclaim(&job_id, outcome, &temp_paths)).await;
            if let Err(e) = reclaimed {
                tracing::warn!("janitor task failed: {}", e);
            }
        });
    }
}
