//! What a running job sees: its id, its handle and a progress publisher.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::control::{CancelToken, Checkpoint, JobCancelled, ProcessHandle};
use crate::job::{JobId, JobType};
use crate::progress::{ProgressHub, Stage};

/// Final `complete` event content chosen by the work.
#[derive(Debug, Clone, Default)]
pub(crate) struct Completion {
    pub message: Option<String>,
    pub extra: Option<Map<String, Value>>,
}

pub(crate) type CompletionSlot = Arc<Mutex<Completion>>;

/// Publishes non-terminal progress for one job.
///
/// Terminal stages are reserved for the engine. Events published after the
/// job was cancelled are dropped.
#[derive(Clone)]
pub struct ProgressPublisher {
    job_id: JobId,
    hub: Arc<ProgressHub>,
    handle: Arc<ProcessHandle>,
    completion: CompletionSlot,
}

impl ProgressPublisher {
    pub(crate) fn new(
        job_id: JobId,
        hub: Arc<ProgressHub>,
        handle: Arc<ProcessHandle>,
        completion: CompletionSlot,
    ) -> Self {
        Self {
            job_id,
            hub,
            handle,
            completion,
        }
    }

    pub fn publish(&self, stage: Stage, message: &str, progress: Option<u8>) {
        self.send(stage, message, progress, None);
    }

    pub fn publish_with(
        &self,
        stage: Stage,
        message: &str,
        progress: Option<u8>,
        extra: Map<String, Value>,
    ) {
        self.send(stage, message, progress, Some(extra));
    }

    /// Message and extra fields for the `complete` event sent on success.
    pub fn set_completion(&self, message: impl Into<String>, extra: Map<String, Value>) {
        let mut slot = self.completion.lock().unwrap_or_else(PoisonError::into_inner);
        slot.message = Some(message.into());
        slot.extra = Some(extra);
    }

    fn send(&self, stage: Stage, message: &str, progress: Option<u8>, extra: Option<Map<String, Value>>) {
        if stage.is_terminal() {
            tracing::debug!(job_id = %self.job_id.short(), %stage, "terminal stage ignored from job work");
            return;
        }
        if self.handle.is_cancelled() {
            return;
        }
        self.hub.publish(&self.job_id, stage, message, progress, extra);
    }
}

/// Handed to a job's work when it starts.
pub struct JobContext {
    job_id: JobId,
    job_type: JobType,
    handle: Arc<ProcessHandle>,
    progress: ProgressPublisher,
}

impl JobContext {
    pub(crate) fn new(handle: Arc<ProcessHandle>, progress: ProgressPublisher) -> Self {
        Self {
            job_id: handle.job_id().clone(),
            job_type: handle.job_type(),
            handle,
            progress,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn handle(&self) -> &Arc<ProcessHandle> {
        &self.handle
    }

    pub fn progress(&self) -> &ProgressPublisher {
        &self.progress
    }

    pub fn token(&self) -> CancelToken {
        self.handle.token()
    }

    pub fn checkpoint(&self) -> Result<Checkpoint, JobCancelled> {
        self.handle.checkpoint()
    }
}
