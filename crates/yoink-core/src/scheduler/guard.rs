use std::sync::Arc;

use super::Shared;
use crate::job::{JobId, JobType};

/// Holds one active slot for a running job. Dropping it without `finish`
/// (task dropped at runtime shutdown) still releases the slot.
pub(crate) struct SlotGuard {
    queue: Arc<Shared>,
    job_type: JobType,
    job_id: JobId,
    released: bool,
}

impl SlotGuard {
    pub(super) fn new(queue: Arc<Shared>, job_type: JobType, job_id: JobId) -> Self {
        Self {
            queue,
            job_type,
            job_id,
            released: false,
        }
    }

    pub(super) fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Release the slot and unlink the job; returns the queue for re-dispatch.
    pub(super) fn finish(mut self) -> Arc<Shared> {
        self.release();
        Arc::clone(&self.queue)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.queue.release_slot(self.job_type, &self.job_id);
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release();
    }
}
