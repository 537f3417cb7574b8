//! Job control: per-job process handles, cancellation and finish-early.
//!
//! Each running job is registered with a `ProcessHandle`. Cancel requests
//! (user action or heartbeat loss) go through the handle: the intent flips to
//! `CancelNow`, waiting transfers wake up through their `CancelToken`, and any
//! attached OS process receives SIGTERM. Work loops poll `checkpoint()`.

mod handle;
mod process;

pub use handle::{CancelToken, Checkpoint, Intent, ProcessHandle};
pub use process::{run_command, CommandOutput, ProcessFailed};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::job::{JobId, JobType};

/// Error returned when a job is stopped by a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCancelled;

impl std::fmt::Display for JobCancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cancelled")
    }
}

impl std::error::Error for JobCancelled {}

/// True if `err` (or anything in its chain) is a cancellation.
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|e| {
        e.downcast_ref::<JobCancelled>().is_some()
            || matches!(
                e.downcast_ref::<crate::retry::FetchError>(),
                Some(crate::retry::FetchError::Cancelled)
            )
    })
}

/// Shared registry of job id -> process handle.
#[derive(Default)]
pub struct ProcessRegistry {
    handles: Mutex<HashMap<JobId, Arc<ProcessHandle>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job and return its handle.
    pub fn register(&self, job_id: JobId, job_type: JobType) -> Arc<ProcessHandle> {
        let handle = Arc::new(ProcessHandle::new(job_id.clone(), job_type));
        let previous = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.clone(), Arc::clone(&handle));
        if previous.is_some() {
            tracing::warn!(job_id = %job_id, "replaced an existing process handle");
        }
        handle
    }

    pub fn get(&self, job_id: &JobId) -> Option<Arc<ProcessHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    /// Forget a job's handle. Returns the handle if it was still registered.
    pub fn release(&self, job_id: &JobId) -> Option<Arc<ProcessHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id)
    }

    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default path for the control socket (XDG state dir).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("yoink")?.get_state_home();
    Ok(dir.join("control.sock"))
}
