//! Process handle: intent state, cancel token, attached pid and temp paths.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

use super::JobCancelled;
use crate::job::{JobId, JobType};

/// What the job should do next.
///
/// `CancelNow` is terminal. `FinishEarly` only exists for multi-item jobs and
/// can still be escalated to `CancelNow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Run,
    FinishEarly,
    CancelNow,
}

/// Result of a cooperative poll point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    FinishEarly,
}

/// Cloneable view of a handle's cancellation state, for transfers.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<Intent>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(Intent::Run);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() == Intent::CancelNow
    }

    /// Resolves once the owning handle is cancelled. Pends forever if the
    /// handle is gone without having been cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let woke = rx.wait_for(|i| *i == Intent::CancelNow).await.is_ok();
        if !woke {
            std::future::pending::<()>().await;
        }
    }
}

/// Live representation of a running job's external work.
pub struct ProcessHandle {
    job_id: JobId,
    job_type: JobType,
    intent: watch::Sender<Intent>,
    pid: Mutex<Option<u32>>,
    temp_paths: Mutex<Vec<PathBuf>>,
    terminal_claimed: AtomicBool,
}

impl ProcessHandle {
    pub(crate) fn new(job_id: JobId, job_type: JobType) -> Self {
        let (intent, _) = watch::channel(Intent::Run);
        Self {
            job_id,
            job_type,
            intent,
            pid: Mutex::new(None),
            temp_paths: Mutex::new(Vec::new()),
            terminal_claimed: AtomicBool::new(false),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn intent(&self) -> Intent {
        *self.intent.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.intent() == Intent::CancelNow
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.intent.subscribe(),
        }
    }

    /// Cancel the whole job. Idempotent; returns true on the first call.
    pub fn cancel(&self) -> bool {
        let changed = self.intent.send_if_modified(|i| {
            if *i == Intent::CancelNow {
                return false;
            }
            *i = Intent::CancelNow;
            true
        });
        if changed {
            tracing::debug!(job_id = %self.job_id, "cancel requested");
            self.signal_process();
        }
        changed
    }

    /// Stop pulling new sub-units and succeed with what has completed.
    /// Terminates only the sub-unit process currently in flight.
    /// Refused (false) for job types that are not multi-item, and after cancel.
    pub fn finish_early(&self) -> bool {
        if !self.job_type.is_multi_item() {
            return false;
        }
        let changed = self.intent.send_if_modified(|i| {
            if *i != Intent::Run {
                return false;
            }
            *i = Intent::FinishEarly;
            true
        });
        if changed {
            tracing::debug!(job_id = %self.job_id, "finish early requested");
            self.signal_process();
        }
        changed
    }

    /// Cooperative poll point between units of work.
    pub fn checkpoint(&self) -> Result<Checkpoint, JobCancelled> {
        match self.intent() {
            Intent::Run => Ok(Checkpoint::Continue),
            Intent::FinishEarly => Ok(Checkpoint::FinishEarly),
            Intent::CancelNow => Err(JobCancelled),
        }
    }

    /// Record the pid of the external process currently doing this job's work.
    pub fn attach_pid(&self, pid: u32) {
        *self.pid.lock().unwrap_or_else(PoisonError::into_inner) = Some(pid);
    }

    pub fn detach_pid(&self) {
        *self.pid.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember a temp artifact owned by this job, for cleanup.
    pub fn track_temp_path(&self, path: impl Into<PathBuf>) {
        self.temp_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.into());
    }

    pub fn temp_paths(&self) -> Vec<PathBuf> {
        self.temp_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// First caller wins the right to announce the job's terminal event.
    pub(crate) fn claim_terminal(&self) -> bool {
        !self.terminal_claimed.swap(true, Ordering::AcqRel)
    }

    fn signal_process(&self) {
        if let Some(pid) = self.pid() {
            terminate(pid, &self.job_id);
        }
    }
}

#[cfg(unix)]
fn terminate(pid: u32, job_id: &JobId) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!(job_id = %job_id, pid, "SIGTERM failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn terminate(pid: u32, job_id: &JobId) {
    tracing::debug!(job_id = %job_id, pid, "no signal support on this platform; relying on cancel token");
}
