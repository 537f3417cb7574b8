//! Job queue and admission controller.
//!
//! `submit` either rejects synchronously (queue full) or enqueues and hands
//! back a ticket. The dispatcher pops admissible jobs, front to back (light
//! tier first), under a single mutex and spawns them on the runtime. Each
//! running job holds a `SlotGuard`; finishing the job releases the slot,
//! unlinks it from its owner's session, resolves the ticket and re-runs the
//! dispatcher.
//!
//! Lock order: the queue mutex may be held while taking the session
//! registry's mutex (linking on submit), never the other way round.

mod admission;
mod guard;
mod ticket;
mod wait_list;
#[cfg(test)]
mod tests;

pub use ticket::JobTicket;

use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::control::JobCancelled;
use crate::job::{ClientId, JobId, JobLimits, JobType};
use crate::session::SessionRegistry;
use admission::Capacity;
use guard::SlotGuard;
use wait_list::{WaitList, Waiting};

/// Default maximum number of waiting jobs.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 50;

/// Rejection when the wait list is at capacity. Nothing was enqueued or linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Server is too busy. Please try again later.")]
pub struct QueueFull;

/// The job's task panicked. Reported on its ticket.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {job_id} panicked: {message}")]
pub struct JobPanicked {
    pub job_id: JobId,
    pub message: String,
}

/// Identity of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub job_id: JobId,
    pub job_type: JobType,
    /// Owning client, if any.
    pub client: Option<ClientId>,
}

impl JobRequest {
    pub fn new(job_id: JobId, job_type: JobType, client: Option<ClientId>) -> Self {
        Self {
            job_id,
            job_type,
            client,
        }
    }
}

/// Snapshot of the queue for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub active: BTreeMap<JobType, usize>,
    pub queued: usize,
    pub limits: JobLimits,
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Type-erased queued work: either started with a slot or rejected.
trait QueuedWork: Send {
    fn start(self: Box<Self>, slot: SlotGuard) -> BoxFuture;
    fn reject(self: Box<Self>, err: anyhow::Error);
}

struct Work<F, T> {
    make: F,
    tx: oneshot::Sender<anyhow::Result<T>>,
}

impl<F, Fut, T> QueuedWork for Work<F, T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    fn start(self: Box<Self>, slot: SlotGuard) -> BoxFuture {
        let Work { make, tx } = *self;
        Box::pin(async move {
            // Nested task: a panic inside the work surfaces as a JoinError here.
            let result = match tokio::spawn(make()).await {
                Ok(result) => result,
                Err(join) => {
                    let message = if join.is_panic() {
                        panic_message(join.into_panic())
                    } else {
                        "task aborted".to_string()
                    };
                    tracing::error!(job_id = %slot.job_id().short(), "job panicked: {}", message);
                    Err(JobPanicked {
                        job_id: slot.job_id().clone(),
                        message,
                    }
                    .into())
                }
            };
            let queue = slot.finish();
            let _ = tx.send(result);
            queue.dispatch();
        })
    }

    fn reject(self: Box<Self>, err: anyhow::Error) {
        let _ = self.tx.send(Err(err));
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}

struct State {
    capacity: Capacity,
    waiting: WaitList<Box<dyn QueuedWork>>,
}

pub(crate) struct Shared {
    state: Mutex<State>,
    sessions: Arc<SessionRegistry>,
    max_queue_size: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn release_slot(&self, job_type: JobType, job_id: &JobId) {
        self.lock().capacity.release(job_type);
        self.sessions.unlink_job(job_id);
    }

    /// Start every admissible waiting job.
    pub(crate) fn dispatch(self: &Arc<Self>) {
        let mut starting: Vec<(Waiting<Box<dyn QueuedWork>>, SlotGuard)> = Vec::new();
        {
            let mut st = self.lock();
            loop {
                let State { capacity, waiting } = &mut *st;
                let Some(entry) = waiting.pop_admissible(|t| capacity.can_start(t)) else {
                    break;
                };
                capacity.acquire(entry.job_type);
                tracing::info!(
                    job_id = %entry.job_id.short(),
                    job_type = %entry.job_type,
                    waited_ms = entry.added_at.elapsed().as_millis() as u64,
                    active = ?capacity.snapshot(),
                    "starting job"
                );
                let slot = SlotGuard::new(Arc::clone(self), entry.job_type, entry.job_id.clone());
                starting.push((entry, slot));
            }
        }
        for (entry, slot) in starting {
            tokio::spawn(entry.work.start(slot));
        }
    }
}

/// In-memory job queue with per-type and heavy-job admission limits.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl JobQueue {
    pub fn new(limits: JobLimits, max_queue_size: usize, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    capacity: Capacity::new(limits),
                    waiting: WaitList::default(),
                }),
                sessions,
                max_queue_size,
            }),
        }
    }

    /// Enqueue `work`, or reject with `QueueFull` without changing anything.
    ///
    /// Must be called from within a tokio runtime; admitted work is spawned on it.
    pub fn submit<F, Fut, T>(&self, request: JobRequest, work: F) -> Result<JobTicket<T>, QueueFull>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        {
            let mut st = self.shared.lock();
            if st.waiting.len() >= self.shared.max_queue_size {
                tracing::warn!(
                    job_id = %request.job_id.short(),
                    queued = st.waiting.len(),
                    "queue full, rejecting job"
                );
                return Err(QueueFull);
            }
            if let Some(client) = &request.client {
                self.shared.sessions.link_job(&request.job_id, client);
            }
            st.waiting.push(Waiting {
                job_id: request.job_id.clone(),
                job_type: request.job_type,
                added_at: Instant::now(),
                work: Box::new(Work { make: work, tx }),
            });
            tracing::info!(
                job_id = %request.job_id.short(),
                job_type = %request.job_type,
                queued = st.waiting.len(),
                "job added"
            );
        }
        self.shared.dispatch();
        Ok(JobTicket::new(request.job_id, rx))
    }

    /// Remove a job that has not started yet. Its ticket rejects with `JobCancelled`.
    pub fn withdraw(&self, job_id: &JobId) -> bool {
        let entry = self.shared.lock().waiting.remove(job_id);
        let Some(entry) = entry else {
            return false;
        };
        self.shared.sessions.unlink_job(job_id);
        tracing::info!(job_id = %job_id.short(), "withdrawn before start");
        entry.work.reject(JobCancelled.into());
        true
    }

    pub fn is_queued(&self, job_id: &JobId) -> bool {
        self.shared.lock().waiting.contains(job_id)
    }

    pub fn active(&self, job_type: JobType) -> usize {
        self.shared.lock().capacity.active(job_type)
    }

    pub fn status(&self) -> QueueStatus {
        let st = self.shared.lock();
        QueueStatus {
            active: st.capacity.snapshot(),
            queued: st.waiting.len(),
            limits: st.capacity.limits(),
        }
    }
}
