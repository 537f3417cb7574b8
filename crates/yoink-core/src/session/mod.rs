//! Client session registry and heartbeat sweep.
//!
//! A session tracks when a client last sent a heartbeat, when it last did
//! anything, and which jobs it owns. The sweep removes sessions that own jobs
//! but stopped heartbeating (their jobs must then be cancelled by the caller)
//! and sessions that have been idle with no jobs.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::job::{ClientId, JobId};

/// Timeouts governing the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// A session with jobs and no heartbeat for longer than this expires.
    pub heartbeat_timeout: Duration,
    /// A session with no jobs and no activity for longer than this is evicted.
    pub idle_timeout: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    last_heartbeat: Instant,
    last_activity: Instant,
    jobs: HashSet<JobId>,
}

/// Why the sweep removed a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// Missed heartbeats while owning jobs. Every listed job must be cancelled.
    Expired { client: ClientId, jobs: Vec<JobId> },
    /// No jobs and idle.
    Idle { client: ClientId },
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removals: Vec<Removal>,
}

impl SweepReport {
    /// All jobs of expired sessions.
    pub fn jobs_to_cancel(&self) -> impl Iterator<Item = (&ClientId, &JobId)> {
        self.removals.iter().flat_map(|r| match r {
            Removal::Expired { client, jobs } => jobs.iter().map(move |j| (client, j)).collect::<Vec<_>>(),
            Removal::Idle { .. } => Vec::new(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.removals.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<ClientId, Session>,
    owners: HashMap<JobId, ClientId>,
}

/// Shared session table. One mutex covers sessions and the job->client map.
pub struct SessionRegistry {
    timeouts: SessionTimeouts,
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new(timeouts: SessionTimeouts) -> Self {
        Self {
            timeouts,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        self.timeouts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the session on first sight, otherwise refresh its activity.
    pub fn register_or_touch(&self, client: &ClientId) {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.sessions.get_mut(client) {
            Some(s) => s.last_activity = now,
            None => {
                inner.sessions.insert(
                    client.clone(),
                    Session {
                        last_heartbeat: now,
                        last_activity: now,
                        jobs: HashSet::new(),
                    },
                );
                tracing::info!(client = %client.short(), sessions = inner.sessions.len(), "client connected");
            }
        }
    }

    /// Refresh the heartbeat. False means the client is unknown and must reconnect.
    pub fn heartbeat(&self, client: &ClientId) -> bool {
        let mut inner = self.lock();
        match inner.sessions.get_mut(client) {
            Some(s) => {
                s.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Record `job` as owned by `client`. No-op if the client has no session.
    pub fn link_job(&self, job: &JobId, client: &ClientId) -> bool {
        let mut inner = self.lock();
        let Some(session) = inner.sessions.get_mut(client) else {
            return false;
        };
        session.jobs.insert(job.clone());
        session.last_activity = Instant::now();
        inner.owners.insert(job.clone(), client.clone());
        true
    }

    /// Forget `job`'s ownership and refresh the owner's activity.
    pub fn unlink_job(&self, job: &JobId) {
        let mut inner = self.lock();
        let Some(client) = inner.owners.remove(job) else {
            return;
        };
        if let Some(session) = inner.sessions.get_mut(&client) {
            session.jobs.remove(job);
            session.last_activity = Instant::now();
        }
    }

    pub fn owner_of(&self, job: &JobId) -> Option<ClientId> {
        self.lock().owners.get(job).cloned()
    }

    pub fn job_count_for(&self, client: &ClientId) -> usize {
        self.lock()
            .sessions
            .get(client)
            .map(|s| s.jobs.len())
            .unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn contains(&self, client: &ClientId) -> bool {
        self.lock().sessions.contains_key(client)
    }

    /// Remove expired and idle sessions in one locked step.
    ///
    /// Expired sessions and all of their job->client entries are gone when
    /// this returns; the caller cancels the reported jobs.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut inner = self.lock();
        let mut report = SweepReport::default();

        let mut doomed: Vec<ClientId> = Vec::new();
        for (client, s) in &inner.sessions {
            if !s.jobs.is_empty() {
                if now.saturating_duration_since(s.last_heartbeat) > self.timeouts.heartbeat_timeout {
                    doomed.push(client.clone());
                }
            } else if now.saturating_duration_since(s.last_activity) > self.timeouts.idle_timeout {
                doomed.push(client.clone());
            }
        }

        for client in doomed {
            let Some(session) = inner.sessions.remove(&client) else {
                continue;
            };
            if session.jobs.is_empty() {
                tracing::info!(client = %client.short(), "session idle timeout");
                report.removals.push(Removal::Idle { client });
                continue;
            }
            let mut jobs: Vec<JobId> = session.jobs.into_iter().collect();
            jobs.sort();
            for job in &jobs {
                inner.owners.remove(job);
            }
            tracing::warn!(
                client = %client.short(),
                jobs = jobs.len(),
                "heartbeat timeout, cancelling jobs"
            );
            report.removals.push(Removal::Expired { client, jobs });
        }
        report
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionTimeouts::default())
    }
}
