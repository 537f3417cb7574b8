use std::collections::{HashMap, VecDeque};

use super::event::Stage;
use crate::job::JobId;

/// Last known state of a job whose client may reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeRecord {
    pub stage: Stage,
    pub progress: u8,
}

/// Bounded side table of resumable jobs; the oldest entry is evicted first.
#[derive(Debug)]
pub(crate) struct ResumeTable {
    capacity: usize,
    order: VecDeque<JobId>,
    records: HashMap<JobId, ResumeRecord>,
}

impl ResumeTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            records: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, job_id: JobId, record: ResumeRecord) {
        if self.records.insert(job_id.clone(), record).is_some() {
            return;
        }
        self.order.push_back(job_id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.records.remove(&oldest);
                tracing::debug!(job_id = %oldest.short(), "evicted resumable record");
            }
        }
    }

    /// Update an existing record; jobs that never opted in are ignored.
    pub(crate) fn update(&mut self, job_id: &JobId, stage: Stage, progress: Option<u8>) {
        if let Some(rec) = self.records.get_mut(job_id) {
            rec.stage = stage;
            if let Some(p) = progress {
                rec.progress = p;
            }
        }
    }

    pub(crate) fn get(&self, job_id: &JobId) -> Option<ResumeRecord> {
        self.records.get(job_id).copied()
    }

    pub(crate) fn remove(&mut self, job_id: &JobId) {
        if self.records.remove(job_id).is_some() {
            self.order.retain(|id| id != job_id);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
