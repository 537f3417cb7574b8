//! Two-tier wait list: light jobs ahead of heavy ones, FIFO within a tier.

use std::collections::VecDeque;
use tokio::time::Instant;

use crate::job::{JobId, JobType};

pub(crate) struct Waiting<W> {
    pub(crate) job_id: JobId,
    pub(crate) job_type: JobType,
    pub(crate) added_at: Instant,
    pub(crate) work: W,
}

pub(crate) struct WaitList<W> {
    light: VecDeque<Waiting<W>>,
    heavy: VecDeque<Waiting<W>>,
}

impl<W> Default for WaitList<W> {
    fn default() -> Self {
        Self {
            light: VecDeque::new(),
            heavy: VecDeque::new(),
        }
    }
}

impl<W> WaitList<W> {
    pub(crate) fn len(&self) -> usize {
        self.light.len() + self.heavy.len()
    }

    pub(crate) fn push(&mut self, entry: Waiting<W>) {
        if entry.job_type.is_heavy() {
            self.heavy.push_back(entry);
        } else {
            self.light.push_back(entry);
        }
    }

    /// Remove the first entry, scanning light then heavy, that `admissible` accepts.
    pub(crate) fn pop_admissible(&mut self, mut admissible: impl FnMut(JobType) -> bool) -> Option<Waiting<W>> {
        for tier in [&mut self.light, &mut self.heavy] {
            if let Some(i) = tier.iter().position(|w| admissible(w.job_type)) {
                return tier.remove(i);
            }
        }
        None
    }

    pub(crate) fn remove(&mut self, job_id: &JobId) -> Option<Waiting<W>> {
        for tier in [&mut self.light, &mut self.heavy] {
            if let Some(i) = tier.iter().position(|w| &w.job_id == job_id) {
                return tier.remove(i);
            }
        }
        None
    }

    pub(crate) fn contains(&self, job_id: &JobId) -> bool {
        self.light.iter().chain(self.heavy.iter()).any(|w| &w.job_id == job_id)
    }
}
