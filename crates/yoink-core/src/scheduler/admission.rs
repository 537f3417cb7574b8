//! Per-type active counters and the admission rule.

use std::collections::BTreeMap;

use crate::job::{JobLimits, JobType};

/// Active job counts per type, checked against `JobLimits`.
#[derive(Debug, Clone)]
pub(crate) struct Capacity {
    limits: JobLimits,
    active: [usize; JobType::ALL.len()],
}

impl Capacity {
    pub(crate) fn new(limits: JobLimits) -> Self {
        Self {
            limits,
            active: [0; JobType::ALL.len()],
        }
    }

    pub(crate) fn limits(&self) -> JobLimits {
        self.limits
    }

    pub(crate) fn active(&self, job_type: JobType) -> usize {
        self.active[job_type.index()]
    }

    pub(crate) fn total_active(&self) -> usize {
        self.active.iter().sum()
    }

    /// Heavy jobs wait while more than one job of any type is running;
    /// every type is capped by its own limit.
    pub(crate) fn can_start(&self, job_type: JobType) -> bool {
        if job_type.is_heavy() && self.total_active() > 1 {
            return false;
        }
        self.active(job_type) < self.limits.limit(job_type)
    }

    pub(crate) fn acquire(&mut self, job_type: JobType) {
        self.active[job_type.index()] += 1;
    }

    pub(crate) fn release(&mut self, job_type: JobType) {
        let slot = &mut self.active[job_type.index()];
        if *slot == 0 {
            tracing::warn!(job_type = %job_type, "released a slot that was not held");
            return;
        }
        *slot -= 1;
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<JobType, usize> {
        JobType::ALL.iter().map(|t| (*t, self.active(*t))).collect()
    }
}
