//! Progress broadcast: at most one live sink per job.
//!
//! Events published while no sink is attached are dropped. The one exception
//! is the synthetic `resuming` event: a job marked resumable remembers its
//! last stage and progress, and a sink that attaches later is greeted with it.
//! A job whose sink goes away mid-flight is marked resumable automatically.

mod event;
mod resume;
mod sink;

pub use event::{ProgressEvent, Stage};
pub use resume::ResumeRecord;
pub use sink::{ProgressSink, SinkClosed};

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::job::JobId;
use resume::ResumeTable;

/// Default capacity of the resumable-job table.
pub const DEFAULT_RESUME_CAPACITY: usize = 256;

/// Identifies one attachment, so a stale disconnect cannot detach its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

struct Attached {
    id: SinkId,
    sink: Box<dyn ProgressSink>,
}

struct HubState {
    sinks: HashMap<JobId, Attached>,
    /// Last stage and progress published per job.
    last: HashMap<JobId, (Stage, u8)>,
    last_logged: HashMap<JobId, u8>,
    resume: ResumeTable,
    next_sink: u64,
}

impl HubState {
    /// A live job lost its sink: remember where it was for the next attach.
    fn sink_lost(&mut self, job_id: &JobId) {
        if let Some(&(stage, progress)) = self.last.get(job_id) {
            if !stage.is_terminal() && self.resume.get(job_id).is_none() {
                self.resume.insert(job_id.clone(), ResumeRecord { stage, progress });
            }
        }
    }
}

pub struct ProgressHub {
    state: Mutex<HubState>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(DEFAULT_RESUME_CAPACITY)
    }
}

impl ProgressHub {
    pub fn new(resume_capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState {
                sinks: HashMap::new(),
                last: HashMap::new(),
                last_logged: HashMap::new(),
                resume: ResumeTable::new(resume_capacity),
                next_sink: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach `sink` as the job's only sink, superseding any previous one.
    ///
    /// The new sink first receives `resuming` (with the last known progress)
    /// for a resumable job, otherwise `connected`.
    pub fn attach(&self, job_id: &JobId, sink: Box<dyn ProgressSink>) -> SinkId {
        let mut st = self.lock();
        st.next_sink += 1;
        let id = SinkId(st.next_sink);

        let greeting = match st.resume.get(job_id) {
            Some(rec) => ProgressEvent::new(Stage::Resuming, "Reconnected! Resuming download...")
                .with_progress(rec.progress),
            None => ProgressEvent::new(Stage::Connected, "Connected to progress stream"),
        };
        if sink.deliver(&greeting).is_err() {
            tracing::debug!(job_id = %job_id.short(), "progress sink closed before greeting");
            return id;
        }
        if st.sinks.insert(job_id.clone(), Attached { id, sink }).is_some() {
            tracing::debug!(job_id = %job_id.short(), "progress sink superseded");
        }
        id
    }

    /// Transport-level disconnect. Only removes the sink if it is still current.
    pub fn detach(&self, job_id: &JobId, sink_id: SinkId) -> bool {
        let mut st = self.lock();
        match st.sinks.get(job_id) {
            Some(a) if a.id == sink_id => {
                st.sinks.remove(job_id);
                st.sink_lost(job_id);
                true
            }
            _ => false,
        }
    }

    pub fn has_sink(&self, job_id: &JobId) -> bool {
        self.lock().sinks.contains_key(job_id)
    }

    /// Opt a job into reconnect greetings, starting from its last published state.
    pub fn mark_resumable(&self, job_id: &JobId) {
        let mut st = self.lock();
        let (stage, progress) = st.last.get(job_id).copied().unwrap_or((Stage::Queued, 0));
        st.resume.insert(job_id.clone(), ResumeRecord { stage, progress });
    }

    pub fn resume_record(&self, job_id: &JobId) -> Option<ResumeRecord> {
        self.lock().resume.get(job_id)
    }

    /// Deliver an event to the job's sink, or drop it when none is attached.
    ///
    /// A non-terminal event that changes stage without a progress value is
    /// sent with progress 0.
    pub fn publish(
        &self,
        job_id: &JobId,
        stage: Stage,
        message: &str,
        progress: Option<u8>,
        extra: Option<serde_json::Map<String, serde_json::Value>>,
    ) {
        let mut st = self.lock();
        let previous = st.last.get(job_id).copied();
        let stage_changed = previous.map(|(s, _)| s) != Some(stage);
        let progress = match progress {
            Some(p) => Some(p.min(100)),
            None if stage_changed && !stage.is_terminal() => Some(0),
            None => None,
        };
        let kept = progress.or(previous.map(|(_, p)| p)).unwrap_or(0);
        st.last.insert(job_id.clone(), (stage, kept));
        st.resume.update(job_id, stage, progress);
        log_throttled(&mut st.last_logged, job_id, stage, message, progress);

        let mut event = ProgressEvent::new(stage, message);
        event.progress = progress;
        if let Some(extra) = extra {
            event.extra = extra;
        }

        let closed = match st.sinks.get(job_id) {
            Some(a) => a.sink.deliver(&event).is_err(),
            None => false,
        };
        if closed {
            st.sinks.remove(job_id);
            st.sink_lost(job_id);
            tracing::debug!(job_id = %job_id.short(), "progress sink closed, detached");
        }
    }

    /// Forget all state for a job that reached a terminal stage.
    pub fn finish(&self, job_id: &JobId) {
        let mut st = self.lock();
        st.sinks.remove(job_id);
        st.last.remove(job_id);
        st.last_logged.remove(job_id);
        st.resume.remove(job_id);
    }
}

/// Percentage messages are logged every 25 points and at 100; everything else always.
fn log_throttled(
    last_logged: &mut HashMap<JobId, u8>,
    job_id: &JobId,
    stage: Stage,
    message: &str,
    progress: Option<u8>,
) {
    let pct = match progress {
        Some(p) if message.contains('%') => p,
        _ => {
            tracing::info!(job_id = %job_id.short(), "{}: {}", stage, message);
            last_logged.remove(job_id);
            return;
        }
    };
    let due = match last_logged.get(job_id) {
        Some(&last) => pct >= 100 || pct.saturating_sub(last) >= 25,
        None => true,
    };
    if due {
        tracing::info!(job_id = %job_id.short(), "{}: {}", stage, message);
        if pct >= 100 {
            last_logged.remove(job_id);
        } else {
            last_logged.insert(job_id.clone(), pct);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn channel() -> (Box<dyn ProgressSink>, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Box::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn events_without_sink_are_dropped() {
        let hub = ProgressHub::default();
        let job = JobId::from("j");
        hub.publish(&job, Stage::Downloading, "Downloading 10%", Some(10), None);
        let (sink, mut rx) = channel();
        hub.attach(&job, sink);
        let evs = drain(&mut rx);
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].stage, Stage::Connected);
    }

    #[test]
    fn reattach_gets_exactly_one_resuming_event() {
        let hub = ProgressHub::default();
        let job = JobId::from("j");
        let (first, mut rx1) = channel();
        let first_id = hub.attach(&job, first);
        hub.publish(&job, Stage::Downloading, "Downloading 40%", Some(40), None);
        hub.mark_resumable(&job);

        let (second, mut rx2) = channel();
        hub.attach(&job, second);
        hub.publish(&job, Stage::Downloading, "Downloading 60%", Some(60), None);

        let evs1 = drain(&mut rx1);
        assert_eq!(evs1.len(), 2);
        assert_eq!(evs1[0].stage, Stage::Connected);
        let evs2 = drain(&mut rx2);
        assert_eq!(evs2.len(), 2);
        assert_eq!(evs2[0].stage, Stage::Resuming);
        assert_eq!(evs2[0].progress, Some(40));
        assert_eq!(evs2[0].message, "Reconnected! Resuming download...");
        assert_eq!(evs2[1].progress, Some(60));
        assert_eq!(evs2.iter().filter(|e| e.stage == Stage::Resuming).count(), 1);

        // A stale disconnect from the superseded sink leaves the new one in place.
        assert!(!hub.detach(&job, first_id));
        assert!(hub.has_sink(&job));
    }

    #[test]
    fn lost_sink_makes_running_job_resumable() {
        let hub = ProgressHub::default();
        let job = JobId::from("j");
        let (sink, _rx) = channel();
        let id = hub.attach(&job, sink);
        hub.publish(&job, Stage::Downloading, "Downloading 30%", Some(30), None);
        hub.publish(&job, Stage::Downloading, "still going", None, None);
        assert!(hub.detach(&job, id));
        assert_eq!(
            hub.resume_record(&job),
            Some(ResumeRecord {
                stage: Stage::Downloading,
                progress: 30
            })
        );
        let (again, mut rx) = channel();
        hub.attach(&job, again);
        let evs = drain(&mut rx);
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].stage, Stage::Resuming);
        assert_eq!(evs[0].progress, Some(30));
    }

    #[test]
    fn stage_change_without_progress_reports_zero() {
        let hub = ProgressHub::default();
        let job = JobId::from("j");
        let (sink, mut rx) = channel();
        hub.attach(&job, sink);
        hub.publish(&job, Stage::Downloading, "Downloading 80%", Some(80), None);
        hub.publish(&job, Stage::Processing, "Processing...", None, None);
        hub.publish(&job, Stage::Processing, "Still processing", None, None);
        hub.publish(&job, Stage::Complete, "Done", None, None);
        let evs = drain(&mut rx);
        assert_eq!(evs[2].progress, Some(0));
        assert_eq!(evs[3].progress, None);
        assert_eq!(evs[4].progress, None);
    }

    #[test]
    fn closed_sink_is_removed_on_failed_send() {
        let hub = ProgressHub::default();
        let job = JobId::from("j");
        let (tx, rx) = mpsc::channel::<ProgressEvent>(4);
        hub.attach(&job, Box::new(tx));
        drop(rx);
        hub.publish(&job, Stage::Downloading, "x", Some(1), None);
        assert!(!hub.has_sink(&job));
    }

    #[tokio::test]
    async fn full_bounded_sink_still_gets_the_terminal_event() {
        let hub = ProgressHub::default();
        let job = JobId::from("j");
        let (tx, mut rx) = mpsc::channel::<ProgressEvent>(1);
        hub.attach(&job, Box::new(tx));
        hub.publish(&job, Stage::Downloading, "a", Some(1), None);
        hub.publish(&job, Stage::Complete, "Done", Some(100), None);
        hub.finish(&job);
        assert!(!hub.has_sink(&job));

        let mut stages = Vec::new();
        while let Some(ev) = rx.recv().await {
            stages.push(ev.stage);
        }
        assert_eq!(stages, vec![Stage::Connected, Stage::Complete]);
    }

    #[test]
    fn finish_forgets_resumable_record() {
        let hub = ProgressHub::default();
        let job = JobId::from("j");
        hub.mark_resumable(&job);
        hub.publish(&job, Stage::Downloading, "Downloading 5%", Some(5), None);
        assert_eq!(hub.resume_record(&job).unwrap().progress, 5);
        hub.finish(&job);
        assert!(hub.resume_record(&job).is_none());
        let (sink, mut rx) = channel();
        hub.attach(&job, sink);
        assert_eq!(drain(&mut rx)[0].stage, Stage::Connected);
    }

    #[test]
    fn extra_fields_are_flattened() {
        let hub = ProgressHub::default();
        let job = JobId::from("j");
        let (sink, mut rx) = channel();
        hub.attach(&job, sink);
        let mut extra = serde_json::Map::new();
        extra.insert("videoIndex".into(), serde_json::json!(2));
        hub.publish(&job, Stage::Downloading, "video 2", Some(10), Some(extra));
        let evs = drain(&mut rx);
        assert_eq!(evs[1].extra["videoIndex"], 2);
    }
}
