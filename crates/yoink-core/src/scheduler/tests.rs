use super::*;
use std::time::Duration;
use tokio::sync::mpsc;

/// Test harness: each job reports its name when it starts and then waits
/// for its own release gate.
struct Harness {
    queue: JobQueue,
    sessions: Arc<SessionRegistry>,
    started_tx: mpsc::UnboundedSender<String>,
    started_rx: mpsc::UnboundedReceiver<String>,
}

impl Harness {
    fn new(limits: JobLimits, max_queue: usize) -> Self {
        let sessions = Arc::new(SessionRegistry::default());
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Self {
            queue: JobQueue::new(limits, max_queue, Arc::clone(&sessions)),
            sessions,
            started_tx,
            started_rx,
        }
    }

    /// Submit a job that runs until the returned sender fires (Ok) or is dropped (Err).
    fn gated(
        &self,
        name: &str,
        job_type: JobType,
        client: Option<&str>,
    ) -> Result<(JobTicket<String>, oneshot::Sender<()>), QueueFull> {
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let started = self.started_tx.clone();
        let owned = name.to_string();
        let request = JobRequest::new(name.into(), job_type, client.map(ClientId::from));
        let ticket = self.queue.submit(request, move || async move {
            let _ = started.send(owned.clone());
            gate_rx.await.map_err(|_| anyhow::anyhow!("gate dropped"))?;
            Ok(owned)
        })?;
        Ok((ticket, gate_tx))
    }

    async fn next_started(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.started_rx.recv())
            .await
            .expect("a job should start")
            .expect("channel open")
    }

    fn nothing_started(&mut self) -> bool {
        self.started_rx.try_recv().is_err()
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn compress_jobs_run_back_to_back() {
    let mut h = Harness::new(JobLimits::default(), DEFAULT_MAX_QUEUE_SIZE);
    let (t1, g1) = h.gated("compress-1", JobType::Compress, None).unwrap();
    let (t2, g2) = h.gated("compress-2", JobType::Compress, None).unwrap();

    assert_eq!(h.next_started().await, "compress-1");
    settle().await;
    assert!(h.nothing_started());
    assert_eq!(h.queue.active(JobType::Compress), 1);
    assert_eq!(h.queue.status().queued, 1);

    g1.send(()).unwrap();
    assert_eq!(t1.await.unwrap(), "compress-1");
    assert_eq!(h.next_started().await, "compress-2");
    assert_eq!(h.queue.active(JobType::Compress), 1);

    g2.send(()).unwrap();
    assert_eq!(t2.await.unwrap(), "compress-2");
    settle().await;
    assert_eq!(h.queue.active(JobType::Compress), 0);
}

#[tokio::test]
async fn heavy_job_waits_while_two_jobs_run() {
    let mut h = Harness::new(JobLimits::default(), DEFAULT_MAX_QUEUE_SIZE);
    let (_d1, g1) = h.gated("d1", JobType::Download, None).unwrap();
    let (_d2, _g2) = h.gated("d2", JobType::Download, None).unwrap();
    h.next_started().await;
    h.next_started().await;

    let (_c, _gc) = h.gated("convert", JobType::Convert, None).unwrap();
    settle().await;
    assert!(h.nothing_started());
    assert!(h.queue.is_queued(&"convert".into()));

    g1.send(()).unwrap();
    assert_eq!(h.next_started().await, "convert");
}

#[tokio::test]
async fn light_jobs_overtake_waiting_heavy_jobs() {
    let limits = JobLimits {
        download: 1,
        ..JobLimits::default()
    };
    let mut h = Harness::new(limits, DEFAULT_MAX_QUEUE_SIZE);
    let (_a, ga) = h.gated("download-a", JobType::Download, None).unwrap();
    let (_c1, _gc1) = h.gated("convert-1", JobType::Convert, None).unwrap();
    assert_eq!(h.next_started().await, "download-a");
    assert_eq!(h.next_started().await, "convert-1");

    let (_c2, _gc2) = h.gated("convert-2", JobType::Convert, None).unwrap();
    let (_b, _gb) = h.gated("download-b", JobType::Download, None).unwrap();
    settle().await;
    assert!(h.nothing_started());

    ga.send(()).unwrap();
    assert_eq!(h.next_started().await, "download-b");
    settle().await;
    assert!(h.nothing_started(), "convert-2 stays queued behind two active jobs");
}

#[tokio::test]
async fn full_queue_rejects_without_side_effects() {
    let limits = JobLimits {
        download: 1,
        ..JobLimits::default()
    };
    let mut h = Harness::new(limits, 2);
    h.sessions.register_or_touch(&"client".into());

    let (_r, _gr) = h.gated("running", JobType::Download, Some("client")).unwrap();
    h.next_started().await;
    let (_q1, _g1) = h.gated("queued-1", JobType::Download, Some("client")).unwrap();
    let (_q2, _g2) = h.gated("queued-2", JobType::Download, Some("client")).unwrap();
    assert_eq!(h.sessions.job_count_for(&"client".into()), 3);

    let err = h.gated("rejected", JobType::Download, Some("client")).err().unwrap();
    assert_eq!(err.to_string(), "Server is too busy. Please try again later.");
    assert_eq!(h.queue.status().queued, 2);
    assert_eq!(h.sessions.job_count_for(&"client".into()), 3);
    assert_eq!(h.sessions.owner_of(&"rejected".into()), None);
}

#[tokio::test]
async fn completion_unlinks_from_session() {
    let mut h = Harness::new(JobLimits::default(), DEFAULT_MAX_QUEUE_SIZE);
    h.sessions.register_or_touch(&"c".into());
    let (t, g) = h.gated("job", JobType::Download, Some("c")).unwrap();
    h.next_started().await;
    assert_eq!(h.sessions.job_count_for(&"c".into()), 1);
    drop(g);
    let err = t.await.unwrap_err();
    assert_eq!(err.to_string(), "gate dropped");
    assert_eq!(h.sessions.job_count_for(&"c".into()), 0);
    assert_eq!(h.queue.active(JobType::Download), 0);
}

#[tokio::test]
async fn panicking_work_releases_its_slot() {
    let limits = JobLimits {
        transcribe: 1,
        ..JobLimits::default()
    };
    let mut h = Harness::new(limits, DEFAULT_MAX_QUEUE_SIZE);
    let boom = h
        .queue
        .submit(
            JobRequest::new("boom".into(), JobType::Transcribe, None),
            || async {
                if true {
                    panic!("model crashed");
                }
                Ok(())
            },
        )
        .unwrap();
    let (next, g) = h.gated("after", JobType::Transcribe, None).unwrap();

    let err = boom.await.unwrap_err();
    let panicked = err.downcast_ref::<JobPanicked>().expect("JobPanicked");
    assert_eq!(panicked.message, "model crashed");
    assert_eq!(h.next_started().await, "after");
    g.send(()).unwrap();
    assert_eq!(next.await.unwrap(), "after");
}

#[tokio::test]
async fn withdrawn_job_never_starts() {
    let limits = JobLimits {
        download: 1,
        ..JobLimits::default()
    };
    let mut h = Harness::new(limits, DEFAULT_MAX_QUEUE_SIZE);
    h.sessions.register_or_touch(&"c".into());
    let (_r, gr) = h.gated("running", JobType::Download, None).unwrap();
    h.next_started().await;
    let (waiting, _gw) = h.gated("waiting", JobType::Download, Some("c")).unwrap();

    assert!(h.queue.withdraw(&"waiting".into()));
    assert!(!h.queue.withdraw(&"waiting".into()));
    let err = waiting.await.unwrap_err();
    assert!(crate::control::is_cancellation(&err));
    assert_eq!(h.sessions.job_count_for(&"c".into()), 0);

    gr.send(()).unwrap();
    settle().await;
    assert!(h.nothing_started());
    assert_eq!(h.queue.status().queued, 0);
}

#[tokio::test]
async fn status_serializes_per_type_counts() {
    let mut h = Harness::new(JobLimits::default(), DEFAULT_MAX_QUEUE_SIZE);
    let (_t, _g) = h.gated("d", JobType::Download, None).unwrap();
    h.next_started().await;
    let v = serde_json::to_value(h.queue.status()).unwrap();
    assert_eq!(v["active"]["download"], 1);
    assert_eq!(v["active"]["compress"], 0);
    assert_eq!(v["queued"], 0);
    assert_eq!(v["limits"]["download"], 6);
}
