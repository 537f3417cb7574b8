use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::job::JobId;

/// Resolves with the job's result once it has run (or been withdrawn).
#[must_use = "a ticket does nothing unless awaited"]
pub struct JobTicket<T> {
    job_id: JobId,
    rx: oneshot::Receiver<anyhow::Result<T>>,
}

impl<T> JobTicket<T> {
    pub(super) fn new(job_id: JobId, rx: oneshot::Receiver<anyhow::Result<T>>) -> Self {
        Self { job_id, rx }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

impl<T> Future for JobTicket<T> {
    type Output = anyhow::Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.rx).poll(cx);
        match polled {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(anyhow::anyhow!(
                "job {} was dropped before completing",
                self.job_id
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
