use tokio::sync::mpsc;

use super::event::ProgressEvent;

/// The sink's transport is gone; the hub drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

impl std::fmt::Display for SinkClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "progress sink closed")
    }
}

impl std::error::Error for SinkClosed {}

/// Ordered, non-blocking consumer of a job's progress events.
pub trait ProgressSink: Send {
    fn deliver(&self, event: &ProgressEvent) -> Result<(), SinkClosed>;
}

/// Channel sinks never block the publisher. A full buffer drops a
/// non-terminal event; a terminal one is handed to a task that waits for room,
/// since it is the consumer's only end-of-job signal.
impl ProgressSink for mpsc::Sender<ProgressEvent> {
    fn deliver(&self, event: &ProgressEvent) -> Result<(), SinkClosed> {
        match self.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) if event.stage.is_terminal() => {
                let Ok(rt) = tokio::runtime::Handle::try_current() else {
                    tracing::warn!(stage = %event.stage, "progress sink full outside a runtime, dropping terminal event");
                    return Ok(());
                };
                let tx = self.clone();
                rt.spawn(async move {
                    let _ = tx.send(event).await;
                });
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!(stage = %event.stage, "progress sink full, dropping event");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkClosed),
        }
    }
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn deliver(&self, event: &ProgressEvent) -> Result<(), SinkClosed> {
        self.send(event.clone()).map_err(|_| SinkClosed)
    }
}
