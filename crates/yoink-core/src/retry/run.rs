//! Failover loop: every endpoint per round, exponential backoff between rounds.

use std::future::Future;
use std::time::Duration;

use super::error::FetchError;
use super::policy::RetryPolicy;
use crate::control::CancelToken;

/// Counters from one `run_rounds` call, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundStats {
    pub attempts: u32,
    pub backoffs: u32,
    pub backoff_total: Duration,
}

/// Runs `attempt` against each endpoint, round after round, until one succeeds.
///
/// A `Cancelled` result (or a cancelled token before an attempt or during a
/// backoff) aborts immediately. Any other failure moves on to the next
/// endpoint. When everything is exhausted the last error is returned.
pub async fn run_rounds<T, F, Fut>(
    policy: &RetryPolicy,
    endpoints: &[String],
    cancel: &CancelToken,
    mut attempt: F,
) -> (Result<T, FetchError>, RoundStats)
where
    F: FnMut(String, u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut stats = RoundStats::default();
    if endpoints.is_empty() {
        return (Err(FetchError::NoEndpoints), stats);
    }
    let mut last_error: Option<FetchError> = None;

    for round in 0..policy.max_retries {
        for endpoint in endpoints {
            if cancel.is_cancelled() {
                return (Err(FetchError::Cancelled), stats);
            }
            stats.attempts += 1;
            tracing::debug!(
                endpoint = %endpoint,
                attempt = stats.attempts,
                round = round + 1,
                max_rounds = policy.max_retries,
                "trying upstream endpoint"
            );
            match attempt(endpoint.clone(), stats.attempts).await {
                Ok(value) => return (Ok(value), stats),
                Err(FetchError::Cancelled) => return (Err(FetchError::Cancelled), stats),
                Err(e) => {
                    tracing::info!(endpoint = %endpoint, "upstream attempt failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if let Some(delay) = policy.backoff_after(round) {
            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                "all endpoints failed, backing off before next round"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return (Err(FetchError::Cancelled), stats),
            }
            stats.backoffs += 1;
            stats.backoff_total += delay;
        }
    }

    let err = last_error.unwrap_or(FetchError::NoEndpoints);
    (Err(err), stats)
}
