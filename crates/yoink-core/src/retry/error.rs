//! Error type for one upstream attempt, kept concrete so the failover loop
//! can tell cancellation apart from endpoint failures.

/// Failure of a resolve or transfer attempt against an upstream endpoint.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The job was cancelled. Never retried.
    #[error("Cancelled")]
    Cancelled,
    /// The endpoint answered with a logical error code (e.g. `error.api.rate_limited`).
    #[error("{0}")]
    Endpoint(String),
    /// The resolve request returned a non-2xx status without an error code.
    #[error("HTTP {0}")]
    Http(u32),
    /// The artifact transfer returned a non-2xx, non-206 status.
    #[error("File download failed: HTTP {0}")]
    TransferHttp(u32),
    /// The endpoint answered without any transfer URL.
    #[error("No download URL from upstream")]
    NoTransferUrl,
    /// The endpoint answered with something that is not the expected JSON.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
    /// Network-level failure reported by libcurl.
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// Writing or renaming the partial artifact failed.
    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),
    /// The blocking transfer worker panicked or was shut down.
    #[error("transfer worker failed: {0}")]
    Worker(String),
    /// The pool was empty, so nothing was attempted.
    #[error("no upstream endpoints configured")]
    NoEndpoints,
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}
