//! Retry and failover policy for unreliable upstream endpoints.
//!
//! Endpoints are tried in order within a round; only when every endpoint in a
//! round has failed does the caller back off (exponentially) before the next
//! round. Cancellation short-circuits everything.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify_http_failure, endpoint_error_code};
pub use error::FetchError;
pub use policy::RetryPolicy;
pub use run::{run_rounds, RoundStats};
