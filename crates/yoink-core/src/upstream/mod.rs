//! Upstream media-resolution endpoints.
//!
//! An endpoint turns a media URL into a transfer URL (`tunnel`, `redirect`
//! or `picker` replies). The artifact is then streamed with a ranged GET
//! into a `.part` file so later attempts can resume it.

mod api;
mod client;
mod curl_transport;
mod transport;

pub use api::{PickerItem, ReplyError, ResolveBody, ResolveReply, Resolved};
pub use client::{artifact_path, FetchRequest, FetchedArtifact, ResilientClient};
pub use curl_transport::{CurlOptions, CurlTransport};
pub use transport::{ResponseSink, TransferReply, Transport};
