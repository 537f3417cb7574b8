//! `yoink fetch <url>` – submit a download job, optionally watching it.

use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use yoink_core::job::{ClientId, JobId};

use super::print_event;
use crate::cli::control_socket;
use crate::cli::protocol::{self, Request};

/// Well under the engine's default 30 s heartbeat timeout.
const HEARTBEAT_EVERY: Duration = Duration::from_secs(10);

pub async fn run_fetch(socket_path: &Path, client: &str, url: &str, audio: bool, watch: bool) -> Result<()> {
    let client = ClientId::new(client);
    let hello = control_socket::send_request(socket_path, &Request::Hello(client.clone())).await?;
    protocol::check_reply(&hello).map_err(anyhow::Error::msg)?;

    let reply = control_socket::send_request(
        socket_path,
        &Request::Fetch {
            client: client.clone(),
            url: url.to_string(),
            audio,
            // Nobody heartbeats for an unwatched job, so it must not be owned.
            detached: !watch,
        },
    )
    .await?;
    let payload = protocol::check_reply(&reply).map_err(anyhow::Error::msg)?;
    let job = match payload.strip_prefix("job ") {
        Some(id) => JobId::new(id),
        None => anyhow::bail!("unexpected reply: {}", payload),
    };
    println!("Submitted job {}", job);
    if !watch {
        return Ok(());
    }

    let heartbeat_path = socket_path.to_path_buf();
    let heartbeats = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_EVERY);
        loop {
            ticker.tick().await;
            match control_socket::send_request(&heartbeat_path, &Request::Heartbeat(client.clone())).await {
                Ok(r) if r == protocol::OK => {}
                Ok(r) => tracing::warn!("heartbeat refused: {}", r),
                Err(e) => tracing::warn!("heartbeat failed: {:#}", e),
            }
        }
    });
    let last = control_socket::watch_progress(socket_path, &job, print_event).await;
    heartbeats.abort();
    if last?.is_none() {
        println!("Job {} already finished; see the engine log for its outcome", job);
    }
    Ok(())
}
