//! `yoink status` – show queue occupancy and limits.

use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::control_socket;
use crate::cli::protocol::{self, Request};

pub async fn run_status(socket_path: &Path) -> Result<()> {
    let reply = control_socket::send_request(socket_path, &Request::Status).await?;
    let body = protocol::check_reply(&reply).map_err(anyhow::Error::msg)?;
    let status: serde_json::Value = serde_json::from_str(body).context("decoding status reply")?;

    println!(
        "sessions: {}  live jobs: {}  queued: {}",
        status["sessions"], status["liveJobs"], status["queue"]["queued"]
    );
    println!("{:<12} {:>6} {:>6}", "TYPE", "ACTIVE", "LIMIT");
    if let Some(limits) = status["queue"]["limits"].as_object() {
        for (job_type, limit) in limits {
            let active = status["queue"]["active"][job_type.as_str()].as_u64().unwrap_or(0);
            println!("{:<12} {:>6} {:>6}", job_type, active, limit);
        }
    }
    Ok(())
}
