//! `yoink cancel <id>` – cancel a waiting or running job.

use anyhow::Result;
use std::path::Path;
use yoink_core::job::JobId;

use crate::cli::control_socket;
use crate::cli::protocol::{self, Request};

pub async fn run_cancel(socket_path: &Path, id: &str) -> Result<()> {
    let reply = control_socket::send_request(socket_path, &Request::Cancel(JobId::new(id))).await?;
    match reply.as_str() {
        protocol::OK => println!("Cancelled job {id}"),
        protocol::NOT_FOUND => anyhow::bail!("no live job {id}"),
        other => anyhow::bail!("unexpected reply: {other}"),
    }
    Ok(())
}
