//! `yoink finish-early <id>` – stop a playlist after the current item.

use anyhow::Result;
use std::path::Path;
use yoink_core::job::JobId;

use crate::cli::control_socket;
use crate::cli::protocol::{self, Request};

pub async fn run_finish_early(socket_path: &Path, id: &str) -> Result<()> {
    let reply = control_socket::send_request(socket_path, &Request::FinishEarly(JobId::new(id))).await?;
    match reply.as_str() {
        protocol::OK => println!("Job {id} will finish after the current item"),
        protocol::REFUSED => anyhow::bail!("job {id} is not a running playlist"),
        other => anyhow::bail!("unexpected reply: {other}"),
    }
    Ok(())
}
