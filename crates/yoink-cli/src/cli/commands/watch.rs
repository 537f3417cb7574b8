//! `yoink watch <id>` – stream a job's progress until it ends.

use anyhow::Result;
use std::path::Path;
use yoink_core::job::JobId;

use super::print_event;
use crate::cli::control_socket;

pub async fn run_watch(socket_path: &Path, id: &str) -> Result<()> {
    let job = JobId::new(id);
    match control_socket::watch_progress(socket_path, &job, print_event).await? {
        Some(last) if last.stage.is_terminal() => Ok(()),
        Some(_) => anyhow::bail!("progress stream for {id} closed before the job ended"),
        None => {
            println!("Job {id} is not running (already finished or unknown)");
            Ok(())
        }
    }
}
