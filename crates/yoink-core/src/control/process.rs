//! Spawn an external tool under a job's handle and supervise it to exit.

use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::{JobCancelled, ProcessHandle};

/// Bytes of stderr kept for error reports.
const STDERR_TAIL_BYTES: usize = 500;

/// An external process exited unsuccessfully.
#[derive(Debug)]
pub struct ProcessFailed {
    pub program: String,
    pub code: Option<i32>,
    pub stderr_tail: String,
}

impl std::fmt::Display for ProcessFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} exited with code {}", self.program, code)?,
            None => write!(f, "{} was terminated by a signal", self.program)?,
        }
        if !self.stderr_tail.is_empty() {
            write!(f, ": {}", self.stderr_tail)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProcessFailed {}

/// Output of a successful run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stderr_tail: String,
}

/// Runs `cmd` as the job's current external process.
///
/// The pid is attached to `handle` so cancel and finish-early can signal it.
/// Cancellation kills the child and returns `JobCancelled`; a nonzero exit
/// returns `ProcessFailed` (or `JobCancelled` when the exit was caused by a
/// cancel that raced the wait).
pub async fn run_command(handle: &ProcessHandle, mut cmd: Command) -> anyhow::Result<CommandOutput> {
    handle.checkpoint()?;

    let program = cmd.as_std().get_program().to_string_lossy().to_string();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to spawn {}: {}", program, e))?;
    if let Some(pid) = child.id() {
        handle.attach_pid(pid);
    }
    tracing::debug!(job_id = %handle.job_id(), program = %program, pid = ?child.id(), "process started");

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut tail: Vec<u8> = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        tail.extend_from_slice(&buf[..n]);
                        if tail.len() > STDERR_TAIL_BYTES * 4 {
                            let cut = tail.len() - STDERR_TAIL_BYTES;
                            tail.drain(..cut);
                        }
                    }
                }
            }
            let start = tail.len().saturating_sub(STDERR_TAIL_BYTES);
            String::from_utf8_lossy(&tail[start..]).trim().to_string()
        })
    });

    let token = handle.token();
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = token.cancelled() => None,
    };

    let status = match waited {
        Some(status) => status,
        None => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            handle.detach_pid();
            tracing::info!(job_id = %handle.job_id(), program = %program, "process killed on cancel");
            return Err(JobCancelled.into());
        }
    };
    handle.detach_pid();

    let status = status.map_err(|e| anyhow::anyhow!("waiting for {}: {}", program, e))?;
    let stderr_tail = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if status.success() {
        return Ok(CommandOutput { stderr_tail });
    }
    if handle.is_cancelled() {
        return Err(JobCancelled.into());
    }
    Err(ProcessFailed {
        program,
        code: status.code(),
        stderr_tail,
    }
    .into())
}
