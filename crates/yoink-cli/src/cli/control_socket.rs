//! Control socket: server (during `yoink serve`) and client helpers for the
//! other subcommands. See `protocol` for the line format.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use yoink_core::download::run_download;
use yoink_core::engine::Engine;
use yoink_core::job::{ClientId, JobId, JobType};
use yoink_core::progress::ProgressEvent;
use yoink_core::scheduler::JobRequest;
use yoink_core::upstream::{FetchRequest, ResilientClient, Transport};

use super::protocol::{self, Request};

/// Events buffered per progress stream before new ones are dropped.
const PROGRESS_BUFFER: usize = 64;

/// Shared state behind every control connection.
pub struct ControlServer<T> {
    engine: Engine,
    upstream: Arc<ResilientClient<T>>,
    downloads: PathBuf,
}

impl<T: Transport> ControlServer<T> {
    pub fn new(engine: Engine, upstream: Arc<ResilientClient<T>>, downloads: PathBuf) -> Self {
        Self {
            engine,
            upstream,
            downloads,
        }
    }

    /// Answer one non-streaming request.
    fn reply(&self, request: Request) -> String {
        match request {
            Request::Hello(client) => {
                self.engine.register_client(&client);
                protocol::OK.to_string()
            }
            Request::Heartbeat(client) => {
                if self.engine.heartbeat(&client) {
                    protocol::OK.to_string()
                } else {
                    protocol::UNKNOWN_CLIENT.to_string()
                }
            }
            Request::Fetch {
                client,
                url,
                audio,
                detached,
            } => self.submit_fetch(client, FetchRequest::new(url, audio), detached),
            Request::Cancel(job) => {
                if self.engine.cancel_job(&job) {
                    protocol::OK.to_string()
                } else {
                    protocol::NOT_FOUND.to_string()
                }
            }
            Request::FinishEarly(job) => {
                if self.engine.finish_early(&job) {
                    protocol::OK.to_string()
                } else {
                    protocol::REFUSED.to_string()
                }
            }
            Request::Status => match serde_json::to_string(&self.engine.status()) {
                Ok(json) => json,
                Err(e) => protocol::error_reply(&e.to_string()),
            },
            Request::Progress(_) => protocol::error_reply("progress is a streaming request"),
        }
    }

    /// Submit a download. A detached job has no owner: it is neither counted
    /// against the client's cap nor cancelled when the client stops heartbeating.
    fn submit_fetch(&self, client: ClientId, fetch: FetchRequest, detached: bool) -> String {
        self.engine.register_client(&client);
        if !detached && self.engine.client_at_capacity(&client) {
            let msg = format!("Too many active jobs (limit: {})", self.engine.max_jobs_per_client());
            tracing::info!(client = %client.short(), "{}", msg);
            return protocol::error_reply(&msg);
        }
        let job_id = JobId::generate();
        let owner = if detached { None } else { Some(client) };
        let request = JobRequest::new(job_id.clone(), JobType::Download, owner);
        let upstream = Arc::clone(&self.upstream);
        let dest = self.downloads.clone();
        match self
            .engine
            .submit(request, move |ctx| run_download(ctx, upstream, fetch, dest))
        {
            Ok(ticket) => {
                let id = job_id.clone();
                tokio::spawn(async move {
                    match ticket.await {
                        Ok(artifact) => tracing::info!(job_id = %id.short(), path = %artifact.path.display(), "download ready"),
                        Err(e) => tracing::debug!(job_id = %id.short(), "download ended: {:#}", e),
                    }
                });
                protocol::job_reply(&job_id)
            }
            Err(full) => protocol::error_reply(&full.to_string()),
        }
    }

    /// Stream a job's events to `writer` until a terminal stage or disconnect.
    async fn stream_progress(&self, job: &JobId, writer: &mut OwnedWriteHalf) -> Result<()> {
        if self.engine.processes().get(job).is_none() {
            let reply = format!("{}\n", protocol::error_reply(&format!("{} {}", protocol::NO_LIVE_JOB, job)));
            writer.write_all(reply.as_bytes()).await?;
            return Ok(());
        }
        let (tx, mut rx) = mpsc::channel::<ProgressEvent>(PROGRESS_BUFFER);
        let sink_id = self.engine.attach_progress(job, Box::new(tx));
        // The job may have concluded between the lookup and the attach.
        if self.engine.processes().get(job).is_none() {
            self.engine.detach_progress(job, sink_id);
            self.engine.progress().finish(job);
        }
        let result = async {
            while let Some(event) = rx.recv().await {
                let mut line = serde_json::to_string(&event)?;
                line.push('\n');
                writer.write_all(line.as_bytes()).await?;
                if event.stage.is_terminal() {
                    break;
                }
            }
            anyhow::Ok(())
        }
        .await;
        self.engine.detach_progress(job, sink_id);
        result
    }
}

/// Binds `path` and spawns the accept loop.
pub fn spawn_control_listener<T: Transport>(
    server: Arc<ControlServer<T>>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let _ = std::fs::remove_file(&path);
    let listener =
        UnixListener::bind(&path).with_context(|| format!("binding control socket {}", path.display()))?;
    tracing::debug!(path = %path.display(), "control socket listening");
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let server = Arc::clone(&server);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(&server, stream).await {
                            tracing::debug!("control connection: {:#}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve_connection<T: Transport>(server: &ControlServer<T>, stream: UnixStream) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request = match Request::parse(line) {
            Ok(r) => r,
            Err(msg) => {
                write.write_all(format!("{}\n", protocol::error_reply(&msg)).as_bytes()).await?;
                continue;
            }
        };
        if let Request::Progress(job) = &request {
            return server.stream_progress(job, &mut write).await;
        }
        let mut reply = server.reply(request);
        reply.push('\n');
        write.write_all(reply.as_bytes()).await?;
    }
    Ok(())
}

/// Sends one request and returns the single reply line.
pub async fn send_request(socket_path: &Path, request: &Request) -> Result<String> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connecting to {} (is `yoink serve` running?)", socket_path.display()))?;
    let (read, mut write) = stream.into_split();
    write.write_all(request.to_line().as_bytes()).await?;
    let mut lines = BufReader::new(read).lines();
    let reply = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow::anyhow!("control socket closed without a reply"))?;
    Ok(reply)
}

/// Subscribes to a job's progress, calling `on_event` per event. Returns the last
/// event, or `None` when the job is no longer live (already finished or unknown).
pub async fn watch_progress(
    socket_path: &Path,
    job: &JobId,
    mut on_event: impl FnMut(&ProgressEvent),
) -> Result<Option<ProgressEvent>> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connecting to {}", socket_path.display()))?;
    let (read, mut write) = stream.into_split();
    write
        .write_all(Request::Progress(job.clone()).to_line().as_bytes())
        .await?;
    let mut lines = BufReader::new(read).lines();
    let mut last = None;
    while let Some(line) = lines.next_line().await? {
        if let Err(msg) = protocol::check_reply(&line) {
            if msg.starts_with(protocol::NO_LIVE_JOB) {
                return Ok(None);
            }
            anyhow::bail!(msg);
        }
        let event: ProgressEvent = serde_json::from_str(&line).context("decoding progress event")?;
        on_event(&event);
        let terminal = event.stage.is_terminal();
        last = Some(event);
        if terminal {
            break;
        }
    }
    Ok(last)
}
