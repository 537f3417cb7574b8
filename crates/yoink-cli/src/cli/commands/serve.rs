//! `yoink serve` – run the engine until Ctrl-C.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use yoink_core::config::YoinkConfig;
use yoink_core::engine::Engine;
use yoink_core::janitor::{TempDirJanitor, TempDirs};
use yoink_core::upstream::{CurlTransport, ResilientClient};
use yoink_core::user_error::DefaultTranslator;

use crate::cli::control_socket::{self, ControlServer};

pub async fn run_serve(cfg: &YoinkConfig, socket_path: &Path) -> Result<()> {
    let dirs = TempDirs::new(cfg.files.temp_root());
    dirs.prepare()
        .with_context(|| format!("preparing temp dirs under {}", dirs.root().display()))?;
    let janitor = Arc::new(TempDirJanitor::new(dirs.clone()));
    let engine = Engine::new(cfg, janitor.clone(), Arc::new(DefaultTranslator));

    let transport = CurlTransport::new(cfg.upstream.curl_options());
    let upstream = Arc::new(
        ResilientClient::new(transport, cfg.upstream.endpoints.clone(), cfg.upstream.retry_policy())
            .with_video_quality(cfg.upstream.video_quality.clone()),
    );

    let server = Arc::new(ControlServer::new(engine.clone(), upstream, dirs.downloads()));
    let listener = control_socket::spawn_control_listener(server, socket_path)?;
    let monitor = engine.spawn_heartbeat_monitor(cfg.sessions.sweep_interval());

    let retention = cfg.files.retention();
    let sweep_every = cfg.files.sweep_interval();
    let sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            let j = Arc::clone(&janitor);
            match tokio::task::spawn_blocking(move || j.sweep_expired(retention)).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(removed = n, "retention sweep"),
                Err(e) => tracing::warn!("retention sweep failed: {}", e),
            }
        }
    });

    tracing::info!(
        socket = %socket_path.display(),
        endpoints = cfg.upstream.endpoints.len(),
        "yoink engine ready"
    );
    println!("yoink serving on {}", socket_path.display());

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("shutting down");
    listener.abort();
    monitor.abort();
    sweeper.abort();
    let _ = std::fs::remove_file(socket_path);
    Ok(())
}
