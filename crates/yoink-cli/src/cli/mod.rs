//! CLI for the yoink job engine.

mod commands;
mod control_socket;
mod protocol;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use yoink_core::config;

use commands::{run_cancel, run_fetch, run_finish_early, run_serve, run_status, run_watch};

/// Top-level CLI for the yoink engine.
#[derive(Debug, Parser)]
#[command(name = "yoink")]
#[command(about = "yoink: media job engine with resilient upstream fetch", long_about = None)]
pub struct Cli {
    /// Control socket path (default: $XDG_STATE_HOME/yoink/control.sock).
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the engine and listen on the control socket.
    Serve,

    /// Submit a download job to a running engine.
    Fetch {
        /// Media page URL to resolve and download.
        url: String,
        /// Fetch audio only.
        #[arg(long)]
        audio: bool,
        /// Client id owning the job.
        #[arg(long, default_value = "cli")]
        client: String,
        /// Stream progress (and keep heartbeating) until the job ends.
        #[arg(long)]
        watch: bool,
    },

    /// Show queue occupancy and limits.
    Status,

    /// Cancel a waiting or running job.
    Cancel {
        /// Job identifier.
        id: String,
    },

    /// Stop a playlist after the current item and keep what finished.
    FinishEarly {
        /// Job identifier.
        id: String,
    },

    /// Stream a job's progress events.
    Watch {
        /// Job identifier.
        id: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let socket_path = match cli.socket {
            Some(p) => p,
            None => yoink_core::control::default_control_socket_path()
                .context("resolving control socket path")?,
        };

        match cli.command {
            CliCommand::Serve => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                run_serve(&cfg, &socket_path).await?
            }
            CliCommand::Fetch {
                url,
                audio,
                client,
                watch,
            } => run_fetch(&socket_path, &client, &url, audio, watch).await?,
            CliCommand::Status => run_status(&socket_path).await?,
            CliCommand::Cancel { id } => run_cancel(&socket_path, &id).await?,
            CliCommand::FinishEarly { id } => run_finish_early(&socket_path, &id).await?,
            CliCommand::Watch { id } => run_watch(&socket_path, &id).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
