use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::job::JobLimits;
use crate::retry::RetryPolicy;
use crate::session::SessionTimeouts;
use crate::upstream::CurlOptions;

/// Session lifecycle timing (`[sessions]` in config.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// A session owning jobs expires after this many seconds without a heartbeat.
    pub heartbeat_timeout_secs: u64,
    /// A session without jobs is evicted after this many idle seconds.
    pub idle_timeout_secs: u64,
    /// How often the sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 30,
            idle_timeout_secs: 60,
            sweep_interval_secs: 10,
        }
    }
}

impl SessionConfig {
    pub fn timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Upstream resolver pool (`[upstream]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Interchangeable resolve endpoints, tried in order.
    pub endpoints: Vec<String>,
    /// Sent as `Authorization: Api-Key <key>`. `YOINK_API_KEY` overrides it.
    pub api_key: Option<String>,
    /// Failover rounds over the whole pool.
    pub max_retries: u32,
    /// Base delay between rounds, in milliseconds; doubles every round.
    pub retry_delay_ms: u64,
    pub video_quality: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "https://nuko-c.meowing.de".to_string(),
                "https://subito-c.meowing.de".to_string(),
                "https://cessi-c.meowing.de".to_string(),
            ],
            api_key: None,
            max_retries: 3,
            retry_delay_ms: 2000,
            video_quality: "1080".to_string(),
        }
    }
}

impl UpstreamConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    /// Config value, unless the environment provides one.
    pub fn effective_api_key(&self) -> Option<String> {
        std::env::var("YOINK_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone())
    }

    pub fn curl_options(&self) -> CurlOptions {
        CurlOptions {
            api_key: self.effective_api_key(),
            ..CurlOptions::default()
        }
    }
}

/// Temp file handling (`[files]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Root of the temp tree; defaults to `<system temp>/yoink`.
    pub temp_root: Option<PathBuf>,
    /// Entries older than this many minutes are swept.
    pub retention_mins: u64,
    /// Minutes between retention sweeps.
    pub sweep_interval_mins: u64,
    /// Delay before a finished job's files are reclaimed, in milliseconds.
    pub cleanup_grace_ms: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            temp_root: None,
            retention_mins: 20,
            sweep_interval_mins: 5,
            cleanup_grace_ms: 1000,
        }
    }
}

impl FilesConfig {
    pub fn temp_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(crate::janitor::TempDirs::default_root)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_mins * 60)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_mins.max(1) * 60)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }
}

/// Global configuration loaded from `~/.config/yoink/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoinkConfig {
    /// Maximum number of waiting jobs before submissions are refused.
    pub max_queue_size: usize,
    /// Per-client cap on owned jobs, enforced before submit.
    pub max_jobs_per_client: usize,
    /// Capacity of the resumable-job table.
    pub resume_capacity: usize,
    pub limits: JobLimits,
    pub sessions: SessionConfig,
    pub upstream: UpstreamConfig,
    pub files: FilesConfig,
}

impl Default for YoinkConfig {
    fn default() -> Self {
        Self {
            max_queue_size: crate::scheduler::DEFAULT_MAX_QUEUE_SIZE,
            max_jobs_per_client: 5,
            resume_capacity: crate::progress::DEFAULT_RESUME_CAPACITY,
            limits: JobLimits::default(),
            sessions: SessionConfig::default(),
            upstream: UpstreamConfig::default(),
            files: FilesConfig::default(),
        }
    }
}

impl YoinkConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.endpoints.is_empty() {
            anyhow::bail!("upstream.endpoints must list at least one endpoint");
        }
        for ep in &self.upstream.endpoints {
            let parsed = url::Url::parse(ep).with_context(|| format!("invalid upstream endpoint {:?}", ep))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("upstream endpoint {:?} must be http or https", ep);
            }
        }
        if self.upstream.max_retries == 0 {
            anyhow::bail!("upstream.max_retries must be at least 1");
        }
        for t in crate::job::JobType::ALL {
            if self.limits.limit(t) == 0 {
                anyhow::bail!("limits.{} must be at least 1", t);
            }
        }
        if self.sessions.heartbeat_timeout_secs == 0 || self.sessions.idle_timeout_secs == 0 {
            anyhow::bail!("session timeouts must be positive");
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("yoink")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<YoinkConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = YoinkConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: YoinkConfig =
        toml::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
