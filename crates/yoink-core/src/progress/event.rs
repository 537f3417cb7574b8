use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle stage carried by every progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Connected,
    Resuming,
    Queued,
    Starting,
    Downloading,
    Processing,
    PlaylistInfo,
    FinishingEarly,
    Zipping,
    Complete,
    Error,
    Cancelled,
}

impl Stage {
    /// No further events follow a terminal stage.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Error | Stage::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Connected => "connected",
            Stage::Resuming => "resuming",
            Stage::Queued => "queued",
            Stage::Starting => "starting",
            Stage::Downloading => "downloading",
            Stage::Processing => "processing",
            Stage::PlaylistInfo => "playlist-info",
            Stage::FinishingEarly => "finishing-early",
            Stage::Zipping => "zipping",
            Stage::Complete => "complete",
            Stage::Error => "error",
            Stage::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record pushed to a progress sink.
///
/// Serialises as `{"stage":..,"message":..,"progress":..}` with any extra
/// fields flattened alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            progress: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}
