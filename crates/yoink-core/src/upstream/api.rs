//! Wire shapes of the upstream resolve API.

use serde::{Deserialize, Serialize};

use crate::retry::FetchError;

/// Body POSTed to an endpoint to resolve a media URL into a transfer URL.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolveBody {
    pub url: String,
    pub download_mode: String,
    pub filename_style: String,
    pub video_quality: String,
}

impl ResolveBody {
    pub fn new(url: &str, audio: bool, video_quality: &str) -> Self {
        Self {
            url: url.to_string(),
            download_mode: if audio { "audio" } else { "auto" }.to_string(),
            filename_style: "basic".to_string(),
            video_quality: video_quality.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PickerItem {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReplyError {
    #[serde(default)]
    pub code: Option<String>,
}

/// Successful (2xx) resolve response.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResolveReply {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub picker: Vec<PickerItem>,
    #[serde(default)]
    pub error: Option<ReplyError>,
}

/// A transfer URL chosen from a resolve reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub url: String,
    pub filename: String,
    pub status: String,
}

impl ResolveReply {
    pub fn parse(body: &[u8]) -> Result<Self, FetchError> {
        serde_json::from_slice(body).map_err(|e| FetchError::InvalidResponse(e.to_string()))
    }

    /// Pick the transfer URL: `url` for tunnel/redirect, the first picker
    /// entry for picker replies. Error replies surface their code.
    pub fn into_resolved(self) -> Result<Resolved, FetchError> {
        if self.status == "error" {
            let code = self
                .error
                .and_then(|e| e.code)
                .unwrap_or_else(|| "unknown".to_string());
            return Err(FetchError::Endpoint(code));
        }
        let url = match self.status.as_str() {
            "picker" => self.picker.into_iter().next().and_then(|p| p.url),
            _ => self.url,
        };
        let url = url.filter(|u| !u.is_empty()).ok_or(FetchError::NoTransferUrl)?;
        Ok(Resolved {
            url,
            filename: self.filename.unwrap_or_else(|| "download".to_string()),
            status: self.status,
        })
    }
}
