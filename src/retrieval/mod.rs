#![forbid(unsafe_code)]

//! Video retrieval behind a single capability interface.
//!
//! Two strategies exist: [`YtDlpRetriever`] runs the extractor locally and
//! hands back the media bytes, [`CobaltRetriever`] asks a hosted download
//! proxy for a URL the client follows itself. The process picks one at
//! startup through [`build_retriever`]; handlers only see `dyn Retriever`.

mod cobalt;
mod ytdlp;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::{BackendKind, RuntimeConfig};
use crate::quality::QualityTier;
use crate::validator::VideoReference;

pub use cobalt::CobaltRetriever;
pub use ytdlp::YtDlpRetriever;

pub const UNKNOWN_TEXT: &str = "Unknown";

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("unexpected response from download service: {0}")]
    UnexpectedResponse(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormatOption {
    pub format_id: String,
    pub resolution: String,
    pub quality_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
}

/// Preview metadata. Every field is always present; backends that cannot
/// learn a value fill in a placeholder and clear `metadata_complete`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoDescriptor {
    pub id: String,
    pub title: String,
    pub thumbnail_url: String,
    pub duration_seconds: u64,
    pub duration_text: String,
    pub uploader_name: String,
    pub metadata_complete: bool,
    pub available_formats: Vec<FormatOption>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalResult {
    /// The media itself, already read into memory.
    Payload { filename: String, bytes: Vec<u8> },
    /// A URL the client downloads from directly.
    Redirect { filename: String, url: String },
}

impl RetrievalResult {
    pub fn filename(&self) -> &str {
        match self {
            Self::Payload { filename, .. } | Self::Redirect { filename, .. } => filename,
        }
    }
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn describe(&self, video: &VideoReference) -> Result<VideoDescriptor, RetrievalError>;

    async fn fetch(
        &self,
        video: &VideoReference,
        quality: QualityTier,
    ) -> Result<RetrievalResult, RetrievalError>;
}

pub fn build_retriever(config: &RuntimeConfig) -> Arc<dyn Retriever> {
    match config.backend {
        BackendKind::YtDlp => Arc::new(YtDlpRetriever::new(
            config.ytdlp_command.clone(),
            config.temp_dir.clone(),
        )),
        BackendKind::Cobalt => Arc::new(CobaltRetriever::new(config.cobalt_api_url.clone())),
    }
}

/// Renders seconds as `m:ss` or `h:mm:ss`; zero means the length is unknown.
pub fn format_duration(seconds: u64) -> String {
    if seconds == 0 {
        return UNKNOWN_TEXT.to_string();
    }
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// Attachment name for a downloaded video, e.g. `dQw4w9WgXcQ_720p.mp4`.
pub fn suggested_filename(video: &VideoReference, quality: QualityTier) -> String {
    let id: String = video
        .id()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    let id = if id.is_empty() { "video".to_string() } else { id };
    format!("{id}_{}p.mp4", quality.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_COBALT_API_URL, IdentitySettings};
    use std::path::PathBuf;

    fn config_for(backend: BackendKind) -> RuntimeConfig {
        RuntimeConfig {
            host: "127.0.0.1".into(),
            port: 0,
            backend,
            ytdlp_command: vec!["yt-dlp".into()],
            temp_dir: PathBuf::from("/tmp"),
            cobalt_api_url: DEFAULT_COBALT_API_URL.into(),
            identity: IdentitySettings {
                app_id: None,
                api_key: None,
                api_base: "https://id.example".into(),
                token_public_key: None,
                token_issuer: "issuer".into(),
            },
            www_root: None,
        }
    }

    #[test]
    fn build_retriever_follows_backend_kind() {
        assert_eq!(build_retriever(&config_for(BackendKind::YtDlp)).name(), "yt-dlp");
        assert_eq!(build_retriever(&config_for(BackendKind::Cobalt)).name(), "cobalt");
    }

    #[test]
    fn format_duration_covers_edge_cases() {
        assert_eq!(format_duration(0), "Unknown");
        assert_eq!(format_duration(5), "0:05");
        assert_eq!(format_duration(212), "3:32");
        assert_eq!(format_duration(3600), "1:00:00");
        assert_eq!(format_duration(3723), "1:02:03");
    }

    #[test]
    fn suggested_filename_strips_unsafe_characters() {
        let video = VideoReference::parse("https://youtu.be/ab\"c").unwrap();
        assert_eq!(suggested_filename(&video, QualityTier::P480), "abc_480p.mp4");
    }

    #[test]
    fn descriptor_serializes_camel_case() {
        let descriptor = VideoDescriptor {
            id: "x".into(),
            title: "t".into(),
            thumbnail_url: "u".into(),
            duration_seconds: 1,
            duration_text: "0:01".into(),
            uploader_name: "n".into(),
            metadata_complete: true,
            available_formats: vec![],
        };
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["thumbnailUrl"], "u");
        assert_eq!(value["durationSeconds"], 1);
        assert_eq!(value["uploaderName"], "n");
        assert!(value["availableFormats"].as_array().unwrap().is_empty());
    }
}
