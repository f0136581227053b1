#![forbid(unsafe_code)]

//! Hosted-proxy strategy: one POST to a cobalt instance, which answers with
//! a URL the client follows. The media never passes through this process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    FormatOption, RetrievalError, RetrievalResult, Retriever, VideoDescriptor, format_duration,
    suggested_filename,
};
use crate::quality::QualityTier;
use crate::validator::VideoReference;

const PLACEHOLDER_TITLE: &str = "YouTube Video";
const PLACEHOLDER_UPLOADER: &str = "YouTube";

pub struct CobaltRetriever {
    agent: ureq::Agent,
    endpoint: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CobaltRequest {
    url: String,
    video_quality: &'static str,
    download_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename_style: Option<&'static str>,
}

/// Tagged by `status`: `error`, `picker`, `tunnel` or `redirect`.
#[derive(Debug, Deserialize)]
struct CobaltResponse {
    status: String,
    url: Option<String>,
    text: Option<String>,
    error: Option<CobaltErrorBody>,
    #[serde(default)]
    picker: Vec<PickerItem>,
}

#[derive(Debug, Deserialize)]
struct CobaltErrorBody {
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PickerItem {
    url: String,
}

impl CobaltResponse {
    fn error_message(&self) -> Option<String> {
        self.text
            .clone()
            .or_else(|| self.error.as_ref().and_then(|error| error.code.clone()))
            .filter(|message| !message.trim().is_empty())
    }
}

impl CobaltRetriever {
    pub fn new(endpoint: String) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            endpoint,
        }
    }

    /// Asks the service for a download URL at the given quality.
    async fn request_url(
        &self,
        video: &VideoReference,
        quality: QualityTier,
        filename_style: Option<&'static str>,
    ) -> Result<String, RetrievalError> {
        let agent = self.agent.clone();
        let endpoint = self.endpoint.clone();
        let request = CobaltRequest {
            url: video.source_url().to_string(),
            video_quality: quality.as_str(),
            download_mode: "auto",
            filename_style,
        };
        debug!(endpoint = %endpoint, quality = quality.as_str(), "querying download service");

        let response =
            tokio::task::spawn_blocking(move || post_request(&agent, &endpoint, &request))
                .await
                .map_err(|err| RetrievalError::Download(format!("request task failed: {err}")))??;
        resolve_url(response)
    }
}

fn post_request(
    agent: &ureq::Agent,
    endpoint: &str,
    request: &CobaltRequest,
) -> Result<CobaltResponse, RetrievalError> {
    match agent
        .post(endpoint)
        .set("Accept", "application/json")
        .send_json(request)
    {
        Ok(response) => response.into_json::<CobaltResponse>().map_err(|err| {
            RetrievalError::Download(format!("decoding download service response: {err}"))
        }),
        Err(ureq::Error::Status(code, response)) => {
            let raw = response.into_string().unwrap_or_default();
            let message = serde_json::from_str::<CobaltResponse>(&raw)
                .ok()
                .and_then(|body| body.error_message());
            Err(RetrievalError::Download(match message {
                Some(message) => format!("download service returned HTTP {code}: {message}"),
                None => format!("download service returned HTTP {code}"),
            }))
        }
        Err(err) => Err(RetrievalError::Download(err.to_string())),
    }
}

fn resolve_url(response: CobaltResponse) -> Result<String, RetrievalError> {
    match response.status.as_str() {
        "error" => Err(RetrievalError::Download(
            response
                .error_message()
                .unwrap_or_else(|| "download service reported an error".into()),
        )),
        "picker" => response
            .picker
            .into_iter()
            .next()
            .map(|item| item.url)
            .ok_or_else(|| RetrievalError::UnexpectedResponse("picker without entries".into())),
        "tunnel" | "redirect" => response.url.ok_or_else(|| {
            RetrievalError::UnexpectedResponse(format!("`{}` without a url", response.status))
        }),
        other => Err(RetrievalError::UnexpectedResponse(format!(
            "status `{other}`"
        ))),
    }
}

/// The service exposes no metadata, so the descriptor is built from the
/// video id and the fixed quality tiers.
fn placeholder_descriptor(video: &VideoReference) -> VideoDescriptor {
    VideoDescriptor {
        id: video.id().to_string(),
        title: PLACEHOLDER_TITLE.to_string(),
        thumbnail_url: video.thumbnail_url(),
        duration_seconds: 0,
        duration_text: format_duration(0),
        uploader_name: PLACEHOLDER_UPLOADER.to_string(),
        metadata_complete: false,
        available_formats: QualityTier::ALL
            .into_iter()
            .map(|tier| FormatOption {
                format_id: tier.as_str().to_string(),
                resolution: tier.resolution().to_string(),
                quality_label: tier.label().to_string(),
                ext: None,
                filesize: None,
            })
            .collect(),
    }
}

#[async_trait]
impl Retriever for CobaltRetriever {
    fn name(&self) -> &'static str {
        "cobalt"
    }

    async fn describe(&self, video: &VideoReference) -> Result<VideoDescriptor, RetrievalError> {
        // Ask at the highest tier so an unavailable video fails here
        // rather than at download time.
        self.request_url(video, QualityTier::P1080, None).await?;
        Ok(placeholder_descriptor(video))
    }

    async fn fetch(
        &self,
        video: &VideoReference,
        quality: QualityTier,
    ) -> Result<RetrievalResult, RetrievalError> {
        let url = self.request_url(video, quality, Some("basic")).await?;
        Ok(RetrievalResult::Redirect {
            filename: suggested_filename(video, quality),
            url,
        })
    }
}
