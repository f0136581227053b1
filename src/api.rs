#![forbid(unsafe_code)]

//! HTTP surface: the two API endpoints behind the access gate, plus the
//! optional static front-end.

use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Query, Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
};
use mime_guess::MimeGuess;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::access::{AccessGate, Identity, user_token};
use crate::quality::QualityTier;
use crate::retrieval::{RetrievalResult, Retriever};
use crate::validator::VideoReference;

#[derive(Clone)]
pub struct AppState {
    pub retriever: Arc<dyn Retriever>,
    pub gate: Arc<AccessGate>,
    pub www_root: Option<Arc<PathBuf>>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }

    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "Unauthorized".into(),
            details: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            details: None,
        }
    }

    fn internal(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({ "error": self.message, "details": details }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Both endpoints take the same body. Fields stay untyped so a wrong JSON
/// type is reported as a missing field rather than an unreadable body.
#[derive(Debug, Deserialize)]
struct VideoRequest {
    url: Option<Value>,
    quality: Option<Value>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/video-info", post(describe_video))
        .route("/api/download", post(download_video))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_identity,
        ));

    Router::new()
        .merge(api)
        .fallback(static_fallback)
        .with_state(state)
}

async fn require_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let query = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(query)| query)
        .unwrap_or_default();

    let headers = request.headers().clone();

    match state.gate.authorize(&headers, &query).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => {
            warn!(path = %request.uri().path(), error = %err, "request rejected by access gate");
            ApiError::unauthorized().into_response()
        }
    }
}

fn parse_request(
    payload: Result<Json<VideoRequest>, JsonRejection>,
) -> ApiResult<(VideoReference, Option<Value>)> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection, "unreadable request body");
        ApiError::bad_request("Invalid request body")
    })?;
    let url = match request.url {
        Some(Value::String(url)) if !url.is_empty() => url,
        _ => {
            warn!("request without url");
            return Err(ApiError::bad_request("URL is required"));
        }
    };
    let video = VideoReference::parse(&url).ok_or_else(|| {
        warn!(url = %url, "rejected non-YouTube url");
        ApiError::bad_request("Invalid YouTube URL")
    })?;
    Ok((video, request.quality))
}

async fn describe_video(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<VideoRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let (video, _) = parse_request(payload)?;
    info!(
        user = %identity.user_id,
        experience = ?identity.experience_id,
        company = ?identity.company_id,
        video_id = video.id(),
        backend = state.retriever.name(),
        "describing video"
    );

    match state.retriever.describe(&video).await {
        Ok(descriptor) => Ok(Json(json!({ "success": true, "data": descriptor }))),
        Err(err) => {
            error!(video_id = video.id(), error = %err, "describe failed");
            Err(ApiError::internal(
                "Failed to fetch video information",
                err.to_string(),
            ))
        }
    }
}

async fn download_video(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<VideoRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let (video, quality) = parse_request(payload)?;
    let quality = QualityTier::normalize(quality.as_ref().and_then(Value::as_str));
    info!(
        user = %identity.user_id,
        experience = ?identity.experience_id,
        video_id = video.id(),
        quality = quality.as_str(),
        backend = state.retriever.name(),
        "fetching video"
    );

    let result = state.retriever.fetch(&video, quality).await.map_err(|err| {
        error!(video_id = video.id(), error = %err, "fetch failed");
        ApiError::internal("Failed to download video", err.to_string())
    })?;

    match result {
        RetrievalResult::Payload { filename, bytes } => {
            let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
                .map_err(|err| ApiError::internal("Failed to download video", err.to_string()))?;
            Ok((
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static("video/mp4")),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response())
        }
        RetrievalResult::Redirect { filename, url } => Ok(Json(json!({
            "success": true,
            "downloadUrl": url,
            "filename": filename,
        }))
        .into_response()),
    }
}

async fn static_fallback(State(state): State<AppState>, request: Request) -> Response {
    let path = request.uri().path().to_owned();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }
    let Some(root) = state.www_root.as_deref() else {
        return ApiError::not_found("not found").into_response();
    };

    // Only presence is checked here; the API calls these pages make are
    // verified in full.
    let is_experience = path == "/experience" || path.starts_with("/experience/");
    if is_experience && user_token(request.headers()).is_none() {
        return ApiError::unauthorized().into_response();
    }

    match serve_www_path(root, &path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => stream_file(root.join("index.html")).await,
        Ok(_) => stream_file(target).await,
        Err(_) if should_fallback_to_index(request_path) => {
            stream_file(root.join("index.html")).await
        }
        Err(_) => Err(ApiError::not_found("file not found")),
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

/// Client-side routes have no extension; missing assets do.
fn should_fallback_to_index(request_path: &str) -> bool {
    Path::new(request_path.trim_start_matches('/'))
        .extension()
        .is_none()
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}
