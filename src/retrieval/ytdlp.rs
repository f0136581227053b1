#![forbid(unsafe_code)]

//! Local extractor strategy: shells out to yt-dlp.
//!
//! Metadata comes from `--dump-json`. Media is downloaded into a private
//! temporary directory, read into memory, and the directory is removed once
//! yt-dlp has exited, whatever the outcome and even if the caller gave up.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    FormatOption, RetrievalError, RetrievalResult, Retriever, UNKNOWN_TEXT, VideoDescriptor,
    format_duration, suggested_filename,
};
use crate::quality::QualityTier;
use crate::validator::VideoReference;

const METADATA_OUTPUT_LIMIT: usize = 10 * 1024 * 1024;
const MEDIA_OUTPUT_LIMIT: usize = 100 * 1024 * 1024;
const STDERR_TAIL_BYTES: usize = 4096;
const OUTPUT_STEM: &str = "video";

pub struct YtDlpRetriever {
    command: Vec<String>,
    temp_root: PathBuf,
    metadata_limit: usize,
    media_limit: usize,
}

impl YtDlpRetriever {
    /// `command` is the program followed by any leading arguments.
    pub fn new(command: Vec<String>, temp_root: PathBuf) -> Self {
        Self {
            command,
            temp_root,
            metadata_limit: METADATA_OUTPUT_LIMIT,
            media_limit: MEDIA_OUTPUT_LIMIT,
        }
    }

    #[cfg(test)]
    fn with_limits(mut self, metadata_limit: usize, media_limit: usize) -> Self {
        self.metadata_limit = metadata_limit;
        self.media_limit = media_limit;
        self
    }

    fn base_command(&self) -> Result<Command, RetrievalError> {
        let (program, leading) = self
            .command
            .split_first()
            .ok_or_else(|| RetrievalError::Extraction("no yt-dlp command configured".into()))?;
        let mut command = Command::new(program);
        command.args(leading);
        Ok(command)
    }
}

#[async_trait]
impl Retriever for YtDlpRetriever {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn describe(&self, video: &VideoReference) -> Result<VideoDescriptor, RetrievalError> {
        let mut command = self.base_command()?;
        command
            .arg("--dump-json")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg(video.source_url());

        let stdout = run_capped(command, self.metadata_limit).await?;
        let info: ExtractorInfo = serde_json::from_slice(&stdout)
            .map_err(|err| RetrievalError::Extraction(format!("parsing yt-dlp metadata: {err}")))?;
        Ok(build_descriptor(video, info))
    }

    async fn fetch(
        &self,
        video: &VideoReference,
        quality: QualityTier,
    ) -> Result<RetrievalResult, RetrievalError> {
        tokio::fs::create_dir_all(&self.temp_root)
            .await
            .map_err(|err| {
                RetrievalError::Extraction(format!(
                    "preparing {}: {err}",
                    self.temp_root.display()
                ))
            })?;
        let workdir = tempfile::Builder::new()
            .prefix("yt-")
            .tempdir_in(&self.temp_root)
            .map_err(|err| RetrievalError::Extraction(format!("creating temp dir: {err}")))?;

        let template = workdir.path().join(format!("{OUTPUT_STEM}.%(ext)s"));
        let mut command = self.base_command()?;
        command
            .arg("-f")
            .arg(format_selector(quality))
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("-o")
            .arg(&template)
            .arg(video.source_url());

        // The task owns the temp dir, so an abandoned request still waits for
        // yt-dlp to exit before the directory is removed.
        let media_limit = self.media_limit;
        let download = tokio::spawn(async move {
            let outcome = download_into(command, workdir.path(), media_limit).await;
            let dir = workdir.path().to_path_buf();
            if let Err(err) = workdir.close() {
                warn!(path = %dir.display(), error = %err, "failed to remove temp dir");
            }
            outcome
        });

        let bytes = download
            .await
            .map_err(|err| RetrievalError::Extraction(format!("download task failed: {err}")))??;
        Ok(RetrievalResult::Payload {
            filename: suggested_filename(video, quality),
            bytes,
        })
    }
}

async fn download_into(
    command: Command,
    dir: &Path,
    limit: usize,
) -> Result<Vec<u8>, RetrievalError> {
    run_capped(command, limit).await?;

    let path = locate_output(dir).await?;
    let size = tokio::fs::metadata(&path)
        .await
        .map_err(|err| RetrievalError::Extraction(format!("inspecting {}: {err}", path.display())))?
        .len();
    if size > limit as u64 {
        return Err(RetrievalError::Extraction(format!(
            "downloaded file is {size} bytes, above the {limit} byte limit"
        )));
    }

    tokio::fs::read(&path)
        .await
        .map_err(|err| RetrievalError::Extraction(format!("reading {}: {err}", path.display())))
}

/// Best video no taller than the tier plus best audio, or the best single
/// file under the same ceiling.
fn format_selector(quality: QualityTier) -> String {
    let height = quality.height();
    format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
}

/// Runs the command and returns stdout. The child is killed once stdout
/// grows past `limit` or cannot be read.
async fn run_capped(mut command: Command, limit: usize) -> Result<Vec<u8>, RetrievalError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    debug!(command = ?command.as_std(), "running yt-dlp");

    let mut child = command
        .spawn()
        .map_err(|err| RetrievalError::Extraction(format!("launching yt-dlp: {err}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RetrievalError::Extraction("yt-dlp stdout unavailable".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RetrievalError::Extraction("yt-dlp stderr unavailable".into()))?;
    let stderr_task = tokio::spawn(drain_tail(stderr, STDERR_TAIL_BYTES));

    let mut output = Vec::new();
    let read = stdout
        .take(limit as u64 + 1)
        .read_to_end(&mut output)
        .await;

    if output.len() > limit {
        stop_child(&mut child, stderr_task).await;
        return Err(RetrievalError::Extraction(format!(
            "yt-dlp output exceeded {limit} bytes"
        )));
    }
    if let Err(err) = read {
        stop_child(&mut child, stderr_task).await;
        return Err(RetrievalError::Extraction(format!(
            "reading yt-dlp output: {err}"
        )));
    }

    let status = child
        .wait()
        .await
        .map_err(|err| RetrievalError::Extraction(format!("waiting for yt-dlp: {err}")))?;
    let stderr = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(RetrievalError::Extraction(failure_message(status, &stderr)));
    }
    Ok(output)
}

async fn stop_child(child: &mut Child, stderr_task: JoinHandle<Vec<u8>>) {
    if let Err(err) = child.kill().await {
        warn!(error = %err, "failed to kill yt-dlp");
    }
    stderr_task.abort();
}

/// Reads a stream to the end, keeping only its last `keep` bytes.
async fn drain_tail<R: AsyncRead + Unpin>(mut reader: R, keep: usize) -> Vec<u8> {
    let mut tail = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > keep {
                    let excess = tail.len() - keep;
                    tail.drain(..excess);
                }
            }
        }
    }
    tail
}

fn failure_message(status: ExitStatus, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let detail = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back();
    match detail {
        Some(line) => format!("yt-dlp exited with {status}: {line}"),
        None => format!("yt-dlp exited with {status}"),
    }
}

/// Finds the merged output, ignoring partial downloads.
async fn locate_output(dir: &Path) -> Result<PathBuf, RetrievalError> {
    let preferred = dir.join(format!("{OUTPUT_STEM}.mp4"));
    if tokio::fs::try_exists(&preferred).await.unwrap_or(false) {
        return Ok(preferred);
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|err| RetrievalError::Extraction(format!("listing {}: {err}", dir.display())))?;
    let prefix = format!("{OUTPUT_STEM}.");
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && !name.ends_with(".part") && !name.ends_with(".ytdl") {
            return Ok(entry.path());
        }
    }
    Err(RetrievalError::Extraction(
        "yt-dlp finished without producing a file".into(),
    ))
}

/// Subset of the `--dump-json` payload.
#[derive(Debug, Deserialize)]
struct ExtractorInfo {
    id: Option<String>,
    title: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    #[serde(default)]
    formats: Vec<ExtractorFormat>,
}

#[derive(Debug, Deserialize)]
struct ExtractorFormat {
    format_id: Option<String>,
    format_note: Option<String>,
    ext: Option<String>,
    resolution: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    vcodec: Option<String>,
    acodec: Option<String>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

fn build_descriptor(video: &VideoReference, info: ExtractorInfo) -> VideoDescriptor {
    let duration_seconds = info
        .duration
        .filter(|value| value.is_finite() && *value > 0.0)
        .map(|value| value.round() as u64)
        .unwrap_or(0);
    let title = non_empty(info.title);
    let uploader = non_empty(info.uploader);
    let metadata_complete = title.is_some() && uploader.is_some() && duration_seconds > 0;

    VideoDescriptor {
        id: non_empty(info.id).unwrap_or_else(|| video.id().to_string()),
        title: title.unwrap_or_else(|| UNKNOWN_TEXT.to_string()),
        thumbnail_url: non_empty(info.thumbnail).unwrap_or_else(|| video.thumbnail_url()),
        duration_seconds,
        duration_text: format_duration(duration_seconds),
        uploader_name: uploader.unwrap_or_else(|| UNKNOWN_TEXT.to_string()),
        metadata_complete,
        available_formats: playable_formats(&info.formats),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Keeps muxed formats only: the client downloads one file with both tracks.
fn playable_formats(formats: &[ExtractorFormat]) -> Vec<FormatOption> {
    formats
        .iter()
        .filter(|format| !is_missing_track(format.vcodec.as_deref()))
        .filter(|format| !is_missing_track(format.acodec.as_deref()))
        .filter_map(|format| {
            let format_id = format.format_id.clone()?;
            let resolution = format
                .resolution
                .clone()
                .filter(|value| is_real_resolution(value))
                .or_else(|| match (format.width, format.height) {
                    (Some(width), Some(height)) => Some(format!("{width}x{height}")),
                    _ => None,
                })?;
            let quality_label = format
                .format_note
                .clone()
                .filter(|note| !note.trim().is_empty())
                .or_else(|| format.height.map(|height| format!("{height}p")))
                .unwrap_or_else(|| resolution.clone());
            Some(FormatOption {
                format_id,
                resolution,
                quality_label,
                ext: format.ext.clone(),
                filesize: format
                    .filesize
                    .or(format.filesize_approx)
                    .filter(|size| *size >= 0.0)
                    .map(|size| size as u64),
            })
        })
        .collect()
}

fn is_missing_track(codec: Option<&str>) -> bool {
    codec.is_some_and(|codec| codec.eq_ignore_ascii_case("none"))
}

fn is_real_resolution(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != "x" && !value.eq_ignore_ascii_case("audio only")
}
