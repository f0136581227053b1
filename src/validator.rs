#![forbid(unsafe_code)]

//! YouTube URL recognition.
//!
//! Accepted shapes, with or without `www.` and either scheme:
//! - `https://youtube.com/watch?v=<id>`
//! - `https://youtu.be/<id>`
//! - `https://youtube.com/shorts/<id>`

use std::sync::LazyLock;

use regex::{Regex, RegexSet};

/// Returned by [`extract_id`] when the URL carries no recognizable id.
pub const UNKNOWN_ID: &str = "unknown";

static ACCEPTED_URLS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)^https?://(www\.)?youtube\.com/watch\?v=[A-Za-z0-9_-]+",
        r"(?i)^https?://(www\.)?youtu\.be/[A-Za-z0-9_-]+",
        r"(?i)^https?://(www\.)?youtube\.com/shorts/[A-Za-z0-9_-]+",
    ])
    .expect("accepted url patterns")
});

static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/shorts/)([^&?/#]+)")
        .expect("video id pattern")
});

pub fn is_acceptable(url: &str) -> bool {
    ACCEPTED_URLS.is_match(url)
}

/// Pulls the platform id out of a URL, or [`UNKNOWN_ID`].
pub fn extract_id(url: &str) -> String {
    VIDEO_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| UNKNOWN_ID.to_string())
}

/// A validated source URL together with its id. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoReference {
    source_url: String,
    id: String,
}

impl VideoReference {
    pub fn parse(url: &str) -> Option<Self> {
        if !is_acceptable(url) {
            return None;
        }
        Some(Self {
            source_url: url.to_string(),
            id: extract_id(url),
        })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Thumbnail the platform serves for every public video id.
    pub fn thumbnail_url(&self) -> String {
        format!("https://img.youtube.com/vi/{}/maxresdefault.jpg", self.id)
    }
}
