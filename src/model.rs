use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub const VIDEO_ID_LEN: usize = 11;

/// An 11-character upstream video identifier (`[a-zA-Z0-9_-]{11}`).
///
/// Every endpoint parses its input into this type before any network
/// activity, so a `VideoId` in hand is always safe to splice into URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VideoId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid videoId format")]
pub struct InvalidVideoId;

impl VideoId {
    pub fn parse(value: &str) -> Result<Self, InvalidVideoId> {
        if is_valid_video_id(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidVideoId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }

    pub fn default_thumbnail(&self) -> String {
        default_thumbnail(&self.0)
    }
}

impl FromStr for VideoId {
    type Err = InvalidVideoId;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_valid_video_id(value: &str) -> bool {
    value.len() == VIDEO_ID_LEN
        && value
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-'))
}

pub fn default_thumbnail(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{video_id}/hqdefault.jpg")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Anything other than `audio` falls back to video.
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(|value| value.trim().to_ascii_lowercase()) {
            Some(ref value) if value == "audio" => Self::Audio,
            _ => Self::Video,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    pub fn default_content_type(self) -> &'static str {
        match self {
            Self::Video => "video/mp4",
            Self::Audio => "audio/webm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    pub video_id: String,
    pub title: String,
    pub thumbnail_url: String,
    pub channel_id: Option<String>,
    pub channel_name: String,
    pub channel_avatar_url: Option<String>,
    pub duration_seconds: u64,
    pub view_count: u64,
    pub published_at: Option<String>,
    pub is_live: bool,
}

/// Search rows keep the human-readable strings next to the parsed values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchVideo {
    #[serde(flatten)]
    pub summary: VideoSummary,
    pub duration_text: String,
    pub view_count_text: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    #[serde(flatten)]
    pub summary: VideoSummary,
    pub description: String,
    pub keywords: Vec<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub query: String,
    pub total_results: u64,
    pub videos: Vec<SearchVideo>,
}
