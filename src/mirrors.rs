use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::{
    error::AttemptError,
    innertube::DESKTOP_USER_AGENT,
    media::{MediaSource, fetch_media},
    model::{MediaKind, VideoId},
    resolver::StreamRequest,
    strategy::Strategy,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayApi {
    Piped,
    Invidious,
}

impl RelayApi {
    pub fn detect(instance: &str) -> Self {
        if instance.contains("piped") {
            Self::Piped
        } else {
            Self::Invidious
        }
    }

    pub fn video_url(self, instance: &str, video_id: &VideoId) -> String {
        match self {
            Self::Piped => format!("{instance}/streams/{video_id}"),
            Self::Invidious => format!("{instance}/api/v1/videos/{video_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStream {
    pub url: String,
    pub mime_type: Option<String>,
}

/// Picks the stream URL out of a relay's video document.
pub fn pick_stream(api: RelayApi, kind: MediaKind, document: &Value) -> Option<RelayStream> {
    let entry = match (api, kind) {
        (RelayApi::Piped, MediaKind::Audio) => document["audioStreams"].as_array()?.first(),
        (RelayApi::Piped, MediaKind::Video) => {
            let streams = document["videoStreams"].as_array()?;
            streams
                .iter()
                .find(|stream| {
                    stream["videoOnly"].as_bool() == Some(false)
                        && stream["quality"].as_str().is_some()
                })
                .or_else(|| streams.first())
        }
        (RelayApi::Invidious, MediaKind::Audio) => document["adaptiveFormats"]
            .as_array()?
            .iter()
            .find(|format| type_contains(format, "audio")),
        (RelayApi::Invidious, MediaKind::Video) => document["formatStreams"]
            .as_array()?
            .iter()
            .find(|format| type_contains(format, "video")),
    }?;

    let url = entry["url"].as_str().filter(|url| !url.is_empty())?;
    let mime_type = entry["mimeType"]
        .as_str()
        .or_else(|| entry["type"].as_str())
        .and_then(|mime| mime.split(';').next())
        .map(str::trim)
        .filter(|mime| !mime.is_empty())
        .map(ToString::to_string);

    Some(RelayStream {
        url: url.to_string(),
        mime_type,
    })
}

fn type_contains(format: &Value, needle: &str) -> bool {
    format["type"]
        .as_str()
        .is_some_and(|kind| kind.contains(needle))
}

pub struct RelayStrategy {
    name: String,
    instance: String,
    api: RelayApi,
    http: reqwest::Client,
    timeout: Duration,
}

impl RelayStrategy {
    pub fn new(instance: &str, http: reqwest::Client, timeout: Duration) -> Self {
        let instance = instance.trim_end_matches('/').to_string();
        let host = Url::parse(&instance)
            .ok()
            .and_then(|url| url.host_str().map(ToString::to_string))
            .unwrap_or_else(|| instance.clone());
        Self {
            name: format!("relay:{host}"),
            api: RelayApi::detect(&instance),
            instance,
            http,
            timeout,
        }
    }

    async fn lookup(&self, request: &StreamRequest) -> Result<RelayStream, AttemptError> {
        let response = self
            .http
            .get(self.api.video_url(&self.instance, &request.video_id))
            .timeout(self.timeout)
            .header("User-Agent", DESKTOP_USER_AGENT)
            .header("Accept", "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AttemptError::Status(response.status()));
        }

        let document: Value = response.json().await?;
        if let Some(error) = document["error"].as_str() {
            return Err(AttemptError::Parse(format!("relay reported: {error}")));
        }
        pick_stream(self.api, request.kind, &document).ok_or(AttemptError::NoFormat)
    }
}

#[async_trait]
impl Strategy<StreamRequest, MediaSource> for RelayStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, request: &StreamRequest) -> Result<MediaSource, AttemptError> {
        let stream = self.lookup(request).await?;
        fetch_media(
            &self.http,
            &stream.url,
            request.range.as_deref(),
            stream.mime_type.as_deref(),
            request.kind,
        )
        .await
    }
}
