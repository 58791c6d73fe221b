use std::{
    io,
    pin::Pin,
    process::Stdio,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, stream::BoxStream};
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, RANGE, REFERER, USER_AGENT};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::{error::AttemptError, innertube::DESKTOP_USER_AGENT, model::MediaKind};

pub const MEDIA_REFERER: &str = "https://www.youtube.com/";

pub type ByteStream = BoxStream<'static, Result<Bytes, io::Error>>;

pub struct MediaSource {
    pub body: ByteStream,
    pub content_type: String,
    pub content_length: Option<u64>,
    /// Set when the upstream answered a range request with 206.
    pub content_range: Option<String>,
}

impl MediaSource {
    pub fn is_partial(&self) -> bool {
        self.content_range.is_some()
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSource")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

/// Fetches `url` and wraps the response body without buffering it.
///
/// `content_type` wins when given; otherwise the upstream header is used if
/// it names an audio or video type, else the default for `kind`.
pub async fn fetch_media(
    http: &reqwest::Client,
    url: &str,
    range: Option<&str>,
    content_type: Option<&str>,
    kind: MediaKind,
) -> Result<MediaSource, AttemptError> {
    let mut request = http
        .get(url)
        .header(USER_AGENT, DESKTOP_USER_AGENT)
        .header(REFERER, MEDIA_REFERER);
    if let Some(range) = range {
        request = request.header(RANGE, range);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AttemptError::Status(status));
    }

    let content_range = if status == reqwest::StatusCode::PARTIAL_CONTENT {
        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
    } else {
        None
    };
    let upstream_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| value.starts_with("audio/") || value.starts_with("video/"))
        .map(ToString::to_string);
    let content_type = content_type
        .map(ToString::to_string)
        .or(upstream_type)
        .unwrap_or_else(|| kind.default_content_type().to_string());

    Ok(MediaSource {
        content_length: response.content_length(),
        content_range,
        content_type,
        body: response.bytes_stream().map_err(io::Error::other).boxed(),
    })
}

pub struct TrackedStream {
    inner: ByteStream,
    label: String,
    relayed: u64,
    finished: bool,
}

impl TrackedStream {
    pub fn new(inner: ByteStream, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
            relayed: 0,
            finished: false,
        }
    }
}

impl Stream for TrackedStream {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => self.relayed += chunk.len() as u64,
            Poll::Ready(None) => self.finished = true,
            _ => {}
        }
        polled
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        if self.finished {
            info!(label = %self.label, bytes = self.relayed, "relay finished");
        } else {
            info!(
                label = %self.label,
                bytes = self.relayed,
                "relay dropped before completion; upstream released"
            );
        }
    }
}

pub struct ChildStream {
    child: Child,
    inner: ReaderStream<ChildStdout>,
}

impl ChildStream {
    pub fn spawn(mut command: Command) -> io::Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
        Ok(Self {
            child,
            inner: ReaderStream::new(stdout),
        })
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }
}

impl Stream for ChildStream {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for ChildStream {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            debug!(pid = ?self.child.id(), "killing extractor process");
            let _ = self.child.start_kill();
        }
    }
}
