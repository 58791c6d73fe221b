use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{ChildStderr, Command},
    task::JoinHandle,
    time::timeout,
};
use tracing::debug;

use crate::{
    config::{ExtractorConfig, ExtractorMode},
    error::AttemptError,
    media::{ChildStream, MediaSource, fetch_media},
    model::{MediaKind, VideoId},
    resolver::StreamRequest,
    strategy::Strategy,
};

pub const VIDEO_SELECTOR: &str =
    "best[ext=mp4][acodec!=none][vcodec!=none][height<=720]/best[acodec!=none][vcodec!=none]/best";
pub const AUDIO_SELECTOR: &str = "bestaudio";

/// Stderr kept for the failure message.
const STDERR_LIMIT: usize = 4096;

pub fn format_selector(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video => VIDEO_SELECTOR,
        MediaKind::Audio => AUDIO_SELECTOR,
    }
}

pub fn pipe_args(kind: MediaKind, video_id: &VideoId) -> Vec<String> {
    vec![
        "-f".to_string(),
        format_selector(kind).to_string(),
        "--no-playlist".to_string(),
        "--quiet".to_string(),
        "--no-warnings".to_string(),
        "-o".to_string(),
        "-".to_string(),
        video_id.watch_url(),
    ]
}

pub fn url_args(kind: MediaKind, video_id: &VideoId) -> Vec<String> {
    vec![
        "-g".to_string(),
        "-f".to_string(),
        format_selector(kind).to_string(),
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        video_id.watch_url(),
    ]
}

/// Whether `binary --version` runs successfully within `limit`.
pub async fn probe(binary: &Path, limit: Duration) -> bool {
    let mut command = Command::new(binary);
    command
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    matches!(timeout(limit, command.status()).await, Ok(Ok(status)) if status.success())
}

fn run_error_message(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("extractor produced no output")
        .to_string()
}

fn spawn_error(binary: &Path, error: std::io::Error) -> AttemptError {
    if error.kind() == ErrorKind::NotFound {
        AttemptError::Extractor(format!("{} is not installed", binary.display()))
    } else {
        AttemptError::Io(error)
    }
}

fn drain_stderr(stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut kept = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(line = %line, "extractor stderr");
            if kept.len() < STDERR_LIMIT {
                kept.push_str(&line);
                kept.push('\n');
            }
        }
        kept
    })
}

pub struct ExtractorStrategy {
    binary: PathBuf,
    mode: ExtractorMode,
    timeout: Duration,
    http: reqwest::Client,
}

impl ExtractorStrategy {
    pub fn new(config: &ExtractorConfig, http: reqwest::Client) -> Self {
        Self {
            binary: config.binary.clone(),
            mode: config.mode,
            timeout: config.timeout,
            http,
        }
    }

    /// Streams stdout. The first chunk is awaited before answering so a
    /// process that dies without output counts as a failed attempt.
    async fn pipe(&self, request: &StreamRequest) -> Result<MediaSource, AttemptError> {
        if request.range.is_some() {
            debug!("range requests are not supported when piping the extractor");
        }

        let mut command = Command::new(&self.binary);
        command
            .args(pipe_args(request.kind, &request.video_id))
            .stderr(Stdio::piped());
        let mut child =
            ChildStream::spawn(command).map_err(|error| spawn_error(&self.binary, error))?;
        let stderr = child.child_mut().stderr.take().map(drain_stderr);

        let first = match timeout(self.timeout, child.next()).await {
            Ok(Some(Ok(chunk))) if !chunk.is_empty() => chunk,
            Ok(Some(Err(error))) => return Err(AttemptError::Io(error)),
            Err(_) => {
                return Err(AttemptError::Extractor(
                    "timed out waiting for first bytes".into(),
                ));
            }
            Ok(_) => {
                let stderr = match stderr {
                    Some(handle) => timeout(Duration::from_secs(2), handle)
                        .await
                        .ok()
                        .and_then(Result::ok)
                        .unwrap_or_default(),
                    None => String::new(),
                };
                return Err(AttemptError::Extractor(run_error_message(&stderr)));
            }
        };

        Ok(MediaSource {
            body: stream::once(async move { Ok(first) }).chain(child).boxed(),
            content_type: request.kind.default_content_type().to_string(),
            content_length: None,
            content_range: None,
        })
    }

    /// Asks the extractor for a direct URL, then fetches it like any other
    /// upstream.
    async fn direct_url(&self, request: &StreamRequest) -> Result<MediaSource, AttemptError> {
        let mut command = Command::new(&self.binary);
        command
            .args(url_args(request.kind, &request.video_id))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| AttemptError::Extractor("timed out resolving URL".into()))?
            .map_err(|error| spawn_error(&self.binary, error))?;

        if !output.status.success() {
            return Err(AttemptError::Extractor(run_error_message(
                &String::from_utf8_lossy(&output.stderr),
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let url = stdout
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("http://") || line.starts_with("https://"))
            .ok_or_else(|| AttemptError::Extractor("extractor printed no URL".into()))?;

        fetch_media(&self.http, url, request.range.as_deref(), None, request.kind).await
    }
}

#[async_trait]
impl Strategy<StreamRequest, MediaSource> for ExtractorStrategy {
    fn name(&self) -> &str {
        match self.mode {
            ExtractorMode::Pipe => "extractor:pipe",
            ExtractorMode::Url => "extractor:url",
        }
    }

    async fn attempt(&self, request: &StreamRequest) -> Result<MediaSource, AttemptError> {
        match self.mode {
            ExtractorMode::Pipe => self.pipe(request).await,
            ExtractorMode::Url => self.direct_url(request).await,
        }
    }
}
