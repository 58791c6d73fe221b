use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Why a single strategy failed. Always recoverable: the runner moves on.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream responded with {0}")]
    Status(reqwest::StatusCode),

    #[error("{status}: {reason}")]
    Unplayable { status: String, reason: String },

    #[error("no matching format found")]
    NoFormat,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("extractor failed: {0}")]
    Extractor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamClass {
    Unavailable,
    Restricted,
    Other,
}

impl AttemptError {
    pub fn class(&self) -> UpstreamClass {
        classify_message(&self.to_string())
    }
}

impl From<serde_json::Error> for AttemptError {
    fn from(error: serde_json::Error) -> Self {
        Self::Parse(error.to_string())
    }
}

pub fn classify_message(message: &str) -> UpstreamClass {
    let lower = message.to_ascii_lowercase();
    if lower.contains("video unavailable") || lower.contains("video is unavailable") {
        UpstreamClass::Unavailable
    } else if lower.contains("sign in") {
        UpstreamClass::Restricted
    } else {
        UpstreamClass::Other
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    watch_url: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
    pub watch_url: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
            watch_url: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message).with_code("INVALID_INPUT")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message).with_code("UPSTREAM_FAILED")
    }

    pub fn not_available(watch_url: String) -> Self {
        Self::new(StatusCode::NOT_FOUND, "Video not available")
            .with_code("VIDEO_UNAVAILABLE")
            .with_watch_url(watch_url)
    }

    pub fn restricted(watch_url: String) -> Self {
        Self::new(StatusCode::FORBIDDEN, "Age-restricted or private video")
            .with_code("SIGN_IN_REQUIRED")
            .with_watch_url(watch_url)
    }

    pub fn all_strategies_failed(watch_url: String) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Video not available. All streaming methods failed.",
        )
        .with_code("ALL_STRATEGIES_FAILED")
        .with_watch_url(watch_url)
    }

    /// Mirrors a non-success upstream status instead of collapsing it to 500.
    pub fn upstream_status(status: reqwest::StatusCode, message: impl Into<String>) -> Self {
        let status =
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, message)
    }

    fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    fn with_watch_url(mut self, watch_url: String) -> Self {
        self.watch_url = Some(watch_url);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
            watch_url: self.watch_url,
        });
        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
