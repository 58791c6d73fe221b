//! Maps (video id, media kind) to a playable [`MediaSource`].
//!
//! Strategy order is fixed at construction:
//!
//! 1. authenticated direct access, once per client profile (only when
//!    credentials were loaded)
//! 2. unauthenticated direct access, once per client profile
//! 3. one strategy per relay instance
//! 4. the local extractor, when enabled
//!
//! The first success wins. Strategies share nothing but the HTTP client.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    credentials::AuthContext,
    error::AttemptError,
    extractor::ExtractorStrategy,
    formats::select_format,
    innertube::{ClientProfile, InnertubeClient},
    media::{MediaSource, fetch_media},
    mirrors::RelayStrategy,
    model::{MediaKind, VideoId},
    strategy::{Exhausted, Strategy, StrategyList, run_strategies},
};

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub video_id: VideoId,
    pub kind: MediaKind,
    /// Client `Range` header, forwarded to direct and relay fetches.
    pub range: Option<String>,
}

/// One (auth, client profile) combination against the direct API.
#[derive(Debug, Clone)]
pub struct ResolutionAttempt {
    pub strategy_name: String,
    pub auth: Option<Arc<AuthContext>>,
    pub profile: ClientProfile,
}

impl ResolutionAttempt {
    pub fn new(profile: ClientProfile, auth: Option<Arc<AuthContext>>) -> Self {
        let prefix = if auth.is_some() { "direct-auth" } else { "direct" };
        Self {
            strategy_name: format!("{prefix}:{}", profile.label().to_ascii_lowercase()),
            auth,
            profile,
        }
    }
}

pub struct DirectStrategy {
    attempt: ResolutionAttempt,
    innertube: InnertubeClient,
}

impl DirectStrategy {
    pub fn new(attempt: ResolutionAttempt, innertube: InnertubeClient) -> Self {
        Self { attempt, innertube }
    }
}

#[async_trait]
impl Strategy<StreamRequest, MediaSource> for DirectStrategy {
    fn name(&self) -> &str {
        &self.attempt.strategy_name
    }

    async fn attempt(&self, request: &StreamRequest) -> Result<MediaSource, AttemptError> {
        let player = self
            .innertube
            .player(
                &request.video_id,
                self.attempt.profile,
                self.attempt.auth.as_deref(),
            )
            .await?;
        player.ensure_playable()?;

        let streaming = player.streaming_data.ok_or(AttemptError::NoFormat)?;
        let format = select_format(
            request.kind,
            &streaming.formats,
            &streaming.adaptive_formats,
        )
        .ok_or(AttemptError::NoFormat)?;
        let url = format.url.as_deref().ok_or(AttemptError::NoFormat)?;

        let mut source = fetch_media(
            self.innertube.http(),
            url,
            request.range.as_deref(),
            format.mime_essence(),
            request.kind,
        )
        .await?;
        if source.content_length.is_none() && !source.is_partial() {
            source.content_length = format.content_length();
        }
        Ok(source)
    }
}

pub struct SourceResolver {
    strategies: StrategyList<StreamRequest, MediaSource>,
}

impl SourceResolver {
    pub fn new(strategies: StrategyList<StreamRequest, MediaSource>) -> Self {
        Self { strategies }
    }

    pub fn build(
        innertube: &InnertubeClient,
        auth: Option<Arc<AuthContext>>,
        relay_instances: &[String],
        relay_timeout: Duration,
        extractor: Option<ExtractorStrategy>,
    ) -> Self {
        let mut strategies: StrategyList<StreamRequest, MediaSource> = Vec::new();

        let mut attempts = Vec::new();
        if let Some(auth) = auth {
            attempts.extend(
                ClientProfile::ALL
                    .iter()
                    .map(|profile| ResolutionAttempt::new(*profile, Some(auth.clone()))),
            );
        }
        attempts.extend(
            ClientProfile::ALL
                .iter()
                .map(|profile| ResolutionAttempt::new(*profile, None)),
        );
        for attempt in attempts {
            strategies.push(Arc::new(DirectStrategy::new(attempt, innertube.clone())));
        }

        for instance in relay_instances {
            strategies.push(Arc::new(RelayStrategy::new(
                instance,
                innertube.http().clone(),
                relay_timeout,
            )));
        }

        if let Some(extractor) = extractor {
            strategies.push(Arc::new(extractor));
        }

        Self::new(strategies)
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    pub async fn resolve(&self, request: &StreamRequest) -> Result<MediaSource, Exhausted> {
        run_strategies("stream", request.video_id.as_str(), &self.strategies, request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        Json, Router,
        extract::State,
        http::HeaderMap,
        routing::{get, post},
    };
    use futures::TryStreamExt;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    use super::*;
    use crate::{
        config::{ExtractorConfig, ExtractorMode},
        credentials::{Cookie, Tokens},
    };

    fn auth() -> Arc<AuthContext> {
        let cookie = Cookie {
            domain: ".youtube.com".into(),
            name: "SAPISID".into(),
            value: "abc".into(),
            path: "/".into(),
            secure: true,
            http_only: false,
            expires: None,
        };
        let tokens = Tokens {
            visitor_data: "visitor".into(),
            po_token: "token".into(),
        };
        Arc::new(AuthContext::from_parts(vec![cookie], Some(tokens)).unwrap())
    }

    fn request() -> StreamRequest {
        StreamRequest {
            video_id: VideoId::parse("dQw4w9WgXcQ").unwrap(),
            kind: MediaKind::Video,
            range: None,
        }
    }

    #[test]
    fn builds_strategies_in_fixed_order() {
        let innertube = InnertubeClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            Duration::from_secs(1),
        );
        let extractor = ExtractorStrategy::new(
            &ExtractorConfig {
                binary: "yt-dlp".into(),
                enabled: Some(true),
                mode: ExtractorMode::Pipe,
                timeout: Duration::from_secs(1),
            },
            reqwest::Client::new(),
        );
        let resolver = SourceResolver::build(
            &innertube,
            Some(auth()),
            &["https://inv.example".to_string(), "https://pipedapi.example".to_string()],
            Duration::from_secs(1),
            Some(extractor),
        );

        assert_eq!(
            resolver.strategy_names(),
            [
                "direct-auth:web",
                "direct-auth:ios",
                "direct-auth:android",
                "direct:web",
                "direct:ios",
                "direct:android",
                "relay:inv.example",
                "relay:pipedapi.example",
                "extractor:pipe",
            ]
        );

        let anonymous = SourceResolver::build(&innertube, None, &[], Duration::from_secs(1), None);
        assert_eq!(
            anonymous.strategy_names(),
            ["direct:web", "direct:ios", "direct:android"]
        );
    }

    #[derive(Clone)]
    struct Upstream {
        base: String,
        player_calls: Arc<AtomicUsize>,
        relay_calls: Arc<AtomicUsize>,
    }

    /// Refuses signed-in requests and serves a progressive format otherwise.
    async fn player(
        State(upstream): State<Upstream>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        upstream.player_calls.fetch_add(1, Ordering::SeqCst);
        if headers.contains_key("cookie") {
            assert_eq!(body["serviceIntegrityDimensions"]["poToken"], "token");
            return Json(json!({
                "playabilityStatus": {"status": "LOGIN_REQUIRED", "reason": "Sign in to confirm your age"}
            }));
        }
        Json(json!({
            "playabilityStatus": {"status": "OK"},
            "streamingData": {
                "formats": [{
                    "itag": 18,
                    "url": format!("{}/media", upstream.base),
                    "mimeType": "video/mp4; codecs=\"avc1.42001E, mp4a.40.2\"",
                    "qualityLabel": "360p",
                    "bitrate": 500000
                }],
                "adaptiveFormats": []
            }
        }))
    }

    async fn relay(State(upstream): State<Upstream>) -> Json<Value> {
        upstream.relay_calls.fetch_add(1, Ordering::SeqCst);
        Json(json!({}))
    }

    #[tokio::test]
    async fn unauthenticated_success_skips_later_tiers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let upstream = Upstream {
            base: base.clone(),
            player_calls: Arc::new(AtomicUsize::new(0)),
            relay_calls: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new()
            .route("/youtubei/v1/player", post(player))
            .route("/media", get(|| async { "progressive-bytes" }))
            .route("/api/v1/videos/{id}", get(relay))
            .with_state(upstream.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let innertube = InnertubeClient::new(reqwest::Client::new(), &base, Duration::from_secs(5));
        let resolver = SourceResolver::build(
            &innertube,
            Some(auth()),
            std::slice::from_ref(&base),
            Duration::from_secs(5),
            None,
        );

        let source = resolver.resolve(&request()).await.unwrap();
        assert_eq!(source.content_type, "video/mp4");
        let body: Vec<bytes::Bytes> = source.body.try_collect().await.unwrap();
        assert_eq!(body.concat(), b"progressive-bytes");

        // Three signed-in refusals, then the first anonymous profile succeeds.
        assert_eq!(upstream.player_calls.load(Ordering::SeqCst), 4);
        assert_eq!(upstream.relay_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhaustion_keeps_first_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new().route(
            "/youtubei/v1/player",
            post(|| async {
                Json(json!({"playabilityStatus": {"status": "ERROR", "reason": "Video unavailable"}}))
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let innertube = InnertubeClient::new(reqwest::Client::new(), &base, Duration::from_secs(5));
        let resolver = SourceResolver::build(&innertube, None, &[], Duration::from_secs(5), None);

        let exhausted = resolver.resolve(&request()).await.unwrap_err();
        assert_eq!(exhausted.failures.len(), 3);
        assert_eq!(exhausted.first().unwrap().strategy, "direct:web");
    }
}
