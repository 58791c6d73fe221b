use std::{collections::HashSet, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{
            ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
        },
    },
    response::Response,
    routing::get,
};
use serde::Deserialize;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};

use crate::{
    config::{GatewayConfig, normalize_origin, parse_bool},
    credentials::AuthContext,
    error::{ApiError, ApiResult},
    extractor::ExtractorStrategy,
    image_proxy::{ImageProxy, proxied_image_url},
    innertube::InnertubeClient,
    media::{MediaSource, TrackedStream},
    metadata::{MetadataResolver, info_error},
    model::{MediaKind, SearchResults, VideoDetails, VideoId, VideoSummary},
    resolver::{SourceResolver, StreamRequest},
    search::{SearchQuery, SearchService},
};

pub const INNERTUBE_BASE: &str = "https://www.youtube.com";

#[derive(Clone)]
pub struct AppState {
    resolver: Arc<SourceResolver>,
    metadata: Arc<MetadataResolver>,
    search: Arc<SearchService>,
    images: Arc<ImageProxy>,
}

impl AppState {
    /// Wires every component from the configuration. `innertube_base` is the
    /// upstream origin for player and search calls.
    pub fn new(
        config: &GatewayConfig,
        http: reqwest::Client,
        innertube_base: &str,
        auth: Option<AuthContext>,
        extractor_enabled: bool,
    ) -> reqwest::Result<Self> {
        let auth = auth.map(Arc::new);
        let innertube =
            InnertubeClient::new(http.clone(), innertube_base, config.upstream_timeout);
        let extractor =
            extractor_enabled.then(move || ExtractorStrategy::new(&config.extractor, http));

        let search = Arc::new(SearchService::build(&innertube));
        let resolver = SourceResolver::build(
            &innertube,
            auth.clone(),
            &config.relay_instances,
            config.upstream_timeout,
            extractor,
        );
        info!(
            strategies = ?resolver.strategy_names(),
            "stream strategies configured"
        );

        Ok(Self {
            metadata: Arc::new(MetadataResolver::build(&innertube, auth, search.clone())),
            resolver: Arc::new(resolver),
            search,
            images: Arc::new(ImageProxy::new(
                config.image_hosts.clone(),
                config.upstream_timeout,
            )?),
        })
    }
}

/// Shared client. Only connecting is bounded; media bodies may stream for as
/// long as the viewer watches.
pub fn http_client(config: &GatewayConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.upstream_timeout)
        .build()
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/resolve-info", get(resolve_info))
        .route("/api/info", get(resolve_info))
        .route("/resolve-stream", get(resolve_stream))
        .route("/api/stream", get(resolve_stream))
        .route("/search", get(search))
        .route("/api/search", get(search))
        .route("/proxy-image", get(proxy_image))
        .route("/api/image", get(proxy_image))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allowed_origins: Arc<HashSet<String>> =
        Arc::new(allowed_origins.iter().cloned().collect());
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed_origins.len(),
        allowed_origins
    );

    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(normalize_origin);
        let allowed = normalized
            .as_ref()
            .is_some_and(|value| allowed_origins.contains(value));
        debug!(
            "CORS origin check raw={:?} normalized={:?} allowed={}",
            origin, normalized, allowed
        );
        allowed
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET])
        .allow_headers(Any)
        .expose_headers([CONTENT_LENGTH, CONTENT_RANGE, ACCEPT_RANGES])
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoParams {
    video_id: Option<String>,
    proxy_images: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamParams {
    video_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    q: Option<String>,
    limit: Option<String>,
    proxy_images: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageParams {
    url: Option<String>,
}

fn parse_video_id(raw: Option<&str>) -> ApiResult<VideoId> {
    let raw = raw.ok_or_else(|| ApiError::bad_request("Missing videoId parameter"))?;
    VideoId::parse(raw).map_err(|error| ApiError::bad_request(error.to_string()))
}

/// Unrecognised values leave images untouched.
fn flag_enabled(raw: Option<&str>) -> bool {
    raw.and_then(parse_bool).unwrap_or(false)
}

fn proxy_summary_images(summary: &mut VideoSummary, hosts: &[String]) {
    summary.thumbnail_url = proxied_image_url(Some(&summary.thumbnail_url), hosts);
    summary.channel_avatar_url = summary
        .channel_avatar_url
        .as_deref()
        .map(|url| proxied_image_url(Some(url), hosts));
}

async fn resolve_info(
    State(state): State<AppState>,
    Query(params): Query<InfoParams>,
) -> ApiResult<Json<VideoDetails>> {
    let video_id = parse_video_id(params.video_id.as_deref())?;

    let mut details = state
        .metadata
        .resolve(&video_id)
        .await
        .map_err(|exhausted| info_error(&video_id, &exhausted))?;
    if flag_enabled(params.proxy_images.as_deref()) {
        proxy_summary_images(&mut details.summary, state.images.allowed_hosts());
    }

    Ok(Json(details))
}

async fn resolve_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<StreamParams>,
) -> ApiResult<Response> {
    let video_id = parse_video_id(params.video_id.as_deref())?;
    let kind = MediaKind::from_param(params.kind.as_deref());
    let range = headers
        .get(RANGE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    let request = StreamRequest {
        video_id,
        kind,
        range,
    };
    let source = state
        .resolver
        .resolve(&request)
        .await
        .map_err(|_| ApiError::all_strategies_failed(request.video_id.watch_url()))?;

    media_response(source, format!("{}:{}", request.video_id, kind.as_str()))
}

pub fn media_response(source: MediaSource, label: String) -> ApiResult<Response> {
    let status = if source.is_partial() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, source.content_type.as_str())
        .header(ACCEPT_RANGES, "bytes")
        .header(CACHE_CONTROL, "no-cache");
    if let Some(length) = source.content_length {
        builder = builder.header(CONTENT_LENGTH, length);
    }
    if let Some(range) = source.content_range.as_deref() {
        builder = builder.header(CONTENT_RANGE, range);
    }

    builder
        .body(Body::from_stream(TrackedStream::new(source.body, label)))
        .map_err(|error| ApiError::internal(format!("Failed to build stream response: {error}")))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResults>> {
    let text = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing search query"))?;
    let limit = params
        .limit
        .as_deref()
        .and_then(|value| value.trim().parse::<usize>().ok());

    let mut results = state
        .search
        .search(&SearchQuery::new(text, limit))
        .await
        .map_err(|_| ApiError::bad_gateway("Search failed"))?;
    if flag_enabled(params.proxy_images.as_deref()) {
        for video in &mut results.videos {
            proxy_summary_images(&mut video.summary, state.images.allowed_hosts());
        }
    }

    Ok(Json(results))
}

async fn proxy_image(
    State(state): State<AppState>,
    Query(params): Query<ImageParams>,
) -> ApiResult<Response> {
    let url = params
        .url
        .as_deref()
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing url parameter"))?;
    state.images.fetch(url).await
}
