use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    credentials::AuthContext,
    error::{ApiError, AttemptError, UpstreamClass},
    innertube::{ClientProfile, InnertubeClient, PlayerResponse},
    model::{VideoDetails, VideoId, VideoSummary},
    search::{SearchQuery, SearchService},
    strategy::{Exhausted, Strategy, StrategyList, run_strategies},
};

/// Search results scanned for the exact id in the fallback tier.
const FALLBACK_SEARCH_LIMIT: usize = 10;

pub fn details_from_player(video_id: &VideoId, player: PlayerResponse) -> Option<VideoDetails> {
    let details = player.video_details?;
    let microformat = player
        .microformat
        .and_then(|microformat| microformat.player_microformat_renderer)
        .unwrap_or_default();

    let thumbnail_url = details
        .thumbnail
        .thumbnails
        .last()
        .map(|thumbnail| thumbnail.url.clone())
        .unwrap_or_else(|| video_id.default_thumbnail());
    let channel_name = details
        .author
        .or(microformat.owner_channel_name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    Some(VideoDetails {
        summary: VideoSummary {
            video_id: video_id.to_string(),
            title: details.title,
            thumbnail_url,
            channel_id: details.channel_id,
            channel_name,
            channel_avatar_url: None,
            duration_seconds: parse_count(details.length_seconds.as_deref()),
            view_count: parse_count(details.view_count.as_deref()),
            published_at: microformat.publish_date,
            is_live: details.is_live_content,
        },
        description: details.short_description.unwrap_or_default(),
        keywords: details.keywords,
        category: microformat.category,
    })
}

fn parse_count(value: Option<&str>) -> u64 {
    value.and_then(|value| value.parse().ok()).unwrap_or(0)
}

pub struct DirectInfoStrategy {
    name: &'static str,
    innertube: InnertubeClient,
    auth: Option<Arc<AuthContext>>,
}

impl DirectInfoStrategy {
    pub fn new(innertube: InnertubeClient, auth: Option<Arc<AuthContext>>) -> Self {
        Self {
            name: if auth.is_some() {
                "info:direct-auth"
            } else {
                "info:direct"
            },
            innertube,
            auth,
        }
    }
}

#[async_trait]
impl Strategy<VideoId, VideoDetails> for DirectInfoStrategy {
    fn name(&self) -> &str {
        self.name
    }

    async fn attempt(&self, video_id: &VideoId) -> Result<VideoDetails, AttemptError> {
        let player = self
            .innertube
            .player(video_id, ClientProfile::Web, self.auth.as_deref())
            .await?;
        player.ensure_playable()?;
        details_from_player(video_id, player)
            .ok_or_else(|| AttemptError::Parse("player response has no video details".into()))
    }
}

/// Searches for the id itself and keeps the first exact match.
pub struct SearchFallbackStrategy {
    search: Arc<SearchService>,
}

impl SearchFallbackStrategy {
    pub fn new(search: Arc<SearchService>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Strategy<VideoId, VideoDetails> for SearchFallbackStrategy {
    fn name(&self) -> &str {
        "info:search-fallback"
    }

    async fn attempt(&self, video_id: &VideoId) -> Result<VideoDetails, AttemptError> {
        let query = SearchQuery::new(video_id.as_str(), Some(FALLBACK_SEARCH_LIMIT));
        let results = self.search.search(&query).await.map_err(|exhausted| {
            exhausted
                .failures
                .into_iter()
                .next()
                .map(|failure| failure.error)
                .unwrap_or(AttemptError::NoFormat)
        })?;

        let video = results
            .videos
            .into_iter()
            .find(|video| video.summary.video_id == video_id.as_str())
            .ok_or_else(|| AttemptError::Parse("no exact match in search results".into()))?;

        Ok(VideoDetails {
            summary: video.summary,
            description: video.description,
            keywords: Vec::new(),
            category: None,
        })
    }
}

pub struct MetadataResolver {
    strategies: StrategyList<VideoId, VideoDetails>,
}

impl MetadataResolver {
    pub fn new(strategies: StrategyList<VideoId, VideoDetails>) -> Self {
        Self { strategies }
    }

    pub fn build(
        innertube: &InnertubeClient,
        auth: Option<Arc<AuthContext>>,
        search: Arc<SearchService>,
    ) -> Self {
        let mut strategies: StrategyList<VideoId, VideoDetails> = Vec::new();
        if auth.is_some() {
            strategies.push(Arc::new(DirectInfoStrategy::new(innertube.clone(), auth)));
        }
        strategies.push(Arc::new(DirectInfoStrategy::new(innertube.clone(), None)));
        strategies.push(Arc::new(SearchFallbackStrategy::new(search)));
        Self::new(strategies)
    }

    pub async fn resolve(&self, video_id: &VideoId) -> Result<VideoDetails, Exhausted> {
        run_strategies("info", video_id.as_str(), &self.strategies, video_id).await
    }
}

/// The first failure decides: unavailable → 404, restricted → 403, else 502.
pub fn info_error(video_id: &VideoId, exhausted: &Exhausted) -> ApiError {
    match exhausted.first_class() {
        UpstreamClass::Unavailable => ApiError::not_available(video_id.watch_url()),
        UpstreamClass::Restricted => ApiError::restricted(video_id.watch_url()),
        UpstreamClass::Other => ApiError::bad_gateway("Failed to fetch video info"),
    }
}
