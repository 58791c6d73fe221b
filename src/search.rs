use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::AttemptError,
    innertube::InnertubeClient,
    model::{SearchResults, SearchVideo, VideoSummary, default_thumbnail, is_valid_video_id},
    strategy::{Exhausted, Strategy, StrategyList, run_strategies},
};

pub const MAX_RESULTS: usize = 50;
pub const DEFAULT_LIMIT: usize = 20;
/// Continuation requests allowed after the first page.
pub const MAX_CONTINUATION_PAGES: usize = 4;

const LIVE_BADGE: &str = "BADGE_STYLE_TYPE_LIVE_NOW";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    /// Already capped at [`MAX_RESULTS`].
    pub limit: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, requested: Option<usize>) -> Self {
        Self {
            text: text.into(),
            limit: requested.unwrap_or(DEFAULT_LIMIT).min(MAX_RESULTS),
        }
    }
}

/// `"12:34"` → 754, `"1:23:45"` → 5025. Anything else → 0.
pub fn parse_duration(text: &str) -> u64 {
    let parts: Option<Vec<u64>> = text
        .trim()
        .split(':')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect();

    let total = match parts.as_deref() {
        Some([hours, minutes, seconds]) => hours
            .checked_mul(3600)
            .and_then(|total| total.checked_add(minutes.checked_mul(60)?))
            .and_then(|total| total.checked_add(*seconds)),
        Some([minutes, seconds]) => minutes
            .checked_mul(60)
            .and_then(|total| total.checked_add(*seconds)),
        _ => None,
    };
    total.unwrap_or(0)
}

/// `"1.2M views"` → 1_200_000, `"1,234 views"` → 1234. Unparsable → 0.
pub fn parse_view_count(text: &str) -> u64 {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | 'K' | 'M' | 'B' | 'k' | 'm' | 'b'))
        .collect();

    let numeric: String = cleaned
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let Some(value) = leading_float(&numeric) else {
        return 0;
    };

    let upper = cleaned.to_ascii_uppercase();
    let multiplier = if upper.contains('B') {
        1e9
    } else if upper.contains('M') {
        1e6
    } else if upper.contains('K') {
        1e3
    } else {
        return value.floor() as u64;
    };
    (value * multiplier).round() as u64
}

/// Longest prefix that parses as a float (`"1.2.3"` → 1.2).
fn leading_float(text: &str) -> Option<f64> {
    (1..=text.len())
        .rev()
        .find_map(|end| text[..end].parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

#[derive(Debug, Default)]
pub struct SearchPage {
    pub videos: Vec<SearchVideo>,
    pub continuation: Option<String>,
    pub estimated_results: Option<u64>,
}

/// Collects every `videoRenderer` and the continuation token from either an
/// initial-data document or a continuation response.
pub fn parse_search_page(data: &Value) -> SearchPage {
    let mut page = SearchPage {
        estimated_results: data["estimatedResults"]
            .as_str()
            .and_then(|value| value.parse().ok())
            .or_else(|| data["estimatedResults"].as_u64()),
        ..SearchPage::default()
    };
    scan(data, &mut page);
    page
}

fn scan(node: &Value, page: &mut SearchPage) {
    match node {
        Value::Object(map) => {
            if let Some(renderer) = map.get("videoRenderer") {
                if let Some(video) = parse_video_renderer(renderer) {
                    page.videos.push(video);
                }
                return;
            }
            if let Some(token) = map
                .get("continuationItemRenderer")
                .and_then(|item| item.pointer("/continuationEndpoint/continuationCommand/token"))
                .and_then(Value::as_str)
            {
                page.continuation = Some(token.to_string());
                return;
            }
            for value in map.values() {
                scan(value, page);
            }
        }
        Value::Array(items) => {
            for item in items {
                scan(item, page);
            }
        }
        _ => {}
    }
}

fn text_of(value: &Value) -> Option<String> {
    if let Some(simple) = value["simpleText"].as_str() {
        return Some(simple.to_string());
    }
    let runs = value["runs"].as_array()?;
    let joined: String = runs.iter().filter_map(|run| run["text"].as_str()).collect();
    if joined.is_empty() { None } else { Some(joined) }
}

pub fn parse_video_renderer(renderer: &Value) -> Option<SearchVideo> {
    let video_id = renderer["videoId"].as_str().filter(|id| is_valid_video_id(id))?;

    let title = renderer
        .pointer("/title/runs/0/text")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| text_of(&renderer["title"]))
        .unwrap_or_default();

    let thumbnail_url = renderer
        .pointer("/thumbnail/thumbnails")
        .and_then(Value::as_array)
        .and_then(|thumbnails| thumbnails.last())
        .and_then(|thumbnail| thumbnail["url"].as_str())
        .map(ToString::to_string)
        .unwrap_or_else(|| default_thumbnail(video_id));

    let owner = renderer
        .pointer("/ownerText/runs/0")
        .or_else(|| renderer.pointer("/longBylineText/runs/0"));
    let channel_name = owner
        .and_then(|run| run["text"].as_str())
        .unwrap_or("Unknown")
        .to_string();
    let channel_id = owner
        .and_then(|run| run.pointer("/navigationEndpoint/browseEndpoint/browseId"))
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let channel_avatar_url = renderer
        .pointer("/channelThumbnailSupportedRenderers/channelThumbnailWithLinkRenderer/thumbnail/thumbnails/0/url")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let duration_text = text_of(&renderer["lengthText"]).unwrap_or_else(|| "0:00".to_string());
    let view_count_text =
        text_of(&renderer["viewCountText"]).unwrap_or_else(|| "0 views".to_string());
    let published_at = text_of(&renderer["publishedTimeText"]);

    let is_live = renderer["badges"].as_array().is_some_and(|badges| {
        badges
            .iter()
            .any(|badge| badge.pointer("/metadataBadgeRenderer/style").and_then(Value::as_str) == Some(LIVE_BADGE))
    });

    let description = renderer
        .pointer("/detailedMetadataSnippets/0/snippetText")
        .and_then(text_of)
        .unwrap_or_default();

    Some(SearchVideo {
        summary: VideoSummary {
            video_id: video_id.to_string(),
            title,
            thumbnail_url,
            channel_id,
            channel_name,
            channel_avatar_url,
            duration_seconds: parse_duration(&duration_text),
            view_count: parse_view_count(&view_count_text),
            published_at,
            is_live,
        },
        duration_text,
        view_count_text,
        description,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FirstPage {
    /// Scrape the HTML results page.
    ResultsPage,
    /// Ask the search API directly.
    Api,
}

pub struct SearchStrategy {
    first_page: FirstPage,
    innertube: InnertubeClient,
}

impl SearchStrategy {
    pub fn results_page(innertube: InnertubeClient) -> Self {
        Self {
            first_page: FirstPage::ResultsPage,
            innertube,
        }
    }

    pub fn api(innertube: InnertubeClient) -> Self {
        Self {
            first_page: FirstPage::Api,
            innertube,
        }
    }
}

#[async_trait]
impl Strategy<SearchQuery, SearchResults> for SearchStrategy {
    fn name(&self) -> &str {
        match self.first_page {
            FirstPage::ResultsPage => "search:results-page",
            FirstPage::Api => "search:api",
        }
    }

    async fn attempt(&self, query: &SearchQuery) -> Result<SearchResults, AttemptError> {
        let data = match self.first_page {
            FirstPage::ResultsPage => self.innertube.search_results_page(&query.text).await?,
            FirstPage::Api => self.innertube.search_api(&query.text).await?,
        };
        let first = parse_search_page(&data);

        let mut seen = HashSet::new();
        let mut videos = Vec::new();
        let mut absorb = |page_videos: Vec<SearchVideo>, videos: &mut Vec<SearchVideo>| {
            for video in page_videos {
                if seen.insert(video.summary.video_id.clone()) {
                    videos.push(video);
                }
            }
        };
        absorb(first.videos, &mut videos);

        let mut continuation = first.continuation;
        let mut pages = 0;
        while videos.len() < query.limit && pages < MAX_CONTINUATION_PAGES {
            let Some(token) = continuation.take() else {
                break;
            };
            pages += 1;
            match self.innertube.search_continuation(&token).await {
                Ok(data) => {
                    let page = parse_search_page(&data);
                    debug!(page = pages, found = page.videos.len(), "search continuation");
                    absorb(page.videos, &mut videos);
                    continuation = page.continuation;
                }
                Err(error) => {
                    warn!(error = %error, "search continuation failed; returning partial results");
                    break;
                }
            }
        }

        videos.truncate(query.limit);
        Ok(SearchResults {
            query: query.text.clone(),
            total_results: first.estimated_results.unwrap_or(videos.len() as u64),
            videos,
        })
    }
}

pub struct SearchService {
    strategies: StrategyList<SearchQuery, SearchResults>,
}

impl SearchService {
    pub fn new(strategies: StrategyList<SearchQuery, SearchResults>) -> Self {
        Self { strategies }
    }

    pub fn build(innertube: &InnertubeClient) -> Self {
        Self::new(vec![
            Arc::new(SearchStrategy::results_page(innertube.clone())),
            Arc::new(SearchStrategy::api(innertube.clone())),
        ])
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResults, Exhausted> {
        run_strategies("search", &query.text, &self.strategies, query).await
    }
}
