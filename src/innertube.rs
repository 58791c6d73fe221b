//! Direct access to the upstream platform's internal JSON API.
//!
//! Each [`ClientProfile`] impersonates a different first-party client so that
//! one blocked signature does not take the whole direct tier down with it.

use std::{sync::LazyLock, time::Duration};

use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    credentials::{AuthContext, YOUTUBE_ORIGIN},
    error::AttemptError,
    model::VideoId,
};

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const IOS_USER_AGENT: &str =
    "com.google.ios.youtube/19.29.1 (iPhone16,2; U; CPU iOS 17_5_1 like Mac OS X;)";
const ANDROID_USER_AGENT: &str =
    "com.google.android.youtube/19.29.37 (Linux; U; Android 11) gzip";

/// Filter for the results page: videos only.
const VIDEO_FILTER_PARAM: &str = "EgIQAQ%3D%3D";
const VIDEO_FILTER_PARAM_DECODED: &str = "EgIQAQ==";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProfile {
    Web,
    Ios,
    Android,
}

impl ClientProfile {
    pub const ALL: [ClientProfile; 3] = [Self::Web, Self::Ios, Self::Android];

    pub fn label(self) -> &'static str {
        match self {
            Self::Web => "WEB",
            Self::Ios => "IOS",
            Self::Android => "ANDROID",
        }
    }

    pub fn user_agent(self) -> &'static str {
        match self {
            Self::Web => DESKTOP_USER_AGENT,
            Self::Ios => IOS_USER_AGENT,
            Self::Android => ANDROID_USER_AGENT,
        }
    }

    fn client_version(self) -> &'static str {
        match self {
            Self::Web => "2.20240726.00.00",
            Self::Ios => "19.29.1",
            Self::Android => "19.29.37",
        }
    }

    /// Numeric id sent in `X-YouTube-Client-Name`.
    fn client_id(self) -> &'static str {
        match self {
            Self::Web => "1",
            Self::Ios => "5",
            Self::Android => "3",
        }
    }

    fn context(self, visitor_data: Option<&str>) -> Value {
        let mut client = match self {
            Self::Web => json!({
                "clientName": "WEB",
                "clientVersion": self.client_version(),
                "userAgent": self.user_agent(),
            }),
            Self::Ios => json!({
                "clientName": "IOS",
                "clientVersion": self.client_version(),
                "deviceMake": "Apple",
                "deviceModel": "iPhone16,2",
                "osName": "iPhone",
                "osVersion": "17.5.1.21F90",
                "userAgent": self.user_agent(),
            }),
            Self::Android => json!({
                "clientName": "ANDROID",
                "clientVersion": self.client_version(),
                "androidSdkVersion": 30,
                "osName": "Android",
                "osVersion": "11",
                "userAgent": self.user_agent(),
            }),
        };
        client["hl"] = json!("en");
        client["gl"] = json!("US");
        if let Some(visitor_data) = visitor_data {
            client["visitorData"] = json!(visitor_data);
        }
        json!({ "client": client })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayabilityStatus {
    pub status: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFormat {
    pub itag: u32,
    pub url: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub bitrate: u64,
    pub quality_label: Option<String>,
    pub content_length: Option<String>,
    pub height: Option<u32>,
}

impl RawFormat {
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
            .as_deref()
            .and_then(|value| value.parse().ok())
    }

    /// `video/mp4; codecs="..."` becomes `video/mp4`.
    pub fn mime_essence(&self) -> Option<&str> {
        let essence = self.mime_type.split(';').next()?.trim();
        if essence.is_empty() {
            None
        } else {
            Some(essence)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingData {
    /// Progressive (muxed audio+video) formats.
    #[serde(default)]
    pub formats: Vec<RawFormat>,
    #[serde(default)]
    pub adaptive_formats: Vec<RawFormat>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ThumbnailList {
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerVideoDetails {
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    pub length_seconds: Option<String>,
    pub channel_id: Option<String>,
    pub author: Option<String>,
    pub short_description: Option<String>,
    pub view_count: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub thumbnail: ThumbnailList,
    #[serde(default)]
    pub is_live_content: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMicroformat {
    pub publish_date: Option<String>,
    pub category: Option<String>,
    pub owner_channel_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Microformat {
    pub player_microformat_renderer: Option<PlayerMicroformat>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResponse {
    #[serde(default)]
    pub playability_status: PlayabilityStatus,
    pub streaming_data: Option<StreamingData>,
    pub video_details: Option<PlayerVideoDetails>,
    pub microformat: Option<Microformat>,
}

impl PlayerResponse {
    /// Anything but `OK` is an upstream refusal, carrying its reason text.
    pub fn ensure_playable(&self) -> Result<(), AttemptError> {
        let status = self.playability_status.status.as_deref().unwrap_or("");
        if status == "OK" {
            return Ok(());
        }
        Err(AttemptError::Unplayable {
            status: if status.is_empty() {
                "UNKNOWN".to_string()
            } else {
                status.to_string()
            },
            reason: self
                .playability_status
                .reason
                .clone()
                .unwrap_or_else(|| "Video unavailable".to_string()),
        })
    }
}

#[derive(Clone)]
pub struct InnertubeClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl InnertubeClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub async fn player(
        &self,
        video_id: &VideoId,
        profile: ClientProfile,
        auth: Option<&AuthContext>,
    ) -> Result<PlayerResponse, AttemptError> {
        let mut body = json!({
            "context": profile.context(auth.and_then(AuthContext::visitor_data)),
            "videoId": video_id.as_str(),
            "contentCheckOk": true,
            "racyCheckOk": true,
        });
        if let Some(po_token) = auth.and_then(AuthContext::po_token) {
            body["serviceIntegrityDimensions"] = json!({ "poToken": po_token });
        }

        let url = format!("{}/youtubei/v1/player?prettyPrint=false", self.base_url);
        let response = self.api_request(&url, profile, auth).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(AttemptError::Status(response.status()));
        }

        Ok(response.json().await?)
    }

    /// First page of results as the upstream's initial-data JSON, scraped from
    /// the HTML results page.
    pub async fn search_results_page(&self, query: &str) -> Result<Value, AttemptError> {
        let url = format!(
            "{}/results?search_query={}&sp={VIDEO_FILTER_PARAM}",
            self.base_url,
            urlencoding::encode(query)
        );
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .header("User-Agent", DESKTOP_USER_AGENT)
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AttemptError::Status(response.status()));
        }

        let html = response.text().await?;
        extract_initial_data(&html)
    }

    pub async fn search_api(&self, query: &str) -> Result<Value, AttemptError> {
        self.search_request(json!({
            "context": ClientProfile::Web.context(None),
            "query": query,
            "params": VIDEO_FILTER_PARAM_DECODED,
        }))
        .await
    }

    pub async fn search_continuation(&self, token: &str) -> Result<Value, AttemptError> {
        self.search_request(json!({
            "context": ClientProfile::Web.context(None),
            "continuation": token,
        }))
        .await
    }

    async fn search_request(&self, body: Value) -> Result<Value, AttemptError> {
        let url = format!("{}/youtubei/v1/search?prettyPrint=false", self.base_url);
        let response = self
            .api_request(&url, ClientProfile::Web, None)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AttemptError::Status(response.status()));
        }
        Ok(response.json().await?)
    }

    fn api_request(
        &self,
        url: &str,
        profile: ClientProfile,
        auth: Option<&AuthContext>,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(url)
            .timeout(self.timeout)
            .header("User-Agent", profile.user_agent())
            .header("X-YouTube-Client-Name", profile.client_id())
            .header("X-YouTube-Client-Version", profile.client_version())
            .header("Origin", YOUTUBE_ORIGIN);

        if let Some(auth) = auth {
            if let Some(cookie) = auth.cookie_header() {
                request = request.header("Cookie", cookie);
            }
            if let Some(authorization) = auth.authorization_header(Utc::now()) {
                request = request
                    .header("Authorization", authorization)
                    .header("X-Origin", YOUTUBE_ORIGIN);
            }
            if let Some(visitor_data) = auth.visitor_data() {
                request = request.header("X-Goog-Visitor-Id", visitor_data);
            }
        }

        request
    }
}

static INITIAL_DATA_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)(?:var\s+ytInitialData|window\[.ytInitialData.\])\s*=\s*(\{.+?\});\s*</script>",
    )
    .expect("Should be able to parse the initial data regex")
});

pub fn extract_initial_data(html: &str) -> Result<Value, AttemptError> {
    let captures = INITIAL_DATA_REGEX
        .captures(html)
        .ok_or_else(|| AttemptError::Parse("initial data not found in results page".into()))?;
    let raw = captures
        .get(1)
        .map(|capture| capture.as_str())
        .ok_or_else(|| AttemptError::Parse("initial data not found in results page".into()))?;
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_carry_distinct_signatures() {
        let agents = ClientProfile::ALL.map(ClientProfile::user_agent);
        assert_ne!(agents[0], agents[1]);
        assert_ne!(agents[1], agents[2]);

        let context = ClientProfile::Ios.context(Some("visitor"));
        assert_eq!(context["client"]["clientName"], "IOS");
        assert_eq!(context["client"]["visitorData"], "visitor");
        assert!(ClientProfile::Web.context(None)["client"]["visitorData"].is_null());
    }

    #[test]
    fn player_response_reports_unplayable_reason() {
        let response: PlayerResponse = serde_json::from_value(json!({
            "playabilityStatus": {"status": "ERROR", "reason": "Video unavailable"}
        }))
        .unwrap();
        let err = response.ensure_playable().unwrap_err();
        assert_eq!(err.to_string(), "ERROR: Video unavailable");

        let ok: PlayerResponse =
            serde_json::from_value(json!({"playabilityStatus": {"status": "OK"}})).unwrap();
        assert!(ok.ensure_playable().is_ok());
    }

    #[test]
    fn raw_format_helpers() {
        let format: RawFormat = serde_json::from_value(json!({
            "itag": 18,
            "mimeType": "video/mp4; codecs=\"avc1.42001E, mp4a.40.2\"",
            "contentLength": "12345",
            "bitrate": 500000
        }))
        .unwrap();
        assert_eq!(format.mime_essence(), Some("video/mp4"));
        assert_eq!(format.content_length(), Some(12345));
        assert!(format.url.is_none());
    }

    #[test]
    fn extracts_initial_data_from_html() {
        let html = r#"<html><script nonce="x">var ytInitialData = {"contents": {"a": "};"}};</script><script>other()</script>"#;
        let data = extract_initial_data(html).unwrap();
        assert_eq!(data["contents"]["a"], "};");

        assert!(extract_initial_data("<html></html>").is_err());
    }

    #[test]
    fn initial_data_pattern_is_reused_across_pages() {
        for n in 0..3 {
            let html = format!(
                r#"<script>window["ytInitialData"] = {{"page": {n}}};</script>"#
            );
            assert_eq!(extract_initial_data(&html).unwrap()["page"], n);
        }
        assert!(matches!(
            extract_initial_data("<script>var ytInitialData = {broken};</script>"),
            Err(AttemptError::Parse(_))
        ));
    }
}
