use std::time::Duration;

use axum::{
    body::Body,
    http::{
        HeaderValue,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use reqwest::redirect::Policy;
use tracing::warn;
use url::Url;

use crate::{
    error::{ApiError, ApiResult},
    innertube::DESKTOP_USER_AGENT,
    media::MEDIA_REFERER,
};

pub const IMAGE_RELAY_PATH: &str = "/proxy-image";
pub const PLACEHOLDER_IMAGE: &str = "/placeholder.jpg";
const IMAGE_CACHE_CONTROL: &str = "public, max-age=86400";

/// Exact host or any subdomain of it.
pub fn host_allowed(host: &str, allowed: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    allowed.iter().any(|candidate| {
        host == *candidate
            || host
                .strip_suffix(candidate.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

pub fn url_allowed(url: &Url, allowed: &[String]) -> bool {
    matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some_and(|host| host_allowed(host, allowed))
}

/// Rewrites allow-listed image URLs to go through the relay. Local and
/// `data:` URLs pass through; a missing URL becomes the placeholder.
pub fn proxied_image_url(url: Option<&str>, allowed: &[String]) -> String {
    let Some(url) = url.filter(|url| !url.is_empty()) else {
        return PLACEHOLDER_IMAGE.to_string();
    };
    if url.starts_with('/') || url.starts_with("data:") {
        return url.to_string();
    }
    match Url::parse(url) {
        Ok(parsed) if url_allowed(&parsed, allowed) => {
            format!("{IMAGE_RELAY_PATH}?url={}", urlencoding::encode(url))
        }
        _ => url.to_string(),
    }
}

const MAX_IMAGE_REDIRECTS: usize = 5;

/// Client whose redirects must stay on the allow-list too.
fn image_client(
    allowed_hosts: Vec<String>,
    timeout: Duration,
) -> reqwest::Result<reqwest::Client> {
    let policy = Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_IMAGE_REDIRECTS {
            attempt.error("too many redirects")
        } else if url_allowed(attempt.url(), &allowed_hosts) {
            attempt.follow()
        } else {
            let message = format!(
                "redirect to {} is outside the image allow-list",
                attempt.url().host_str().unwrap_or("<no host>")
            );
            attempt.error(message)
        }
    });

    reqwest::Client::builder()
        .connect_timeout(timeout)
        .redirect(policy)
        .build()
}

pub struct ImageProxy {
    http: reqwest::Client,
    allowed_hosts: Vec<String>,
    timeout: Duration,
}

impl ImageProxy {
    pub fn new(allowed_hosts: Vec<String>, timeout: Duration) -> reqwest::Result<Self> {
        let allowed_hosts: Vec<String> = allowed_hosts
            .into_iter()
            .map(|host| host.to_ascii_lowercase())
            .collect();
        Ok(Self {
            http: image_client(allowed_hosts.clone(), timeout)?,
            allowed_hosts,
            timeout,
        })
    }

    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    /// Rejects anything off the allow-list before any network activity.
    pub fn validate(&self, raw: &str) -> ApiResult<Url> {
        let url = Url::parse(raw).map_err(|_| ApiError::bad_request("Invalid url parameter"))?;
        if !url_allowed(&url, &self.allowed_hosts) {
            return Err(ApiError::bad_request("Invalid image host"));
        }
        Ok(url)
    }

    pub async fn fetch(&self, raw: &str) -> ApiResult<Response> {
        let url = self.validate(raw)?;

        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .header("User-Agent", DESKTOP_USER_AGENT)
            .header("Accept", "image/*")
            .header("Referer", MEDIA_REFERER)
            .send()
            .await
            .map_err(|error| {
                warn!(error = %error, "image fetch failed");
                if error.is_redirect() {
                    ApiError::bad_request("Invalid image host")
                } else {
                    ApiError::internal("Image proxy error")
                }
            })?;

        if !response.status().is_success() {
            return Err(ApiError::upstream_status(
                response.status(),
                "Failed to fetch image",
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| HeaderValue::from_str(value).ok())
            .unwrap_or_else(|| HeaderValue::from_static("image/jpeg"));
        let content_length = response.content_length();

        let mut relayed = Body::from_stream(response.bytes_stream().map_err(std::io::Error::other))
            .into_response();
        let headers = relayed.headers_mut();
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(IMAGE_CACHE_CONTROL));
        if let Some(length) = content_length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }
        Ok(relayed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::{
        Router,
        body::to_bytes,
        extract::State,
        http::{StatusCode, header},
        response::Redirect,
        routing::get,
    };
    use tokio::net::TcpListener;

    use super::*;
    use crate::config::DEFAULT_IMAGE_HOSTS;

    fn defaults() -> Vec<String> {
        DEFAULT_IMAGE_HOSTS.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn host_matching_is_exact_or_subdomain() {
        let allowed = defaults();
        assert!(host_allowed("i.ytimg.com", &allowed));
        assert!(host_allowed("I.YTIMG.COM", &allowed));
        assert!(host_allowed("a.yt3.ggpht.com", &allowed));
        assert!(!host_allowed("evil-i.ytimg.com", &allowed));
        assert!(!host_allowed("i.ytimg.com.evil.example", &allowed));
        assert!(!host_allowed("example.com", &allowed));
    }

    #[test]
    fn rewrites_only_allow_listed_urls() {
        let allowed = defaults();
        assert_eq!(proxied_image_url(None, &allowed), PLACEHOLDER_IMAGE);
        assert_eq!(proxied_image_url(Some("/local.png"), &allowed), "/local.png");
        assert_eq!(
            proxied_image_url(Some("data:image/png;base64,AAAA"), &allowed),
            "data:image/png;base64,AAAA"
        );
        assert_eq!(
            proxied_image_url(Some("https://i.ytimg.com/vi/x/hq.jpg"), &allowed),
            "/proxy-image?url=https%3A%2F%2Fi.ytimg.com%2Fvi%2Fx%2Fhq.jpg"
        );
        assert_eq!(
            proxied_image_url(Some("https://cdn.example/a.jpg"), &allowed),
            "https://cdn.example/a.jpg"
        );
        assert_eq!(proxied_image_url(Some("not a url"), &allowed), "not a url");
    }

    async fn serve_images() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/thumb.webp",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    ([(header::CONTENT_TYPE, "image/webp")], vec![1_u8, 2, 3])
                }),
            )
            .route(
                "/plain",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Body::from(vec![9_u8])
                }),
            )
            .route(
                "/hop",
                get(|| async { Redirect::temporary("/thumb.webp") }),
            )
            .route(
                "/away",
                get(|| async { Redirect::temporary("http://localhost:9/x.jpg") }),
            )
            .route(
                "/missing",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::NOT_FOUND
                }),
            )
            .with_state(hits.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, hits)
    }

    fn proxy(hosts: &[&str]) -> ImageProxy {
        ImageProxy::new(
            hosts.iter().map(ToString::to_string).collect(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn relays_allowed_image_with_cache_header() {
        let (base, hits) = serve_images().await;
        let proxy = proxy(&["127.0.0.1"]);

        let response = proxy.fetch(&format!("{base}/thumb.webp")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "public, max-age=86400"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &[1, 2, 3]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn defaults_to_jpeg_and_mirrors_upstream_status() {
        let (base, _) = serve_images().await;
        let proxy = proxy(&["127.0.0.1"]);

        let response = proxy.fetch(&format!("{base}/plain")).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

        let err = proxy.fetch(&format!("{base}/missing")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn disallowed_host_is_rejected_without_fetch() {
        let (base, hits) = serve_images().await;
        let proxy = proxy(&["i.ytimg.com"]);

        let err = proxy.fetch(&format!("{base}/thumb.webp")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err = proxy.fetch("ftp://i.ytimg.com/x.jpg").await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err = proxy.fetch("::not a url::").await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn redirects_stay_on_the_allow_list() {
        let (base, hits) = serve_images().await;
        let proxy = proxy(&["127.0.0.1"]);

        let response = proxy.fetch(&format!("{base}/hop")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let err = proxy.fetch(&format!("{base}/away")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn transport_failure_is_internal_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let proxy = proxy(&["127.0.0.1"]);
        let err = proxy.fetch(&format!("http://{addr}/x.jpg")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
