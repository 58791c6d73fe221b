use std::{io::ErrorKind, path::Path};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tracing::{info, warn};

use crate::{config::CredentialPaths, error::CredentialError};

pub const YOUTUBE_ORIGIN: &str = "https://www.youtube.com";

const SAPISID_COOKIES: [&str; 3] = ["SAPISID", "__Secure-3PAPISID", "__Secure-1PAPISID"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub domain: String,
    pub name: String,
    pub value: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default, rename = "expirationDate", deserialize_with = "deserialize_expiry")]
    pub expires: Option<DateTime<Utc>>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn deserialize_expiry<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let seconds = Option::<f64>::deserialize(deserializer)?;
    Ok(seconds.and_then(|value| DateTime::from_timestamp(value as i64, 0)))
}

impl Cookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    fn applies_to_youtube(&self) -> bool {
        let domain = self.domain.trim_start_matches('.').to_ascii_lowercase();
        domain == "youtube.com" || domain.ends_with(".youtube.com")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tokens {
    pub visitor_data: String,
    pub po_token: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub cookies: Vec<Cookie>,
    pub tokens: Option<Tokens>,
}

impl AuthContext {
    /// `None` when neither cookies nor tokens could be loaded.
    pub fn load(paths: &CredentialPaths) -> Option<Self> {
        let cookies = load_cookies(&paths.cookies_json, &paths.cookies_txt);
        let tokens = match load_tokens(&paths.tokens) {
            Ok(tokens) => tokens,
            Err(error) => {
                warn!("Error loading {}: {error}", paths.tokens.display());
                None
            }
        };

        if tokens.is_some() {
            info!("Loaded visitor data and proof token");
        }

        Self::from_parts(cookies, tokens)
    }

    pub fn from_parts(cookies: Vec<Cookie>, tokens: Option<Tokens>) -> Option<Self> {
        if cookies.is_empty() && tokens.is_none() {
            None
        } else {
            Some(Self { cookies, tokens })
        }
    }

    pub fn cookie_header(&self) -> Option<String> {
        let now = Utc::now();
        let pairs = self
            .cookies
            .iter()
            .filter(|cookie| cookie.applies_to_youtube() && !cookie.is_expired(now))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    fn sapisid(&self) -> Option<&str> {
        SAPISID_COOKIES.iter().find_map(|name| {
            self.cookies
                .iter()
                .find(|cookie| cookie.name == *name && cookie.applies_to_youtube())
                .map(|cookie| cookie.value.as_str())
        })
    }

    /// `SAPISIDHASH <ts>_<sha1(ts sapisid origin)>`, the header browsers send
    /// alongside session cookies on API calls.
    pub fn authorization_header(&self, now: DateTime<Utc>) -> Option<String> {
        let sapisid = self.sapisid()?;
        Some(sapisid_hash(sapisid, now.timestamp(), YOUTUBE_ORIGIN))
    }

    pub fn visitor_data(&self) -> Option<&str> {
        self.tokens.as_ref().map(|tokens| tokens.visitor_data.as_str())
    }

    pub fn po_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|tokens| tokens.po_token.as_str())
    }
}

pub fn sapisid_hash(sapisid: &str, timestamp: i64, origin: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{timestamp} {sapisid} {origin}").as_bytes());
    let digest = hasher.finalize();
    format!("SAPISIDHASH {timestamp}_{digest:x}")
}

/// JSON export wins over the tab-separated file when both are present.
pub fn load_cookies(json_path: &Path, txt_path: &Path) -> Vec<Cookie> {
    let now = Utc::now();

    match read_optional(json_path).and_then(|raw| match raw {
        Some(raw) => parse_json_cookies(&raw).map(Some),
        None => Ok(None),
    }) {
        Ok(Some(cookies)) => {
            let cookies = drop_expired(cookies, now);
            if !cookies.is_empty() {
                info!("Loaded {} cookies from {}", cookies.len(), json_path.display());
                return cookies;
            }
        }
        Ok(None) => {}
        Err(error) => warn!("Error loading {}: {error}", json_path.display()),
    }

    match read_optional(txt_path) {
        Ok(Some(raw)) => {
            let cookies = drop_expired(parse_netscape_cookies(&raw), now);
            if !cookies.is_empty() {
                info!("Loaded {} cookies from {}", cookies.len(), txt_path.display());
            }
            cookies
        }
        Ok(None) => Vec::new(),
        Err(error) => {
            warn!("Error loading {}: {error}", txt_path.display());
            Vec::new()
        }
    }
}

pub fn load_tokens(path: &Path) -> Result<Option<Tokens>, CredentialError> {
    let Some(raw) = read_optional(path)? else {
        return Ok(None);
    };

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RawTokens {
        visitor_data: Option<String>,
        po_token: Option<String>,
    }

    let parsed: RawTokens = serde_json::from_str(&raw)?;
    match (parsed.visitor_data, parsed.po_token) {
        (Some(visitor_data), Some(po_token))
            if !visitor_data.trim().is_empty() && !po_token.trim().is_empty() =>
        {
            Ok(Some(Tokens {
                visitor_data,
                po_token,
            }))
        }
        _ => Ok(None),
    }
}

pub fn parse_json_cookies(raw: &str) -> Result<Vec<Cookie>, CredentialError> {
    Ok(serde_json::from_str(raw)?)
}

/// Tab-separated browser export: domain, subdomains flag, path, secure,
/// expiry, name, value.
pub fn parse_netscape_cookies(raw: &str) -> Vec<Cookie> {
    let mut cookies = Vec::new();

    for line in raw.lines() {
        let (line, http_only) = match line.strip_prefix("#HttpOnly_") {
            Some(stripped) => (stripped, true),
            None => (line, false),
        };
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 7 {
            continue;
        }

        let expires = parts[4]
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|seconds| *seconds > 0)
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0));

        cookies.push(Cookie {
            domain: parts[0].to_string(),
            name: parts[5].to_string(),
            value: parts[6].trim().to_string(),
            path: parts[2].to_string(),
            secure: parts[3] == "TRUE",
            http_only,
            expires,
        });
    }

    cookies
}

fn drop_expired(cookies: Vec<Cookie>, now: DateTime<Utc>) -> Vec<Cookie> {
    cookies
        .into_iter()
        .filter(|cookie| !cookie.is_expired(now))
        .collect()
}

fn read_optional(path: &Path) -> Result<Option<String>, CredentialError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}
