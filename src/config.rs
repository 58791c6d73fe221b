use std::{path::PathBuf, time::Duration};

use anyhow::{Result, anyhow};
use url::Url;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
pub const DEFAULT_COOKIES_JSON: &str = "cookies.json";
pub const DEFAULT_COOKIES_TXT: &str = "cookies.txt";
pub const DEFAULT_TOKENS: &str = "tokens.json";
pub const DEFAULT_EXTRACTOR_BIN: &str = "yt-dlp";
pub const DEFAULT_EXTRACTOR_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 15;

pub const DEFAULT_RELAY_INSTANCES: [&str; 5] = [
    "https://inv.nadeko.net",
    "https://invidious.nerdvpn.de",
    "https://invidious.jing.rocks",
    "https://pipedapi.kavin.rocks",
    "https://pipedapi.syncpundit.io",
];

pub const DEFAULT_IMAGE_HOSTS: [&str; 4] = [
    "i.ytimg.com",
    "i9.ytimg.com",
    "yt3.ggpht.com",
    "lh3.googleusercontent.com",
];

const DEFAULT_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorMode {
    /// Relay the extractor's stdout directly.
    Pipe,
    /// Ask the extractor for a direct URL, then fetch it.
    Url,
}

impl ExtractorMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pipe" | "stdout" => Some(Self::Pipe),
            "url" | "direct" => Some(Self::Url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub binary: PathBuf,
    /// `None` means probe the binary at startup.
    pub enabled: Option<bool>,
    pub mode: ExtractorMode,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CredentialPaths {
    pub cookies_json: PathBuf,
    pub cookies_txt: PathBuf,
    pub tokens: PathBuf,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    pub credentials: CredentialPaths,
    pub relay_instances: Vec<String>,
    pub extractor: ExtractorConfig,
    pub upstream_timeout: Duration,
    pub image_hosts: Vec<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_var_string)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let allowed_origins = match lookup("ALLOWED_ORIGINS") {
            Some(raw) => split_list(&raw)
                .into_iter()
                .map(|origin| {
                    normalize_origin(&origin).ok_or_else(|| {
                        anyhow!(
                            "invalid origin in ALLOWED_ORIGINS: {origin}; use values like https://example.com"
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => DEFAULT_ORIGINS.iter().map(ToString::to_string).collect(),
        };

        let relay_instances = lookup("RELAY_INSTANCES")
            .map(|raw| {
                split_list(&raw)
                    .into_iter()
                    .map(|instance| instance.trim_end_matches('/').to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| {
                DEFAULT_RELAY_INSTANCES
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            });

        let mut image_hosts: Vec<String> = DEFAULT_IMAGE_HOSTS
            .iter()
            .map(ToString::to_string)
            .collect();
        if let Some(extra) = lookup("IMAGE_HOSTS") {
            for host in split_list(&extra) {
                let host = host.to_ascii_lowercase();
                if !image_hosts.contains(&host) {
                    image_hosts.push(host);
                }
            }
        }

        let extractor = ExtractorConfig {
            binary: lookup("EXTRACTOR_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXTRACTOR_BIN)),
            enabled: lookup("EXTRACTOR_ENABLED").and_then(|value| parse_bool(&value)),
            mode: lookup("EXTRACTOR_MODE")
                .and_then(|value| ExtractorMode::parse(&value))
                .unwrap_or(ExtractorMode::Pipe),
            timeout: Duration::from_secs(
                parse_positive(lookup("EXTRACTOR_TIMEOUT_SECS"))
                    .unwrap_or(DEFAULT_EXTRACTOR_TIMEOUT_SECS),
            ),
        };

        Ok(Self {
            bind_addr: resolve_bind_addr(&lookup),
            allowed_origins,
            credentials: CredentialPaths {
                cookies_json: path_or(&lookup, "COOKIES_JSON_PATH", DEFAULT_COOKIES_JSON),
                cookies_txt: path_or(&lookup, "COOKIES_TXT_PATH", DEFAULT_COOKIES_TXT),
                tokens: path_or(&lookup, "TOKENS_PATH", DEFAULT_TOKENS),
            },
            relay_instances,
            extractor,
            upstream_timeout: Duration::from_secs(
                parse_positive(lookup("UPSTREAM_TIMEOUT_SECS"))
                    .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            ),
            image_hosts,
        })
    }
}

fn resolve_bind_addr(lookup: &impl Fn(&str) -> Option<String>) -> String {
    if let Some(configured) = lookup("APP_ADDR") {
        return configured;
    }

    if let Some(port) = lookup("PORT").and_then(|value| value.parse::<u16>().ok()) {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

fn path_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> PathBuf {
    lookup(key)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn env_var_string(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_positive(value: Option<String>) -> Option<u64> {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };
    let port = parsed.port();

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    let include_port = port.is_some_and(|explicit| explicit != default_port);

    if include_port {
        Some(format!("{scheme}://{host}:{}", port?))
    } else {
        Some(format!("{scheme}://{host}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<GatewayConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.relay_instances.len(), DEFAULT_RELAY_INSTANCES.len());
        assert_eq!(config.extractor.mode, ExtractorMode::Pipe);
        assert_eq!(config.extractor.enabled, None);
        assert_eq!(config.credentials.tokens, PathBuf::from(DEFAULT_TOKENS));
        assert_eq!(
            config.upstream_timeout,
            Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS)
        );
        assert_eq!(config.allowed_origins, DEFAULT_ORIGINS);
    }

    #[test]
    fn app_addr_wins_over_port() {
        let config = config_from(&[("APP_ADDR", "10.0.0.1:9000"), ("PORT", "4000")]).unwrap();
        assert_eq!(config.bind_addr, "10.0.0.1:9000");
        let config = config_from(&[("PORT", "4000")]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:4000");
        let config = config_from(&[("PORT", "nope")]).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
    }

    #[test]
    fn relay_instances_are_trimmed() {
        let config =
            config_from(&[("RELAY_INSTANCES", " https://a.example/ , ,https://pipedapi.b ")])
                .unwrap();
        assert_eq!(
            config.relay_instances,
            vec!["https://a.example", "https://pipedapi.b"]
        );
    }

    #[test]
    fn extractor_settings_parse() {
        let config = config_from(&[
            ("EXTRACTOR_ENABLED", "off"),
            ("EXTRACTOR_MODE", "url"),
            ("EXTRACTOR_TIMEOUT_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.extractor.enabled, Some(false));
        assert_eq!(config.extractor.mode, ExtractorMode::Url);
        assert_eq!(
            config.extractor.timeout,
            Duration::from_secs(DEFAULT_EXTRACTOR_TIMEOUT_SECS)
        );
    }

    #[test]
    fn image_hosts_extend_defaults() {
        let config = config_from(&[("IMAGE_HOSTS", "I.YTIMG.COM, img.example")]).unwrap();
        assert_eq!(config.image_hosts.len(), DEFAULT_IMAGE_HOSTS.len() + 1);
        assert!(config.image_hosts.contains(&"img.example".to_string()));
    }

    #[test]
    fn invalid_origin_is_rejected() {
        let err = config_from(&[("ALLOWED_ORIGINS", "https://ok.example,not a url")]).unwrap_err();
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn normalize_origin_drops_default_port() {
        assert_eq!(
            normalize_origin("https://Example.com:443").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_origin("http://localhost:3000").as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(normalize_origin("https://example.com/path"), None);
        assert_eq!(normalize_origin("ftp://example.com"), None);
    }
}
