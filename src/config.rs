use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::poll::PollPolicy;

pub const DEFAULT_DEBRID_BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_POLL_MAX_ATTEMPTS: usize = 10;
const DEFAULT_UPLOAD_SETTLE_MS: u64 = 4_000;
const DEFAULT_MAX_TORRENT_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("environment variable {name} is not a valid URL: {value}")]
    InvalidUrl { name: &'static str, value: String },
}

/// Runtime settings, sourced from the process environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub debrid_base_url: String,
    pub debrid_api_key: String,
    pub proxy_base_url: String,
    pub proxy_token: String,
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    pub poll_policy: PollPolicy,
    pub upload_settle: Duration,
    pub max_torrent_bytes: usize,
    pub http_timeout: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let debrid_base_url = read_url_env("DEBRID_BASE_URL")?
            .unwrap_or_else(|| DEFAULT_DEBRID_BASE_URL.to_string());
        let debrid_api_key = read_string_env("REAL_DEBRID_API_KEY")
            .ok_or(ConfigError::Missing("REAL_DEBRID_API_KEY"))?;
        let proxy_base_url = read_url_env("STREMTHRU_BASE_URL")?
            .ok_or(ConfigError::Missing("STREMTHRU_BASE_URL"))?;
        let proxy_token =
            read_string_env("STREMTHRU_TOKEN").ok_or(ConfigError::Missing("STREMTHRU_TOKEN"))?;

        let poll_policy = PollPolicy::new(
            Duration::from_millis(
                read_u64_env("POLL_INTERVAL_MS").unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            read_usize_env("POLL_MAX_ATTEMPTS")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_POLL_MAX_ATTEMPTS),
        );

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if allowed_origins.is_empty() {
            warn!("ALLOWED_ORIGINS is not set; CORS will accept any origin");
        }

        Ok(Self {
            debrid_base_url,
            debrid_api_key,
            proxy_base_url,
            proxy_token,
            bind_addr: resolve_bind_addr(),
            allowed_origins,
            poll_policy,
            upload_settle: Duration::from_millis(
                read_u64_env("UPLOAD_SETTLE_MS").unwrap_or(DEFAULT_UPLOAD_SETTLE_MS),
            ),
            max_torrent_bytes: read_usize_env("MAX_TORRENT_BYTES")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_TORRENT_BYTES),
            http_timeout: Duration::from_secs(
                read_u64_env("HTTP_TIMEOUT_SECONDS")
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECONDS),
            ),
        })
    }
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
}

fn read_url_env(name: &'static str) -> Result<Option<String>, ConfigError> {
    let Some(value) = read_string_env(name) else {
        return Ok(None);
    };

    match Url::parse(&value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
            Ok(Some(value.trim_end_matches('/').to_string()))
        }
        _ => Err(ConfigError::InvalidUrl { name, value }),
    }
}

fn read_usize_env(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
}

fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = read_string_env("APP_ADDR") {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_trims_whitespace() {
        assert_eq!(non_empty("  token "), Some("token"));
        assert_eq!(non_empty("   "), None);
    }
}
