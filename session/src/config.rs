//! Session configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3000/api";
pub const DEFAULT_STORE_FILE: &str = "session.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl HttpTimeouts {
    #[must_use]
    pub fn request(self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    #[must_use]
    pub fn connect(self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// API root without a trailing slash, e.g. `https://social.example/api`.
    pub api_base_url: String,
    /// JSON file backing durable storage for native front-ends.
    pub store_path: PathBuf,
    pub timeouts: HttpTimeouts,
    /// Background identity refresh period; `None` disables the task.
    pub refresh_interval: Option<Duration>,
}

impl SessionConfig {
    /// Build typed session config from environment variables.
    ///
    /// Optional:
    /// - `SESSION_API_BASE_URL`: default `http://127.0.0.1:3000/api`
    /// - `SESSION_STORE_PATH`: default `$HOME/.config/social/session.json`
    /// - `SESSION_REQUEST_TIMEOUT_SECS`: default 30
    /// - `SESSION_CONNECT_TIMEOUT_SECS`: default 10
    /// - `SESSION_REFRESH_INTERVAL_SECS`: default 300, `0` disables
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a malformed URL or number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SessionConfig::from_env`] with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a malformed URL or number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = parse_base_url(lookup("SESSION_API_BASE_URL").as_deref())?;
        let store_path = lookup("SESSION_STORE_PATH")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| default_store_path(lookup("HOME").as_deref()), PathBuf::from);
        let timeouts = HttpTimeouts {
            request_secs: parse_u64(
                "SESSION_REQUEST_TIMEOUT_SECS",
                lookup("SESSION_REQUEST_TIMEOUT_SECS"),
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
            connect_secs: parse_u64(
                "SESSION_CONNECT_TIMEOUT_SECS",
                lookup("SESSION_CONNECT_TIMEOUT_SECS"),
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?,
        };
        let refresh_secs = parse_u64(
            "SESSION_REFRESH_INTERVAL_SECS",
            lookup("SESSION_REFRESH_INTERVAL_SECS"),
            DEFAULT_REFRESH_INTERVAL_SECS,
        )?;
        let refresh_interval = (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs));

        Ok(Self { api_base_url, store_path, timeouts, refresh_interval })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            store_path: PathBuf::from(DEFAULT_STORE_FILE),
            timeouts: HttpTimeouts::default(),
            refresh_interval: Some(Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS)),
        }
    }
}

/// Validate an API base URL and strip trailing slashes.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] unless the URL is `http(s)://` with a host.
pub fn parse_base_url(raw: Option<&str>) -> Result<String, ConfigError> {
    let raw = raw.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(DEFAULT_API_BASE_URL);
    let rest = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"));
    match rest {
        Some(host) if !host.trim_matches('/').is_empty() => Ok(raw.trim_end_matches('/').to_owned()),
        _ => Err(ConfigError::InvalidValue { key: "SESSION_API_BASE_URL", value: raw.to_owned() }),
    }
}

fn parse_u64(key: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

fn default_store_path(home: Option<&str>) -> PathBuf {
    match home.filter(|h| !h.is_empty()) {
        Some(home) => PathBuf::from(home).join(".config").join("social").join(DEFAULT_STORE_FILE),
        None => PathBuf::from(DEFAULT_STORE_FILE),
    }
}
