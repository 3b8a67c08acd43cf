//! Configuration Module
//!
//! Runtime settings read from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Endpoint used when `SOBERUP_API_URL` is unset
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api/v1/graphql";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REFRESH_MARGIN_SECS: u64 = 30;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// GraphQL endpoint
    pub api_url: String,
    /// Directory for the token store and logs
    pub data_dir: PathBuf,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Window before expiry in which an access token is refreshed
    pub refresh_margin: Duration,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a whole number of seconds, got {value:?}")]
    InvalidSeconds { name: &'static str, value: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            data_dir: default_data_dir(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            refresh_margin: Duration::from_secs(DEFAULT_REFRESH_MARGIN_SECS),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = match lookup("SOBERUP_API_URL") {
            Some(url) if url.trim().is_empty() => return Err(ConfigError::Empty("SOBERUP_API_URL")),
            Some(url) => url.trim().to_string(),
            None => defaults.api_url,
        };

        let data_dir = lookup("SOBERUP_DATA_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let request_timeout = seconds(&lookup, "SOBERUP_HTTP_TIMEOUT_SECS")?
            .unwrap_or(defaults.request_timeout);
        let refresh_margin = seconds(&lookup, "SOBERUP_REFRESH_MARGIN_SECS")?
            .unwrap_or(defaults.refresh_margin);

        Ok(Self {
            api_url,
            data_dir,
            request_timeout,
            refresh_margin,
        })
    }

    /// Directory of the token store
    pub fn token_dir(&self) -> PathBuf {
        self.data_dir.join("tokens")
    }

    /// Directory of the rolling log files
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn seconds<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::InvalidSeconds { name, value }),
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("SoberUp")
}
