//! Tracker configuration.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::cache::WritePolicy;

/// Default pricing API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.exchangerate.host/";

/// Query parameter carrying the API key.
pub const DEFAULT_API_KEY_PARAM: &str = "access_key";

/// Remote pricing API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL; `list` and `live` are resolved against it.
    pub base_url: String,
    /// API key appended to requests for the base URL host.
    pub api_key: String,
    /// Name of the API key query parameter.
    pub api_key_param: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            api_key_param: DEFAULT_API_KEY_PARAM.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Main tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Pricing API configuration.
    pub api: ApiConfig,
    /// Autorefresh period.
    pub refresh_period: Duration,
    /// Preference store file. `None` uses the platform config directory.
    pub store_path: Option<PathBuf>,
    /// How refreshed rates are written to the store.
    pub write_policy: WritePolicy,
    /// Unparsable `FXTRACKER_WRITE_POLICY` value, reported by `validate`.
    pub invalid_write_policy: Option<String>,
    /// Log level.
    pub log_level: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            refresh_period: Duration::from_secs(60),
            store_path: None,
            write_policy: WritePolicy::default(),
            invalid_write_policy: None,
            log_level: "info".to_string(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("FXTRACKER_API_URL") {
            config.api.base_url = url;
        }

        if let Some(key) = lookup("FXTRACKER_API_KEY") {
            config.api.api_key = key;
        }

        // Unparsable values become 0 and are rejected by `validate`.
        if let Some(period) = lookup("FXTRACKER_REFRESH_PERIOD_SECS") {
            config.refresh_period = Duration::from_secs(period.trim().parse().unwrap_or(0));
        }

        if let Some(path) = lookup("FXTRACKER_STORE_PATH") {
            config.store_path = Some(PathBuf::from(path));
        }

        if let Some(raw) = lookup("FXTRACKER_WRITE_POLICY") {
            match raw.parse() {
                Ok(policy) => config.write_policy = policy,
                Err(_) => config.invalid_write_policy = Some(raw),
            }
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.api.api_key.trim().is_empty() {
            return Err("API key cannot be empty (set FXTRACKER_API_KEY)".to_string());
        }

        if self.refresh_period.is_zero() {
            return Err("Refresh period must be a positive number of seconds".to_string());
        }

        if let Some(raw) = &self.invalid_write_policy {
            return Err(format!(
                "Invalid write policy {:?} (expected merge or replace)",
                raw
            ));
        }

        let url = Url::parse(&self.api.base_url)
            .map_err(|e| format!("Invalid API URL {}: {}", self.api.base_url, e))?;
        if url.host_str().is_none() {
            return Err(format!("API URL {} has no host", self.api.base_url));
        }

        if self.api.api_key_param.is_empty() {
            return Err("API key parameter name cannot be empty".to_string());
        }

        Ok(())
    }
}
