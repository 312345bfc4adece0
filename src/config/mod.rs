use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Backend base URL; result images and reports are served relative to it.
    #[serde(default = "default_api_base_url")]
    #[garde(length(min = 1), pattern(r"^https?://"))]
    pub api_base_url: String,

    /// Period between status re-fetches of an unfinished job.
    #[serde(default = "default_poll_interval_ms")]
    #[garde(range(min = 100, max = 60_000))]
    pub poll_interval_ms: u64,

    /// Jobs per page in the recent jobs list.
    #[serde(default = "default_page_size")]
    #[garde(range(min = 1, max = 100))]
    pub page_size: u64,

    #[serde(default = "default_request_timeout_secs")]
    #[garde(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,

    /// Emit logs as JSON lines instead of human readable text.
    #[serde(default)]
    #[garde(skip)]
    pub log_json: bool,
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_page_size() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            log_json: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit key/value pairs (upper-case env names).
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: AppConfig = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
