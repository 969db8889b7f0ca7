use std::{fmt, path::Path, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::error::{BridgeError, Result};

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com/";
/// The contents API stops serving inline content well before this, so reads
/// above it fail fast with `TooLarge`
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Settings for the bridge and its GitHub store
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bearer token for the remote store
    pub token: Option<String>,
    pub api_base_url: String,
    /// Branch used when a call names none; `None` leaves it to the remote
    pub default_branch: Option<String>,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    /// Budget for a single HTTP exchange
    pub request_timeout_secs: u64,
    /// Budget for a whole bridge operation, which may span two requests
    pub operation_timeout_secs: Option<u64>,
    pub max_file_size: u64,
    pub max_rate_limit_retries: u32,
    /// Longer server-requested waits are surfaced instead of slept
    pub max_retry_delay_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            default_branch: None,
            user_agent: concat!("repo-content-bridge/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 25,
            operation_timeout_secs: Some(60),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_rate_limit_retries: 3,
            max_retry_delay_secs: 60,
        }
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("default_branch", &self.default_branch)
            .field("user_agent", &self.user_agent)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .field("max_file_size", &self.max_file_size)
            .field("max_rate_limit_retries", &self.max_rate_limit_retries)
            .field("max_retry_delay_secs", &self.max_retry_delay_secs)
            .finish()
    }
}

impl BridgeConfig {
    /// Defaults overlaid with `GITHUB_TOKEN`, `GITHUB_API_URL` and `GITHUB_DEFAULT_BRANCH`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| BridgeError::InvalidConfig {
            message: format!("failed to parse config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then let the environment override it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(token) = non_empty_var("GITHUB_TOKEN") {
            self.token = Some(token);
        }
        if let Some(url) = non_empty_var("GITHUB_API_URL") {
            self.api_base_url = url;
        }
        if let Some(branch) = non_empty_var("GITHUB_DEFAULT_BRANCH") {
            self.default_branch = Some(branch);
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = Some(branch.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(invalid("timeouts must be greater than zero"));
        }
        if self.operation_timeout_secs == Some(0) {
            return Err(invalid("operation_timeout_secs must be greater than zero"));
        }
        if self.max_file_size == 0 {
            return Err(invalid("max_file_size must be greater than zero"));
        }
        if self.default_branch.as_deref().is_some_and(|b| b.trim().is_empty()) {
            return Err(invalid("default_branch must not be blank"));
        }
        Ok(())
    }

    /// Parsed base URL, always ending in `/` so relative joins keep its path
    pub fn base_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.api_base_url)
            .map_err(|e| invalid(format!("invalid api_base_url {:?}: {e}", self.api_base_url)))?;
        if url.cannot_be_a_base() {
            return Err(invalid(format!("api_base_url {:?} cannot be a base", self.api_base_url)));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_secs)
    }
}

fn invalid(message: impl Into<String>) -> BridgeError {
    BridgeError::InvalidConfig {
        message: message.into(),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
