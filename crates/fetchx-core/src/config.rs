use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// What a terminal failure resolves to for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorStrategy {
    /// Propagate the error.
    #[default]
    Reject,
    /// Swallow the error and resolve with no data.
    Silent,
    /// Resolve with the configured default response.
    DefaultResponse,
    /// Resolve with the default response and attach the error.
    SoftFail,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt; 0 disables retrying.
    pub retries: u32,
    /// Base delay in milliseconds.
    pub delay: u64,
    /// Multiplier applied per retry: `delay * backoff^attempt`.
    pub backoff: f64,
    /// Upper bound for computed delays in milliseconds (0 = unbounded).
    /// Server-supplied retry hints are not capped.
    #[serde(alias = "maxDelay")]
    pub max_delay: u64,
    /// Status codes that are worth retrying.
    #[serde(alias = "retryOn")]
    pub retry_on: Vec<u16>,
    /// Whether failures without a status (network errors, timeouts) retry.
    #[serde(alias = "retryNetworkErrors")]
    pub retry_network_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            delay: 1000,
            backoff: 1.5,
            max_delay: 30_000,
            retry_on: vec![408, 409, 425, 429, 500, 502, 503, 504],
            retry_network_errors: true,
        }
    }
}

/// Coordinator-wide request defaults.
///
/// Loaded from TOML; every key is optional and falls back to `Default`.
/// Keys are snake_case, and the camelCase spellings are accepted as aliases.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Seconds a cached response stays fresh (0 = never cache).
    #[serde(alias = "cacheTime")]
    pub cache_time: u64,
    /// Attach concurrent identical requests to the in-flight execution.
    pub dedupe: bool,
    /// Window in ms after dispatch during which callers may attach
    /// (0 = for as long as the request is in flight).
    #[serde(alias = "dedupeTime")]
    pub dedupe_time: u64,
    /// Polling period in ms (0 = disabled).
    #[serde(alias = "pollingInterval")]
    pub polling_interval: u64,
    /// Number of poll runs before polling disarms itself (0 = unlimited).
    #[serde(alias = "pollingMaxAttempts")]
    pub polling_max_attempts: u32,
    /// Per-attempt timeout in ms (0 = none).
    pub timeout: u64,
    /// A new request for the key aborts the in-flight one instead of attaching.
    pub cancellable: bool,
    pub retry: RetryConfig,
    pub strategy: ErrorStrategy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_time: 0,
            dedupe: true,
            dedupe_time: 0,
            polling_interval: 0,
            polling_max_attempts: 0,
            timeout: 30_000,
            cancellable: false,
            retry: RetryConfig::default(),
            strategy: ErrorStrategy::Reject,
        }
    }
}

impl FetchConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: FetchConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.retry.backoff.is_finite() || self.retry.backoff <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff must be a positive number, got {}",
                self.retry.backoff
            )));
        }
        if let Some(code) = self.retry.retry_on.iter().find(|c| !(100..=599).contains(*c)) {
            return Err(ConfigError::Invalid(format!(
                "retry.retry_on contains {} which is not an HTTP status",
                code
            )));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_time)
    }

    pub fn dedupe_window(&self) -> Option<Duration> {
        (self.dedupe_time > 0).then(|| Duration::from_millis(self.dedupe_time))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_millis(self.timeout))
    }
}
