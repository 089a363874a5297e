//! # fetchx-core: Retry Timing
//!
//! Decides whether a failed attempt is retried and how long to wait first.
//! Server hints win over computed backoff; a hint that cannot be parsed is
//! treated as absent.

use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::request::Headers;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

/// Retry-timing headers in precedence order.
///
/// The first header that is present *and* parses wins. Every name accepts the
/// same two forms: a non-negative number of seconds, or an absolute date
/// (HTTP-date or RFC 3339). The vendor-prefixed `x-ratelimit-reset` ranks
/// right after its unprefixed form.
pub const RETRY_HINT_HEADERS: [&str; 6] = [
    "retry-after",
    "x-retry-after",
    "ratelimit-reset",
    "x-ratelimit-reset",
    "ratelimit-reset-at",
    "x-ratelimit-reset-at",
];

#[derive(Debug, Error)]
enum HintError {
    #[error("empty value")]
    Empty,
    #[error("{0:?} is neither seconds nor a date")]
    Unrecognized(String),
}

/// Immutable retry settings for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPlan {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Cap for computed backoff (0 = none).
    pub max_delay_ms: u64,
    pub retryable_status_codes: HashSet<u16>,
    pub retry_network_errors: bool,
}

impl From<&RetryConfig> for RetryPlan {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.retries,
            base_delay_ms: config.delay,
            backoff_multiplier: config.backoff,
            max_delay_ms: config.max_delay,
            retryable_status_codes: config.retry_on.iter().copied().collect(),
            retry_network_errors: config.retry_network_errors,
        }
    }
}

impl RetryPlan {
    /// Whether the failure of attempt `attempt` (0 = the initial request)
    /// earns another try.
    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
        attempt < self.max_retries && self.is_retryable(error)
    }

    pub fn is_retryable(&self, error: &FetchError) -> bool {
        match error {
            FetchError::Cancelled => false,
            FetchError::Server { status, .. } => self.retryable_status_codes.contains(status),
            FetchError::Network { .. } | FetchError::Timeout(_) => self.retry_network_errors,
        }
    }

    /// `base * multiplier^attempt`, capped at `max_delay_ms` when set.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay = if raw.is_finite() && raw > 0.0 {
            raw.round().min(u64::MAX as f64) as u64
        } else if raw.is_finite() {
            0
        } else {
            u64::MAX
        };

        if self.max_delay_ms > 0 {
            delay.min(self.max_delay_ms)
        } else {
            delay
        }
    }
}

/// Wait time before retrying after attempt `attempt` failed.
///
/// A recognized retry header on the failed response is honored as-is;
/// otherwise the plan's exponential backoff applies.
pub fn compute_delay_ms(headers: Option<&Headers>, attempt: u32, plan: &RetryPlan) -> u64 {
    match headers.and_then(retry_hint_ms) {
        Some(hint) => hint,
        None => plan.backoff_ms(attempt),
    }
}

/// The server-requested wait in milliseconds, if any header carries one.
pub fn retry_hint_ms(headers: &Headers) -> Option<u64> {
    retry_hint_at(headers, Utc::now())
}

fn retry_hint_at(headers: &Headers, now: DateTime<Utc>) -> Option<u64> {
    for name in RETRY_HINT_HEADERS {
        let Some(value) = headers.get(name) else {
            continue;
        };
        match parse_hint(value, now) {
            Ok(ms) => return Some(ms),
            Err(e) => {
                tracing::debug!("RetryPlan: ignoring {} header: {}", name, e);
            }
        }
    }
    None
}

fn parse_hint(value: &str, now: DateTime<Utc>) -> Result<u64, HintError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(HintError::Empty);
    }

    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Ok((seconds * 1000.0).round().min(u64::MAX as f64) as u64);
        }
    }

    let at = DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map_err(|_| HintError::Unrecognized(value.to_string()))?;

    let wait = at.with_timezone(&Utc) - now;
    Ok(u64::try_from(wait.num_milliseconds()).unwrap_or(0))
}
