//! # Config Layer Tests: FetchConfig, RetryConfig
//!
//! TOML loading, defaults for omitted keys and validation errors.

use fetch_x::{ConfigError, ErrorStrategy, FetchConfig, RetryConfig};
use std::io::Write;
use std::time::{Duration, Instant};

/// Verifies that `FetchConfig::default()` returns the documented values.
#[test]
fn test_defaults() {
    let t = Instant::now();

    let config = FetchConfig::default();
    assert_eq!(config.cache_time, 0, "caching must be off by default");
    assert!(config.dedupe, "dedupe must be on by default");
    assert_eq!(config.timeout, 30_000);
    assert_eq!(config.strategy, ErrorStrategy::Reject);
    assert_eq!(config.retry.retries, 0);
    assert_eq!(config.retry.delay, 1000);
    assert_eq!(config.retry.backoff, 1.5);
    assert!(config.retry.retry_on.contains(&503));
    assert_eq!(config.dedupe_window(), None);
    assert_eq!(config.cache_ttl(), Duration::ZERO);

    let overhead = t.elapsed();
    println!("test_defaults: Testing Overhead = {:?}", overhead);
}

/// Verifies a full TOML document including the nested retry table.
#[test]
fn test_from_toml_str() {
    let config = FetchConfig::from_toml_str(
        r#"
        cache_time = 60
        dedupe_time = 250
        timeout = 0
        polling_interval = 5000
        strategy = "softFail"

        [retry]
        retries = 2
        delay = 100
        backoff = 2.0
        retry_on = [503]
        "#,
    )
    .expect("valid config rejected");

    assert_eq!(config.cache_ttl(), Duration::from_secs(60));
    assert_eq!(config.dedupe_window(), Some(Duration::from_millis(250)));
    assert_eq!(config.request_timeout(), None, "timeout 0 disables the limit");
    assert_eq!(config.polling_interval, 5000);
    assert_eq!(config.strategy, ErrorStrategy::SoftFail);
    assert_eq!(config.retry.retries, 2);
    assert_eq!(config.retry.retry_on, vec![503]);
    assert_eq!(config.retry.max_delay, RetryConfig::default().max_delay, "omitted key must default");
    assert!(config.dedupe);
}

/// Verifies the camelCase key spellings load the same fields.
#[test]
fn test_camel_case_keys() {
    let config = FetchConfig::from_toml_str(
        r#"
        cacheTime = 10
        dedupeTime = 500
        pollingInterval = 2000
        pollingMaxAttempts = 4
        strategy = "defaultResponse"

        [retry]
        retryOn = [429, 503]
        maxDelay = 5000
        retryNetworkErrors = false
        "#,
    )
    .expect("camelCase keys rejected");

    assert_eq!(config.cache_time, 10);
    assert_eq!(config.dedupe_time, 500);
    assert_eq!(config.polling_interval, 2000);
    assert_eq!(config.polling_max_attempts, 4);
    assert_eq!(config.strategy, ErrorStrategy::DefaultResponse);
    assert_eq!(config.retry.retry_on, vec![429, 503]);
    assert_eq!(config.retry.max_delay, 5000);
    assert!(!config.retry.retry_network_errors);
}

#[test]
fn test_empty_document_is_default() {
    let config = FetchConfig::from_toml_str("").unwrap();
    assert_eq!(config, FetchConfig::default());
}

#[test]
fn test_validation_errors() {
    let zero_backoff = FetchConfig::from_toml_str("[retry]\nbackoff = 0.0\n");
    assert!(matches!(zero_backoff, Err(ConfigError::Invalid(_))), "backoff 0 accepted");

    let bad_status = FetchConfig::from_toml_str("[retry]\nretry_on = [503, 42]\n");
    assert!(matches!(bad_status, Err(ConfigError::Invalid(_))), "status 42 accepted");

    let bad_strategy = FetchConfig::from_toml_str("strategy = \"explode\"\n");
    assert!(matches!(bad_strategy, Err(ConfigError::Parse(_))));

    let wrong_type = FetchConfig::from_toml_str("cache_time = \"soon\"\n");
    assert!(matches!(wrong_type, Err(ConfigError::Parse(_))));
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "cache_time = 30").unwrap();
    writeln!(file, "strategy = \"defaultResponse\"").unwrap();

    let config = FetchConfig::from_file(file.path()).unwrap();
    assert_eq!(config.cache_time, 30);
    assert_eq!(config.strategy, ErrorStrategy::DefaultResponse);

    let missing = FetchConfig::from_file(file.path().with_extension("missing"));
    assert!(matches!(missing, Err(ConfigError::Io(_))));
}
