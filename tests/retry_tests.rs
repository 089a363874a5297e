//! # Retry Layer Tests: RetryPlan, compute_delay_ms
//!
//! Backoff growth and capping, retry eligibility per failure kind, and
//! server-hint parsing across every recognized header spelling.

use chrono::{Duration as ChronoDuration, Utc};
use fetch_x::{compute_delay_ms, retry_hint_ms, FetchError, Headers, RetryConfig, RetryPlan, RETRY_HINT_HEADERS};
use std::time::Instant;

fn plan(retries: u32, delay: u64, backoff: f64) -> RetryPlan {
    RetryPlan::from(&RetryConfig {
        retries,
        delay,
        backoff,
        max_delay: 0,
        ..RetryConfig::default()
    })
}

fn server(status: u16) -> FetchError {
    FetchError::Server {
        status,
        message: String::new(),
        headers: Headers::new(),
    }
}

/// Verifies `base * multiplier^attempt` with a zero-based attempt.
#[test]
fn test_exponential_backoff() {
    let t = Instant::now();

    let plan = plan(3, 100, 2.0);
    assert_eq!(plan.backoff_ms(0), 100);
    assert_eq!(plan.backoff_ms(1), 200);
    assert_eq!(plan.backoff_ms(2), 400);

    let flat = self::plan(3, 1000, 1.0);
    assert_eq!(flat.backoff_ms(5), 1000, "multiplier 1 must keep the delay flat");

    let overhead = t.elapsed();
    println!("test_exponential_backoff: Testing Overhead = {:?}", overhead);
}

#[test]
fn test_backoff_is_capped() {
    let mut capped = plan(10, 1000, 3.0);
    capped.max_delay_ms = 5000;
    assert_eq!(capped.backoff_ms(1), 3000);
    assert_eq!(capped.backoff_ms(2), 5000, "9000 must be capped at 5000");
    assert_eq!(capped.backoff_ms(60), 5000, "overflowing growth must stay capped");
}

/// Verifies the attempt budget: `retries` failures are retried, the next is terminal.
#[test]
fn test_retry_budget() {
    let plan = plan(2, 100, 2.0);
    let error = server(503);
    assert!(plan.should_retry(&error, 0));
    assert!(plan.should_retry(&error, 1));
    assert!(!plan.should_retry(&error, 2), "budget of 2 retries exceeded");

    let disabled = self::plan(0, 100, 2.0);
    assert!(!disabled.should_retry(&error, 0), "0 retries disables retrying");
}

#[test]
fn test_retryable_failure_kinds() {
    let mut plan = plan(5, 100, 2.0);
    assert!(plan.is_retryable(&server(503)));
    assert!(plan.is_retryable(&server(429)));
    assert!(!plan.is_retryable(&server(404)), "404 is not in the default set");
    assert!(!plan.is_retryable(&server(400)));
    assert!(plan.is_retryable(&FetchError::Network { message: "reset".into() }));
    assert!(plan.is_retryable(&FetchError::Timeout(1000)));
    assert!(!plan.is_retryable(&FetchError::Cancelled), "cancellation is never retried");

    plan.retry_network_errors = false;
    assert!(!plan.is_retryable(&FetchError::Network { message: "reset".into() }));
    assert!(!plan.is_retryable(&FetchError::Timeout(1000)));
}

/// Verifies that a seconds hint wins over computed backoff and is not capped.
#[test]
fn test_seconds_hint_overrides_backoff() {
    let t = Instant::now();

    let mut plan = plan(3, 100, 2.0);
    plan.max_delay_ms = 1000;

    let headers = Headers::new().with("Retry-After", "5");
    assert_eq!(compute_delay_ms(Some(&headers), 0, &plan), 5000);
    assert_eq!(compute_delay_ms(None, 1, &plan), 200);
    assert_eq!(compute_delay_ms(Some(&Headers::new()), 2, &plan), 400);

    let fractional = Headers::new().with("x-retry-after", "1.5");
    assert_eq!(retry_hint_ms(&fractional), Some(1500));

    let overhead = t.elapsed();
    println!("test_seconds_hint_overrides_backoff: Testing Overhead = {:?}", overhead);
}

#[test]
fn test_every_header_spelling_is_recognized() {
    for name in RETRY_HINT_HEADERS {
        let headers = Headers::new().with(name.to_uppercase(), "2");
        assert_eq!(retry_hint_ms(&headers), Some(2000), "{name} was not recognized");
    }
}

#[test]
fn test_header_precedence_and_fallthrough() {
    let both = Headers::new()
        .with("X-RateLimit-Reset-At", "9")
        .with("Retry-After", "1");
    assert_eq!(retry_hint_ms(&both), Some(1000), "retry-after must take precedence");

    let garbage_first = Headers::new()
        .with("Retry-After", "soon")
        .with("RateLimit-Reset", "4");
    assert_eq!(retry_hint_ms(&garbage_first), Some(4000), "unparseable hint must fall through");

    let vendor = Headers::new()
        .with("RateLimit-Reset-At", "8")
        .with("X-RateLimit-Reset", "6");
    assert_eq!(retry_hint_ms(&vendor), Some(6000), "x-ratelimit-reset must beat the -at forms");

    let only_garbage = Headers::new().with("Retry-After", "whenever");
    assert_eq!(retry_hint_ms(&only_garbage), None);
    assert_eq!(compute_delay_ms(Some(&only_garbage), 0, &plan(1, 250, 2.0)), 250);
}

/// Verifies absolute-time hints in both HTTP-date and RFC 3339 form.
#[test]
fn test_absolute_time_hints() {
    let future = Utc::now() + ChronoDuration::seconds(10);

    let http_date = Headers::new().with("Retry-After", future.to_rfc2822());
    let hint = retry_hint_ms(&http_date).expect("HTTP-date hint not parsed");
    assert!((8_000..=10_000).contains(&hint), "HTTP-date hint was {hint}");

    let rfc3339 = Headers::new().with("RateLimit-Reset-At", future.to_rfc3339());
    let hint = retry_hint_ms(&rfc3339).expect("RFC 3339 hint not parsed");
    assert!((8_000..=10_000).contains(&hint), "RFC 3339 hint was {hint}");

    let past = Headers::new().with("Retry-After", (Utc::now() - ChronoDuration::seconds(30)).to_rfc2822());
    assert_eq!(retry_hint_ms(&past), Some(0), "a reset time in the past means retry now");
}
