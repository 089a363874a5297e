//! # fetch-x
//!
//! Client-side request resiliency: deduplication of identical requests,
//! response caching, retry with backoff and server hints, polling and
//! state fan-out to subscribers, all in front of a pluggable `Transport`.

pub use fetchx_core::{
    compute_delay_ms, retry_hint_ms, CacheEntry, CacheKey, CacheStore, ConfigError, ErrorStrategy,
    FetchConfig, FetchError, FetchOutcome, Headers, InFlightRegistry, Method, RequestDescriptor,
    RequestOptions, Response, RetryConfig, RetryPlan, StatePatch, Subscription, SubscriptionHub,
    TransportFailure, RETRY_HINT_HEADERS,
};
pub use fetchx_dsa::{SlotRing, WHEEL_SLOTS};
pub use fetchx_transport::{
    transport_fn, CallbackError, Coordinator, CoordinatorBuilder, DelayWheel, FetchReply,
    FnTransport, TimerError, Transport, MAX_WHEEL_DELAY_MS, TICK,
};

/// Installs a `tracing` fmt subscriber. Safe to call more than once.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();
}
