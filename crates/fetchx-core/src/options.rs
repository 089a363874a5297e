use crate::config::{ErrorStrategy, FetchConfig, RetryConfig};
use crate::error::FetchError;
use crate::request::{RequestDescriptor, Response};
use std::fmt;
use std::sync::Arc;

pub type RetryHook = Arc<dyn Fn(&FetchError, u32) -> bool + Send + Sync>;
pub type SkipCacheHook = Arc<dyn Fn(&Response) -> bool + Send + Sync>;
pub type KeyFn = Arc<dyn Fn(&RequestDescriptor) -> String + Send + Sync>;

/// Overrides the derived request key.
#[derive(Clone)]
pub enum CacheKey {
    Static(String),
    Derived(KeyFn),
}

impl CacheKey {
    pub fn resolve(&self, request: &RequestDescriptor) -> String {
        match self {
            CacheKey::Static(key) => key.clone(),
            CacheKey::Derived(derive) => derive(request),
        }
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Static(key) => f.debug_tuple("Static").field(key).finish(),
            CacheKey::Derived(_) => f.write_str("Derived(<fn>)"),
        }
    }
}

/// Per-request options: a `FetchConfig` plus the knobs that cannot come from a file.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub config: FetchConfig,
    pub cache_key: Option<CacheKey>,
    /// Returned by the `DefaultResponse` and `SoftFail` strategies.
    pub default_response: Option<Response>,
    /// Skip a fresh cache entry and always dispatch.
    pub force: bool,
    /// Can veto a retry the plan would allow; receives the zero-based attempt.
    pub should_retry: Option<RetryHook>,
    /// Successful responses matching this predicate are not cached.
    pub skip_cache: Option<SkipCacheHook>,
}

impl RequestOptions {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The key this request is cached, deduplicated and scheduled under.
    pub fn resolve_key(&self, request: &RequestDescriptor) -> String {
        match &self.cache_key {
            Some(key) => key.resolve(request),
            None => request.cache_key(),
        }
    }

    pub fn allows_retry(&self, error: &FetchError, attempt: u32) -> bool {
        self.should_retry
            .as_ref()
            .map_or(true, |hook| hook(error, attempt))
    }

    pub fn should_cache(&self, response: &Response) -> bool {
        self.config.cache_time > 0
            && !self.skip_cache.as_ref().map_or(false, |skip| skip(response))
    }

    pub fn with_cache_time(mut self, seconds: u64) -> Self {
        self.config.cache_time = seconds;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn with_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn with_timeout(mut self, millis: u64) -> Self {
        self.config.timeout = millis;
        self
    }

    pub fn with_polling(mut self, interval_ms: u64, max_attempts: u32) -> Self {
        self.config.polling_interval = interval_ms;
        self.config.polling_max_attempts = max_attempts;
        self
    }

    pub fn with_dedupe(mut self, enabled: bool) -> Self {
        self.config.dedupe = enabled;
        self
    }

    pub fn with_dedupe_time(mut self, millis: u64) -> Self {
        self.config.dedupe_time = millis;
        self
    }

    pub fn with_cancellable(mut self, cancellable: bool) -> Self {
        self.config.cancellable = cancellable;
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(CacheKey::Static(key.into()));
        self
    }

    pub fn with_cache_key_fn<F>(mut self, derive: F) -> Self
    where
        F: Fn(&RequestDescriptor) -> String + Send + Sync + 'static,
    {
        self.cache_key = Some(CacheKey::Derived(Arc::new(derive)));
        self
    }

    pub fn with_default_response(mut self, response: Response) -> Self {
        self.default_response = Some(response);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_should_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchError, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(hook));
        self
    }

    pub fn with_skip_cache<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.skip_cache = Some(Arc::new(predicate));
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("config", &self.config)
            .field("cache_key", &self.cache_key)
            .field("default_response", &self.default_response)
            .field("force", &self.force)
            .field("should_retry", &self.should_retry.is_some())
            .field("skip_cache", &self.skip_cache.is_some())
            .finish()
    }
}
