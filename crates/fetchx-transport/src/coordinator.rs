//! # fetchx-transport: Request Coordinator
//!
//! Orchestrates one logical request through cache lookup, deduplication,
//! dispatch, retry scheduling and subscriber fan-out. The coordinator owns no
//! state of its own beyond handles to the stores it drives.

use crate::transport::Transport;
use crate::wheel::{DelayWheel, TimerError};
use fetchx_core::{
    compute_delay_ms, Admission, CacheEntry, CacheStore, DedupePolicy, ErrorStrategy, FetchConfig,
    FetchError, FetchOutcome, InFlightHandle, InFlightItem, InFlightRegistry, RequestDescriptor,
    RequestOptions, Response, RetryPlan, SharedFetch, StatePatch, Subscription, SubscriptionHub,
};
use futures::future::{AbortHandle, Abortable, Aborted, FutureExt};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time;

/// What a caller receives once the error strategy has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchReply {
    pub data: Option<Response>,
    /// Only set by the `SoftFail` strategy.
    pub error: Option<FetchError>,
    pub from_cache: bool,
}

impl FetchReply {
    fn fresh(data: Response) -> Self {
        Self {
            data: Some(data),
            error: None,
            from_cache: false,
        }
    }

    fn cached(data: Response) -> Self {
        Self {
            data: Some(data),
            error: None,
            from_cache: true,
        }
    }
}

pub struct CoordinatorBuilder {
    transport: Arc<dyn Transport>,
    config: FetchConfig,
    wheel: Option<DelayWheel>,
}

impl CoordinatorBuilder {
    /// Defaults applied by `Coordinator::fetch` and `Coordinator::options`.
    pub fn with_config(mut self, config: FetchConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares an existing wheel instead of creating one on the current runtime.
    pub fn with_wheel(mut self, wheel: DelayWheel) -> Self {
        self.wheel = Some(wheel);
        self
    }

    pub fn build(self) -> Result<Coordinator, TimerError> {
        let wheel = match self.wheel {
            Some(wheel) => wheel,
            None => DelayWheel::current()?,
        };
        let hub = SubscriptionHub::new();
        tracing::info!(
            "Coordinator: ready (dedupe={}, cache_time={}s, retries={})",
            self.config.dedupe,
            self.config.cache_time,
            self.config.retry.retries
        );
        Ok(Coordinator {
            inner: Arc::new(Inner {
                transport: self.transport,
                wheel,
                inflight: InFlightRegistry::new(hub.clone()),
                cache: CacheStore::new(),
                hub,
                defaults: self.config,
            }),
        })
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    wheel: DelayWheel,
    inflight: InFlightRegistry,
    cache: CacheStore<Response>,
    hub: SubscriptionHub<StatePatch>,
    defaults: FetchConfig,
}

/// Client-side resiliency layer in front of a `Transport`.
///
/// Cheap to clone; clones share the cache, the in-flight registry, the
/// subscribers and the delay wheel.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn builder<T: Transport>(transport: T) -> CoordinatorBuilder {
        CoordinatorBuilder {
            transport: Arc::new(transport),
            config: FetchConfig::default(),
            wheel: None,
        }
    }

    /// Request options seeded with the coordinator defaults.
    pub fn options(&self) -> RequestOptions {
        RequestOptions::new(self.inner.defaults.clone())
    }

    pub fn config(&self) -> &FetchConfig {
        &self.inner.defaults
    }

    pub fn wheel(&self) -> &DelayWheel {
        &self.inner.wheel
    }

    pub fn cache(&self) -> &CacheStore<Response> {
        &self.inner.cache
    }

    pub async fn fetch(&self, request: RequestDescriptor) -> Result<FetchReply, FetchError> {
        let options = self.options();
        self.fetch_with(request, options).await
    }

    /// Runs one logical request.
    ///
    /// A fresh cache entry short-circuits everything. Otherwise the request
    /// attaches to a matching in-flight execution or starts a new one, and
    /// the settled outcome is mapped through the configured error strategy.
    pub async fn fetch_with(
        &self,
        request: RequestDescriptor,
        options: RequestOptions,
    ) -> Result<FetchReply, FetchError> {
        let key = options.resolve_key(&request);

        if !options.force {
            if let Some(data) = self.inner.cache.get_fresh(&key, options.config.cache_ttl()) {
                tracing::debug!("Coordinator: cache hit for {}", key);
                return Ok(FetchReply::cached(data));
            }
        }

        let outcome = self.admit(&key, request, options.clone()).await;
        settle(outcome, &options)
    }

    /// Like `fetch_with`, but always bypasses the cache.
    pub async fn revalidate(
        &self,
        request: RequestDescriptor,
        options: RequestOptions,
    ) -> Result<FetchReply, FetchError> {
        self.fetch_with(request, options.with_force(true)).await
    }

    fn admit(&self, key: &str, request: RequestDescriptor, options: RequestOptions) -> SharedFetch {
        let policy = DedupePolicy::from(&options.config);
        let timeout = options.config.request_timeout();
        let cancellable = options.config.cancellable;
        let (gate_tx, gate_rx) = oneshot::channel::<InFlightHandle>();
        let this = self.clone();

        let admission = self.inner.inflight.join_or_begin(key, policy, move |_generation| {
            let (abort, registration) = AbortHandle::new_pair();
            let work = async move {
                let Ok(handle) = gate_rx.await else {
                    return Err(FetchError::Cancelled);
                };
                this.run(handle, request, options).await
            };
            let task = tokio::spawn(Abortable::new(work, registration));

            let shared = async move {
                match task.await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(Aborted)) => Err(FetchError::Cancelled),
                    Err(e) if e.is_cancelled() => Err(FetchError::Cancelled),
                    Err(e) => Err(FetchError::Network {
                        message: format!("request task failed: {}", e),
                    }),
                }
            }
            .boxed()
            .shared();

            let item = InFlightItem::new()
                .with_cancel_handle(abort)
                .with_timeout(timeout)
                .with_cancellable(cancellable);
            (item, shared)
        });

        match admission {
            Admission::Joined(shared) => shared,
            Admission::Started { shared, handle } => {
                // Fails only when the execution was cancelled before it started.
                let _ = gate_tx.send(handle);
                shared
            }
        }
    }

    async fn run(
        &self,
        handle: InFlightHandle,
        request: RequestDescriptor,
        options: RequestOptions,
    ) -> FetchOutcome {
        let key = handle.key().to_string();
        let plan = RetryPlan::from(&options.config.retry);
        let retry_key = retry_key(&key, handle.generation());
        let mut attempt = 0u32;

        loop {
            tracing::debug!("Coordinator: dispatching {} (attempt {})", key, attempt);
            match self.dispatch(&request, &options).await {
                Ok(response) => {
                    if !handle.is_live() {
                        tracing::debug!("Coordinator: discarding late response for {}", key);
                        return Ok(response);
                    }
                    if options.should_cache(&response) {
                        self.inner.cache.set(key.clone(), response.clone());
                    }
                    drop(handle);
                    self.inner
                        .hub
                        .notify(&key, &StatePatch::succeeded(response.clone()));
                    return Ok(response);
                }
                Err(error) if plan.should_retry(&error, attempt) && options.allows_retry(&error, attempt) => {
                    let delay = compute_delay_ms(error.headers(), attempt, &plan);
                    tracing::warn!(
                        "Coordinator: {} failed ({}), retry {}/{} in {} ms",
                        key,
                        error,
                        attempt + 1,
                        plan.max_retries,
                        delay
                    );
                    self.wait_for_retry(&retry_key, delay).await?;
                    attempt += 1;
                }
                Err(error) => {
                    let live = handle.is_live();
                    drop(handle);
                    if live {
                        tracing::warn!(
                            "Coordinator: {} failed after {} attempt(s): {}",
                            key,
                            attempt + 1,
                            error
                        );
                        self.inner.hub.notify(&key, &StatePatch::failed(error.clone()));
                    }
                    return Err(error);
                }
            }
        }
    }

    /// One transport call raced against the per-attempt timeout.
    async fn dispatch(
        &self,
        request: &RequestDescriptor,
        options: &RequestOptions,
    ) -> Result<Response, FetchError> {
        let send = self.inner.transport.send(request.clone());
        let result = match options.config.request_timeout() {
            Some(limit) => match time::timeout(limit, send).await {
                Ok(result) => result,
                Err(_) => return Err(FetchError::Timeout(options.config.timeout)),
            },
            None => send.await,
        };

        match result {
            Ok(response) if response.is_success() => Ok(response),
            Ok(response) => Err(FetchError::from_response(&response)),
            Err(failure) => Err(failure.into()),
        }
    }

    async fn wait_for_retry(&self, retry_key: &str, delay_ms: u64) -> Result<(), FetchError> {
        let (fire, fired) = oneshot::channel();
        self.inner.wheel.schedule(retry_key, delay_ms, move || {
            let _ = fire.send(());
        });

        let _pending = PendingRetry {
            wheel: &self.inner.wheel,
            key: retry_key,
        };
        fired.await.map_err(|_| FetchError::Cancelled)
    }

    /// Registers `callback` for every state patch published under `key`.
    pub fn subscribe<F>(&self, key: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&StatePatch) + Send + Sync + 'static,
    {
        self.inner.hub.subscribe(key, callback)
    }

    /// Replaces the cached data for `key` and tells its subscribers. No
    /// request is made.
    pub fn mutate(&self, key: &str, data: Response) {
        self.inner.cache.set(key, data.clone());
        self.inner.hub.notify(key, &StatePatch::mutated(data));
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.cache.invalidate(key)
    }

    pub fn cached(&self, key: &str) -> Option<CacheEntry<Response>> {
        self.inner.cache.get(key)
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.inflight.is_in_flight(key)
    }

    /// Aborts the in-flight execution for `key` along with its pending retry.
    ///
    /// Callers awaiting it resolve with `FetchError::Cancelled` and a response
    /// that arrives afterwards is neither cached nor published.
    pub fn cancel(&self, key: &str) -> bool {
        let Some(generation) = self.inner.inflight.cancel(key) else {
            return false;
        };
        self.inner.wheel.cancel(&retry_key(key, generation));
        tracing::info!("Coordinator: cancelled {}", key);
        self.inner.hub.notify(key, &StatePatch::idle());
        true
    }

    /// Re-runs the request every `polling_interval` ms until `stop_polling`
    /// or until `polling_max_attempts` runs have been made. Each run goes
    /// through the cache like any other fetch. Returns the key being polled,
    /// or `None` when the interval is 0.
    pub fn start_polling(&self, request: RequestDescriptor, options: RequestOptions) -> Option<String> {
        let interval = options.config.polling_interval;
        if interval == 0 {
            return None;
        }
        let key = options.resolve_key(&request);
        tracing::info!("Coordinator: polling {} every {} ms", key, interval);
        self.arm_poll(poll_key(&key), request, options, 1);
        Some(key)
    }

    fn arm_poll(&self, poll_key: String, request: RequestDescriptor, options: RequestOptions, run: u32) {
        let this = self.clone();
        let interval = options.config.polling_interval;
        let rearm_key = poll_key.clone();

        self.inner.wheel.schedule_task(poll_key, interval, move || async move {
            let limit = options.config.polling_max_attempts;
            if limit == 0 || run < limit {
                this.arm_poll(rearm_key, request.clone(), options.clone(), run + 1);
            } else {
                tracing::debug!("Coordinator: polling {} finished after {} runs", rearm_key, run);
            }
            this.fetch_with(request, options).await.map(|_| ())
        });
    }

    pub fn stop_polling(&self, key: &str) -> bool {
        self.inner.wheel.cancel(&poll_key(key))
    }

    pub fn is_polling(&self, key: &str) -> bool {
        self.inner.wheel.contains(&poll_key(key))
    }

    /// Cancels every timer and in-flight request. Cached data is kept.
    pub fn shutdown(&self) {
        self.inner.wheel.shutdown();
        let cancelled = self.inner.inflight.cancel_all();
        for (key, _) in &cancelled {
            self.inner.hub.notify(key, &StatePatch::idle());
        }
        tracing::info!("Coordinator: shut down, {} requests cancelled", cancelled.len());
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.inner.defaults)
            .field("in_flight", &self.inner.inflight.len())
            .field("cached", &self.inner.cache.len())
            .field("wheel", &self.inner.wheel)
            .finish()
    }
}

/// Cancels a retry timer whose waiter went away.
struct PendingRetry<'a> {
    wheel: &'a DelayWheel,
    key: &'a str,
}

impl Drop for PendingRetry<'_> {
    fn drop(&mut self) {
        self.wheel.cancel(self.key);
    }
}

fn settle(outcome: FetchOutcome, options: &RequestOptions) -> Result<FetchReply, FetchError> {
    let error = match outcome {
        Ok(data) => return Ok(FetchReply::fresh(data)),
        Err(error) => error,
    };

    match options.config.strategy {
        ErrorStrategy::Reject => Err(error),
        ErrorStrategy::Silent => Ok(FetchReply::default()),
        ErrorStrategy::DefaultResponse => Ok(FetchReply {
            data: options.default_response.clone(),
            error: None,
            from_cache: false,
        }),
        ErrorStrategy::SoftFail => Ok(FetchReply {
            data: options.default_response.clone(),
            error: Some(error),
            from_cache: false,
        }),
    }
}

fn retry_key(key: &str, generation: u64) -> String {
    format!("retry:{}#{}", key, generation)
}

fn poll_key(key: &str) -> String {
    format!("poll:{}", key)
}

static_assertions::assert_impl_all!(Coordinator: Send, Sync, Clone);
