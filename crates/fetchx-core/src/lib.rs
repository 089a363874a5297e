pub mod cache;
pub mod config;
pub mod error;
pub mod hub;
pub mod options;
pub mod registry;
pub mod request;
pub mod retry;

pub use cache::{CacheEntry, CacheStore};
pub use config::{ErrorStrategy, FetchConfig, RetryConfig};
pub use error::{ConfigError, FetchError, TransportFailure};
pub use hub::{StatePatch, Subscription, SubscriptionHub};
pub use options::{CacheKey, RequestOptions};
pub use registry::{Admission, DedupePolicy, InFlightHandle, InFlightItem, InFlightRegistry, SharedFetch};
pub use request::{Headers, Method, RequestDescriptor, Response};
pub use retry::{compute_delay_ms, retry_hint_ms, RetryPlan, RETRY_HINT_HEADERS};

/// The settled result of one logical request, shared by every deduplicated caller.
pub type FetchOutcome = Result<Response, FetchError>;
