pub mod coordinator;
pub mod transport;
pub mod wheel;

pub use coordinator::{Coordinator, CoordinatorBuilder, FetchReply};
pub use transport::{transport_fn, FnTransport, Transport};
pub use wheel::{CallbackError, DelayWheel, TimerError, MAX_WHEEL_DELAY_MS, TICK};

pub use fetchx_core::{FetchConfig, FetchError, RequestDescriptor, RequestOptions, Response, StatePatch};
