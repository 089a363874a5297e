//! # fetchx-transport: Transport Seam
//!
//! The only suspension point of the coordinator. Everything else it does is
//! synchronous bookkeeping.

use fetchx_core::{RequestDescriptor, Response, TransportFailure};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;

/// Sends one request attempt over the network.
///
/// Implementations must not retry, cache or deduplicate on their own; the
/// coordinator owns those policies. A non-2xx `Response` is fine to return:
/// the coordinator turns it into a server failure.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: RequestDescriptor) -> BoxFuture<'static, Result<Response, TransportFailure>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: RequestDescriptor) -> BoxFuture<'static, Result<Response, TransportFailure>> {
        (**self).send(request)
    }
}

/// Adapts an async closure into a `Transport`.
pub struct FnTransport<F>(pub F);

impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, TransportFailure>> + Send + 'static,
{
    fn send(&self, request: RequestDescriptor) -> BoxFuture<'static, Result<Response, TransportFailure>> {
        (self.0)(request).boxed()
    }
}

pub fn transport_fn<F, Fut>(f: F) -> FnTransport<F>
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, TransportFailure>> + Send + 'static,
{
    FnTransport(f)
}
