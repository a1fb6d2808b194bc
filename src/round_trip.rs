//! Round-trip abstraction shared by the transport and its decorators.

use http_body_util::Full;
use hyper::{body::Bytes, Request, Response};
use std::future::Future;
use std::pin::Pin;

pub type RoundTripFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Executes a single HTTP exchange.
///
/// Implemented by [`crate::Transport`] and by decorators such as
/// [`crate::LogTransport`], so callers can stack them freely.
pub trait RoundTrip<B = Full<Bytes>>: Send + Sync {
    type Body: 'static;
    type Error: 'static;

    fn round_trip(&self, request: Request<B>) -> RoundTripFuture<'_, Response<Self::Body>, Self::Error>;
}

impl<B, T> RoundTrip<B> for std::sync::Arc<T>
where
    T: RoundTrip<B> + ?Sized,
{
    type Body = T::Body;
    type Error = T::Error;

    fn round_trip(&self, request: Request<B>) -> RoundTripFuture<'_, Response<Self::Body>, Self::Error> {
        (**self).round_trip(request)
    }
}
