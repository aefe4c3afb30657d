//! The application-facing request handler interface.
//!
//! A [`RequestHandler`] implements the business logic for each interaction
//! model. Every method has a default that fails with
//! [`HandlerError::Unsupported`], so handlers only implement the models they
//! serve.
//!
//! ```
//! use async_trait::async_trait;
//! use wiremux::{HandlerError, Payload, RequestHandler};
//!
//! struct Upper;
//!
//! #[async_trait]
//! impl RequestHandler for Upper {
//!     async fn request_response(&self, payload: Payload) -> Result<Payload, HandlerError> {
//!         Ok(Payload::from(payload.data_utf8().to_uppercase()))
//!     }
//! }
//! ```

use std::{future::Future, panic::AssertUnwindSafe, pin::Pin};

use async_trait::async_trait;
use futures::{FutureExt, Stream, StreamExt, stream};
use log::error;

use crate::{channel::InboundChannel, error::HandlerError, panic::format_panic, payload::Payload};

/// Boxed stream of response payloads produced by a handler.
pub type PayloadStream = Pin<Box<dyn Stream<Item = Result<Payload, HandlerError>> + Send + 'static>>;

/// Business logic for every interaction model.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle a request that expects no response.
    async fn fire_and_forget(&self, _payload: Payload) -> Result<(), HandlerError> {
        Err(HandlerError::Unsupported("fire-and-forget"))
    }

    /// Produce exactly one response payload.
    async fn request_response(&self, _payload: Payload) -> Result<Payload, HandlerError> {
        Err(HandlerError::Unsupported("request-response"))
    }

    /// Produce a stream of response payloads.
    ///
    /// Each payload is held back until the peer has granted demand for it, so
    /// the stream runs at most one payload ahead of the peer.
    fn request_stream(&self, _payload: Payload) -> PayloadStream {
        unsupported("request-stream")
    }

    /// Produce a stream of response payloads from a stream of request
    /// payloads.
    ///
    /// `inbound` yields the payload of the REQUEST_CHANNEL frame first.
    fn request_channel(&self, _inbound: InboundChannel) -> PayloadStream {
        unsupported("request-channel")
    }

    /// Handle connection-level metadata.
    async fn metadata_push(&self, _payload: Payload) -> Result<(), HandlerError> {
        Err(HandlerError::Unsupported("metadata-push"))
    }

    /// Release resources once the connection has closed.
    ///
    /// Called at most once per responder.
    fn dispose(&self) {}
}

fn unsupported(interaction: &'static str) -> PayloadStream {
    stream::once(async move { Err(HandlerError::Unsupported(interaction)) }).boxed()
}

fn panicked(panic: Box<dyn std::any::Any + Send>) -> HandlerError {
    let message = format_panic(panic).to_string();
    error!("request handler panicked: panic={message}");
    HandlerError::Panicked(message)
}

/// Await a handler future, converting a panic into [`HandlerError::Panicked`].
pub(crate) async fn guard_future<T, F>(fut: F) -> Result<T, HandlerError>
where
    F: Future<Output = Result<T, HandlerError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(panicked(panic)),
    }
}

/// Invoke a stream-producing handler method, converting a panic during the
/// call or while polling into a terminal [`HandlerError::Panicked`] item.
pub(crate) fn guard_stream<F>(call: F) -> PayloadStream
where
    F: FnOnce() -> PayloadStream,
{
    match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(payloads) => AssertUnwindSafe(payloads)
            .catch_unwind()
            .map(|item| item.unwrap_or_else(|panic| Err(panicked(panic))))
            .boxed(),
        Err(panic) => {
            let err = panicked(panic);
            stream::once(async move { Err(err) }).boxed()
        }
    }
}
