//! Scripted [`RequestHandler`]s for exercising a responder.

use std::sync::{
    Arc,
    Mutex,
    PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use futures::StreamExt;
use wiremux::{HandlerError, InboundChannel, Payload, PayloadStream, RequestHandler};

/// Sets its flag when dropped, marking that the owning future or stream was
/// released.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) { self.0.store(true, Ordering::SeqCst); }
}

/// Echoes every request back and records what it was given.
#[derive(Clone, Default)]
pub struct EchoHandler {
    received: Arc<Mutex<Vec<Payload>>>,
    disposed: Arc<AtomicUsize>,
}

impl EchoHandler {
    /// Payloads delivered by fire-and-forget and metadata-push.
    #[must_use]
    pub fn received(&self) -> Vec<Payload> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of times [`RequestHandler::dispose`] ran.
    #[must_use]
    pub fn dispose_count(&self) -> usize { self.disposed.load(Ordering::SeqCst) }

    fn record(&self, payload: Payload) {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
    }
}

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn fire_and_forget(&self, payload: Payload) -> Result<(), HandlerError> {
        self.record(payload);
        Ok(())
    }

    async fn request_response(&self, payload: Payload) -> Result<Payload, HandlerError> {
        Ok(payload)
    }

    fn request_stream(&self, payload: Payload) -> PayloadStream {
        futures::stream::once(async move { Ok(payload) }).boxed()
    }

    fn request_channel(&self, inbound: InboundChannel) -> PayloadStream { inbound.boxed() }

    async fn metadata_push(&self, payload: Payload) -> Result<(), HandlerError> {
        self.record(payload);
        Ok(())
    }

    fn dispose(&self) { self.disposed.fetch_add(1, Ordering::SeqCst); }
}

/// Streams the decimal strings `"0"`, `"1"`, ... for every request-stream.
#[derive(Clone, Default)]
pub struct CountingStream {
    limit: Option<usize>,
    produced: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl CountingStream {
    /// Stop after `limit` payloads instead of streaming forever.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Payloads produced so far, including one held back for lack of demand.
    #[must_use]
    pub fn produced(&self) -> usize { self.produced.load(Ordering::SeqCst) }

    /// Whether the most recent stream has been dropped.
    #[must_use]
    pub fn dropped(&self) -> bool { self.dropped.load(Ordering::SeqCst) }
}

impl RequestHandler for CountingStream {
    fn request_stream(&self, _payload: Payload) -> PayloadStream {
        let limit = self.limit;
        let produced = Arc::clone(&self.produced);
        let guard = DropFlag(Arc::clone(&self.dropped));
        Box::pin(async_stream::stream! {
            let _guard = guard;
            let mut n = 0usize;
            while limit.is_none_or(|limit| n < limit) {
                produced.fetch_add(1, Ordering::SeqCst);
                yield Ok(Payload::from(n.to_string()));
                n += 1;
                tokio::task::yield_now().await;
            }
        })
    }
}

/// Fails every interaction with [`HandlerError::Application`].
#[derive(Clone, Debug)]
pub struct FailingHandler {
    message: String,
}

impl FailingHandler {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn error(&self) -> HandlerError { HandlerError::application(self.message.clone()) }
}

#[async_trait]
impl RequestHandler for FailingHandler {
    async fn fire_and_forget(&self, _payload: Payload) -> Result<(), HandlerError> {
        Err(self.error())
    }

    async fn request_response(&self, _payload: Payload) -> Result<Payload, HandlerError> {
        Err(self.error())
    }

    fn request_stream(&self, _payload: Payload) -> PayloadStream {
        let err = self.error();
        futures::stream::once(async move { Err(err) }).boxed()
    }

    async fn metadata_push(&self, _payload: Payload) -> Result<(), HandlerError> {
        Err(self.error())
    }
}

/// Never answers a request-response; records when the pending future is
/// dropped.
#[derive(Clone, Default)]
pub struct PendingHandler {
    started: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl PendingHandler {
    /// Number of request-response calls that have begun.
    #[must_use]
    pub fn started(&self) -> usize { self.started.load(Ordering::SeqCst) }

    /// Whether a pending request-response future has been dropped.
    #[must_use]
    pub fn dropped(&self) -> bool { self.dropped.load(Ordering::SeqCst) }
}

#[async_trait]
impl RequestHandler for PendingHandler {
    async fn request_response(&self, _payload: Payload) -> Result<Payload, HandlerError> {
        let _guard = DropFlag(Arc::clone(&self.dropped));
        self.started.fetch_add(1, Ordering::SeqCst);
        futures::future::pending().await
    }
}
