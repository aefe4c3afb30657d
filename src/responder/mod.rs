//! Server-side responder for one established connection.
//!
//! A [`Responder`] wires a [`DuplexConnection`] to a [`RequestHandler`]:
//! inbound frames are dispatched one at a time in arrival order, each
//! request runs as its own task, and every outbound frame goes through a
//! single ordered multiplexer. When the connection closes every registered
//! stream is cancelled and the handler is disposed, exactly once.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use tokio::net::TcpStream;
//! use wiremux::{FramedConnection, HandlerError, Payload, RequestHandler, Responder};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl RequestHandler for Echo {
//!     async fn request_response(&self, payload: Payload) -> Result<Payload, HandlerError> {
//!         Ok(payload)
//!     }
//! }
//!
//! # async fn serve(stream: TcpStream) {
//! let responder = Responder::builder(Arc::new(Echo))
//!     .start(Arc::new(FramedConnection::new(stream)));
//! responder.on_close().await;
//! # }
//! ```

use std::sync::{Arc, atomic::AtomicBool};

use futures::{StreamExt, future::BoxFuture};
use log::debug;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    error::{ErrorSink, MuxError, log_errors},
    flow::MAX_REQUEST_N,
    handler::RequestHandler,
    metrics,
    outbound::{self, OutboundSender},
    payload::{CopyingDecoder, PayloadDecoder},
    registry::StreamRegistry,
    transport::{DuplexConnection, InboundFrames},
};

mod dispatch;
mod drivers;
mod teardown;

#[cfg(test)]
mod tests;

/// Configures and starts a [`Responder`].
pub struct ResponderBuilder {
    handler: Arc<dyn RequestHandler>,
    decoder: Arc<dyn PayloadDecoder>,
    error_sink: ErrorSink,
    inbound_request_n: u32,
}

impl ResponderBuilder {
    /// Use `decoder` to extract payloads from inbound frames.
    ///
    /// Defaults to [`CopyingDecoder`].
    #[must_use]
    pub fn payload_decoder(mut self, decoder: impl PayloadDecoder) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Deliver locally observed failures to `sink`.
    ///
    /// Defaults to [`log_errors`].
    #[must_use]
    pub fn error_sink(mut self, sink: impl Fn(MuxError) + Send + Sync + 'static) -> Self {
        self.error_sink = Arc::new(sink);
        self
    }

    /// Demand a channel requests from the peer on its first poll.
    ///
    /// Defaults to the wire maximum, meaning unbounded. Zero leaves all
    /// requests to [`InboundChannel::request`](crate::channel::InboundChannel::request).
    #[must_use]
    pub fn inbound_request_n(mut self, n: u32) -> Self {
        self.inbound_request_n = n.min(MAX_REQUEST_N);
        self
    }

    /// Start serving `connection`.
    ///
    /// The outbound multiplexer is handed to the transport before the first
    /// inbound frame is read.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start<C: DuplexConnection>(self, connection: Arc<C>) -> Responder<C> {
        let (outbound, frames) = outbound::channel();
        let inner = Arc::new(ResponderInner {
            handler: self.handler,
            decoder: self.decoder,
            error_sink: self.error_sink,
            registry: Arc::new(StreamRegistry::new()),
            outbound,
            inbound_request_n: self.inbound_request_n,
            shutdown: CancellationToken::new(),
            handler_disposed: AtomicBool::new(false),
            tasks: TaskTracker::new(),
        });

        let sending = connection.send(frames);
        inner.tasks.spawn({
            let inner = Arc::clone(&inner);
            async move {
                match sending.await {
                    Ok(()) => debug!("outbound transport finished"),
                    Err(err) => inner.report(MuxError::Transport(err)),
                }
                inner.cancel_streams();
            }
        });

        inner
            .tasks
            .spawn(Arc::clone(&inner).receive(connection.receive()));

        let closed = connection.on_close();
        inner.tasks.spawn({
            let inner = Arc::clone(&inner);
            async move {
                closed.await;
                inner.cleanup();
            }
        });

        metrics::inc_connections();
        Responder { connection, inner }
    }
}

/// Responder serving one connection.
pub struct Responder<C> {
    connection: Arc<C>,
    inner: Arc<ResponderInner>,
}

impl Responder<()> {
    /// Begin configuring a responder for `handler`.
    #[must_use]
    pub fn builder(handler: Arc<dyn RequestHandler>) -> ResponderBuilder {
        ResponderBuilder {
            handler,
            decoder: Arc::new(CopyingDecoder),
            error_sink: log_errors(),
            inbound_request_n: MAX_REQUEST_N,
        }
    }
}

impl<C: DuplexConnection> Responder<C> {
    /// Close the underlying connection.
    pub fn dispose(&self) { self.connection.dispose(); }

    #[must_use]
    pub fn is_disposed(&self) -> bool { self.connection.is_disposed() }

    /// Resolve once the underlying connection has closed.
    pub fn on_close(&self) -> BoxFuture<'static, ()> { self.connection.on_close() }

    /// Run connection-close cleanup now.
    ///
    /// Cancels every registered stream and disposes the handler. Safe to call
    /// repeatedly and concurrently with the cleanup triggered by the
    /// connection closing.
    pub fn close(&self) { self.inner.cleanup(); }

    /// Resolve once cleanup has run and every task the responder spawned
    /// has finished.
    pub async fn join(&self) { self.inner.tasks.wait().await; }

    /// Streams currently active on this connection.
    #[must_use]
    pub fn registry(&self) -> &Arc<StreamRegistry> { &self.inner.registry }
}

/// State shared by the dispatch loop and every task it spawns.
pub(crate) struct ResponderInner {
    handler: Arc<dyn RequestHandler>,
    decoder: Arc<dyn PayloadDecoder>,
    error_sink: ErrorSink,
    registry: Arc<StreamRegistry>,
    outbound: OutboundSender,
    inbound_request_n: u32,
    shutdown: CancellationToken,
    handler_disposed: AtomicBool,
    tasks: TaskTracker,
}

impl ResponderInner {
    fn report(&self, err: MuxError) {
        metrics::inc_errors();
        (self.error_sink)(err);
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn receive(self: Arc<Self>, mut frames: InboundFrames) {
        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = frames.next() => next,
            };
            match next {
                Some(Ok(frame)) => self.handle_frame(frame),
                Some(Err(err)) => {
                    self.report(MuxError::Transport(err));
                    break;
                }
                None => break,
            }
        }
        debug!("inbound frames finished");
    }
}
