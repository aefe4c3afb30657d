//! Inbound half of a request-channel stream.
//!
//! The dispatcher feeds inbound frames for a channel into an [`InboundSink`]
//! kept in the registry; the request handler consumes the matching
//! [`InboundChannel`] as a stream of payloads. The channel talks back to the
//! peer on its own: it grants demand with REQUEST_N, sends CANCEL when the
//! handler drops it early, and answers an inbound error with ERROR.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};

use futures::Stream;
use log::debug;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ErrorCode, HandlerError},
    flow::MAX_REQUEST_N,
    frame::{Frame, StreamId},
    outbound::OutboundSender,
    payload::Payload,
    registry::{Registration, StreamRegistry},
};

/// Signal delivered from the dispatcher to a channel.
#[derive(Debug)]
pub(crate) enum InboundSignal {
    Next(Payload),
    Complete,
    Error(HandlerError),
    Cancel,
}

/// Producer half of a channel, stored in the registry.
#[derive(Clone, Debug)]
pub struct InboundSink {
    tx: mpsc::UnboundedSender<InboundSignal>,
    cancelled: CancellationToken,
}

impl InboundSink {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<InboundSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                cancelled: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Deliver a payload. Returns `false` if the channel has already
    /// terminated.
    pub fn next(&self, payload: Payload) -> bool { self.tx.send(InboundSignal::Next(payload)).is_ok() }

    /// Signal normal completion of the inbound side.
    pub fn complete(&self) { self.signal(InboundSignal::Complete); }

    /// Signal failure of the inbound side.
    pub fn error(&self, err: HandlerError) { self.signal(InboundSignal::Error(err)); }

    /// Terminate the channel without notifying the peer.
    pub fn cancel(&self) {
        self.cancelled.cancel();
        self.signal(InboundSignal::Cancel);
    }

    fn signal(&self, signal: InboundSignal) {
        if let Err(mpsc::error::SendError(signal)) = self.tx.send(signal) {
            debug!("inbound channel already terminated, dropping signal: signal={signal:?}");
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.cancelled.is_cancelled() }

    pub(crate) fn cancellation(&self) -> CancellationToken { self.cancelled.clone() }
}

/// Stream of inbound payloads handed to
/// [`RequestHandler::request_channel`](crate::handler::RequestHandler::request_channel).
///
/// On first poll the channel requests `initial_request` payloads from the
/// peer (unbounded by default) unless [`request`](Self::request) was called
/// before. Dropping the channel before it terminates sends CANCEL.
pub struct InboundChannel {
    stream_id: StreamId,
    rx: mpsc::UnboundedReceiver<InboundSignal>,
    cancelled: CancellationToken,
    registration: Registration,
    outbound: OutboundSender,
    registry: Arc<StreamRegistry>,
    initial_request: u32,
    requested: bool,
    terminated: bool,
}

impl InboundChannel {
    pub(crate) fn new(
        stream_id: StreamId,
        rx: mpsc::UnboundedReceiver<InboundSignal>,
        cancelled: CancellationToken,
        registration: Registration,
        outbound: OutboundSender,
        registry: Arc<StreamRegistry>,
    ) -> Self {
        Self {
            stream_id,
            rx,
            cancelled,
            registration,
            outbound,
            registry,
            initial_request: MAX_REQUEST_N,
            requested: false,
            terminated: false,
        }
    }

    /// Set the demand requested automatically on first poll. Zero disables
    /// the automatic request.
    #[must_use]
    pub(crate) fn with_initial_request(mut self, n: u32) -> Self {
        self.initial_request = n;
        self
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId { self.stream_id }

    /// Ask the peer for `n` more payloads.
    ///
    /// Values above the wire maximum are clamped to it, which the peer treats
    /// as unbounded demand. Ignored once the channel has terminated.
    pub fn request(&mut self, n: u32) {
        if n == 0 || self.terminated {
            return;
        }
        self.requested = true;
        self.outbound
            .send(Frame::request_n(self.stream_id, n.min(MAX_REQUEST_N)));
    }

    /// Whether the inbound side has finished for any reason.
    #[must_use]
    pub fn is_terminated(&self) -> bool { self.terminated }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.rx.close();
        self.registry.release_inbound(self.stream_id, self.registration);
    }
}

impl Stream for InboundChannel {
    type Item = Result<Payload, HandlerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.terminated {
            return Poll::Ready(None);
        }
        if this.cancelled.is_cancelled() {
            this.terminate();
            return Poll::Ready(None);
        }
        if !this.requested && this.initial_request > 0 {
            let n = this.initial_request;
            this.request(n);
        }

        match ready!(this.rx.poll_recv(cx)) {
            Some(InboundSignal::Next(payload)) => Poll::Ready(Some(Ok(payload))),
            Some(InboundSignal::Error(err)) => {
                // Only the inbound half ends here; the response half keeps
                // running until the handler finishes it.
                this.outbound.send(Frame::error(
                    this.stream_id,
                    ErrorCode::ApplicationError,
                    err.to_string(),
                ));
                this.terminate();
                Poll::Ready(Some(Err(err)))
            }
            Some(InboundSignal::Complete | InboundSignal::Cancel) | None => {
                this.terminate();
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for InboundChannel {
    fn drop(&mut self) {
        if !self.terminated && !self.cancelled.is_cancelled() {
            debug!(
                "inbound channel dropped before termination: stream_id={}",
                self.stream_id
            );
            self.outbound.send(Frame::cancel(self.stream_id));
        }
        self.terminate();
    }
}

impl std::fmt::Debug for InboundChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundChannel")
            .field("stream_id", &self.stream_id)
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}
