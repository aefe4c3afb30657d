//! Response-stream driver shared by request-stream and request-channel.

use std::sync::Arc;

use futures::StreamExt;
use log::debug;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::ResponderInner;
use crate::{
    error::{HandlerError, MuxError},
    flow::{Demand, credit_from_wire},
    frame::{Frame, StreamId},
    handler::{PayloadStream, guard_stream},
    registry::{OutboundHandle, Registration},
};

/// How a response stream ended.
#[derive(Debug)]
enum Outcome {
    Completed,
    Failed(HandlerError),
    Cancelled,
}

impl ResponderInner {
    /// Register a flow-controlled response stream under `stream_id`, grant
    /// the initial demand, and drive the stream produced by `open`.
    ///
    /// `open` is only invoked once the id has been registered.
    pub(super) fn drive_stream<F>(self: &Arc<Self>, stream_id: StreamId, initial_request_n: u32, open: F)
    where
        F: FnOnce() -> PayloadStream,
    {
        let token = self.shutdown.child_token();
        let demand = Arc::new(Demand::new());
        let registration = match self.registry.register_outbound(
            stream_id,
            OutboundHandle::stream(token.clone(), Arc::clone(&demand)),
        ) {
            Ok(registration) => registration,
            Err(err) => return self.protocol_violation(err),
        };
        demand.request(credit_from_wire(initial_request_n));
        let payloads = guard_stream(open);

        let span = tracing::debug_span!("response_stream", stream_id = stream_id.as_u32());
        self.tasks.spawn(
            Arc::clone(self)
                .run_stream(stream_id, registration, token, demand, payloads)
                .instrument(span),
        );
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn run_stream(
        self: Arc<Self>,
        stream_id: StreamId,
        registration: Registration,
        token: CancellationToken,
        demand: Arc<Demand>,
        mut payloads: PayloadStream,
    ) {
        let outcome = loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => break Outcome::Cancelled,
                next = payloads.next() => next,
            };
            let payload = match next {
                Some(Ok(payload)) => payload,
                Some(Err(err)) => break Outcome::Failed(err),
                None => break Outcome::Completed,
            };
            tokio::select! {
                biased;
                () = token.cancelled() => break Outcome::Cancelled,
                () = demand.acquire() => {}
            }
            self.outbound.send(Frame::next(stream_id, payload));
        };
        // Dropping the handler's stream first lets a channel's inbound half
        // send its CANCEL before the terminal frame.
        drop(payloads);
        tracing::debug!(?outcome, "response stream finished");

        if !self.registry.release_outbound(stream_id, registration) {
            debug!("response stream cancelled: stream_id={stream_id}");
            return;
        }
        match outcome {
            Outcome::Completed => {
                self.outbound.send(Frame::complete(stream_id));
            }
            // The inbound half already answered the peer's own error.
            Outcome::Failed(source @ HandlerError::Remote { .. }) => {
                debug!("response stream ended by peer error: stream_id={stream_id}");
                self.report(MuxError::Handler { stream_id, source });
            }
            Outcome::Failed(err) => self.fail_stream(stream_id, err),
            Outcome::Cancelled => debug!("response stream cancelled: stream_id={stream_id}"),
        }
    }
}
