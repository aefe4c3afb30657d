//! Frame dispatcher: routes each inbound frame by type.
//!
//! Frames are taken by value and dropped before this module returns, so the
//! frame buffer is released once on every path. Work that outlives the frame
//! runs in tasks tracked by the responder.

use std::sync::Arc;

use log::debug;

use super::ResponderInner;
use crate::{
    channel::{InboundChannel, InboundSink},
    error::{ErrorCode, HandlerError, MuxError, ProtocolError},
    flow::credit_from_wire,
    frame::{Frame, FrameType, StreamId},
    handler::guard_future,
    metrics::{self, Direction},
    payload::Payload,
    registry::{OutboundHandle, Registration},
};

impl ResponderInner {
    /// Dispatch one inbound frame.
    pub(super) fn handle_frame(self: &Arc<Self>, frame: Frame) {
        metrics::inc_frames(Direction::Inbound);
        let stream_id = frame.stream_id();
        match frame.frame_type() {
            FrameType::FireAndForget => self.fire_and_forget(frame),
            FrameType::RequestResponse => self.request_response(frame),
            FrameType::RequestStream => self.request_stream(frame),
            FrameType::RequestChannel => self.request_channel(frame),
            FrameType::MetadataPush => self.metadata_push(frame),
            FrameType::Cancel => self.cancel(stream_id),
            FrameType::RequestN => self.request_n(stream_id, frame.request_n_value()),
            FrameType::Keepalive => self.keepalive(&frame),
            FrameType::Next => self.inbound_next(&frame),
            FrameType::NextComplete => self.inbound_next_complete(&frame),
            FrameType::Complete => self.inbound_complete(stream_id),
            FrameType::Error => self.inbound_error(&frame),
            FrameType::Payload => {}
            FrameType::Lease => debug!("ignoring lease frame: stream_id={stream_id}"),
            FrameType::Setup => self.protocol_violation(ProtocolError::UnexpectedSetup { stream_id }),
            frame_type @ (FrameType::Reserved
            | FrameType::Resume
            | FrameType::ResumeOk
            | FrameType::Ext
            | FrameType::Unknown(_)) => self.protocol_violation(ProtocolError::UnexpectedFrame {
                stream_id,
                frame_type,
            }),
        }
    }

    fn decode(&self, frame: &Frame) -> Result<Payload, MuxError> {
        self.decoder
            .decode(frame)
            .map_err(|source| MuxError::Decode {
                stream_id: frame.stream_id(),
                source,
            })
    }

    /// Decode the payload of a request frame, answering with ERROR if it
    /// cannot be decoded.
    fn decode_request(&self, frame: &Frame) -> Option<Payload> {
        match self.decode(frame) {
            Ok(payload) => Some(payload),
            Err(err) => {
                self.outbound.send(Frame::error(
                    frame.stream_id(),
                    err.error_code(),
                    err.to_string(),
                ));
                self.report(err);
                None
            }
        }
    }

    pub(super) fn protocol_violation(&self, err: ProtocolError) {
        self.outbound.send(Frame::error(
            err.stream_id(),
            ErrorCode::Invalid,
            err.to_string(),
        ));
        self.report(MuxError::Protocol(err));
    }

    /// Send ERROR for a failed stream and report the failure.
    pub(super) fn fail_stream(&self, stream_id: StreamId, source: HandlerError) {
        self.outbound.send(Frame::error(
            stream_id,
            source.error_code(),
            source.to_string(),
        ));
        self.report(MuxError::Handler { stream_id, source });
    }

    /// Register a cancellable task under `stream_id`.
    fn register_task(
        &self,
        stream_id: StreamId,
    ) -> Option<(tokio_util::sync::CancellationToken, Registration)> {
        let token = self.shutdown.child_token();
        match self
            .registry
            .register_outbound(stream_id, OutboundHandle::task(token.clone()))
        {
            Ok(registration) => Some((token, registration)),
            Err(err) => {
                self.protocol_violation(err);
                None
            }
        }
    }

    fn fire_and_forget(self: &Arc<Self>, frame: Frame) {
        let stream_id = frame.stream_id();
        let payload = match self.decode(&frame) {
            Ok(payload) => payload,
            Err(err) => return self.report(err),
        };
        drop(frame);
        let Some((token, registration)) = self.register_task(stream_id) else {
            return;
        };

        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            let handler = Arc::clone(&inner.handler);
            let result = token
                .run_until_cancelled(guard_future(async move {
                    handler.fire_and_forget(payload).await
                }))
                .await;
            inner.registry.release_outbound(stream_id, registration);
            match result {
                Some(Ok(())) => {}
                Some(Err(source)) => inner.report(MuxError::Handler { stream_id, source }),
                None => debug!("fire-and-forget cancelled: stream_id={stream_id}"),
            }
        });
    }

    fn request_response(self: &Arc<Self>, frame: Frame) {
        let stream_id = frame.stream_id();
        let Some(payload) = self.decode_request(&frame) else {
            return;
        };
        drop(frame);
        let Some((token, registration)) = self.register_task(stream_id) else {
            return;
        };

        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            let handler = Arc::clone(&inner.handler);
            let result = token
                .run_until_cancelled(guard_future(async move {
                    handler.request_response(payload).await
                }))
                .await;
            // Whoever removes the entry owns the terminal frame; a CANCEL
            // that got there first suppresses the response.
            if !inner.registry.release_outbound(stream_id, registration) {
                debug!("request-response cancelled: stream_id={stream_id}");
                return;
            }
            match result {
                Some(Ok(response)) => {
                    inner
                        .outbound
                        .send(Frame::next_complete(stream_id, response));
                }
                Some(Err(source)) => inner.fail_stream(stream_id, source),
                None => debug!("request-response cancelled: stream_id={stream_id}"),
            }
        });
    }

    fn request_stream(self: &Arc<Self>, frame: Frame) {
        let stream_id = frame.stream_id();
        let initial_request_n = frame.request_n_value();
        let Some(payload) = self.decode_request(&frame) else {
            return;
        };
        drop(frame);
        let handler = Arc::clone(&self.handler);
        self.drive_stream(stream_id, initial_request_n, move || {
            handler.request_stream(payload)
        });
    }

    fn request_channel(self: &Arc<Self>, frame: Frame) {
        let stream_id = frame.stream_id();
        if self.registry.contains_outbound(stream_id) || self.registry.contains_inbound(stream_id) {
            return self.protocol_violation(ProtocolError::DuplicateStream { stream_id });
        }
        let initial_request_n = frame.request_n_value();
        let input_complete = frame.is_complete();
        let Some(payload) = self.decode_request(&frame) else {
            return;
        };
        drop(frame);

        let (sink, rx) = InboundSink::new();
        let registration = match self.registry.register_inbound(stream_id, sink.clone()) {
            Ok(registration) => registration,
            Err(err) => return self.protocol_violation(err),
        };
        // The first payload is queued before any later frame for this id can
        // be dispatched.
        sink.next(payload);
        if input_complete {
            self.registry.release_inbound(stream_id, registration);
            sink.complete();
        }

        let inbound = InboundChannel::new(
            stream_id,
            rx,
            sink.cancellation(),
            registration,
            self.outbound.clone(),
            Arc::clone(&self.registry),
        )
        .with_initial_request(if input_complete {
            0
        } else {
            self.inbound_request_n
        });
        let handler = Arc::clone(&self.handler);
        self.drive_stream(stream_id, initial_request_n, move || {
            handler.request_channel(inbound)
        });
    }

    fn metadata_push(self: &Arc<Self>, frame: Frame) {
        let stream_id = frame.stream_id();
        let payload = match self.decode(&frame) {
            Ok(payload) => payload,
            Err(err) => return self.report(err),
        };
        drop(frame);

        let token = self.shutdown.child_token();
        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            let handler = Arc::clone(&inner.handler);
            let result = token
                .run_until_cancelled(guard_future(async move {
                    handler.metadata_push(payload).await
                }))
                .await;
            if let Some(Err(source)) = result {
                inner.report(MuxError::Handler { stream_id, source });
            }
        });
    }

    fn cancel(&self, stream_id: StreamId) {
        if let Some(handle) = self.registry.remove_outbound(stream_id) {
            debug!("cancelling stream: stream_id={stream_id}");
            handle.cancel();
        }
    }

    fn request_n(&self, stream_id: StreamId, n: u32) {
        if let Some(handle) = self.registry.outbound(stream_id) {
            handle.request(credit_from_wire(n));
        }
    }

    fn keepalive(&self, frame: &Frame) {
        if frame.respond_requested() {
            self.outbound
                .send(Frame::keepalive(0, frame.data().clone(), false));
        }
    }

    fn inbound_next(&self, frame: &Frame) {
        let Some(sink) = self.registry.inbound(frame.stream_id()) else {
            return;
        };
        match self.decode(frame) {
            Ok(payload) => {
                sink.next(payload);
            }
            Err(err) => self.report(err),
        }
    }

    fn inbound_next_complete(&self, frame: &Frame) {
        let Some(sink) = self.registry.remove_inbound(frame.stream_id()) else {
            return;
        };
        match self.decode(frame) {
            Ok(payload) => {
                sink.next(payload);
            }
            Err(err) => self.report(err),
        }
        sink.complete();
    }

    fn inbound_complete(&self, stream_id: StreamId) {
        if let Some(sink) = self.registry.remove_inbound(stream_id) {
            sink.complete();
        }
    }

    fn inbound_error(&self, frame: &Frame) {
        if let Some(sink) = self.registry.remove_inbound(frame.stream_id()) {
            sink.error(HandlerError::Remote {
                code: frame.error_code(),
                message: frame.error_message().into_owned(),
            });
        }
    }
}
