//! Error taxonomy for the responder.
//!
//! Failures are grouped by where they originate:
//!
//! - [`HandlerError`]: raised by a [`crate::handler::RequestHandler`], or
//!   carried in from the peer on a channel's inbound half.
//! - [`ProtocolError`]: frames that must not arrive on an established
//!   connection.
//! - [`crate::payload::DecodeError`]: payload extraction failures.
//! - [`crate::transport::TransportError`]: the connection itself failed.
//!
//! [`MuxError`] wraps all of them together with the stream they concern and
//! is what the connection's [`ErrorSink`] receives.

use std::sync::Arc;

use log::warn;
use thiserror::Error;

use crate::{frame::StreamId, payload::DecodeError, transport::TransportError};

/// Error codes carried by ERROR frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidSetup,
    UnsupportedSetup,
    RejectedSetup,
    RejectedResume,
    ConnectionError,
    ConnectionClose,
    ApplicationError,
    Rejected,
    Canceled,
    Invalid,
    /// Any code outside the predefined set, including extension codes.
    Other(u32),
}

impl ErrorCode {
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            ErrorCode::InvalidSetup => 0x0001,
            ErrorCode::UnsupportedSetup => 0x0002,
            ErrorCode::RejectedSetup => 0x0003,
            ErrorCode::RejectedResume => 0x0004,
            ErrorCode::ConnectionError => 0x0101,
            ErrorCode::ConnectionClose => 0x0102,
            ErrorCode::ApplicationError => 0x0201,
            ErrorCode::Rejected => 0x0202,
            ErrorCode::Canceled => 0x0203,
            ErrorCode::Invalid => 0x0204,
            ErrorCode::Other(code) => code,
        }
    }

    #[must_use]
    pub const fn from_u32(code: u32) -> Self {
        match code {
            0x0001 => ErrorCode::InvalidSetup,
            0x0002 => ErrorCode::UnsupportedSetup,
            0x0003 => ErrorCode::RejectedSetup,
            0x0004 => ErrorCode::RejectedResume,
            0x0101 => ErrorCode::ConnectionError,
            0x0102 => ErrorCode::ConnectionClose,
            0x0201 => ErrorCode::ApplicationError,
            0x0202 => ErrorCode::Rejected,
            0x0203 => ErrorCode::Canceled,
            0x0204 => ErrorCode::Invalid,
            other => ErrorCode::Other(other),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}(0x{:04X})", self.as_u32())
    }
}

/// Failure produced by a request handler or received from the peer.
///
/// The `Display` output of each variant is the message placed in the ERROR
/// frame sent for the stream.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// Application-defined failure.
    #[error("{0}")]
    Application(String),
    /// The handler refused the request.
    #[error("{0}")]
    Rejected(String),
    /// The handler abandoned the request.
    #[error("{0}")]
    Canceled(String),
    /// The request was malformed from the handler's point of view.
    #[error("{0}")]
    Invalid(String),
    /// The handler does not implement this interaction model.
    #[error("{0} not implemented")]
    Unsupported(&'static str),
    /// The handler panicked while producing a result.
    #[error("handler panicked: {0}")]
    Panicked(String),
    /// An ERROR frame received from the peer for a channel's inbound half.
    #[error("{message}")]
    Remote {
        /// Error code sent by the peer.
        code: ErrorCode,
        /// Message sent by the peer.
        message: String,
    },
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::Application`].
    #[must_use]
    pub fn application(message: impl Into<String>) -> Self { Self::Application(message.into()) }

    /// Error code used when this failure is reported to the peer.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            HandlerError::Rejected(_) => ErrorCode::Rejected,
            HandlerError::Canceled(_) => ErrorCode::Canceled,
            HandlerError::Invalid(_) => ErrorCode::Invalid,
            HandlerError::Remote { code, .. } => *code,
            HandlerError::Application(_)
            | HandlerError::Unsupported(_)
            | HandlerError::Panicked(_) => ErrorCode::ApplicationError,
        }
    }
}

/// Frames that are not valid on an established server connection.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// SETUP arrived after the connection was established.
    #[error("setup frame received post setup on {stream_id}")]
    UnexpectedSetup {
        /// Stream the frame arrived on.
        stream_id: StreamId,
    },
    /// A frame type this side never accepts.
    #[error("unexpected frame type {frame_type:?} on {stream_id}")]
    UnexpectedFrame {
        /// Stream the frame arrived on.
        stream_id: StreamId,
        /// The offending frame type.
        frame_type: crate::frame::FrameType,
    },
    /// A request reused the id of a stream that is still active.
    #[error("{stream_id} is already active")]
    DuplicateStream {
        /// The reused stream id.
        stream_id: StreamId,
    },
}

impl ProtocolError {
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        match self {
            ProtocolError::UnexpectedSetup { stream_id }
            | ProtocolError::UnexpectedFrame { stream_id, .. }
            | ProtocolError::DuplicateStream { stream_id } => *stream_id,
        }
    }
}

/// Every failure observed locally by a responder.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MuxError {
    /// The request handler failed for a stream.
    #[error("{stream_id}: {source}")]
    Handler {
        /// Stream the failure belongs to.
        stream_id: StreamId,
        /// The handler's failure.
        #[source]
        source: HandlerError,
    },
    /// The peer violated the protocol.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    /// A payload could not be extracted from an inbound frame.
    #[error("{stream_id}: failed to decode payload: {source}")]
    Decode {
        /// Stream the frame arrived on.
        stream_id: StreamId,
        /// The decoder's failure.
        #[source]
        source: DecodeError,
    },
    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Cancelling a stream panicked during teardown.
    #[error("{stream_id}: cancellation panicked: {message}")]
    Cancellation {
        /// Stream whose cancellation failed.
        stream_id: StreamId,
        /// Formatted panic payload.
        message: String,
    },
}

impl MuxError {
    /// Stream the failure concerns, if it is stream-scoped.
    #[must_use]
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            MuxError::Handler { stream_id, .. }
            | MuxError::Decode { stream_id, .. }
            | MuxError::Cancellation { stream_id, .. } => Some(*stream_id),
            MuxError::Protocol(err) => Some(err.stream_id()),
            MuxError::Transport(_) => None,
        }
    }

    /// Error code used when this failure is reported to the peer.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            MuxError::Handler { source, .. } => source.error_code(),
            MuxError::Protocol(_) | MuxError::Decode { .. } => ErrorCode::Invalid,
            MuxError::Transport(_) => ErrorCode::ConnectionError,
            MuxError::Cancellation { .. } => ErrorCode::ApplicationError,
        }
    }
}

/// Process-wide callback receiving failures not otherwise delivered to the
/// peer.
pub type ErrorSink = Arc<dyn Fn(MuxError) + Send + Sync>;

/// Default [`ErrorSink`] logging every failure at `warn` level.
#[must_use]
pub fn log_errors() -> ErrorSink {
    Arc::new(|err: MuxError| {
        warn!(
            "responder error: stream_id={:?}, error={err}",
            err.stream_id()
        );
    })
}
