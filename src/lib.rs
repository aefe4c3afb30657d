#![doc(html_root_url = "https://docs.rs/wiremux/latest")]
//! Public API for the `wiremux` library.
//!
//! This crate provides the server side of a stream-multiplexing
//! request/response protocol: many logical streams share one connection, and
//! a [`Responder`] dispatches their frames to a [`RequestHandler`] while
//! enforcing per-stream flow control and cancellation.

pub mod channel;
pub mod codec;
pub mod error;
pub mod flow;
pub mod frame;
pub mod handler;
pub mod metrics;
pub mod outbound;
pub mod panic;
pub mod payload;
pub mod registry;
pub mod responder;
pub mod server;
pub mod transport;

pub use channel::{InboundChannel, InboundSink};
pub use codec::{CodecError, FrameCodec};
pub use error::{ErrorCode, ErrorSink, HandlerError, MuxError, ProtocolError};
pub use frame::{Flags, Frame, FrameType, StreamId};
pub use handler::{PayloadStream, RequestHandler};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_PROCESSED, STREAMS_ACTIVE};
pub use payload::{CopyingDecoder, DecodeError, Payload, PayloadDecoder, ZeroCopyDecoder};
pub use registry::{OutboundHandle, StreamControl, StreamRegistry};
pub use responder::{Responder, ResponderBuilder};
pub use server::{MuxServer, ServerError};
pub use transport::{DuplexConnection, FramedConnection, TransportError};
