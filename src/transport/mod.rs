//! Transport abstraction consumed by the responder.
//!
//! A [`DuplexConnection`] moves whole frames in both directions and reports
//! when the connection has closed. The responder hands it the outbound
//! multiplexer once, before reading any inbound frame.

use std::io;

use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;

use crate::{codec::CodecError, frame::Frame, outbound::OutboundFrames};

pub mod framed;

pub use framed::FramedConnection;

/// Failures of the underlying connection.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection was closed or disposed.
    #[error("connection closed")]
    Closed,
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// I/O failure outside the codec.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Inbound frames delivered by a transport, ending when the connection
/// closes.
pub type InboundFrames = BoxStream<'static, Result<Frame, TransportError>>;

/// A frame-oriented, bidirectional connection.
pub trait DuplexConnection: Send + Sync + 'static {
    /// Start writing every frame yielded by `frames`.
    ///
    /// The returned future resolves when writing stops: with `Ok(())` once
    /// the connection has closed or `frames` has ended, or with an error if
    /// writing failed.
    fn send(&self, frames: OutboundFrames) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Take the inbound frame sequence. It may only be taken once.
    fn receive(&self) -> InboundFrames;

    /// Resolve once the connection has closed in either direction.
    fn on_close(&self) -> BoxFuture<'static, ()>;

    /// Close the connection.
    fn dispose(&self);

    /// Whether the connection has closed.
    fn is_disposed(&self) -> bool;
}
