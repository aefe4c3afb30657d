//! Errors raised by [`MuxServer`](super::MuxServer) operations.

use std::io;

use thiserror::Error;

/// Errors that may occur while binding or running the server.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or registering the listener failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
    /// Accepting a connection failed.
    #[error("accept error: {0}")]
    Accept(#[source] io::Error),
}
