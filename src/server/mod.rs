//! Tokio-based TCP server running a [`Responder`](crate::Responder) per
//! connection.
//!
//! `MuxServer` spawns worker tasks that accept TCP connections, wrap each
//! socket in a [`FramedConnection`](crate::FramedConnection), and serve it
//! with a handler produced by the server's factory.

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use tokio::{net::TcpListener, sync::oneshot};

use crate::{codec::MAX_FRAME_LENGTH, handler::RequestHandler};

mod connection;
pub mod error;
mod runtime;

pub use error::ServerError;
pub use runtime::BackoffConfig;

#[cfg(test)]
pub(crate) mod test_util;

/// Produces the request handler serving one connection.
pub trait HandlerFactory: Fn() -> Arc<dyn RequestHandler> + Send + Sync + Clone + 'static {}

impl<F> HandlerFactory for F where F: Fn() -> Arc<dyn RequestHandler> + Send + Sync + Clone + 'static {}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    pub(crate) listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

/// TCP server for [`RequestHandler`]s.
///
/// New servers start [`Unbound`] and must be bound with
/// [`bind`](MuxServer::bind) or [`bind_listener`](MuxServer::bind_listener)
/// before they can run.
pub struct MuxServer<F, S = Unbound>
where
    F: HandlerFactory,
    S: ServerState,
{
    pub(crate) factory: F,
    pub(crate) workers: usize,
    pub(crate) backoff: BackoffConfig,
    pub(crate) max_frame_length: usize,
    /// Fired once every worker has been spawned.
    pub(crate) ready_tx: Option<oneshot::Sender<()>>,
    pub(crate) state: S,
}

impl<F: HandlerFactory> MuxServer<F, Unbound> {
    /// Create an unbound server with one worker per available CPU.
    #[must_use]
    pub fn new(factory: F) -> Self {
        let workers = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self {
            factory,
            workers,
            backoff: BackoffConfig::default(),
            max_frame_length: MAX_FRAME_LENGTH,
            ready_tx: None,
            state: Unbound,
        }
    }

    /// Bind to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub fn bind(self, addr: SocketAddr) -> Result<MuxServer<F, Bound>, ServerError> {
        let listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_listener(listener)
    }

    /// Serve connections from an already bound standard listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be registered
    /// with the Tokio runtime.
    pub fn bind_listener(
        self,
        listener: StdTcpListener,
    ) -> Result<MuxServer<F, Bound>, ServerError> {
        listener.set_nonblocking(true).map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(listener).map_err(ServerError::Bind)?;
        Ok(MuxServer {
            factory: self.factory,
            workers: self.workers,
            backoff: self.backoff,
            max_frame_length: self.max_frame_length,
            ready_tx: self.ready_tx,
            state: Bound {
                listener: Arc::new(listener),
            },
        })
    }
}

impl<F: HandlerFactory, S: ServerState> MuxServer<F, S> {
    /// Set the number of accept workers. At least one worker always runs.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    /// Configure back-off for failed `accept()` calls.
    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff.normalized();
        self
    }

    /// Limit the body size of frames read from and written to connections.
    #[must_use]
    pub fn max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    /// Notify `tx` once the server has started accepting connections.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    #[must_use]
    pub fn worker_count(&self) -> usize { self.workers }
}

impl<F: HandlerFactory> MuxServer<F, Bound> {
    /// Address the server is listening on.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.state.listener.local_addr().ok() }
}
