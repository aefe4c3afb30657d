//! Test helpers shared across server modules.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use async_trait::async_trait;
use rstest::fixture;

use super::{Bound, HandlerFactory, MuxServer};
use crate::{error::HandlerError, handler::RequestHandler, payload::Payload};

/// Handler answering every request-response with its own payload.
pub struct Echo;

#[async_trait]
impl RequestHandler for Echo {
    async fn request_response(&self, payload: Payload) -> Result<Payload, HandlerError> {
        Ok(payload)
    }
}

#[fixture]
pub fn factory() -> impl HandlerFactory {
    || -> Arc<dyn RequestHandler> { Arc::new(Echo) }
}

#[fixture]
/// Returns a bound [`StdTcpListener`] on a free port for use in tests.
///
/// Keeping the listener bound prevents race conditions where another
/// process could claim the port between discovery and use.
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

/// Bind a server with `factory` to `listener`.
pub fn bind_server<F: HandlerFactory>(factory: F, listener: StdTcpListener) -> MuxServer<F, Bound> {
    MuxServer::new(factory)
        .workers(1)
        .bind_listener(listener)
        .expect("Failed to bind listener")
}
