//! Connection handling for [`MuxServer`](super::MuxServer).

use std::{net::SocketAddr, sync::Arc};

use futures::FutureExt;
use log::{debug, error, warn};
use tokio::{net::TcpStream, select};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{handler::RequestHandler, responder::Responder, transport::FramedConnection};

/// Spawn a task serving a single TCP connection, logging and discarding any
/// panics.
pub(super) fn spawn_connection_task(
    stream: TcpStream,
    handler: Arc<dyn RequestHandler>,
    max_frame_length: usize,
    shutdown: CancellationToken,
    tracker: &TaskTracker,
) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!("Failed to retrieve peer address: error={e}");
            None
        }
    };
    tracker.spawn(async move {
        let fut = std::panic::AssertUnwindSafe(serve(
            stream,
            peer_addr,
            handler,
            max_frame_length,
            shutdown,
        ))
        .catch_unwind();

        if let Err(panic) = fut.await {
            crate::metrics::inc_connection_panics();
            let panic_msg = crate::panic::format_panic(panic);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr:?}");
            tracing::error!(panic = %panic_msg, ?peer_addr, "connection task panicked");
        }
    });
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn serve(
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
    handler: Arc<dyn RequestHandler>,
    max_frame_length: usize,
    shutdown: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to disable Nagle: error={e}, peer_addr={peer_addr:?}");
    }
    debug!("connection accepted: peer_addr={peer_addr:?}");
    let connection = Arc::new(FramedConnection::with_max_frame_length(
        stream,
        max_frame_length,
    ));
    let responder = Responder::builder(handler).start(connection);

    select! {
        () = responder.on_close() => {}
        () = shutdown.cancelled() => responder.dispose(),
    }
    responder.join().await;
    debug!("connection closed: peer_addr={peer_addr:?}");
}
