//! Runtime control for [`MuxServer`].

mod accept;
mod backoff;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use accept::{AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
use futures::Future;
use log::{info, warn};
use tokio::{select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{Bound, HandlerFactory, MuxServer, ServerError};

impl<F: HandlerFactory> MuxServer<F, Bound> {
    /// Run the server until Ctrl+C is received.
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use wiremux::{RequestHandler, server::MuxServer};
    ///
    /// struct Nothing;
    /// impl RequestHandler for Nothing {}
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), wiremux::server::ServerError> {
    /// MuxServer::new(|| -> Arc<dyn RequestHandler> { Arc::new(Nothing) })
    ///     .bind(([127, 0, 0, 1], 7878).into())?
    ///     .run()
    ///     .await
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Accept failures are retried with exponential back-off and do not
    /// surface as errors; the `Result` is kept for forward compatibility.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until `shutdown` resolves.
    ///
    /// On shutdown the workers stop accepting, every open connection is
    /// disposed, and the call returns once all connection tasks finished.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let MuxServer {
            factory,
            workers,
            backoff,
            max_frame_length,
            ready_tx,
            state: Bound { listener },
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        for _ in 0..workers {
            tracker.spawn(accept_loop(
                Arc::clone(&listener),
                factory.clone(),
                AcceptLoopOptions {
                    shutdown: shutdown_token.clone(),
                    tracker: tracker.clone(),
                    backoff,
                    max_frame_length,
                },
            ));
        }
        info!(
            "server listening: local_addr={:?}, workers={workers}",
            listener.local_addr().ok()
        );

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        info!("server stopped");
        Ok(())
    }
}
