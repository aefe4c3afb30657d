//! Accept loop for the server runtime.

use std::sync::Arc;

use log::warn;
use tokio::{
    net::TcpListener,
    select,
    time::{Duration, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::backoff::BackoffConfig;
use crate::server::{HandlerFactory, connection::spawn_connection_task};

#[derive(Debug)]
pub(super) struct AcceptLoopOptions {
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
    pub max_frame_length: usize,
}

/// Accept connections from `listener` until `options.shutdown` is
/// cancelled, spawning a tracked task per connection.
///
/// Failed accepts are retried after an exponentially growing delay.
pub(super) async fn accept_loop<F: HandlerFactory>(
    listener: Arc<TcpListener>,
    factory: F,
    options: AcceptLoopOptions,
) {
    let backoff = options.backoff.normalized();
    let mut delay = backoff.initial_delay;
    while let Some(next_delay) = accept_iteration(&listener, &factory, &options, backoff, delay).await {
        delay = next_delay;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_iteration<F: HandlerFactory>(
    listener: &TcpListener,
    factory: &F,
    options: &AcceptLoopOptions,
    backoff: BackoffConfig,
    delay: Duration,
) -> Option<Duration> {
    select! {
        biased;

        () = options.shutdown.cancelled() => None,
        res = listener.accept() => Some(match res {
            Ok((stream, _)) => {
                spawn_connection_task(
                    stream,
                    factory(),
                    options.max_frame_length,
                    options.shutdown.clone(),
                    &options.tracker,
                );
                backoff.initial_delay
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                sleep(delay).await;
                backoff.next_delay(delay)
            }
        }),
    }
}
