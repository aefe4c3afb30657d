//! Shared utilities for integration tests.
//!
//! Starts a [`Responder`] on an in-memory [`TestConnection`] with a
//! recording error sink, and offers small polling helpers for state that
//! settles asynchronously.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{sync::Arc, time::Duration};

use wiremux::{RequestHandler, Responder, ResponderBuilder};
use wiremux_testing::{FRAME_TIMEOUT, RecordingErrorSink, TestConnection, TestPeer};

/// How long a test waits to be confident nothing more will be written.
pub const QUIET: Duration = Duration::from_millis(50);

/// A responder under test together with its peer and observed errors.
pub struct Session<H> {
    pub handler: H,
    pub responder: Responder<TestConnection>,
    pub peer: TestPeer,
    pub errors: RecordingErrorSink,
}

/// Start a responder for `handler` with default settings.
pub fn start<H: RequestHandler + Clone>(handler: H) -> Session<H> { start_with(handler, |b| b) }

/// Start a responder for `handler`, letting `configure` adjust the builder.
pub fn start_with<H, F>(handler: H, configure: F) -> Session<H>
where
    H: RequestHandler + Clone,
    F: FnOnce(ResponderBuilder) -> ResponderBuilder,
{
    let errors = RecordingErrorSink::new();
    let (connection, peer) = TestConnection::pair();
    let builder = Responder::builder(Arc::new(handler.clone())).error_sink(errors.sink());
    let responder = configure(builder).start(connection);
    Session {
        handler,
        responder,
        peer,
        errors,
    }
}

/// Wait until `condition` holds.
///
/// # Panics
///
/// Panics if it does not hold within [`FRAME_TIMEOUT`].
pub async fn eventually(condition: impl Fn() -> bool) {
    let settled = tokio::time::timeout(FRAME_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(settled.is_ok(), "condition did not hold in time");
}
