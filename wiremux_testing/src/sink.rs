//! Error sink that records every reported failure.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use wiremux::MuxError;

use crate::FRAME_TIMEOUT;

/// Collects the errors a responder reports so tests can assert on them.
#[derive(Clone, Default)]
pub struct RecordingErrorSink {
    errors: Arc<Mutex<Vec<MuxError>>>,
    reported: Arc<Notify>,
}

impl RecordingErrorSink {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Closure suitable for [`ResponderBuilder::error_sink`](wiremux::ResponderBuilder::error_sink).
    pub fn sink(&self) -> impl Fn(MuxError) + Send + Sync + 'static {
        let errors = Arc::clone(&self.errors);
        let reported = Arc::clone(&self.reported);
        move |err| {
            errors.lock().unwrap_or_else(PoisonError::into_inner).push(err);
            reported.notify_waiters();
        }
    }

    /// Number of errors recorded so far.
    #[must_use]
    pub fn len(&self) -> usize { self.errors.lock().unwrap_or_else(PoisonError::into_inner).len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Remove and return every recorded error.
    #[must_use]
    pub fn take(&self) -> Vec<MuxError> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Wait until at least `count` errors have been recorded.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within [`FRAME_TIMEOUT`].
    pub async fn wait_for(&self, count: usize) {
        let waited = tokio::time::timeout(FRAME_TIMEOUT, async {
            loop {
                let notified = self.reported.notified();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;
        assert!(waited.is_ok(), "expected {count} reported errors, got {}", self.len());
    }
}
