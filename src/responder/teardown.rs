//! Connection teardown.
//!
//! Two paths lead here: the transport's outbound side stopping, which
//! cancels every registered stream, and the close notification, which also
//! disposes the handler and stops the dispatch loop. Both are idempotent and
//! may run in either order or concurrently.

use std::{
    panic::AssertUnwindSafe,
    sync::atomic::Ordering,
};

use log::{debug, error};

use super::ResponderInner;
use crate::{metrics, panic::format_panic};

impl ResponderInner {
    /// Cancel every registered outbound operation and inbound sink.
    pub(super) fn cancel_streams(&self) -> usize {
        let cancelled = self.registry.cancel_all(|err| self.report(err));
        if cancelled > 0 {
            debug!("cancelled streams after transport stopped: count={cancelled}");
        }
        cancelled
    }

    /// Full connection-close cleanup.
    pub(super) fn cleanup(&self) {
        self.cancel_streams();
        self.dispose_handler();
        // Work registered after the drain above holds child tokens of this
        // one, so it is stopped as well.
        self.shutdown.cancel();
        self.tasks.close();
    }

    fn dispose_handler(&self) {
        if self.handler_disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| self.handler.dispose())) {
            error!(
                "request handler dispose panicked: panic={}",
                format_panic(panic)
            );
        }
        metrics::dec_connections();
        debug!("responder closed");
    }
}
