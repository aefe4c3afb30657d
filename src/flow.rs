//! Demand accounting for flow-controlled response streams.
//!
//! A [`Demand`] is the credit counter sitting between a response stream and
//! the outbound multiplexer. The peer grants credit with the initial
//! request-n of REQUEST_STREAM/REQUEST_CHANNEL and with REQUEST_N frames; the
//! stream driver takes one unit of credit before enqueuing each NEXT frame.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

/// Largest request-n the wire can express. Grants at or above this value
/// mean "no limit".
pub const MAX_REQUEST_N: u32 = 0x7FFF_FFFF;

/// Credit value representing unbounded demand.
pub const UNBOUNDED: u64 = u64::MAX;

/// Convert a request-n received from the peer into stream credit.
///
/// ```
/// use wiremux::flow::{MAX_REQUEST_N, UNBOUNDED, credit_from_wire};
///
/// assert_eq!(credit_from_wire(5), 5);
/// assert_eq!(credit_from_wire(MAX_REQUEST_N), UNBOUNDED);
/// assert_eq!(credit_from_wire(u32::MAX), UNBOUNDED);
/// ```
#[must_use]
pub fn credit_from_wire(n: u32) -> u64 {
    if n >= MAX_REQUEST_N {
        UNBOUNDED
    } else {
        u64::from(n)
    }
}

/// Atomic credit counter with asynchronous acquisition.
///
/// Credit accumulates with saturating addition; once it reaches
/// [`UNBOUNDED`] it stays there and acquisitions no longer consume it.
#[derive(Debug, Default)]
pub struct Demand {
    credit: AtomicU64,
    notify: Notify,
}

impl Demand {
    /// Create a counter with no credit.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Grant `n` additional units of credit.
    pub fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let _ = self
            .credit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(n))
            });
        self.notify.notify_one();
    }

    /// Credit currently available.
    #[must_use]
    pub fn available(&self) -> u64 { self.credit.load(Ordering::Acquire) }

    /// Whether demand has become unbounded.
    #[must_use]
    pub fn is_unbounded(&self) -> bool { self.available() == UNBOUNDED }

    /// Take one unit of credit if any is available.
    pub fn try_acquire(&self) -> bool {
        self.credit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match current {
                0 => None,
                UNBOUNDED => Some(UNBOUNDED),
                n => Some(n - 1),
            })
            .is_ok()
    }

    /// Wait until one unit of credit is available and take it.
    ///
    /// Cancel-safe: dropping the future before it resolves consumes nothing.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            self.notify.notified().await;
        }
    }
}
