//! Per-connection registry of active streams.
//!
//! Two independent maps keyed by [`StreamId`] track the outbound operations
//! that can be cancelled or granted demand, and the inbound sinks of open
//! channels. Every entry is tagged with a [`Registration`] so that a late
//! terminal signal from a finished operation can never remove the entry of a
//! newer operation that reused the same id.

use std::{
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::{
    channel::InboundSink,
    error::{MuxError, ProtocolError},
    flow::Demand,
    frame::StreamId,
    metrics,
    panic::format_panic,
};

/// Token identifying one registration of a stream id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Registration(u64);

/// Control surface of an in-flight outbound operation.
pub trait StreamControl: Send + Sync + 'static {
    /// Ask the operation to stop producing frames.
    fn cancel(&self);

    /// Grant the operation `n` more units of demand.
    fn request(&self, _n: u64) {}
}

struct TaskControl {
    token: CancellationToken,
    demand: Option<Arc<Demand>>,
}

impl StreamControl for TaskControl {
    fn cancel(&self) { self.token.cancel(); }

    fn request(&self, n: u64) {
        if let Some(demand) = &self.demand {
            demand.request(n);
        }
    }
}

/// Cloneable handle to an outbound operation stored in the registry.
#[derive(Clone)]
pub struct OutboundHandle(Arc<dyn StreamControl>);

impl OutboundHandle {
    /// Handle for an operation without flow control, such as a
    /// request-response or fire-and-forget task.
    #[must_use]
    pub fn task(token: CancellationToken) -> Self {
        Self(Arc::new(TaskControl {
            token,
            demand: None,
        }))
    }

    /// Handle for a flow-controlled response stream.
    #[must_use]
    pub fn stream(token: CancellationToken, demand: Arc<Demand>) -> Self {
        Self(Arc::new(TaskControl {
            token,
            demand: Some(demand),
        }))
    }

    /// Handle backed by a custom control implementation.
    #[must_use]
    pub fn custom(control: impl StreamControl) -> Self { Self(Arc::new(control)) }

    pub fn cancel(&self) { self.0.cancel(); }

    pub fn request(&self, n: u64) { self.0.request(n); }
}

impl fmt::Debug for OutboundHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundHandle").finish_non_exhaustive()
    }
}

/// Concurrent registry of the streams active on one connection.
#[derive(Default)]
pub struct StreamRegistry {
    outbound: DashMap<StreamId, (Registration, OutboundHandle)>,
    inbound: DashMap<StreamId, (Registration, InboundSink)>,
    next_registration: AtomicU64,
    teardown: Mutex<()>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    fn next_registration(&self) -> Registration {
        Registration(self.next_registration.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an outbound operation under `id` unless one is already
    /// active.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DuplicateStream`] if `id` is already
    /// registered.
    pub fn register_outbound(
        &self,
        id: StreamId,
        handle: OutboundHandle,
    ) -> Result<Registration, ProtocolError> {
        let registration = self.next_registration();
        match self.outbound.entry(id) {
            Entry::Occupied(_) => Err(ProtocolError::DuplicateStream { stream_id: id }),
            Entry::Vacant(slot) => {
                slot.insert((registration, handle));
                metrics::inc_streams();
                Ok(registration)
            }
        }
    }

    /// Register the inbound sink of a channel under `id` unless one is
    /// already active.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DuplicateStream`] if `id` is already
    /// registered.
    pub fn register_inbound(
        &self,
        id: StreamId,
        sink: InboundSink,
    ) -> Result<Registration, ProtocolError> {
        let registration = self.next_registration();
        match self.inbound.entry(id) {
            Entry::Occupied(_) => Err(ProtocolError::DuplicateStream { stream_id: id }),
            Entry::Vacant(slot) => {
                slot.insert((registration, sink));
                metrics::inc_streams();
                Ok(registration)
            }
        }
    }

    /// Handle of the outbound operation registered under `id`.
    #[must_use]
    pub fn outbound(&self, id: StreamId) -> Option<OutboundHandle> {
        self.outbound.get(&id).map(|entry| entry.1.clone())
    }

    /// Sink of the channel registered under `id`.
    #[must_use]
    pub fn inbound(&self, id: StreamId) -> Option<InboundSink> {
        self.inbound.get(&id).map(|entry| entry.1.clone())
    }

    /// Remove and return the outbound handle registered under `id`.
    pub fn remove_outbound(&self, id: StreamId) -> Option<OutboundHandle> {
        let (_, (_, handle)) = self.outbound.remove(&id)?;
        metrics::dec_streams();
        Some(handle)
    }

    /// Remove and return the inbound sink registered under `id`.
    pub fn remove_inbound(&self, id: StreamId) -> Option<InboundSink> {
        let (_, (_, sink)) = self.inbound.remove(&id)?;
        metrics::dec_streams();
        Some(sink)
    }

    /// Remove the outbound entry for `id` only if it is still the one
    /// identified by `registration`.
    pub fn release_outbound(&self, id: StreamId, registration: Registration) -> bool {
        let removed = self
            .outbound
            .remove_if(&id, |_, (current, _)| *current == registration)
            .is_some();
        if removed {
            metrics::dec_streams();
        }
        removed
    }

    /// Remove the inbound entry for `id` only if it is still the one
    /// identified by `registration`.
    pub fn release_inbound(&self, id: StreamId, registration: Registration) -> bool {
        let removed = self
            .inbound
            .remove_if(&id, |_, (current, _)| *current == registration)
            .is_some();
        if removed {
            metrics::dec_streams();
        }
        removed
    }

    #[must_use]
    pub fn contains_outbound(&self, id: StreamId) -> bool { self.outbound.contains_key(&id) }

    #[must_use]
    pub fn contains_inbound(&self, id: StreamId) -> bool { self.inbound.contains_key(&id) }

    #[must_use]
    pub fn outbound_len(&self) -> usize { self.outbound.len() }

    #[must_use]
    pub fn inbound_len(&self) -> usize { self.inbound.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.outbound.is_empty() && self.inbound.is_empty() }

    /// Drain both maps and cancel every drained entry.
    ///
    /// Concurrent calls are serialised; each entry is drained, and therefore
    /// cancelled, by exactly one of them. A cancellation that panics is
    /// reported through `on_failure` and the remaining entries are still
    /// cancelled. Returns the number of entries drained.
    pub fn cancel_all(&self, mut on_failure: impl FnMut(MuxError)) -> usize {
        let _guard = self
            .teardown
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut outbound = Vec::new();
        self.outbound.retain(|id, (_, handle)| {
            outbound.push((*id, handle.clone()));
            false
        });
        let mut inbound = Vec::new();
        self.inbound.retain(|id, (_, sink)| {
            inbound.push((*id, sink.clone()));
            false
        });

        let drained = outbound.len() + inbound.len();
        for _ in 0..drained {
            metrics::dec_streams();
        }

        let mut cancel = |stream_id: StreamId, f: &dyn Fn()| {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(f)) {
                on_failure(MuxError::Cancellation {
                    stream_id,
                    message: format_panic(panic).to_string(),
                });
            }
        };
        for (id, handle) in &outbound {
            cancel(*id, &|| handle.cancel());
        }
        for (id, sink) in &inbound {
            cancel(*id, &|| sink.cancel());
        }

        if drained > 0 {
            debug!("cancelled registered streams: count={drained}");
        }
        drained
    }
}

impl fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("outbound", &self.outbound.len())
            .field("inbound", &self.inbound.len())
            .finish_non_exhaustive()
    }
}
