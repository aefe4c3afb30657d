//! Outbound multiplexer shared by every stream on a connection.
//!
//! All streams enqueue frames through cloned [`OutboundSender`]s; the
//! transport drains the single [`OutboundFrames`] receiver. Frames leave in
//! the order their `send` calls happened, across all streams.
//!
//! The queue is unbounded so that enqueuing never suspends a stream or the
//! dispatch loop. The cost is that a peer which stops reading while
//! continuing to grant demand can make the queue grow without limit. Demand
//! accounting bounds what each stream produces, but not how fast the
//! transport drains.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use log::debug;
use tokio::sync::mpsc;

use crate::{
    frame::Frame,
    metrics::{self, Direction},
};

/// Create a connected sender/receiver pair.
#[must_use]
pub fn channel() -> (OutboundSender, OutboundFrames) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutboundSender { tx }, OutboundFrames { rx })
}

/// Cloneable producer handle of the multiplexer.
#[derive(Clone, Debug)]
pub struct OutboundSender {
    tx: mpsc::UnboundedSender<Frame>,
}

impl OutboundSender {
    /// Enqueue `frame` for the transport without waiting.
    ///
    /// Returns `false` if the transport side has gone away, in which case
    /// the frame is dropped.
    pub fn send(&self, frame: Frame) -> bool {
        match self.tx.send(frame) {
            Ok(()) => {
                metrics::inc_frames(Direction::Outbound);
                true
            }
            Err(mpsc::error::SendError(frame)) => {
                debug!(
                    "outbound closed, dropping frame: stream_id={}, frame_type={:?}",
                    frame.stream_id(),
                    frame.frame_type()
                );
                false
            }
        }
    }

    /// Whether the receiving side has been dropped or closed.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}

/// The single consumer of the multiplexer, handed to the transport.
#[derive(Debug)]
pub struct OutboundFrames {
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl OutboundFrames {
    /// Receive the next frame, waiting if none is queued.
    pub async fn recv(&mut self) -> Option<Frame> { self.rx.recv().await }

    /// Receive the next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Frame> { self.rx.try_recv().ok() }

    /// Stop accepting frames; queued frames remain receivable.
    pub fn close(&mut self) { self.rx.close(); }
}

impl Stream for OutboundFrames {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.rx.poll_recv(cx)
    }
}
