//! In-memory [`DuplexConnection`] for driving a responder frame by frame.

use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures::{FutureExt, StreamExt, future::BoxFuture, stream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremux::{
    Frame,
    outbound::OutboundFrames,
    transport::{DuplexConnection, InboundFrames, TransportError},
};

/// How long [`TestPeer::next_frame`] waits before giving up.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

type InboundItem = Result<Frame, TransportError>;

/// Connection half handed to the responder.
pub struct TestConnection {
    inbound: Mutex<Option<mpsc::UnboundedReceiver<InboundItem>>>,
    written: mpsc::UnboundedSender<Frame>,
    closed: CancellationToken,
    send_failure: CancellationToken,
}

/// Peer half used by the test to inject frames and observe written frames.
pub struct TestPeer {
    inbound: mpsc::UnboundedSender<InboundItem>,
    written: mpsc::UnboundedReceiver<Frame>,
    closed: CancellationToken,
    send_failure: CancellationToken,
}

impl TestConnection {
    /// Create a connected pair.
    #[must_use]
    pub fn pair() -> (Arc<TestConnection>, TestPeer) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let send_failure = CancellationToken::new();
        (
            Arc::new(TestConnection {
                inbound: Mutex::new(Some(inbound_rx)),
                written: written_tx,
                closed: closed.clone(),
                send_failure: send_failure.clone(),
            }),
            TestPeer {
                inbound: inbound_tx,
                written: written_rx,
                closed,
                send_failure,
            },
        )
    }
}

impl DuplexConnection for TestConnection {
    fn send(&self, mut frames: OutboundFrames) -> BoxFuture<'static, Result<(), TransportError>> {
        let written = self.written.clone();
        let closed = self.closed.clone();
        let failure = self.send_failure.clone();
        async move {
            loop {
                tokio::select! {
                    biased;
                    () = failure.cancelled() => {
                        return Err(TransportError::Io(io::Error::new(
                            io::ErrorKind::BrokenPipe,
                            "outbound failed",
                        )));
                    }
                    () = closed.cancelled() => return Ok(()),
                    frame = frames.recv() => match frame {
                        Some(frame) => {
                            let _ = written.send(frame);
                        }
                        None => return Ok(()),
                    },
                }
            }
        }
        .boxed()
    }

    fn receive(&self) -> InboundFrames {
        let taken = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(rx) = taken else {
            return stream::once(async { Err(TransportError::Closed) }).boxed();
        };
        let closed = self.closed.clone();
        stream::unfold(rx, move |mut rx| {
            let closed = closed.clone();
            async move {
                tokio::select! {
                    biased;
                    () = closed.cancelled() => None,
                    item = rx.recv() => item.map(|item| (item, rx)),
                }
            }
        })
        .boxed()
    }

    fn on_close(&self) -> BoxFuture<'static, ()> {
        let closed = self.closed.clone();
        async move { closed.cancelled().await }.boxed()
    }

    fn dispose(&self) { self.closed.cancel(); }

    fn is_disposed(&self) -> bool { self.closed.is_cancelled() }
}

impl TestPeer {
    /// Deliver `frame` to the responder.
    pub fn send(&self, frame: Frame) {
        let _ = self.inbound.send(Ok(frame));
    }

    /// Deliver an inbound transport failure.
    pub fn send_error(&self, err: TransportError) {
        let _ = self.inbound.send(Err(err));
    }

    /// Wait for the next frame the responder wrote.
    ///
    /// # Panics
    ///
    /// Panics if no frame arrives within [`FRAME_TIMEOUT`].
    pub async fn next_frame(&mut self) -> Frame {
        tokio::time::timeout(FRAME_TIMEOUT, self.written.recv())
            .await
            .expect("timed out waiting for an outbound frame")
            .expect("connection dropped")
    }

    /// Wait for the next `count` frames.
    pub async fn next_frames(&mut self, count: usize) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(self.next_frame().await);
        }
        frames
    }

    /// Return a frame only if one has already been written.
    pub fn try_next_frame(&mut self) -> Option<Frame> { self.written.try_recv().ok() }

    /// Assert that nothing is written for `period`.
    ///
    /// # Panics
    ///
    /// Panics with the frame if one is written.
    pub async fn assert_quiet(&mut self, period: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(period, self.written.recv()).await {
            panic!("unexpected outbound frame: {frame:?}");
        }
    }

    /// Close the connection as if the peer hung up.
    pub fn close(&self) { self.closed.cancel(); }

    /// Make the responder's outbound transport fail.
    pub fn fail_outbound(&self) { self.send_failure.cancel(); }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed.is_cancelled() }
}
