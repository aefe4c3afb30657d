//! [`DuplexConnection`] over any async byte stream.

use std::sync::{Mutex, PoisonError};

use futures::{FutureExt, SinkExt, StreamExt, future, future::BoxFuture, stream};
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};

use super::{DuplexConnection, InboundFrames, TransportError};
use crate::{codec::FrameCodec, outbound::OutboundFrames};

type Reader<T> = FramedRead<ReadHalf<T>, FrameCodec>;
type Writer<T> = FramedWrite<WriteHalf<T>, FrameCodec>;

/// Frame connection over a byte stream such as a `TcpStream`.
///
/// Read EOF, a read or write failure, and [`dispose`](DuplexConnection::dispose)
/// all close the connection. The close notification fires once.
pub struct FramedConnection<T> {
    reader: Mutex<Option<Reader<T>>>,
    writer: Mutex<Option<Writer<T>>>,
    closed: CancellationToken,
}

impl<T> FramedConnection<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap `io` using a codec with the default maximum frame length.
    #[must_use]
    pub fn new(io: T) -> Self { Self::with_max_frame_length(io, crate::codec::MAX_FRAME_LENGTH) }

    /// Wrap `io` using a codec accepting bodies of up to `max_frame_length`
    /// bytes.
    #[must_use]
    pub fn with_max_frame_length(io: T, max_frame_length: usize) -> Self {
        let (read, write) = tokio::io::split(io);
        Self {
            reader: Mutex::new(Some(FramedRead::new(
                read,
                FrameCodec::new(max_frame_length),
            ))),
            writer: Mutex::new(Some(FramedWrite::new(
                write,
                FrameCodec::new(max_frame_length),
            ))),
            closed: CancellationToken::new(),
        }
    }
}

fn take<X>(slot: &Mutex<Option<X>>) -> Option<X> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn write_frames<T>(
    writer: &mut Writer<T>,
    frames: &mut OutboundFrames,
    closed: &CancellationToken,
) -> Result<(), TransportError>
where
    T: AsyncWrite,
{
    loop {
        let next = tokio::select! {
            biased;
            () = closed.cancelled() => return Ok(()),
            next = frames.recv() => next,
        };
        let Some(frame) = next else {
            return Ok(());
        };
        // A peer that stops reading blocks the write; closing must still
        // end the loop.
        let written = closed
            .run_until_cancelled(async {
                writer.feed(frame).await?;
                // Batch whatever is already queued into one flush.
                while let Some(frame) = frames.try_recv() {
                    writer.feed(frame).await?;
                }
                writer.flush().await
            })
            .await;
        match written {
            Some(result) => result?,
            None => return Ok(()),
        }
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn read_frame<T>(
    mut reader: Reader<T>,
    closed: CancellationToken,
) -> Option<(Result<crate::frame::Frame, TransportError>, Option<Reader<T>>)>
where
    T: AsyncRead,
{
    let next = tokio::select! {
        biased;
        () = closed.cancelled() => None,
        next = reader.next() => next,
    };
    match next {
        Some(Ok(frame)) => Some((Ok(frame), Some(reader))),
        Some(Err(err)) => {
            debug!("read failed, closing connection: error={err}");
            closed.cancel();
            Some((Err(err.into()), None))
        }
        None => {
            debug!("peer closed the connection");
            closed.cancel();
            None
        }
    }
}

impl<T> DuplexConnection for FramedConnection<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    fn send(&self, mut frames: OutboundFrames) -> BoxFuture<'static, Result<(), TransportError>> {
        let Some(mut writer) = take(&self.writer) else {
            return future::ready(Err(TransportError::Closed)).boxed();
        };
        let closed = self.closed.clone();
        async move {
            let result = write_frames(&mut writer, &mut frames, &closed).await;
            if let Err(err) = &result {
                debug!("write failed, closing connection: error={err}");
            }
            closed.cancel();
            result
        }
        .boxed()
    }

    fn receive(&self) -> InboundFrames {
        let Some(reader) = take(&self.reader) else {
            return stream::once(future::ready(Err(TransportError::Closed))).boxed();
        };
        let closed = self.closed.clone();
        stream::unfold(Some(reader), move |state| {
            let closed = closed.clone();
            async move { read_frame(state?, closed).await }
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, duplex},
        time::timeout,
    };
    use tokio_util::codec::{Decoder, Encoder};

    use super::*;
    use crate::{
        frame::{Frame, FrameType, StreamId},
        outbound,
        payload::Payload,
    };

    #[tokio::test]
    async fn frames_flow_in_both_directions() {
        let (local, mut remote) = duplex(1024);
        let conn = FramedConnection::new(local);
        let (tx, rx) = outbound::channel();
        let writer = tokio::spawn(conn.send(rx));

        let mut bytes = BytesMut::new();
        FrameCodec::default()
            .encode(Frame::request_n(StreamId::new(1), 3), &mut bytes)
            .expect("encode");
        remote.write_all(&bytes).await.expect("write to connection");

        let mut inbound = conn.receive();
        let frame = inbound.next().await.expect("frame").expect("decode");
        assert_eq!(frame.frame_type(), FrameType::RequestN);

        tx.send(Frame::next(StreamId::new(1), Payload::from("hi")));
        let mut buf = BytesMut::with_capacity(64);
        let mut codec = FrameCodec::default();
        let written = loop {
            remote.read_buf(&mut buf).await.expect("read from connection");
            if let Some(frame) = codec.decode(&mut buf).expect("decode") {
                break frame;
            }
        };
        assert_eq!(written.data().as_ref(), b"hi");

        conn.dispose();
        assert!(conn.is_disposed());
        timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer stops after dispose")
            .expect("writer task")
            .expect("writer result");
    }

    #[tokio::test]
    async fn peer_eof_fires_close_notification() {
        let (local, remote) = duplex(64);
        let conn = FramedConnection::new(local);
        let mut inbound = conn.receive();
        drop(remote);

        assert!(inbound.next().await.is_none());
        timeout(Duration::from_secs(1), conn.on_close())
            .await
            .expect("close notification");
        assert!(conn.is_disposed());
    }

    #[tokio::test]
    async fn halves_can_only_be_taken_once() {
        let (local, _remote) = duplex(64);
        let conn = FramedConnection::new(local);
        let _first = conn.receive();
        let mut second = conn.receive();
        assert!(matches!(
            second.next().await,
            Some(Err(TransportError::Closed))
        ));
    }

    #[tokio::test]
    async fn dispose_ends_a_writer_blocked_on_a_stalled_peer() {
        let (local, _remote) = duplex(64);
        let conn = FramedConnection::new(local);
        let (tx, rx) = outbound::channel();
        let writer = tokio::spawn(conn.send(rx));

        let body = bytes::Bytes::from(vec![b'x'; 1024]);
        for _ in 0..64 {
            tx.send(Frame::next(StreamId::new(1), Payload::from(body.clone())));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished(), "writer should be blocked on the peer");

        conn.dispose();
        timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer stops after dispose")
            .expect("writer task")
            .expect("writer result");
    }
}
