//! Tests that inbound frame buffers are released once dispatch finishes.

mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use common::{eventually, start, start_with};
use rstest::rstest;
use wiremux::{
    DecodeError,
    ErrorCode,
    Frame,
    FrameType,
    MuxError,
    Payload,
    StreamId,
    ZeroCopyDecoder,
};
use wiremux_testing::{EchoHandler, PendingHandler, assert_frame};

/// Buffer owner counting how often it is dropped.
struct Tracked {
    bytes: &'static [u8],
    drops: Arc<AtomicUsize>,
}

impl AsRef<[u8]> for Tracked {
    fn as_ref(&self) -> &[u8] { self.bytes }
}

impl Drop for Tracked {
    fn drop(&mut self) { self.drops.fetch_add(1, Ordering::SeqCst); }
}

fn tracked(bytes: &'static [u8]) -> (Bytes, Arc<AtomicUsize>) {
    let drops = Arc::new(AtomicUsize::new(0));
    let buffer = Bytes::from_owner(Tracked {
        bytes,
        drops: Arc::clone(&drops),
    });
    (buffer, drops)
}

#[tokio::test]
async fn copied_payload_releases_frame_while_handler_runs() {
    let (buffer, drops) = tracked(b"request");
    let session = start(PendingHandler::default());
    session
        .peer
        .send(Frame::request_response(StreamId::new(1), Payload::from(buffer)));

    let handler = session.handler.clone();
    eventually(|| handler.started() == 1).await;
    eventually(|| drops.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn zero_copy_payload_holds_frame_until_handler_finishes() {
    let (buffer, drops) = tracked(b"request");
    let mut session = start_with(PendingHandler::default(), |builder| {
        builder.payload_decoder(ZeroCopyDecoder)
    });
    session
        .peer
        .send(Frame::request_response(StreamId::new(1), Payload::from(buffer)));
    let handler = session.handler.clone();
    eventually(|| handler.started() == 1).await;
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    session.peer.send(Frame::cancel(StreamId::new(1)));
    eventually(|| handler.dropped()).await;
    eventually(|| drops.load(Ordering::SeqCst) == 1).await;
    assert!(session.peer.try_next_frame().is_none());
}

#[rstest]
#[case::request_response(|data| Frame::request_response(StreamId::new(1), Payload::from(data)))]
#[case::fire_and_forget(|data| Frame::fire_and_forget(StreamId::new(1), Payload::from(data)))]
#[case::request_stream(|data| Frame::request_stream(StreamId::new(1), 1, Payload::from(data)))]
#[case::next_unknown(|data| Frame::next(StreamId::new(9), Payload::from(data)))]
#[case::keepalive(|data| Frame::keepalive(0, data, false))]
#[tokio::test]
async fn every_dispatch_path_releases_the_frame_once(#[case] build: fn(Bytes) -> Frame) {
    let (buffer, drops) = tracked(b"body");
    let session = start(EchoHandler::default());
    session.peer.send(build(buffer));

    eventually(|| drops.load(Ordering::SeqCst) == 1).await;
    let registry = Arc::clone(session.responder.registry());
    eventually(|| registry.is_empty()).await;
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn decode_failure_answers_request_and_releases_frame() {
    let (buffer, drops) = tracked(b"garbage");
    let mut session = start_with(EchoHandler::default(), |builder| {
        builder.payload_decoder(|_frame: &Frame| -> Result<Payload, DecodeError> {
            Err(DecodeError::Invalid("not utf-8".into()))
        })
    });
    session
        .peer
        .send(Frame::request_response(StreamId::new(1), Payload::from(buffer)));

    let reply = session.peer.next_frame().await;
    assert_frame!(reply, FrameType::Error, 1);
    assert_eq!(reply.error_code(), ErrorCode::Invalid);
    session.errors.wait_for(1).await;
    assert!(matches!(
        session.errors.take().as_slice(),
        [MuxError::Decode { .. }]
    ));
    eventually(|| drops.load(Ordering::SeqCst) == 1).await;
    assert!(session.responder.registry().is_empty());
}
