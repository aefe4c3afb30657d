//! Tests for responder lifecycle and teardown.

use std::{
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt, stream};
use rstest::{fixture, rstest};
use tokio::{io::DuplexStream, time::timeout};
use tokio_util::codec::Framed;

use super::Responder;
use crate::{
    codec::FrameCodec,
    error::MuxError,
    frame::{Frame, FrameType, StreamId},
    handler::{PayloadStream, RequestHandler},
    payload::Payload,
    registry::{OutboundHandle, StreamControl},
    transport::FramedConnection,
};

/// Streams `"0"` and `"1"` and counts how often it is disposed.
#[derive(Default)]
struct TwoItems {
    disposed: Arc<AtomicUsize>,
}

impl RequestHandler for TwoItems {
    fn request_stream(&self, _payload: Payload) -> PayloadStream {
        stream::iter([Ok(Payload::from("0")), Ok(Payload::from("1"))]).boxed()
    }

    fn dispose(&self) { self.disposed.fetch_add(1, Ordering::SeqCst); }
}

struct Flagged(Arc<AtomicBool>);

impl StreamControl for Flagged {
    fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }
}

struct Exploding;

impl StreamControl for Exploding {
    fn cancel(&self) { panic!("cancel exploded") }
}

type Client = Framed<DuplexStream, FrameCodec>;
type Errors = Arc<Mutex<Vec<MuxError>>>;

struct Harness {
    responder: Arc<Responder<FramedConnection<DuplexStream>>>,
    client: Client,
    disposed: Arc<AtomicUsize>,
    errors: Errors,
}

#[fixture]
fn harness() -> Harness {
    let handler = TwoItems::default();
    let disposed = Arc::clone(&handler.disposed);
    let errors: Errors = Arc::default();
    let recorded = Arc::clone(&errors);
    let (server, client) = tokio::io::duplex(4096);
    let responder = Responder::builder(Arc::new(handler))
        .error_sink(move |err| recorded.lock().expect("errors lock").push(err))
        .start(Arc::new(FramedConnection::new(server)));
    Harness {
        responder: Arc::new(responder),
        client: Framed::new(client, FrameCodec::default()),
        disposed,
        errors,
    }
}

async fn next_frame(client: &mut Client) -> Frame {
    timeout(Duration::from_secs(1), client.next())
        .await
        .expect("frame in time")
        .expect("connection open")
        .expect("decode frame")
}

#[rstest]
#[tokio::test]
async fn stream_of_exactly_requested_length_completes(harness: Harness) {
    let Harness {
        responder,
        mut client,
        ..
    } = harness;
    client
        .send(Frame::request_stream(StreamId::new(1), 2, Payload::from("go")))
        .await
        .expect("send request");

    let kinds = [
        next_frame(&mut client).await.frame_type(),
        next_frame(&mut client).await.frame_type(),
        next_frame(&mut client).await.frame_type(),
    ];
    assert_eq!(kinds, [FrameType::Next, FrameType::Next, FrameType::Complete]);
    assert!(responder.registry().is_empty());
}

#[rstest]
#[tokio::test]
async fn concurrent_close_disposes_handler_once(harness: Harness) {
    let closers: Vec<_> = (0..4)
        .map(|_| {
            let responder = Arc::clone(&harness.responder);
            tokio::spawn(async move { responder.close() })
        })
        .collect();
    for closer in closers {
        closer.await.expect("close task");
    }
    harness.responder.dispose();
    timeout(Duration::from_secs(1), harness.responder.join())
        .await
        .expect("responder tasks finish");

    assert_eq!(harness.disposed.load(Ordering::SeqCst), 1);
    assert!(harness.responder.is_disposed());
}

#[rstest]
#[tokio::test]
async fn peer_hangup_runs_cleanup(harness: Harness) {
    let flagged = Arc::new(AtomicBool::new(false));
    harness
        .responder
        .registry()
        .register_outbound(
            StreamId::new(9),
            OutboundHandle::custom(Flagged(Arc::clone(&flagged))),
        )
        .expect("register");

    drop(harness.client);
    timeout(Duration::from_secs(1), harness.responder.join())
        .await
        .expect("responder tasks finish");

    assert!(flagged.load(Ordering::SeqCst));
    assert!(harness.responder.registry().is_empty());
    assert_eq!(harness.disposed.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn panicking_cancel_is_reported_and_cleanup_continues(harness: Harness) {
    let registry = harness.responder.registry();
    let flagged = Arc::new(AtomicBool::new(false));
    registry
        .register_outbound(StreamId::new(3), OutboundHandle::custom(Exploding))
        .expect("register exploding");
    registry
        .register_outbound(
            StreamId::new(5),
            OutboundHandle::custom(Flagged(Arc::clone(&flagged))),
        )
        .expect("register flagged");

    harness.responder.close();

    assert!(flagged.load(Ordering::SeqCst));
    assert!(registry.is_empty());
    assert_eq!(harness.disposed.load(Ordering::SeqCst), 1);
    let errors = harness.errors.lock().expect("errors lock");
    assert!(matches!(
        errors.as_slice(),
        [MuxError::Cancellation { stream_id, .. }] if *stream_id == StreamId::new(3)
    ));
}
