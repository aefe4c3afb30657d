//! Tests for server runtime behaviour.

use futures::{SinkExt, StreamExt};
use rstest::rstest;
use tokio::{
    net::TcpStream,
    sync::oneshot,
    time::{Duration, timeout},
};
use tokio_util::codec::Framed;

use crate::{
    codec::FrameCodec,
    frame::{Frame, FrameType, StreamId},
    payload::Payload,
    server::{
        HandlerFactory,
        test_util::{bind_server, factory, free_listener},
    },
};

#[rstest]
#[tokio::test]
async fn run_with_immediate_shutdown(factory: impl HandlerFactory, free_listener: std::net::TcpListener) {
    let server = bind_server(factory, free_listener);
    let shutdown_future = async { tokio::time::sleep(Duration::from_millis(10)).await };
    let result = timeout(
        Duration::from_millis(1000),
        server.run_with_shutdown(shutdown_future),
    )
    .await;
    assert!(result.expect("server did not finish in time").is_ok());
}

#[rstest]
#[tokio::test]
async fn serves_request_response_over_tcp(
    factory: impl HandlerFactory,
    free_listener: std::net::TcpListener,
) {
    let server = bind_server(factory, free_listener);
    let addr = server.local_addr().expect("local addr");
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = server.ready_signal(ready_tx);
    let handle = tokio::spawn(async move {
        server
            .run_with_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });
    ready_rx.await.expect("server ready");

    let stream = TcpStream::connect(addr).await.expect("connect");
    let mut client = Framed::new(stream, FrameCodec::default());
    client
        .send(Frame::request_response(StreamId::new(1), Payload::from("ping")))
        .await
        .expect("send request");
    let reply = timeout(Duration::from_secs(1), client.next())
        .await
        .expect("reply in time")
        .expect("connection open")
        .expect("decode reply");
    assert_eq!(reply.frame_type(), FrameType::NextComplete);
    assert_eq!(reply.stream_id(), StreamId::new(1));
    assert_eq!(reply.data().as_ref(), b"ping");

    let _ = stop_tx.send(());
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("server stops with a connection open")
        .expect("join server task")
        .expect("server run failed");
}
