//! End-to-end tests serving real TCP connections.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use rstest::{fixture, rstest};
use tokio::{net::TcpStream, sync::oneshot, task::JoinHandle, time::timeout};
use tokio_util::codec::Framed;
use wiremux::{
    Frame,
    FrameCodec,
    FrameType,
    MuxServer,
    Payload,
    RequestHandler,
    ServerError,
    StreamId,
    flow::MAX_REQUEST_N,
};
use wiremux_testing::{CountingStream, EchoHandler, TestResult, assert_frame};

type Client = Framed<TcpStream, FrameCodec>;

#[fixture]
fn listener() -> StdTcpListener {
    StdTcpListener::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0))
        .expect("failed to bind port")
}

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl Running {
    async fn connect(&self) -> TestResult<Client> {
        let stream = TcpStream::connect(self.addr).await?;
        Ok(Framed::new(stream, FrameCodec::default()))
    }

    async fn stop(self) -> TestResult {
        let _ = self.stop.send(());
        timeout(Duration::from_secs(2), self.task).await???;
        Ok(())
    }
}

async fn serve<H>(handler: H, listener: StdTcpListener) -> TestResult<Running>
where
    H: RequestHandler + Clone,
{
    let server = MuxServer::new(move || -> Arc<dyn RequestHandler> { Arc::new(handler.clone()) })
        .workers(2)
        .bind_listener(listener)?;
    let addr = server.local_addr().ok_or("listener has no address")?;
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let server = server.ready_signal(ready_tx);
    let task = tokio::spawn(async move {
        server
            .run_with_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });
    ready_rx.await?;
    Ok(Running { addr, stop, task })
}

async fn next_frame(client: &mut Client) -> TestResult<Frame> {
    let frame = timeout(Duration::from_secs(1), client.next())
        .await?
        .ok_or("connection closed")??;
    Ok(frame)
}

#[rstest]
#[tokio::test]
async fn stream_over_tcp_respects_demand(listener: StdTcpListener) -> TestResult {
    let server = serve(CountingStream::with_limit(3), listener).await?;
    let mut client = server.connect().await?;

    client
        .send(Frame::request_stream(StreamId::new(1), 2, Payload::from("go")))
        .await?;
    assert_frame!(next_frame(&mut client).await?, FrameType::Next, 1, "0");
    assert_frame!(next_frame(&mut client).await?, FrameType::Next, 1, "1");
    assert!(
        timeout(Duration::from_millis(50), client.next()).await.is_err(),
        "frame sent without demand"
    );

    client.send(Frame::request_n(StreamId::new(1), 1)).await?;
    assert_frame!(next_frame(&mut client).await?, FrameType::Next, 1, "2");
    assert_frame!(next_frame(&mut client).await?, FrameType::Complete, 1);

    server.stop().await
}

#[rstest]
#[tokio::test]
async fn channel_over_tcp_echoes_until_complete(listener: StdTcpListener) -> TestResult {
    let server = serve(EchoHandler::default(), listener).await?;
    let mut client = server.connect().await?;
    let id = StreamId::new(7);

    client
        .send(Frame::request_channel(id, MAX_REQUEST_N, Payload::with_metadata("a", "m")))
        .await?;
    client.send(Frame::next(id, Payload::from("b"))).await?;
    client.send(Frame::complete(id)).await?;

    assert_frame!(next_frame(&mut client).await?, FrameType::RequestN, 7);
    let first = next_frame(&mut client).await?;
    assert_frame!(first, FrameType::Next, 7, "a");
    assert_eq!(first.metadata().map(|m| m.as_ref()), Some(&b"m"[..]));
    assert_frame!(next_frame(&mut client).await?, FrameType::Next, 7, "b");
    assert_frame!(next_frame(&mut client).await?, FrameType::Complete, 7);

    server.stop().await
}

#[rstest]
#[tokio::test]
async fn disconnect_disposes_connection_handler(listener: StdTcpListener) -> TestResult {
    let handler = EchoHandler::default();
    let server = serve(handler.clone(), listener).await?;
    let mut client = server.connect().await?;

    client
        .send(Frame::request_response(StreamId::new(1), Payload::from("ping")))
        .await?;
    assert_frame!(next_frame(&mut client).await?, FrameType::NextComplete, 1, "ping");
    drop(client);

    timeout(Duration::from_secs(1), async {
        while handler.dispose_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    assert_eq!(handler.dispose_count(), 1);

    server.stop().await
}

#[rstest]
#[tokio::test]
async fn connections_are_independent(listener: StdTcpListener) -> TestResult {
    let server = serve(EchoHandler::default(), listener).await?;
    let mut first = server.connect().await?;
    let mut second = server.connect().await?;

    for (client, body) in [(&mut first, "one"), (&mut second, "two")] {
        client
            .send(Frame::request_response(StreamId::new(1), Payload::from(body)))
            .await?;
    }
    assert_frame!(next_frame(&mut second).await?, FrameType::NextComplete, 1, "two");
    assert_frame!(next_frame(&mut first).await?, FrameType::NextComplete, 1, "one");

    server.stop().await
}
