//! Tests for log output of the default error sink and panic handling.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rstest::rstest;
use serial_test::serial;
use wiremux::{Frame, FrameType, HandlerError, Payload, RequestHandler, Responder, StreamId};
use wiremux_testing::{LoggerHandle, TestConnection, logger};

struct Panicking;

#[async_trait]
impl RequestHandler for Panicking {
    async fn request_response(&self, _payload: Payload) -> Result<Payload, HandlerError> {
        panic!("kaboom")
    }
}

async fn wait_for_log(logger: &mut LoggerHandle, needle: &str) -> bool {
    for _ in 0..200 {
        if logger.contains(needle) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[rstest]
#[serial]
#[tokio::test]
async fn default_error_sink_logs_protocol_violations(mut logger: LoggerHandle) {
    let (connection, mut peer) = TestConnection::pair();
    let _responder = Responder::builder(Arc::new(Panicking)).start(connection);

    peer.send(Frame::new(StreamId::CONNECTION, FrameType::Setup));
    assert_eq!(peer.next_frame().await.frame_type(), FrameType::Error);
    assert!(
        wait_for_log(&mut logger, "responder error").await,
        "protocol violation not logged"
    );
}

#[rstest]
#[serial]
#[tokio::test]
async fn handler_panic_is_logged(mut logger: LoggerHandle) {
    let (connection, mut peer) = TestConnection::pair();
    let _responder = Responder::builder(Arc::new(Panicking))
        .error_sink(|_| {})
        .start(connection);

    peer.send(Frame::request_response(StreamId::new(1), Payload::from("x")));
    assert_eq!(peer.next_frame().await.frame_type(), FrameType::Error);
    assert!(
        wait_for_log(&mut logger, "request handler panicked").await,
        "handler panic not logged"
    );
}
