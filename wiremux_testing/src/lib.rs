//! Utilities for driving a [`Responder`](wiremux::Responder) frame by frame
//! in tests.
//!
//! [`TestConnection`] stands in for a real transport: the test injects
//! inbound frames through its [`TestPeer`] and reads back everything the
//! responder writes.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use wiremux::{FrameType, Payload, Frame, Responder, StreamId};
//! use wiremux_testing::{EchoHandler, TestConnection, assert_frame};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (connection, mut peer) = TestConnection::pair();
//! let _responder = Responder::builder(Arc::new(EchoHandler::default())).start(connection);
//! peer.send(Frame::request_response(StreamId::new(1), Payload::from("ping")));
//! assert_frame!(peer.next_frame().await, FrameType::NextComplete, 1, "ping");
//! # }
//! ```

pub mod connection;
pub mod handlers;
pub mod logging;
pub mod macros;
pub mod sink;

pub use connection::{FRAME_TIMEOUT, TestConnection, TestPeer};
pub use handlers::{CountingStream, EchoHandler, FailingHandler, PendingHandler};
pub use logging::{LoggerHandle, logger};
pub use sink::RecordingErrorSink;

/// Result type used by fallible tests.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
