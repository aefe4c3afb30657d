//! Assertion macros shared by integration tests.

/// Assert a frame's type and stream id, and optionally its data.
///
/// ```
/// use wiremux::{Frame, FrameType, Payload, StreamId};
/// use wiremux_testing::assert_frame;
///
/// let frame = Frame::next(StreamId::new(7), Payload::from("a"));
/// assert_frame!(frame, FrameType::Next, 7, "a");
/// ```
#[macro_export]
macro_rules! assert_frame {
    ($frame:expr, $frame_type:expr, $stream_id:expr) => {{
        let frame = &$frame;
        assert_eq!(
            (frame.frame_type(), frame.stream_id().as_u32()),
            ($frame_type, $stream_id),
            "unexpected frame at {}:{}: {frame:?}",
            file!(),
            line!()
        );
    }};
    ($frame:expr, $frame_type:expr, $stream_id:expr, $data:expr) => {{
        let frame = &$frame;
        $crate::assert_frame!(*frame, $frame_type, $stream_id);
        assert_eq!(
            frame.data().as_ref(),
            AsRef::<[u8]>::as_ref($data),
            "unexpected data at {}:{}",
            file!(),
            line!()
        );
    }};
}

/// Await a receive future and panic with contextual diagnostics on failure.
#[macro_export]
macro_rules! recv_expect {
    ($fut:expr) => {{
        $fut.await
            .expect(concat!("recv failed at ", file!(), ":", line!()))
    }};
    ($fut:expr, $msg:expr) => {{
        let m = ::std::format!("{msg} at {}:{}", file!(), line!(), msg = $msg);
        $fut.await.expect(&m)
    }};
}

pub use crate::{assert_frame, recv_expect};
