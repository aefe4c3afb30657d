//! Unit tests for the frame model.

use bytes::Bytes;
use rstest::rstest;

use super::*;

#[rstest]
#[case(7, 7)]
#[case(0x8000_0007, 7)]
#[case(u32::MAX, MAX_STREAM_ID)]
fn stream_id_discards_reserved_bit(#[case] raw: u32, #[case] expected: u32) {
    assert_eq!(StreamId::new(raw).as_u32(), expected);
}

#[rstest]
#[case(Flags::NEXT, FrameType::Next)]
#[case(Flags::COMPLETE, FrameType::Complete)]
#[case(Flags::NEXT | Flags::COMPLETE, FrameType::NextComplete)]
#[case(Flags::NONE, FrameType::Payload)]
#[case(Flags::METADATA | Flags::NEXT, FrameType::Next)]
fn payload_code_resolves_by_flags(#[case] flags: Flags, #[case] expected: FrameType) {
    assert_eq!(FrameType::from_code(FrameType::PAYLOAD_CODE, flags), expected);
}

#[rstest]
#[case(0x10)]
#[case(0x2A)]
fn undefined_codes_are_unknown(#[case] code: u8) {
    let frame_type = FrameType::from_code(code, Flags::NONE);
    assert_eq!(frame_type, FrameType::Unknown(code));
    assert_eq!(frame_type.code(), code);
}

#[test]
fn metadata_flag_tracks_payload_metadata() {
    let id = StreamId::new(3);
    let plain = Frame::next(id, Payload::from("data"));
    assert!(!plain.has_metadata());
    assert!(plain.metadata().is_none());

    let with_meta = Frame::next_complete(
        id,
        Payload::with_metadata("data", Bytes::from_static(b"meta")),
    );
    assert!(with_meta.has_metadata());
    assert!(with_meta.flags().contains(Flags::NEXT | Flags::COMPLETE));
    assert_eq!(with_meta.metadata(), Some(&Bytes::from_static(b"meta")));
}

#[test]
fn keepalive_respond_flag_only_applies_to_keepalive() {
    let ping = Frame::keepalive(0, Bytes::from_static(b"d"), true);
    assert!(ping.respond_requested());
    assert!(!Frame::keepalive(0, Bytes::new(), false).respond_requested());

    // FOLLOWS shares the RESPOND bit on payload frames.
    let next = Frame::next(StreamId::new(1), Payload::from("x")).with_flags(Flags::FOLLOWS);
    assert!(!next.respond_requested());
}

#[test]
fn error_frame_carries_code_and_message() {
    let frame = Frame::error(StreamId::new(9), ErrorCode::ApplicationError, "boom");
    assert_eq!(frame.error_code(), ErrorCode::ApplicationError);
    assert_eq!(frame.error_message(), "boom");
}

#[test]
fn with_metadata_keeps_flag_in_step() {
    let frame = Frame::request_response(StreamId::new(1), Payload::from("x"))
        .with_metadata(Some(Bytes::from_static(b"m")));
    assert!(frame.has_metadata());
    let frame = frame.with_metadata(None);
    assert!(!frame.has_metadata());
}
