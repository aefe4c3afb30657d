//! Binary frame format for byte-stream transports.
//!
//! Each frame is prefixed with a 24-bit big-endian length, handled by
//! `tokio_util`'s [`LengthDelimitedCodec`]. The body starts with a 31-bit
//! stream id and a 16-bit field holding the 6-bit frame type and 10-bit
//! flags, followed by the per-type fields:
//!
//! | Frame type | Fields after the header |
//! |---|---|
//! | REQUEST_STREAM, REQUEST_CHANNEL | initial request-n (u32), payload |
//! | REQUEST_RESPONSE, FIRE_AND_FORGET, PAYLOAD | payload |
//! | REQUEST_N | request-n (u32) |
//! | ERROR | error code (u32), UTF-8 message |
//! | KEEPALIVE | last received position (u64), data |
//! | METADATA_PUSH | metadata, no length prefix |
//! | CANCEL | nothing |
//!
//! A payload is a 24-bit metadata length and the metadata when the METADATA
//! flag is set, followed by the data. Frame types this side never parses
//! keep their body as data.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::frame::{Flags, Frame, FrameType, StreamId};

pub mod error;

pub use error::CodecError;

/// Maximum frame body length the 24-bit length prefix can express.
pub const MAX_FRAME_LENGTH: usize = 0xFF_FFFF;

/// Smallest accepted maximum frame length.
pub const MIN_FRAME_LENGTH: usize = 64;

/// Size of the length prefix in bytes.
pub const LENGTH_HEADER_SIZE: usize = 3;

const HEADER_SIZE: usize = 6;
const METADATA_LENGTH_SIZE: usize = 3;
const MAX_METADATA_LENGTH: usize = 0xFF_FFFF;

/// Length-prefixed codec for [`Frame`]s.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
    max_frame_length: usize,
}

impl FrameCodec {
    /// Construct a codec accepting bodies of up to `max_frame_length` bytes.
    ///
    /// The limit is clamped to `MIN_FRAME_LENGTH..=MAX_FRAME_LENGTH`.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        let max_frame_length = max_frame_length.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH);
        let inner = LengthDelimitedCodec::builder()
            .length_field_length(LENGTH_HEADER_SIZE)
            .max_frame_length(max_frame_length)
            .new_codec();
        Self {
            inner,
            max_frame_length,
        }
    }

    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }
}

impl Default for FrameCodec {
    fn default() -> Self { Self::new(MAX_FRAME_LENGTH) }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        match self.inner.decode(src)? {
            Some(body) => decode_body(body.freeze()).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = encode_body(&frame)?;
        if body.len() > self.max_frame_length {
            return Err(CodecError::OversizedFrame {
                size: body.len(),
                max: self.max_frame_length,
            });
        }
        self.inner.encode(body, dst)?;
        Ok(())
    }
}

fn ensure(buf: &Bytes, need: usize, frame_type: Option<FrameType>) -> Result<(), CodecError> {
    if buf.remaining() < need {
        return Err(CodecError::Truncated {
            frame_type,
            have: buf.remaining(),
            need,
        });
    }
    Ok(())
}

fn get_u24(buf: &mut Bytes) -> usize {
    usize::try_from(buf.get_uint(METADATA_LENGTH_SIZE)).unwrap_or(usize::MAX)
}

fn put_u24(dst: &mut BytesMut, value: usize) {
    dst.put_uint(value as u64, METADATA_LENGTH_SIZE);
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "the frame type occupies the top 6 bits of the field"
)]
fn type_code(type_and_flags: u16) -> u8 { (type_and_flags >> 10) as u8 }

fn decode_payload(mut buf: Bytes, frame: Frame) -> Result<Frame, CodecError> {
    if !frame.flags().contains(Flags::METADATA) {
        return Ok(frame.with_data(buf));
    }
    ensure(&buf, METADATA_LENGTH_SIZE, Some(frame.frame_type()))?;
    let len = get_u24(&mut buf);
    if len > buf.remaining() {
        return Err(CodecError::MetadataTooLong {
            len,
            limit: buf.remaining(),
        });
    }
    let metadata = buf.split_to(len);
    Ok(frame.with_metadata(Some(metadata)).with_data(buf))
}

/// Decode one frame body, excluding the length prefix.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] or [`CodecError::MetadataTooLong`] if
/// the body is shorter than its header and flags require.
pub fn decode_body(mut buf: Bytes) -> Result<Frame, CodecError> {
    ensure(&buf, HEADER_SIZE, None)?;
    let stream_id = StreamId::new(buf.get_u32());
    let type_and_flags = buf.get_u16();
    let flags = Flags::from_bits(type_and_flags);
    let frame_type = FrameType::from_code(type_code(type_and_flags), flags);
    let frame = Frame::new(stream_id, frame_type).with_flags(flags);

    let frame = match frame_type {
        FrameType::RequestStream | FrameType::RequestChannel => {
            ensure(&buf, 4, Some(frame_type))?;
            let n = buf.get_u32();
            decode_payload(buf, frame.with_request_n(n))?
        }
        FrameType::RequestResponse
        | FrameType::FireAndForget
        | FrameType::Payload
        | FrameType::Next
        | FrameType::Complete
        | FrameType::NextComplete => decode_payload(buf, frame)?,
        FrameType::RequestN => {
            ensure(&buf, 4, Some(frame_type))?;
            frame.with_request_n(buf.get_u32())
        }
        FrameType::Error => {
            ensure(&buf, 4, Some(frame_type))?;
            let code = buf.get_u32();
            frame.with_error_code(code).with_data(buf)
        }
        FrameType::Keepalive => {
            ensure(&buf, 8, Some(frame_type))?;
            let position = buf.get_u64();
            frame.with_position(position).with_data(buf)
        }
        FrameType::MetadataPush => frame.with_metadata(Some(buf)),
        FrameType::Cancel => frame,
        FrameType::Reserved
        | FrameType::Setup
        | FrameType::Lease
        | FrameType::Resume
        | FrameType::ResumeOk
        | FrameType::Ext
        | FrameType::Unknown(_) => frame.with_data(buf),
    };
    tracing::trace!(
        stream_id = frame.stream_id().as_u32(),
        frame_type = ?frame.frame_type(),
        "decoded frame"
    );
    Ok(frame)
}

fn encode_payload(frame: &Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
    if let Some(metadata) = frame.metadata() {
        if metadata.len() > MAX_METADATA_LENGTH {
            return Err(CodecError::MetadataTooLong {
                len: metadata.len(),
                limit: MAX_METADATA_LENGTH,
            });
        }
        put_u24(dst, metadata.len());
        dst.put_slice(metadata);
    }
    dst.put_slice(frame.data());
    Ok(())
}

/// Encode one frame body, excluding the length prefix.
///
/// # Errors
///
/// Returns [`CodecError::MetadataTooLong`] if the metadata does not fit the
/// 24-bit length field.
pub fn encode_body(frame: &Frame) -> Result<Bytes, CodecError> {
    let frame_type = frame.frame_type();
    let mut dst = BytesMut::with_capacity(
        HEADER_SIZE
            + 12
            + frame.metadata().map_or(0, Bytes::len)
            + frame.data().len(),
    );
    dst.put_u32(frame.stream_id().as_u32());
    dst.put_u16((u16::from(frame_type.code()) << 10) | frame.flags().bits());

    match frame_type {
        FrameType::RequestStream | FrameType::RequestChannel => {
            dst.put_u32(frame.request_n_value());
            encode_payload(frame, &mut dst)?;
        }
        FrameType::RequestResponse
        | FrameType::FireAndForget
        | FrameType::Payload
        | FrameType::Next
        | FrameType::Complete
        | FrameType::NextComplete => encode_payload(frame, &mut dst)?,
        FrameType::RequestN => dst.put_u32(frame.request_n_value()),
        FrameType::Error => {
            dst.put_u32(frame.error_code().as_u32());
            dst.put_slice(frame.data());
        }
        FrameType::Keepalive => {
            dst.put_u64(frame.position());
            dst.put_slice(frame.data());
        }
        FrameType::MetadataPush => {
            if let Some(metadata) = frame.metadata() {
                dst.put_slice(metadata);
            }
        }
        FrameType::Cancel => {}
        FrameType::Reserved
        | FrameType::Setup
        | FrameType::Lease
        | FrameType::Resume
        | FrameType::ResumeOk
        | FrameType::Ext
        | FrameType::Unknown(_) => dst.put_slice(frame.data()),
    }
    Ok(dst.freeze())
}
