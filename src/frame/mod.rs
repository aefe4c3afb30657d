//! Frame model shared by the dispatcher, the codec, and transports.
//!
//! A [`Frame`] is an immutable protocol message tagged with a [`StreamId`]
//! and a [`FrameType`]. Frames own their buffers through [`Bytes`], so
//! dropping a frame releases its buffer. The dispatcher consumes inbound
//! frames by value, which makes release happen exactly once whichever branch
//! handles the frame.

use std::{borrow::Cow, fmt};

use bytes::Bytes;

use crate::{error::ErrorCode, payload::Payload};

#[cfg(test)]
mod tests;

/// Largest stream identifier representable on the wire (31 bits).
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Identifier of one logical stream multiplexed over a connection.
///
/// The reserved high bit is discarded on construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

impl StreamId {
    /// Stream id used by connection-level frames such as KEEPALIVE.
    pub const CONNECTION: StreamId = StreamId(0);

    /// Create a new [`StreamId`], masking the value to 31 bits.
    #[must_use]
    pub const fn new(id: u32) -> Self { Self(id & MAX_STREAM_ID) }

    /// Return the inner `u32` representation.
    #[must_use]
    pub const fn as_u32(self) -> u32 { self.0 }

    /// Whether this is the connection-level stream id.
    #[must_use]
    pub const fn is_connection(self) -> bool { self.0 == 0 }
}

impl From<u32> for StreamId {
    fn from(value: u32) -> Self { Self::new(value) }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "StreamId({})", self.0) }
}

/// Every frame type the protocol defines.
///
/// `Next`, `Complete` and `NextComplete` share the PAYLOAD wire code and are
/// distinguished by the NEXT and COMPLETE flags. Codes the protocol does not
/// define decode to [`FrameType::Unknown`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameType {
    Reserved,
    Setup,
    Lease,
    Keepalive,
    RequestResponse,
    FireAndForget,
    RequestStream,
    RequestChannel,
    RequestN,
    Cancel,
    /// PAYLOAD frame carrying neither the NEXT nor the COMPLETE flag.
    Payload,
    Error,
    MetadataPush,
    Resume,
    ResumeOk,
    Ext,
    Next,
    Complete,
    NextComplete,
    Unknown(u8),
}

impl FrameType {
    /// Wire code for PAYLOAD frames and their NEXT/COMPLETE variants.
    pub const PAYLOAD_CODE: u8 = 0x0A;

    /// Return the 6-bit wire code of this frame type.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            FrameType::Reserved => 0x00,
            FrameType::Setup => 0x01,
            FrameType::Lease => 0x02,
            FrameType::Keepalive => 0x03,
            FrameType::RequestResponse => 0x04,
            FrameType::FireAndForget => 0x05,
            FrameType::RequestStream => 0x06,
            FrameType::RequestChannel => 0x07,
            FrameType::RequestN => 0x08,
            FrameType::Cancel => 0x09,
            FrameType::Payload | FrameType::Next | FrameType::Complete | FrameType::NextComplete => {
                Self::PAYLOAD_CODE
            }
            FrameType::Error => 0x0B,
            FrameType::MetadataPush => 0x0C,
            FrameType::Resume => 0x0D,
            FrameType::ResumeOk => 0x0E,
            FrameType::Ext => 0x3F,
            FrameType::Unknown(code) => code,
        }
    }

    /// Resolve a wire code and its flags into a frame type.
    #[must_use]
    pub fn from_code(code: u8, flags: Flags) -> Self {
        match code {
            0x00 => FrameType::Reserved,
            0x01 => FrameType::Setup,
            0x02 => FrameType::Lease,
            0x03 => FrameType::Keepalive,
            0x04 => FrameType::RequestResponse,
            0x05 => FrameType::FireAndForget,
            0x06 => FrameType::RequestStream,
            0x07 => FrameType::RequestChannel,
            0x08 => FrameType::RequestN,
            0x09 => FrameType::Cancel,
            Self::PAYLOAD_CODE => match (flags.contains(Flags::NEXT), flags.contains(Flags::COMPLETE)) {
                (true, true) => FrameType::NextComplete,
                (true, false) => FrameType::Next,
                (false, true) => FrameType::Complete,
                (false, false) => FrameType::Payload,
            },
            0x0B => FrameType::Error,
            0x0C => FrameType::MetadataPush,
            0x0D => FrameType::Resume,
            0x0E => FrameType::ResumeOk,
            0x3F => FrameType::Ext,
            other => FrameType::Unknown(other),
        }
    }

    /// Whether frames of this type may carry an application payload.
    #[must_use]
    pub const fn carries_payload(self) -> bool {
        matches!(
            self,
            FrameType::RequestResponse
                | FrameType::FireAndForget
                | FrameType::RequestStream
                | FrameType::RequestChannel
                | FrameType::Payload
                | FrameType::Next
                | FrameType::NextComplete
                | FrameType::MetadataPush
        )
    }

    /// Whether frames of this type carry an initial request-n field.
    #[must_use]
    pub const fn has_initial_request_n(self) -> bool {
        matches!(self, FrameType::RequestStream | FrameType::RequestChannel)
    }
}

/// The 10-bit flag field of a frame header.
///
/// Some bits are overloaded by frame type: `FOLLOWS` and `RESPOND` share a
/// bit, as do `COMPLETE` and `LEASE`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(u16);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const IGNORE: Flags = Flags(0x200);
    pub const METADATA: Flags = Flags(0x100);
    pub const FOLLOWS: Flags = Flags(0x080);
    pub const RESPOND: Flags = Flags(0x080);
    pub const LEASE: Flags = Flags(0x040);
    pub const COMPLETE: Flags = Flags(0x040);
    pub const NEXT: Flags = Flags(0x020);
    /// Mask of the bits a flag field may use.
    pub const MASK: u16 = 0x3FF;

    /// Build a flag set from raw bits, discarding bits outside [`Flags::MASK`].
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self { Self(bits & Self::MASK) }

    #[must_use]
    pub const fn bits(self) -> u16 { self.0 }

    #[must_use]
    pub const fn contains(self, other: Flags) -> bool { self.0 & other.0 == other.0 }

    #[must_use]
    pub const fn with(self, other: Flags) -> Self { Self(self.0 | other.0) }

    #[must_use]
    pub const fn without(self, other: Flags) -> Self { Self(self.0 & !other.0) }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags { self.with(rhs) }
}

/// One protocol message.
///
/// Fields that only some frame types use (request-n, error code, keepalive
/// position) are zero elsewhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    stream_id: StreamId,
    frame_type: FrameType,
    flags: Flags,
    request_n: u32,
    error_code: u32,
    position: u64,
    metadata: Option<Bytes>,
    data: Bytes,
}

impl Frame {
    /// Create an empty frame of `frame_type` with default flags.
    ///
    /// Payload variants receive their NEXT/COMPLETE flags so the type
    /// survives encoding.
    #[must_use]
    pub fn new(stream_id: StreamId, frame_type: FrameType) -> Self {
        let flags = match frame_type {
            FrameType::Next => Flags::NEXT,
            FrameType::Complete => Flags::COMPLETE,
            FrameType::NextComplete => Flags::NEXT | Flags::COMPLETE,
            _ => Flags::NONE,
        };
        Self {
            stream_id,
            frame_type,
            flags,
            request_n: 0,
            error_code: 0,
            position: 0,
            metadata: None,
            data: Bytes::new(),
        }
    }

    fn with_payload(stream_id: StreamId, frame_type: FrameType, payload: Payload) -> Self {
        let (data, metadata) = payload.into_parts();
        let mut frame = Self::new(stream_id, frame_type);
        if metadata.is_some() {
            frame.flags = frame.flags.with(Flags::METADATA);
        }
        frame.metadata = metadata;
        frame.data = data;
        frame
    }

    /// REQUEST_RESPONSE frame carrying `payload`.
    #[must_use]
    pub fn request_response(stream_id: StreamId, payload: Payload) -> Self {
        Self::with_payload(stream_id, FrameType::RequestResponse, payload)
    }

    /// FIRE_AND_FORGET frame carrying `payload`.
    #[must_use]
    pub fn fire_and_forget(stream_id: StreamId, payload: Payload) -> Self {
        Self::with_payload(stream_id, FrameType::FireAndForget, payload)
    }

    /// REQUEST_STREAM frame granting `initial_request_n` items up front.
    #[must_use]
    pub fn request_stream(stream_id: StreamId, initial_request_n: u32, payload: Payload) -> Self {
        let mut frame = Self::with_payload(stream_id, FrameType::RequestStream, payload);
        frame.request_n = initial_request_n;
        frame
    }

    /// REQUEST_CHANNEL frame granting `initial_request_n` items up front.
    #[must_use]
    pub fn request_channel(stream_id: StreamId, initial_request_n: u32, payload: Payload) -> Self {
        let mut frame = Self::with_payload(stream_id, FrameType::RequestChannel, payload);
        frame.request_n = initial_request_n;
        frame
    }

    /// METADATA_PUSH frame on the connection stream.
    #[must_use]
    pub fn metadata_push(metadata: Bytes) -> Self {
        let mut frame = Self::new(StreamId::CONNECTION, FrameType::MetadataPush);
        frame.flags = Flags::METADATA;
        frame.metadata = Some(metadata);
        frame
    }

    /// NEXT frame carrying `payload`.
    #[must_use]
    pub fn next(stream_id: StreamId, payload: Payload) -> Self {
        Self::with_payload(stream_id, FrameType::Next, payload)
    }

    /// NEXT_COMPLETE frame carrying `payload`.
    #[must_use]
    pub fn next_complete(stream_id: StreamId, payload: Payload) -> Self {
        Self::with_payload(stream_id, FrameType::NextComplete, payload)
    }

    /// COMPLETE frame with no payload.
    #[must_use]
    pub fn complete(stream_id: StreamId) -> Self { Self::new(stream_id, FrameType::Complete) }

    /// ERROR frame with the given code and UTF-8 message.
    #[must_use]
    pub fn error(stream_id: StreamId, code: ErrorCode, message: impl Into<String>) -> Self {
        let mut frame = Self::new(stream_id, FrameType::Error);
        frame.error_code = code.as_u32();
        frame.data = Bytes::from(message.into());
        frame
    }

    /// CANCEL frame.
    #[must_use]
    pub fn cancel(stream_id: StreamId) -> Self { Self::new(stream_id, FrameType::Cancel) }

    /// REQUEST_N frame granting `n` more items.
    #[must_use]
    pub fn request_n(stream_id: StreamId, n: u32) -> Self {
        let mut frame = Self::new(stream_id, FrameType::RequestN);
        frame.request_n = n;
        frame
    }

    /// KEEPALIVE frame echoing `data`, optionally asking the peer to reply.
    #[must_use]
    pub fn keepalive(position: u64, data: Bytes, respond: bool) -> Self {
        let mut frame = Self::new(StreamId::CONNECTION, FrameType::Keepalive);
        if respond {
            frame.flags = Flags::RESPOND;
        }
        frame.position = position;
        frame.data = data;
        frame
    }

    /// Replace the flag field. Used by codecs and tests building raw frames.
    #[must_use]
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Replace the data buffer.
    #[must_use]
    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = data;
        self
    }

    /// Replace the metadata buffer, keeping the METADATA flag in step.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Option<Bytes>) -> Self {
        self.flags = if metadata.is_some() {
            self.flags.with(Flags::METADATA)
        } else {
            self.flags.without(Flags::METADATA)
        };
        self.metadata = metadata;
        self
    }

    /// Replace the request-n field.
    #[must_use]
    pub fn with_request_n(mut self, n: u32) -> Self {
        self.request_n = n;
        self
    }

    /// Replace the raw error code field.
    #[must_use]
    pub fn with_error_code(mut self, code: u32) -> Self {
        self.error_code = code;
        self
    }

    /// Replace the keepalive position field.
    #[must_use]
    pub fn with_position(mut self, position: u64) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId { self.stream_id }

    #[must_use]
    pub fn frame_type(&self) -> FrameType { self.frame_type }

    #[must_use]
    pub fn flags(&self) -> Flags { self.flags }

    /// Request-n carried by REQUEST_N, or the initial request-n of
    /// REQUEST_STREAM and REQUEST_CHANNEL frames.
    #[must_use]
    pub fn request_n_value(&self) -> u32 { self.request_n }

    /// Error code carried by an ERROR frame.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode { ErrorCode::from_u32(self.error_code) }

    /// Error message carried by an ERROR frame.
    #[must_use]
    pub fn error_message(&self) -> Cow<'_, str> { String::from_utf8_lossy(&self.data) }

    /// Last received position carried by a KEEPALIVE frame.
    #[must_use]
    pub fn position(&self) -> u64 { self.position }

    /// Whether a KEEPALIVE frame asks for a reply.
    #[must_use]
    pub fn respond_requested(&self) -> bool {
        self.frame_type == FrameType::Keepalive && self.flags.contains(Flags::RESPOND)
    }

    /// Whether a request frame also completes its request direction.
    #[must_use]
    pub fn is_complete(&self) -> bool { self.flags.contains(Flags::COMPLETE) }

    #[must_use]
    pub fn has_metadata(&self) -> bool { self.flags.contains(Flags::METADATA) }

    #[must_use]
    pub fn metadata(&self) -> Option<&Bytes> { self.metadata.as_ref() }

    #[must_use]
    pub fn data(&self) -> &Bytes { &self.data }
}
