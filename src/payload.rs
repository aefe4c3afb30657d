//! Application payloads and the decoders that extract them from frames.
//!
//! The dispatcher releases every inbound frame as soon as it has been
//! dispatched, so a payload must not depend on the frame outliving it.
//! [`CopyingDecoder`] copies the frame's buffers and is the default.
//! [`ZeroCopyDecoder`] shares them instead, keeping the underlying allocation
//! alive for as long as the payload is.

use bytes::Bytes;
use thiserror::Error;

use crate::frame::{Frame, FrameType};

/// Data and optional metadata exchanged with a request handler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    data: Bytes,
    metadata: Option<Bytes>,
}

impl Payload {
    /// Create a payload from raw parts.
    #[must_use]
    pub fn new(data: impl Into<Bytes>, metadata: Option<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata,
        }
    }

    /// Create a payload carrying both data and metadata.
    #[must_use]
    pub fn with_metadata(data: impl Into<Bytes>, metadata: impl Into<Bytes>) -> Self {
        Self::new(data, Some(metadata.into()))
    }

    #[must_use]
    pub fn data(&self) -> &Bytes { &self.data }

    #[must_use]
    pub fn metadata(&self) -> Option<&Bytes> { self.metadata.as_ref() }

    #[must_use]
    pub fn has_metadata(&self) -> bool { self.metadata.is_some() }

    /// Data interpreted as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn data_utf8(&self) -> std::borrow::Cow<'_, str> { String::from_utf8_lossy(&self.data) }

    /// Split the payload into `(data, metadata)`.
    #[must_use]
    pub fn into_parts(self) -> (Bytes, Option<Bytes>) { (self.data, self.metadata) }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self { Self::new(data, None) }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self { Self::new(data, None) }
}

impl From<String> for Payload {
    fn from(data: String) -> Self { Self::new(data, None) }
}

impl From<&'static str> for Payload {
    fn from(data: &'static str) -> Self { Self::new(Bytes::from_static(data.as_bytes()), None) }
}

/// Errors produced while extracting a payload from a frame.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame type never carries a payload.
    #[error("{frame_type:?} frames do not carry a payload")]
    NoPayload {
        /// Type of the offending frame.
        frame_type: FrameType,
    },
    /// A custom decoder rejected the frame.
    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Converts a raw frame into an application payload.
///
/// Decoders must be pure: the frame is released immediately after dispatch,
/// so anything the payload needs must be copied or shared out of it.
pub trait PayloadDecoder: Send + Sync + 'static {
    /// Extract the payload carried by `frame`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if `frame` does not carry a valid payload.
    fn decode(&self, frame: &Frame) -> Result<Payload, DecodeError>;
}

impl<F> PayloadDecoder for F
where
    F: Fn(&Frame) -> Result<Payload, DecodeError> + Send + Sync + 'static,
{
    fn decode(&self, frame: &Frame) -> Result<Payload, DecodeError> { self(frame) }
}

fn ensure_payload(frame: &Frame) -> Result<(), DecodeError> {
    let frame_type = frame.frame_type();
    if frame_type.carries_payload() {
        Ok(())
    } else {
        Err(DecodeError::NoPayload { frame_type })
    }
}

/// Decoder copying data and metadata out of the frame buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct CopyingDecoder;

impl PayloadDecoder for CopyingDecoder {
    fn decode(&self, frame: &Frame) -> Result<Payload, DecodeError> {
        ensure_payload(frame)?;
        let data = Bytes::copy_from_slice(frame.data());
        let metadata = frame.metadata().map(|m| Bytes::copy_from_slice(m));
        Ok(Payload::new(data, metadata))
    }
}

/// Decoder sharing the frame buffer with the payload.
///
/// Cheaper than [`CopyingDecoder`], but the frame's allocation stays alive
/// until every payload decoded from it is dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroCopyDecoder;

impl PayloadDecoder for ZeroCopyDecoder {
    fn decode(&self, frame: &Frame) -> Result<Payload, DecodeError> {
        ensure_payload(frame)?;
        Ok(Payload::new(frame.data().clone(), frame.metadata().cloned()))
    }
}
