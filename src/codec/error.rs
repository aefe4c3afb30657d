//! Error types for the frame codec.
//!
//! - [`CodecError::Io`]: the underlying byte stream failed, including a length prefix rejected by
//!   the framing layer.
//! - [`CodecError::Truncated`]: a frame body ended before a fixed-size field.
//! - [`CodecError::MetadataTooLong`]: a metadata length exceeded the bytes left in the frame, or
//!   an outbound metadata buffer exceeded the 24-bit length field.
//! - [`CodecError::OversizedFrame`]: an outbound frame exceeded the maximum frame length.

use std::io;

use thiserror::Error;

use crate::frame::FrameType;

/// Errors raised while encoding or decoding frames.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CodecError {
    /// I/O failure on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame body ended before a required field.
    #[error("truncated {frame_type:?} frame: have {have} bytes, need {need}")]
    Truncated {
        /// Type of the frame being decoded, if the header was complete.
        frame_type: Option<FrameType>,
        /// Bytes remaining when the field was read.
        have: usize,
        /// Bytes the field required.
        need: usize,
    },

    /// A metadata length did not fit the frame or the length field.
    #[error("metadata length {len} exceeds limit {limit}")]
    MetadataTooLong {
        /// Declared or actual metadata length.
        len: usize,
        /// Bytes available for metadata.
        limit: usize,
    },

    /// An outbound frame exceeded the maximum frame length.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Encoded body size.
        size: usize,
        /// Maximum allowed body size.
        max: usize,
    },
}
