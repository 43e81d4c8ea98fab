//! Codec for encoding and decoding Parley frames.
//!
//! Wire format: a 4-byte big-endian length prefix followed by the
//! MessagePack encoding of the frame (named fields).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Hard upper bound on a frame body (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the codec's size limit.
    #[error("Frame size {size} exceeds limit {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    /// Not enough data to decode a frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Frame codec with a configurable size limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl FrameCodec {
    /// Create a codec that rejects frames larger than `max_frame_size`.
    ///
    /// The limit never exceeds [`MAX_FRAME_SIZE`].
    #[must_use]
    pub fn with_limit(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    fn check(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                limit: self.max_frame_size,
            });
        }
        Ok(())
    }

    /// Append an encoded frame to `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or encoding fails.
    pub fn encode_into(&self, frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let body = rmp_serde::to_vec_named(frame)?;
        self.check(body.len())?;

        buf.reserve(LENGTH_PREFIX_SIZE + body.len());
        buf.put_u32(body.len() as u32);
        buf.extend_from_slice(&body);
        Ok(())
    }

    /// Encode a frame into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or encoding fails.
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode_into(frame, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode exactly one frame from the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is incomplete, too large, or invalid.
    pub fn decode(&self, data: &[u8]) -> Result<Frame, ProtocolError> {
        let Some(length) = peek_length(data) else {
            return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
        };
        self.check(length)?;

        let total = LENGTH_PREFIX_SIZE + length;
        if data.len() < total {
            return Err(ProtocolError::Incomplete(total - data.len()));
        }

        Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total])?)
    }

    /// Try to take one frame off the front of a streaming buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed; the buffer is only
    /// advanced when a whole frame is available.
    ///
    /// # Errors
    ///
    /// Returns an error if the announced frame is too large or invalid.
    pub fn decode_from(&self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let Some(length) = peek_length(buf) else {
            return Ok(None);
        };
        self.check(length)?;

        if buf.len() < LENGTH_PREFIX_SIZE + length {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let body = buf.split_to(length);
        Ok(Some(rmp_serde::from_slice(&body)?))
    }
}

fn peek_length(data: &[u8]) -> Option<usize> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = data.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix) as usize)
}

/// Encode a frame with the default codec.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    FrameCodec::default().encode(frame)
}

/// Decode a frame with the default codec.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    FrameCodec::default().decode(data)
}
