//! Encoding and decoding of Uplink frames.
//!
//! Frames travel as MessagePack maps behind a 4-byte big-endian length
//! prefix. The prefix lets transports that deliver byte chunks (rather
//! than discrete messages) reassemble frames from a rolling buffer, and
//! keeps that buffer aligned even when a single frame body fails to
//! decode.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (4 MiB). Client-side payloads are small; anything
/// larger is treated as a protocol violation.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode a frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a frame to bytes: 4-byte big-endian length prefix followed by
/// the MessagePack body.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let body = rmp_serde::to_vec_named(frame)?;

    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);

    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let body = rmp_serde::to_vec_named(frame)?;

    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);

    Ok(())
}

/// Decode a single frame from a complete byte slice.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total = LENGTH_PREFIX_SIZE + length;
    if data.len() < total {
        return Err(ProtocolError::Incomplete(total - data.len()));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total])?;
    Ok(frame)
}

/// Try to decode the next frame from a rolling buffer, consuming it on
/// success.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed. On a body decode error the frame's
/// bytes have already been consumed, so the buffer stays aligned on the
/// next length prefix and decoding can resume with the following frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or its body is invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    if buf.len() < LENGTH_PREFIX_SIZE + length {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let body = buf.split_to(length);
    let frame = rmp_serde::from_slice(&body)?;

    Ok(Some(frame))
}
