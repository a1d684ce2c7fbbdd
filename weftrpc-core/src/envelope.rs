//! Length-prefixed message framing.
//!
//! Each message travels on the wire as:
//!
//! ```text
//! [compressed:1][length:4 BE][payload:length]
//! ```
//!
//! The compressed flag is 0 or 1; any other value is a framing error.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frame header size (compressed flag + length).
pub const FRAME_HEADER_LEN: usize = 5;

/// Default cap on a single decoded message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

mod flags {
    pub const UNCOMPRESSED: u8 = 0x00;
    pub const COMPRESSED: u8 = 0x01;
}

/// Framing errors.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The compressed flag byte was neither 0 nor 1.
    #[error("invalid frame flag: 0x{0:02x}")]
    InvalidFlag(u8),

    /// The declared payload length exceeds the configured maximum.
    #[error("frame of {length} bytes exceeds maximum of {max} bytes")]
    Oversized { length: usize, max: usize },
}

/// Frame a payload for the wire.
pub fn encode_frame(payload: &[u8], compressed: bool) -> Bytes {
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u8(if compressed {
        flags::COMPRESSED
    } else {
        flags::UNCOMPRESSED
    });
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    frame.freeze()
}

/// Decode one frame from an accumulator of wire bytes.
///
/// Returns `Ok(Some((compressed, payload)))` and consumes the frame when a
/// complete one is buffered, `Ok(None)` when more bytes are needed. The
/// accumulator is left untouched on an incomplete frame.
pub fn decode_frame(
    buf: &mut BytesMut,
    max_size: usize,
) -> Result<Option<(bool, Bytes)>, EnvelopeError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let flag = buf[0];
    let compressed = match flag {
        flags::UNCOMPRESSED => false,
        flags::COMPRESSED => true,
        other => return Err(EnvelopeError::InvalidFlag(other)),
    };

    let length = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if length > max_size {
        return Err(EnvelopeError::Oversized {
            length,
            max: max_size,
        });
    }

    if buf.len() < FRAME_HEADER_LEN + length {
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_LEN);
    let payload = buf.split_to(length).freeze();
    Ok(Some((compressed, payload)))
}
