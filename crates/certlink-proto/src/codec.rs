//! TLV frame encoder/decoder.
//!
//! Every message between the control agent and the DUT agent is one TLV
//! frame on the wire:
//!
//! ```text
//! 0xAA 0xAA <tag lo> <tag hi> <len lo> <len hi> [<value>...]
//! ```
//!
//! - Separator: the fixed magic [`SEPARATOR`], two `0xAA` bytes
//! - `tag`: 16-bit command or response tag, little-endian
//! - `len`: 16-bit payload length, little-endian
//! - `value`: `len` payload bytes
//!
//! On serial links the leading separator bytes double as the stream
//! synchronization marker (see [`crate::framing`]).
//!
//! Response payloads carry a 32-bit little-endian status word first, then
//! per-command data; the status codes mirror the manager-facing
//! `status,RUNNING` / `status,COMPLETE` / `status,INVALID` / `status,ERROR`
//! lines.

use bytes::{BufMut, BytesMut};

use crate::error::FrameError;

/// Synchronization/separator byte repeated twice at the start of every frame.
pub const SYNC_BYTE: u8 = 0xAA;

/// The two-byte frame separator magic.
pub const SEPARATOR: u16 = 0xAAAA;

/// Fixed frame header length: separator + tag + length.
pub const HDR_LEN: usize = 6;

/// Largest payload a decoded frame may carry into a parameter buffer.
pub const MAX_PAYLOAD: usize = 2048;

/// Response status word: command accepted, execution in progress.
pub const STATUS_RUNNING: u32 = 0x0001;
/// Response status word: command rejected (unknown, bad syntax, failed send).
pub const STATUS_INVALID: u32 = 0x0002;
/// Response status word: execution failed.
pub const STATUS_ERROR: u32 = 0x0003;
/// Response status word: execution finished, payload carries result fields.
pub const STATUS_COMPLETE: u32 = 0x0004;

/// A decoded TLV frame.
///
/// `value` is `None` when the declared payload length exceeded the
/// caller's capacity: the header fields are still returned and the
/// payload copy is skipped. Callers must check for that overflow
/// separately from header validity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Command or response tag.
    pub tag: u16,
    /// Declared payload length from the header.
    pub len: u16,
    /// Payload bytes, or `None` on a capacity overflow.
    pub value: Option<Vec<u8>>,
}

/// Encode a TLV frame ready for transmission.
///
/// No destination sizing is required of the caller; the only payload
/// constraint is the `u16` length domain, which the `u16` parameter
/// encodes in the signature.
///
/// # Example
///
/// ```
/// use certlink_proto::codec::encode_frame;
///
/// let frame = encode_frame(0x01, b"eth0");
/// assert_eq!(&frame[..6], &[0xAA, 0xAA, 0x01, 0x00, 0x04, 0x00]);
/// assert_eq!(&frame[6..], b"eth0");
/// ```
pub fn encode_frame(tag: u16, value: &[u8]) -> Vec<u8> {
    debug_assert!(value.len() <= u16::MAX as usize);
    let mut buf = BytesMut::with_capacity(HDR_LEN + value.len());
    buf.put_u16_le(SEPARATOR);
    buf.put_u16_le(tag);
    buf.put_u16_le(value.len() as u16);
    buf.put_slice(value);
    buf.to_vec()
}

/// Decode one TLV frame from a byte buffer.
///
/// `value_cap` is the caller's parameter-buffer capacity. A declared
/// length within the buffer but over `value_cap` is a partial decode:
/// the overflow is logged, `tag`/`len` are returned, and `value` is
/// `None`.
///
/// # Errors
///
/// - [`FrameError::Truncated`] if the buffer is shorter than the header
/// - [`FrameError::BadSeparator`] if the magic does not match
/// - [`FrameError::LengthExceedsBuffer`] if the declared length exceeds
///   the bytes supplied after the header
pub fn decode_frame(buf: &[u8], value_cap: usize) -> Result<DecodedFrame, FrameError> {
    if buf.len() < HDR_LEN {
        return Err(FrameError::Truncated(buf.len(), HDR_LEN));
    }

    let separator = u16::from_le_bytes([buf[0], buf[1]]);
    if separator != SEPARATOR {
        return Err(FrameError::BadSeparator { found: separator });
    }

    let tag = u16::from_le_bytes([buf[2], buf[3]]);
    let len = u16::from_le_bytes([buf[4], buf[5]]);

    let available = buf.len() - HDR_LEN;
    if len as usize > available {
        return Err(FrameError::LengthExceedsBuffer {
            declared: len,
            available,
        });
    }

    if len as usize > value_cap {
        tracing::warn!(tag, len, value_cap, "payload overflows value buffer, copy skipped");
        return Ok(DecodedFrame {
            tag,
            len,
            value: None,
        });
    }

    Ok(DecodedFrame {
        tag,
        len,
        value: Some(buf[HDR_LEN..HDR_LEN + len as usize].to_vec()),
    })
}

/// Read the tag field of an encoded frame without a full decode.
///
/// Returns `None` if the buffer is too short to hold a header.
pub fn tag_of(buf: &[u8]) -> Option<u16> {
    if buf.len() < HDR_LEN {
        return None;
    }
    Some(u16::from_le_bytes([buf[2], buf[3]]))
}

/// Read the length field of an encoded frame without a full decode.
pub fn len_of(buf: &[u8]) -> Option<u16> {
    if buf.len() < HDR_LEN {
        return None;
    }
    Some(u16::from_le_bytes([buf[4], buf[5]]))
}

/// Overwrite the tag field of an already-encoded frame in place.
///
/// Returns `false` if the buffer is too short to hold a header.
pub fn set_tag(buf: &mut [u8], tag: u16) -> bool {
    if buf.len() < HDR_LEN {
        return false;
    }
    buf[2..4].copy_from_slice(&tag.to_le_bytes());
    true
}

/// Encode a response frame: status word followed by result data.
pub fn encode_response(tag: u16, status: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + data.len());
    payload.extend_from_slice(&status.to_le_bytes());
    payload.extend_from_slice(data);
    encode_frame(tag, &payload)
}

/// Split a response payload into its status word and result data.
///
/// Returns `None` if the payload is shorter than the status word.
pub fn split_response(payload: &[u8]) -> Option<(u32, &[u8])> {
    if payload.len() < 4 {
        return None;
    }
    let status = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Some((status, &payload[4..]))
}
