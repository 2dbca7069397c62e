//! Codec-level error type.
//!
//! Frame decoding has a small closed set of failure modes that callers
//! match on (drop-and-log vs. surface a status line), so they get their
//! own enum rather than a bare message in the shared error type.

use certlink_core::Error;

/// Reasons a byte buffer fails to decode as a TLV frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The buffer is shorter than the fixed frame header.
    #[error("frame truncated: {0} bytes, need at least the {1}-byte header")]
    Truncated(usize, usize),

    /// The first two bytes are not the frame separator magic.
    #[error("bad frame separator {found:#06x}")]
    BadSeparator { found: u16 },

    /// The declared payload length exceeds the bytes actually supplied.
    #[error("declared length {declared} exceeds {available} available bytes")]
    LengthExceedsBuffer { declared: u16, available: usize },
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Error::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_error_display() {
        let e = FrameError::BadSeparator { found: 0xBEEF };
        assert_eq!(e.to_string(), "bad frame separator 0xbeef");

        let e = FrameError::LengthExceedsBuffer {
            declared: 100,
            available: 4,
        };
        assert!(e.to_string().contains("100"));
        assert!(e.to_string().contains("4"));
    }

    #[test]
    fn frame_error_converts_to_protocol_error() {
        let e: Error = FrameError::Truncated(3, 6).into();
        assert!(matches!(e, Error::Protocol(_)));
    }
}
