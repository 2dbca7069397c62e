//! certlink-proto: TLV wire codec and serial framing for certlink.
//!
//! Everything between the control agent and the DUT agent travels as TLV
//! frames ([`codec`]); on serial links the frames are recovered from the
//! raw byte stream by the synchronization layer ([`framing`]). The tag
//! space shared by both agents lives in [`tags`].

pub mod codec;
pub mod error;
pub mod framing;
pub mod params;
pub mod tags;

pub use codec::{
    decode_frame, encode_frame, encode_response, split_response, DecodedFrame, HDR_LEN,
    MAX_PAYLOAD, SEPARATOR, STATUS_COMPLETE, STATUS_ERROR, STATUS_INVALID, STATUS_RUNNING,
    SYNC_BYTE,
};
pub use error::FrameError;
pub use framing::{pacing_delay, read_frame, write_frame, FramerConfig};
pub use params::param_value;
