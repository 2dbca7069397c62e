//! Command and response tag space.
//!
//! Tags index dense dispatch and response tables sized [`table_size`]
//! entries. Tag zero is reserved: the DUT routes it (and any tag outside
//! the defined set) to the default "not implemented" handler, so every
//! tag produces some response.
//!
//! A response frame carries the command's tag plus [`RESP_OFFSET`].

/// Reserved; never dispatched to a real handler.
pub const TAG_NONE: u16 = 0x00;

pub const GET_VERSION: u16 = 0x01;
pub const DEVICE_GET_INFO: u16 = 0x02;
pub const DEVICE_LIST_INTERFACES: u16 = 0x03;
pub const STA_GET_IP_CONFIG: u16 = 0x04;
pub const STA_GET_MAC_ADDRESS: u16 = 0x05;
pub const STA_IS_CONNECTED: u16 = 0x06;
pub const STA_ASSOCIATE: u16 = 0x07;
pub const TRAFFIC_AGENT_CONFIG: u16 = 0x08;
pub const TRAFFIC_AGENT_SEND: u16 = 0x09;
pub const TRAFFIC_AGENT_RECV_START: u16 = 0x0A;
pub const TRAFFIC_AGENT_RECV_STOP: u16 = 0x0B;
pub const TRAFFIC_AGENT_RESET: u16 = 0x0C;

/// Highest defined command tag.
pub const MAX_COMMAND_TAG: u16 = TRAFFIC_AGENT_RESET;

/// Added to a command tag to form its response tag.
pub const RESP_OFFSET: u16 = 0x80;

/// Response tag for a command tag.
pub fn response_tag(command: u16) -> u16 {
    command + RESP_OFFSET
}

/// Number of slots in a dense table covering every command and response
/// tag: the top of the response range, plus one.
pub fn table_size() -> usize {
    (MAX_COMMAND_TAG + RESP_OFFSET) as usize + 1
}
