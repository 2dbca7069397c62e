//! Response decode table: DUT reply frames to manager status lines.
//!
//! A dense table indexed by response tag maps each reply to a formatter
//! that renders the manager-facing `status,...` line. Built once at
//! startup, read-only afterwards. An unregistered tag falls through to a
//! generic `status,INVALID` in the relay.

use certlink_proto::codec::{
    split_response, STATUS_COMPLETE, STATUS_ERROR, STATUS_INVALID, STATUS_RUNNING,
};
use certlink_proto::tags;

/// Manager-facing status lines for the relay's own error surface.
pub const LINE_RUNNING: &str = "status,RUNNING\r\n";
pub const LINE_INVALID: &str = "status,INVALID\r\n";
pub const LINE_ERROR: &str = "status,ERROR\r\n";
pub const LINE_NO_SUCH_COMMAND: &str = "status,INVALID,no_such_command\r\n";
pub const LINE_INCORRECT_SYNTAX: &str = "status,INVALID,incorrect_syntax\r\n";
pub const LINE_SEND_FAILED: &str = "status,INVALID,send_failed\r\n";
pub const LINE_RESPONSE_TIMEOUT: &str = "status,INVALID,response_timeout\r\n";

/// Renders one DUT response payload as a manager status line.
pub type ResponseFormatter = fn(&[u8]) -> String;

/// Dense response-formatter table sized to the top of the tag space.
pub struct ResponseTable {
    slots: Vec<Option<ResponseFormatter>>,
}

impl ResponseTable {
    /// The built-in formatter set.
    pub fn builtin() -> Self {
        let mut slots: Vec<Option<ResponseFormatter>> = vec![None; tags::table_size()];

        let mut register = |command: u16, formatter: ResponseFormatter| {
            slots[tags::response_tag(command) as usize] = Some(formatter);
        };

        register(tags::GET_VERSION, fmt_version);
        register(tags::DEVICE_GET_INFO, fmt_fields);
        register(tags::DEVICE_LIST_INTERFACES, fmt_fields);
        register(tags::STA_GET_IP_CONFIG, fmt_fields);
        register(tags::STA_GET_MAC_ADDRESS, fmt_fields);
        register(tags::STA_IS_CONNECTED, fmt_fields);
        register(tags::STA_ASSOCIATE, fmt_plain);
        register(tags::TRAFFIC_AGENT_CONFIG, fmt_fields);
        register(tags::TRAFFIC_AGENT_SEND, fmt_fields);
        register(tags::TRAFFIC_AGENT_RECV_START, fmt_plain);
        register(tags::TRAFFIC_AGENT_RECV_STOP, fmt_fields);
        register(tags::TRAFFIC_AGENT_RESET, fmt_plain);

        Self { slots }
    }

    /// Formatter for a response tag, if one is registered.
    pub fn lookup(&self, tag: u16) -> Option<ResponseFormatter> {
        self.slots.get(tag as usize).copied().flatten()
    }
}

/// Map a wire status word to its manager-facing keyword.
fn status_keyword(status: u32) -> &'static str {
    match status {
        STATUS_RUNNING => "RUNNING",
        STATUS_COMPLETE => "COMPLETE",
        STATUS_ERROR => "ERROR",
        STATUS_INVALID => "INVALID",
        _ => "INVALID",
    }
}

/// Status keyword only: `status,COMPLETE`.
fn fmt_plain(payload: &[u8]) -> String {
    match split_response(payload) {
        Some((status, _)) => format!("status,{}\r\n", status_keyword(status)),
        None => LINE_INVALID.to_string(),
    }
}

/// Status keyword plus the DUT's ASCII result fields verbatim.
fn fmt_fields(payload: &[u8]) -> String {
    match split_response(payload) {
        Some((STATUS_COMPLETE, data)) if !data.is_empty() => {
            format!("status,COMPLETE,{}\r\n", String::from_utf8_lossy(data))
        }
        Some((status, _)) => format!("status,{}\r\n", status_keyword(status)),
        None => LINE_INVALID.to_string(),
    }
}

/// Version replies get their field label here rather than on the DUT.
fn fmt_version(payload: &[u8]) -> String {
    match split_response(payload) {
        Some((STATUS_COMPLETE, data)) => {
            format!("status,COMPLETE,version,{}\r\n", String::from_utf8_lossy(data))
        }
        Some((status, _)) => format!("status,{}\r\n", status_keyword(status)),
        None => LINE_INVALID.to_string(),
    }
}
