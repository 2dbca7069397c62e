//! certlink-ca: the Control Agent.
//!
//! The CA sits between the test manager and the DUT agent: ASCII command
//! lines in from the manager, TLV frames out to the DUT, and the DUT's
//! binary replies rendered back as `status,*` lines.
//!
//! - [`commands`] -- the manager-command table and parameter encoders
//! - [`response`] -- the response decode table and status-line surface
//! - [`relay`] -- the relay engine driving one command cycle at a time

pub mod commands;
pub mod relay;
pub mod response;

pub use commands::{CommandTable, MatchPolicy};
pub use relay::{Relay, RelayConfig};
pub use response::ResponseTable;
