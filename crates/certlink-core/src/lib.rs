//! certlink-core: Core traits, types, and error definitions for certlink.
//!
//! This crate defines the link-agnostic abstractions shared by the control
//! agent and the DUT agent. The protocol and transport crates depend on
//! these types without pulling in any concrete socket or serial code.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`ConnKind`] / [`DutLink`] -- link configuration
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use certlink_core::*`.
pub use error::{Error, Result};
pub use transport::Transport;
pub use types::{ConnKind, DutLink};
