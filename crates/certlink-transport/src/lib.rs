//! certlink-transport: concrete transports for the control link.
//!
//! Implementations of the core [`Transport`](certlink_core::Transport)
//! trait over the three physical link kinds a test bed uses:
//!
//! - [`TcpTransport`] / [`TcpServer`] -- stream sockets for the manager
//!   link and the common CA-DUT deployment
//! - [`UdpTransport`] -- datagram sockets (one frame per datagram)
//! - [`SerialTransport`] -- raw-mode serial ports for DUTs without a
//!   usable network path

pub mod serial;
pub mod tcp;
pub mod udp;

pub use serial::{validate_baud, SerialTransport, FALLBACK_BAUD, SUPPORTED_BAUDS};
pub use tcp::{TcpServer, TcpTransport};
pub use udp::UdpTransport;
