//! Transport trait for control-link communication.
//!
//! The [`Transport`] trait abstracts over the physical link between the
//! control agent, the DUT agent, and the test manager. Implementations
//! exist for TCP sockets, connected UDP sockets, serial ports, and mock
//! transports for testing.
//!
//! The relay and dispatch loops operate on a `Transport` rather than on a
//! concrete socket or port, so the same command cycle runs unchanged over
//! all three link kinds and under deterministic tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport over one control link.
///
/// Implementations handle connection state and error mapping at the
/// physical layer. Framing (the TLV separator hunt on serial links) is
/// layered on top by the protocol crate.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the peer.
    ///
    /// Implementations block until all bytes have been handed to the
    /// underlying link (socket buffer, serial TX queue).
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the peer into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Waits up to `timeout`
    /// for data; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing arrives within the deadline. Callers decide whether a
    /// timeout is benign (idle control link) or a failure (mid-frame).
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After `close()`, subsequent `send()` and `receive()` calls return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
