//! certlink-test-harness: mock transports for deterministic tests.
//!
//! Two mocks cover the two shapes of transport interaction in the
//! harness: [`MockTransport`] replays a script of request/reply
//! exchanges (command-cycle tests), [`ByteStreamTransport`] replays a
//! raw byte queue (serial synchronization tests).

pub mod mock;
pub mod stream;

pub use mock::MockTransport;
pub use stream::ByteStreamTransport;
