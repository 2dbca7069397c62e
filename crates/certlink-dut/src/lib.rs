//! certlink-dut: the DUT agent.
//!
//! Runs on the device under test: receives TLV command frames from the
//! control agent, dispatches them to feature handlers, and drives the
//! traffic-generation worker pool.
//!
//! - [`dispatch`] -- the dense dispatch table and control loop
//! - [`handlers`] -- feature command implementations
//! - [`context`] -- agent session state (no globals)
//! - [`traffic`] -- the fixed worker pool and stream table

pub mod context;
pub mod dispatch;
pub mod handlers;
pub mod traffic;

pub use context::AgentContext;
pub use dispatch::{DispatchTable, Dispatcher, DispatcherConfig};
pub use traffic::{StreamProfile, StreamTable, TrafficPool, MAX_STREAMS};
