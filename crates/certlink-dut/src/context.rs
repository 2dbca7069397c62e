//! Agent session state threaded through the dispatch call chain.

use crate::traffic::{StreamTable, TrafficPool, MAX_STREAMS};

/// Everything the feature handlers may read or mutate.
///
/// One value, created at startup and passed by reference into every
/// dispatch; there are no process globals.
pub struct AgentContext {
    /// Agent version reported by GetVersion.
    pub version: String,
    /// Wireless interface under test.
    pub iface: String,
    /// Station MAC reported by the identity handlers.
    pub mac: String,
    /// Configured traffic streams; slot index == worker index.
    pub streams: StreamTable,
    /// The fixed traffic worker pool.
    pub pool: TrafficPool,
}

impl AgentContext {
    /// Build the context and start the worker pool.
    pub fn new(iface: &str) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            iface: iface.to_string(),
            mac: "02:00:5e:10:00:01".to_string(),
            streams: StreamTable::new(),
            pool: TrafficPool::spawn(MAX_STREAMS),
        }
    }
}
