//! Daemon subsystem: folder discovery and worker dispatch, the liveness
//! heartbeat, and signal handling.

pub mod dispatcher;
pub mod heartbeat;
#[cfg(feature = "daemon")]
pub mod signals;

pub use dispatcher::{DiscoveryReport, Dispatcher, OncePass};
