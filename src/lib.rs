#![forbid(unsafe_code)]

//! Hotfolder Watcher (hfw): waits for jobs dropped into watched folders to
//! settle, then moves or copies each job version exactly once.
//!
//! Every hotfolder gets its own worker thread and its own durable state store,
//! so a restart never re-transfers a job it already delivered:
//! 1. **Dispatcher** discovers folders under the configured roots
//! 2. **Worker** runs the per-job seen/stable/processed state machine
//! 3. **Retention** purges retained copies once their TTL expires
//!
//! # Library usage
//!
//! ```rust,no_run
//! use hotfolder_watcher::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use hotfolder_watcher::core::config::Config;
//! use hotfolder_watcher::store::StateStore;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod hotfolder;
pub mod logger;
pub mod store;
