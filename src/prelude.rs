//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use hotfolder_watcher::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, FolderSettings, effective_settings};
pub use crate::core::errors::{HfwError, Result};

// Store
pub use crate::store::{ProcessedRecord, SeenRecord, StateStore};

// Hotfolder
pub use crate::hotfolder::items::{JobSnapshot, SystemFileFilter, list_jobs};
pub use crate::hotfolder::metadata::{MetadataWriter, NullMetadataWriter};
pub use crate::hotfolder::transfer::{TransferExecutor, TransferOptions, TransferOutcome};
pub use crate::hotfolder::worker::{
    CycleOutcome, CycleReport, FolderWorker, WorkerContext, WorkerExit, WorkerFlags,
};

// Logger
pub use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, LoggerConfig, spawn_logger};

// Daemon
pub use crate::daemon::dispatcher::{DiscoveryReport, Dispatcher};
#[cfg(feature = "daemon")]
pub use crate::daemon::signals::SignalHandler;
