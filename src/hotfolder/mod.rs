//! Hotfolder processing: inventory, transfer, retention, and the per-folder worker.

pub mod items;
pub mod metadata;
pub mod retention;
pub mod transfer;
pub mod worker;

pub use metadata::{MetadataWriter, NullMetadataWriter};
pub use worker::{CycleOutcome, CycleReport, FolderWorker, WorkerContext, WorkerExit, WorkerFlags};
