//! Activity logging: a JSONL writer plus the logger thread that fans events out
//! to the global log and each hotfolder's own log.

pub mod dual;
pub mod jsonl;

pub use dual::{ActivityEvent, ActivityLoggerHandle, LoggerConfig, spawn_logger};
