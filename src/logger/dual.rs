//! Logger thread: fans activity events out to the global log and per-folder logs.
//!
//! A dedicated thread owns every `JsonlWriter`: the global activity log and one
//! `<folder>/.log/<name>.jsonl` writer per hotfolder, opened lazily and closed
//! when that folder's worker stops. Other threads send `ActivityEvent`s over a
//! bounded crossbeam channel with `try_send`, so a slow disk never stalls a
//! worker cycle.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{HfwError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity, format_epoch};

/// Directory (inside each hotfolder) holding its JSONL log.
pub const FOLDER_LOG_DIR: &str = ".log";

/// Events emitted by the dispatcher and workers.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
        roots: usize,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    ConfigReloaded {
        details: String,
    },
    WorkerStarted {
        folder: PathBuf,
        output: PathBuf,
    },
    WorkerStopped {
        folder: PathBuf,
        reason: String,
    },
    FolderVanished {
        folder: PathBuf,
    },
    ConfigRejected {
        folder: PathBuf,
        code: String,
        message: String,
    },
    JobArrived {
        folder: PathBuf,
        job: String,
        nested: Vec<String>,
    },
    JobWaiting {
        folder: PathBuf,
        job: String,
        ready_at: f64,
    },
    JobStable {
        folder: PathBuf,
        job: String,
    },
    JobTransferred {
        folder: PathBuf,
        job: String,
        destination: PathBuf,
        moved: usize,
        keep_copy: bool,
        duration_ms: u64,
    },
    TransferFailed {
        folder: PathBuf,
        job: String,
        code: String,
        message: String,
    },
    RecordsReconciled {
        folder: PathBuf,
        removed: usize,
    },
    ContainerRemoved {
        folder: PathBuf,
        job: String,
    },
    RetentionPurged {
        folder: PathBuf,
        item: String,
        deleted_from_disk: bool,
    },
    RetentionFailed {
        folder: PathBuf,
        item: String,
        code: String,
        message: String,
    },
    Warning {
        folder: Option<PathBuf>,
        message: String,
    },
    Debug {
        folder: PathBuf,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

impl ActivityEvent {
    /// Hotfolder this event belongs to, if any.
    pub fn folder(&self) -> Option<&Path> {
        match self {
            Self::WorkerStarted { folder, .. }
            | Self::WorkerStopped { folder, .. }
            | Self::FolderVanished { folder }
            | Self::ConfigRejected { folder, .. }
            | Self::JobArrived { folder, .. }
            | Self::JobWaiting { folder, .. }
            | Self::JobStable { folder, .. }
            | Self::JobTransferred { folder, .. }
            | Self::TransferFailed { folder, .. }
            | Self::RecordsReconciled { folder, .. }
            | Self::ContainerRemoved { folder, .. }
            | Self::RetentionPurged { folder, .. }
            | Self::RetentionFailed { folder, .. }
            | Self::Debug { folder, .. } => Some(folder),
            Self::Warning { folder, .. } => folder.as_deref(),
            _ => None,
        }
    }
}

/// Cheaply-cloneable handle for sending log events. Never blocks.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Build a handle plus the receiving end, without spawning a thread.
    pub fn channel(capacity: usize) -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// A handle whose events go nowhere.
    pub fn detached() -> Self {
        Self::channel(1).0
    }

    /// Queue an event. A full channel drops it and bumps the dropped counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks until the sentinel is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

impl std::fmt::Debug for ActivityLoggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLoggerHandle")
            .field("dropped_events", &self.dropped_events())
            .finish_non_exhaustive()
    }
}

/// Options for the logger thread.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Global activity log.
    pub jsonl_config: JsonlConfig,
    /// Mirror folder-scoped events into `<folder>/.log/<name>.jsonl`.
    pub per_folder_logs: bool,
    pub channel_capacity: usize,
}

impl LoggerConfig {
    /// Logger settings from the loaded configuration.
    pub fn from_config(config: &crate::core::config::Config) -> Self {
        Self {
            jsonl_config: JsonlConfig {
                path: config.paths.activity_log.clone(),
                fallback_path: Some(std::env::temp_dir().join("hfw-activity.jsonl")),
                max_size_bytes: config.logging.max_size_bytes,
                max_rotated_files: config.logging.max_rotated_files,
                fsync_interval_secs: config.logging.fsync_interval_secs,
            },
            per_folder_logs: config.logging.per_folder_logs,
            channel_capacity: config.logging.channel_capacity,
        }
    }
}

/// Spawn the logger thread and return its handle.
pub fn spawn_logger(config: LoggerConfig) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (handle, rx) = ActivityLoggerHandle::channel(config.channel_capacity);
    let dropped = Arc::clone(&handle.dropped_events);

    let join = thread::Builder::new()
        .name("hfw-logger".to_string())
        .spawn(move || logger_thread_main(&rx, &config, &dropped))
        .map_err(|e| HfwError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

/// Path of a folder's own log file.
pub fn folder_log_path(folder: &Path) -> PathBuf {
    let name = folder
        .file_name()
        .map_or_else(|| "hotfolder".to_string(), |n| n.to_string_lossy().into_owned());
    folder.join(FOLDER_LOG_DIR).join(format!("{name}.jsonl"))
}

struct Sinks {
    global: JsonlWriter,
    folders: HashMap<PathBuf, JsonlWriter>,
    template: JsonlConfig,
    per_folder: bool,
}

impl Sinks {
    fn write(&mut self, event: &ActivityEvent, entry: &LogEntry) {
        self.global.write_entry(entry);
        if !self.per_folder {
            return;
        }
        let Some(folder) = event.folder() else {
            return;
        };
        // A vanished folder must not be recreated by its own log line.
        if !folder.is_dir() {
            self.close(folder);
            return;
        }
        let template = &self.template;
        let writer = self.folders.entry(folder.to_path_buf()).or_insert_with(|| {
            JsonlWriter::open(JsonlConfig {
                path: folder_log_path(folder),
                fallback_path: None,
                ..template.clone()
            })
        });
        writer.write_entry(entry);
        if matches!(event, ActivityEvent::WorkerStopped { .. }) {
            self.close(folder);
        }
    }

    fn close(&mut self, folder: &Path) {
        if let Some(mut w) = self.folders.remove(folder) {
            w.fsync();
        }
    }

    fn finish(&mut self) {
        for w in self.folders.values_mut() {
            w.fsync();
        }
        self.folders.clear();
        self.global.fsync();
    }
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: &LoggerConfig, dropped: &AtomicU64) {
    let mut sinks = Sinks {
        global: JsonlWriter::open(config.jsonl_config.clone()),
        folders: HashMap::new(),
        template: config.jsonl_config.clone(),
        per_folder: config.per_folder_logs,
    };

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Warning, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            sinks.global.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        let entry = event_to_log_entry(&event);
        sinks.write(&event, &entry);
        if rx.is_empty() {
            sinks.global.flush();
            for w in sinks.folders.values_mut() {
                w.flush();
            }
        }
    }

    sinks.finish();
}

fn folder_name(folder: &Path) -> String {
    folder.display().to_string()
}

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
            roots,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.count = Some(*roots as u64);
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e
        }
        ActivityEvent::ConfigReloaded { details } => {
            let mut e = LogEntry::new(EventType::ConfigReload, Severity::Info);
            e.details = Some(details.clone());
            e
        }
        ActivityEvent::WorkerStarted { folder, output } => {
            let mut e = LogEntry::new(EventType::WorkerStart, Severity::Info);
            e.folder = Some(folder_name(folder));
            e.destination = Some(output.display().to_string());
            e
        }
        ActivityEvent::WorkerStopped { folder, reason } => {
            let mut e = LogEntry::new(EventType::WorkerStop, Severity::Info);
            e.folder = Some(folder_name(folder));
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::FolderVanished { folder } => {
            let mut e = LogEntry::new(EventType::FolderVanished, Severity::Warning);
            e.folder = Some(folder_name(folder));
            e
        }
        ActivityEvent::ConfigRejected {
            folder,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::ConfigRejected, Severity::Critical);
            e.folder = Some(folder_name(folder));
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::JobArrived {
            folder,
            job,
            nested,
        } => {
            let mut e = LogEntry::new(EventType::JobArrived, Severity::Info);
            e.folder = Some(folder_name(folder));
            e.item = Some(job.clone());
            if !nested.is_empty() {
                e.count = Some(nested.len() as u64);
                e.details = Some(nested.join(", "));
            }
            e
        }
        ActivityEvent::JobWaiting {
            folder,
            job,
            ready_at,
        } => {
            let mut e = LogEntry::new(EventType::JobWaiting, Severity::Info);
            e.folder = Some(folder_name(folder));
            e.item = Some(job.clone());
            e.ready_at = Some(format_epoch(*ready_at));
            e
        }
        ActivityEvent::JobStable { folder, job } => {
            let mut e = LogEntry::new(EventType::JobStable, Severity::Info);
            e.folder = Some(folder_name(folder));
            e.item = Some(job.clone());
            e
        }
        ActivityEvent::JobTransferred {
            folder,
            job,
            destination,
            moved,
            keep_copy,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::JobTransferred, Severity::Info);
            e.folder = Some(folder_name(folder));
            e.item = Some(job.clone());
            e.destination = Some(destination.display().to_string());
            e.count = Some(*moved as u64);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(if *keep_copy { "copy" } else { "move" }.to_string());
            e.ok = Some(true);
            e
        }
        ActivityEvent::TransferFailed {
            folder,
            job,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::TransferFailed, Severity::Warning);
            e.folder = Some(folder_name(folder));
            e.item = Some(job.clone());
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::RecordsReconciled { folder, removed } => {
            let mut e = LogEntry::new(EventType::RecordsReconciled, Severity::Info);
            e.folder = Some(folder_name(folder));
            e.count = Some(*removed as u64);
            e
        }
        ActivityEvent::ContainerRemoved { folder, job } => {
            let mut e = LogEntry::new(EventType::ContainerRemoved, Severity::Info);
            e.folder = Some(folder_name(folder));
            e.item = Some(job.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::RetentionPurged {
            folder,
            item,
            deleted_from_disk,
        } => {
            let mut e = LogEntry::new(EventType::RetentionPurge, Severity::Info);
            e.folder = Some(folder_name(folder));
            e.item = Some(item.clone());
            e.details = Some(format!("deleted_from_disk={deleted_from_disk}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::RetentionFailed {
            folder,
            item,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::RetentionFailed, Severity::Warning);
            e.folder = Some(folder_name(folder));
            e.item = Some(item.clone());
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Warning { folder, message } => {
            let mut e = LogEntry::new(EventType::Warning, Severity::Warning);
            e.folder = folder.as_deref().map(folder_name);
            e.details = Some(message.clone());
            e
        }
        ActivityEvent::Debug { folder, message } => {
            let mut e = LogEntry::new(EventType::Debug, Severity::Debug);
            e.folder = Some(folder_name(folder));
            e.details = Some(message.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}

// ──────────────────── tests ────────────────────
