//! JSONL activity log: one self-contained JSON object per line.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! tailing reader never sees a partial line. When the primary file cannot be
//! written the writer degrades to the fallback path, then stderr with an
//! `[HFW-JSONL]` prefix, then silently discards. Logging never fails back into
//! the watcher.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HfwError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Critical,
}

/// Event identifiers written to the `event` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DaemonStart,
    DaemonStop,
    ConfigReload,
    WorkerStart,
    WorkerStop,
    FolderVanished,
    ConfigRejected,
    JobArrived,
    JobWaiting,
    JobStable,
    JobTransferred,
    TransferFailed,
    RecordsReconciled,
    ContainerRemoved,
    RetentionPurge,
    RetentionFailed,
    Warning,
    Debug,
    Error,
}

/// A single JSONL log entry. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with milliseconds.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Hotfolder the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// Item id (or path) the event is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Projected transfer time for a waiting job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            folder: None,
            item: None,
            destination: None,
            count: None,
            ready_at: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

/// Configuration for one JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Optional second location tried when `path` is unwritable.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the file would exceed this size.
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        let defaults = crate::core::config::LoggingConfig::default();
        Self {
            path: crate::core::config::PathsConfig::default().activity_log,
            fallback_path: Some(std::env::temp_dir().join("hfw-activity.jsonl")),
            max_size_bytes: defaults.max_size_bytes,
            max_rotated_files: defaults.max_rotated_files,
            fsync_interval_secs: defaults.fsync_interval_secs,
        }
    }
}

/// Append-only JSONL writer with size rotation and a degradation chain.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
    last_fsync: SystemTime,
}

impl JsonlWriter {
    /// Open the log. Falls through the degradation chain on failure.
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
            last_fsync: SystemTime::now(),
        };
        match open_append(&w.config.path) {
            Ok((file, size)) => w.install(file, size, WriterState::Primary),
            Err(_) => w.open_fallback(),
        }
        w
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[HFW-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
        }
        self.last_fsync = SystemTime::now();
    }

    /// Current degradation state: `primary`, `fallback`, `stderr` or `discard`.
    pub fn state(&self) -> &'static str {
        match self.state {
            WriterState::Primary => "primary",
            WriterState::Fallback => "fallback",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn install(&mut self, file: File, size: u64, state: WriterState) {
        self.writer = Some(BufWriter::with_capacity(16 * 1024, file));
        self.bytes_written = size;
        self.state = state;
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.writer.is_some() && self.bytes_written + len > self.config.max_size_bytes {
            self.rotate();
        }

        match self.state {
            WriterState::Primary | WriterState::Fallback => {
                let written = self
                    .writer
                    .as_mut()
                    .is_some_and(|w| w.write_all(line.as_bytes()).is_ok());
                if written {
                    self.bytes_written += len;
                    self.maybe_fsync();
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                let _ = write!(io::stderr(), "[HFW-JSONL] {line}");
            }
            WriterState::Discard => {}
        }
    }

    fn maybe_fsync(&mut self) {
        let elapsed = SystemTime::now()
            .duration_since(self.last_fsync)
            .unwrap_or(Duration::ZERO);
        if elapsed.as_secs() >= self.config.fsync_interval_secs {
            self.fsync();
        }
    }

    fn open_fallback(&mut self) {
        let opened = self
            .config
            .fallback_path
            .as_deref()
            .and_then(|fb| open_append(fb).ok().map(|opened| (fb.to_path_buf(), opened)));
        if let Some((fb, (file, size))) = opened {
            let _ = writeln!(
                io::stderr(),
                "[HFW-JSONL] {} unwritable, using fallback {}",
                self.config.path.display(),
                fb.display()
            );
            self.install(file, size, WriterState::Fallback);
        } else {
            let _ = writeln!(
                io::stderr(),
                "[HFW-JSONL] {} unwritable, logging to stderr",
                self.config.path.display()
            );
            self.writer = None;
            self.state = WriterState::Stderr;
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        match self.state {
            WriterState::Primary => self.open_fallback(),
            WriterState::Fallback => self.state = WriterState::Stderr,
            WriterState::Stderr | WriterState::Discard => self.state = WriterState::Discard,
        }
    }

    fn rotate(&mut self) {
        self.flush();
        self.writer = None;

        let base = match (self.state, &self.config.fallback_path) {
            (WriterState::Primary, _) => self.config.path.clone(),
            (WriterState::Fallback, Some(fb)) => fb.clone(),
            _ => return,
        };

        // activity.jsonl.N is dropped, every other suffix shifts up by one.
        let keep = self.config.max_rotated_files;
        let _ = fs::remove_file(rotated_name(&base, keep));
        for i in (1..keep).rev() {
            let _ = fs::rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        if keep > 0 {
            let _ = fs::rename(&base, rotated_name(&base, 1));
        } else {
            let _ = fs::remove_file(&base);
        }

        match open_append(&base) {
            Ok((file, _)) => {
                let state = self.state;
                self.install(file, 0, state);
            }
            Err(_) => self.degrade(),
        }
    }
}

// ──────────────────────── helpers ────────────────────────

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| HfwError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| HfwError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `activity.jsonl` → `activity.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Format Unix epoch seconds as RFC 3339 UTC (falls back to the raw number).
#[allow(clippy::cast_possible_truncation)]
pub fn format_epoch(secs: f64) -> String {
    let millis = (secs * 1000.0).round() as i64;
    chrono::DateTime::from_timestamp_millis(millis).map_or_else(
        || format!("{secs:.3}"),
        |dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    )
}

// ──────────────────────── tests ────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config_at(path: PathBuf, max_size_bytes: u64) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        }
    }

    #[test]
    fn writes_one_parseable_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone(), 1024 * 1024));
        assert_eq!(writer.state(), "primary");

        let mut entry = LogEntry::new(EventType::JobArrived, Severity::Info);
        entry.folder = Some("client-a".to_string());
        entry.item = Some("job/a.txt".to_string());
        writer.write_entry(&entry);
        writer.write_entry(&LogEntry::new(EventType::JobStable, Severity::Info));
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["event"], "job_arrived");
        assert_eq!(parsed["severity"], "info");
        assert_eq!(parsed["item"], "job/a.txt");
        assert!(parsed.get("destination").is_none());
    }

    #[test]
    fn rotation_keeps_bounded_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone(), 120));
        for _ in 0..20 {
            writer.write_entry(&LogEntry::new(EventType::RecordsReconciled, Severity::Info));
        }
        writer.flush();

        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
        assert!(!rotated_name(&path, 4).exists());
    }

    #[test]
    fn falls_back_when_primary_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let mut writer = JsonlWriter::open(JsonlConfig {
            path: blocker.join("activity.jsonl"),
            fallback_path: Some(fallback.clone()),
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        });

        assert_eq!(writer.state(), "fallback");
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Critical));
        writer.flush();
        assert!(!fs::read_to_string(&fallback).unwrap().is_empty());
    }

    #[test]
    fn stderr_when_no_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let writer = JsonlWriter::open(config_at(blocker.join("x.jsonl"), 1024));
        assert_eq!(writer.state(), "stderr");
    }

    #[test]
    fn severity_orders_by_importance() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn format_epoch_is_rfc3339() {
        assert_eq!(format_epoch(0.0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_epoch(1.5), "1970-01-01T00:00:01.500Z");
    }
}
