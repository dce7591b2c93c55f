//! Liveness file: a small JSON document rewritten atomically on an interval.
//!
//! External supervisors read it to tell a hung daemon from a healthy idle one.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HfwError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatState {
    pub pid: u32,
    pub version: String,
    pub started_at: String,
    pub last_updated: String,
    pub watched_folders: Vec<String>,
}

/// Interval-gated heartbeat writer.
#[derive(Debug)]
pub struct Heartbeat {
    path: PathBuf,
    interval: Duration,
    started_at: String,
    last_write: Option<Instant>,
}

impl Heartbeat {
    pub fn new(path: PathBuf, interval: Duration) -> Self {
        Self {
            path,
            interval,
            started_at: utc_now(),
            last_write: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the file if the interval elapsed. Returns whether a write happened.
    pub fn maybe_write(&mut self, watched: &[PathBuf]) -> bool {
        if self.last_write.is_some_and(|at| at.elapsed() < self.interval) {
            return false;
        }
        // Stamp regardless of outcome so a persistent failure is not retried every tick.
        self.last_write = Some(Instant::now());
        match self.write_now(watched) {
            Ok(()) => true,
            Err(e) => {
                eprintln!("[HFW-HEARTBEAT] {e}");
                false
            }
        }
    }

    pub fn write_now(&self, watched: &[PathBuf]) -> Result<()> {
        let state = HeartbeatState {
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: self.started_at.clone(),
            last_updated: utc_now(),
            watched_folders: watched.iter().map(|p| p.display().to_string()).collect(),
        };
        write_state_atomic(&self.path, &state)
    }
}

/// Read a heartbeat file back (used by `hfw` status tooling and tests).
pub fn read_state(path: &Path) -> Result<HeartbeatState> {
    let raw = fs::read_to_string(path).map_err(|e| HfwError::io(path, e))?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_state_atomic(path: &Path, state: &HeartbeatState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| HfwError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(state)?;
    let tmp_path = path.with_extension("json.tmp");

    let written = (|| -> std::io::Result<()> {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            opts.mode(0o644);
        }
        let mut file = opts.open(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    written.map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        HfwError::io(path, e)
    })
}

fn utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
