//! Retention sweep: purge retained sources once their TTL elapses.
//!
//! Only active in copy mode with retention enabled. A record is purged when its
//! item is gone or it was processed more than `cleanup_time_minutes` ago; the
//! source is deleted first and the records follow. A failed delete leaves the
//! records in place so the next sweep retries.

#![allow(missing_docs)]

use std::path::Path;

use crate::core::config::FolderSettings;
use crate::core::errors::{HfwError, Result};
use crate::core::paths::id_to_path;
use crate::hotfolder::items::{exists, is_effectively_empty, remove_path};
use crate::store::StateStore;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Item ids whose records were removed.
    pub purged: Vec<String>,
    /// Ids whose source was deleted from disk during the purge.
    pub deleted_from_disk: Vec<String>,
    /// Empty job directories removed after the purge.
    pub containers_removed: Vec<String>,
    pub failures: Vec<SweepFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    pub item_id: String,
    pub code: String,
    pub message: String,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.purged.is_empty() && self.containers_removed.is_empty() && self.failures.is_empty()
    }

    fn fail(&mut self, item_id: &str, err: &HfwError) {
        self.failures.push(SweepFailure {
            item_id: item_id.to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }
}

/// Run one retention sweep over `folder`'s processed records at time `now`.
#[allow(clippy::cast_precision_loss)]
pub fn sweep(folder: &Path, store: &StateStore, settings: &FolderSettings, now: f64) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    if !settings.retention_armed() {
        return Ok(report);
    }
    let ttl_secs = settings.cleanup_time_minutes as f64 * 60.0;

    for record in store.all_processed()? {
        let path = id_to_path(folder, &record.item_id);
        let present = exists(&path);
        let expired = now - record.processed_time > ttl_secs;
        if present && !expired {
            continue;
        }
        if present {
            if let Err(source) = remove_path(&path) {
                let err = HfwError::Retention {
                    path: path.clone(),
                    details: source.to_string(),
                };
                report.fail(&record.item_id, &err);
                continue;
            }
            report.deleted_from_disk.push(record.item_id.clone());
        }
        if let Err(err) = store.remove_prefix(&record.item_id) {
            report.fail(&record.item_id, &err);
            continue;
        }
        report.purged.push(record.item_id);
    }

    for record in store.all_processed()? {
        let path = id_to_path(folder, &record.item_id);
        if !path.is_dir() || !is_effectively_empty(&path) {
            continue;
        }
        if let Err(source) = std::fs::remove_dir_all(&path) {
            let err = HfwError::Retention {
                path: path.clone(),
                details: source.to_string(),
            };
            report.fail(&record.item_id, &err);
            continue;
        }
        if let Err(err) = store.remove_prefix(&record.item_id) {
            report.fail(&record.item_id, &err);
            continue;
        }
        report.containers_removed.push(record.item_id);
    }

    Ok(report)
}
