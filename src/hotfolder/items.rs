//! Hotfolder inventory: jobs, their nested items, and per-job signatures.
//!
//! A job is a visible top-level entry of a hotfolder. Directory jobs are walked
//! recursively; every nested entry becomes an item keyed by its id. Entries that
//! disappear mid-walk are skipped, since producers and the watcher race freely.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::core::config::FolderSettings;
use crate::core::errors::{HfwError, Result};
use crate::core::paths::{ID_SEPARATOR, epoch_secs};

/// Names that are never jobs: `.db`, `.config`, `.log` and any other dot entry.
pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with('.')
}

/// OS-generated artifacts that are never user content.
pub fn is_system_artifact(name: &str) -> bool {
    name.eq_ignore_ascii_case(".DS_Store") || name.eq_ignore_ascii_case("Thumbs.db")
}

/// Which system artifacts are excluded from listing and transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemFileFilter {
    pub ds_store: bool,
    pub thumbs_db: bool,
}

impl SystemFileFilter {
    pub fn from_settings(settings: &FolderSettings) -> Self {
        Self {
            ds_store: settings.skip_ds_store,
            thumbs_db: settings.skip_thumbs_db,
        }
    }

    /// Filter that excludes both kinds of artifact.
    pub const fn all() -> Self {
        Self {
            ds_store: true,
            thumbs_db: true,
        }
    }

    pub fn excludes(self, name: &str) -> bool {
        (self.ds_store && name.eq_ignore_ascii_case(".DS_Store"))
            || (self.thumbs_db && name.eq_ignore_ascii_case("Thumbs.db"))
    }
}

/// Snapshot of one job taken during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    /// Item id of the job (its name in the folder).
    pub id: String,
    pub path: PathBuf,
    pub is_dir: bool,
    /// Own mtime of the job entry.
    pub own_mtime: f64,
    /// Every nested item id with its mtime. Empty for file jobs.
    pub nested: BTreeMap<String, f64>,
}

impl JobSnapshot {
    /// Aggregate signature mtime: the newest of the job and all nested items.
    pub fn aggregate_mtime(&self) -> f64 {
        self.nested.values().copied().fold(self.own_mtime, f64::max)
    }

    /// Ids of the job and everything nested under it.
    pub fn item_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.nested.keys().map(String::as_str))
    }
}

/// List the jobs of `folder`, sorted by id.
///
/// A missing folder is reported as an IO error so the caller can recognise it
/// with [`HfwError::is_not_found`].
pub fn list_jobs(folder: &Path, filter: SystemFileFilter) -> Result<Vec<JobSnapshot>> {
    let entries = fs::read_dir(folder).map_err(|e| HfwError::io(folder, e))?;
    let mut jobs = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_reserved_name(&name) || filter.excludes(&name) {
            continue;
        }
        let path = entry.path();
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(HfwError::io(&path, e)),
        };
        let own_mtime = meta.modified().map_or(0.0, epoch_secs);
        let mut nested = BTreeMap::new();
        if meta.is_dir() {
            walk_nested(&path, &name, filter, &mut nested);
        }
        jobs.push(JobSnapshot {
            id: name,
            path,
            is_dir: meta.is_dir(),
            own_mtime,
            nested,
        });
    }
    jobs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(jobs)
}

fn walk_nested(dir: &Path, prefix: &str, filter: SystemFileFilter, out: &mut BTreeMap<String, f64>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if filter.excludes(&name) {
            continue;
        }
        let Ok(meta) = fs::symlink_metadata(entry.path()) else {
            continue;
        };
        let id = format!("{prefix}{ID_SEPARATOR}{name}");
        out.insert(id.clone(), meta.modified().map_or(0.0, epoch_secs));
        if meta.is_dir() {
            walk_nested(&entry.path(), &id, filter, out);
        }
    }
}

/// True when `dir` holds nothing but system artifacts (recursively).
///
/// Returns `false` for a missing or unreadable directory.
pub fn is_effectively_empty(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if is_system_artifact(&name) {
            continue;
        }
        let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
        if !is_dir || !is_effectively_empty(&entry.path()) {
            return false;
        }
    }
    true
}

/// Whether anything exists at `path` (dangling symlinks count).
pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Delete a file, symlink or whole directory tree.
pub fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
