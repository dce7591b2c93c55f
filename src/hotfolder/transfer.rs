//! Transfer executor: move or copy a stable job into the folder's output directory.
//!
//! Moves use `rename` and fall back to copy-then-remove when the destination is
//! on another device or a destination directory already exists (merge). Copies
//! go through a temporary sibling that receives the source's times and
//! permissions before it is renamed over the destination, so readers of the
//! output directory never observe a half-written file.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filetime::FileTime;

use crate::core::config::FolderSettings;
use crate::core::errors::{HfwError, Result};
use crate::hotfolder::items::{JobSnapshot, SystemFileFilter, is_effectively_empty};
use crate::hotfolder::metadata::{MetadataWriter, is_image_file, resolve_field};

/// Metadata to stamp on transferred images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTag {
    /// Field as configured (may carry an `IPTC:` prefix or be blank).
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferOptions {
    /// Copy and retain the source instead of moving it.
    pub keep_copy: bool,
    /// Relocate a directory job's children into the destination root.
    pub dissolve: bool,
    pub update_mtime: bool,
    pub filter: SystemFileFilter,
    pub metadata: Option<MetadataTag>,
}

impl TransferOptions {
    /// Options for a folder named `folder_name` under `settings`.
    pub fn from_settings(settings: &FolderSettings, folder_name: &str) -> Self {
        Self {
            keep_copy: settings.keep_copy,
            dissolve: settings.dissolve_folders,
            update_mtime: settings.update_mtime,
            filter: SystemFileFilter::from_settings(settings),
            metadata: settings.metadata.then(|| MetadataTag {
                field: settings.metadata_field.clone(),
                value: folder_name.to_string(),
            }),
        }
    }
}

/// Result of one job transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Top-level entries placed in the destination.
    pub moved_count: usize,
    /// Dissolved jobs whose source directory is now (effectively) empty.
    pub jobs_marked_empty: Vec<String>,
    pub placed: Vec<PathBuf>,
    /// Non-fatal problems (metadata, mtime refresh) for the caller to log.
    pub warnings: Vec<String>,
}

pub struct TransferExecutor {
    options: TransferOptions,
    metadata: Arc<dyn MetadataWriter>,
}

impl TransferExecutor {
    pub fn new(options: TransferOptions, metadata: Arc<dyn MetadataWriter>) -> Self {
        Self { options, metadata }
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Transfer `job` into `destination` (the folder's output directory).
    pub fn execute(&self, job: &JobSnapshot, destination: &Path) -> Result<TransferOutcome> {
        fs::create_dir_all(destination).map_err(|e| HfwError::transfer(destination, e))?;
        let mut outcome = TransferOutcome::default();

        if job.is_dir && self.options.dissolve {
            for child in self.children_of(&job.path)? {
                let Some(name) = child.file_name() else { continue };
                let target = destination.join(name);
                self.relocate(&child, &target)?;
                outcome.placed.push(target);
            }
            if !self.options.keep_copy && is_effectively_empty(&job.path) {
                outcome.jobs_marked_empty.push(job.id.clone());
            }
        } else {
            if !job.is_dir && self.options.filter.excludes(&job.id) {
                return Ok(outcome);
            }
            let target = destination.join(&job.id);
            self.relocate(&job.path, &target)?;
            outcome.placed.push(target);
        }

        outcome.moved_count = outcome.placed.len();
        self.stamp_metadata(&mut outcome);
        if self.options.update_mtime {
            let now = FileTime::now();
            for placed in &outcome.placed {
                if let Err(e) = filetime::set_file_mtime(placed, now) {
                    outcome
                        .warnings
                        .push(format!("could not update mtime of {}: {e}", placed.display()));
                }
            }
        }
        Ok(outcome)
    }

    fn children_of(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut children: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| HfwError::transfer(dir, e))?
            .flatten()
            .filter(|entry| !self.options.filter.excludes(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect();
        children.sort();
        Ok(children)
    }

    fn relocate(&self, src: &Path, target: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(src).map_err(|e| HfwError::transfer(src, e))?;
        if self.options.keep_copy {
            if meta.is_dir() {
                self.copy_tree(src, target)
            } else {
                copy_file_atomic(src, target)
            }
        } else {
            self.move_entry(src, target, meta.is_dir())
        }
    }

    fn move_entry(&self, src: &Path, target: &Path, is_dir: bool) -> Result<()> {
        if is_dir && target.is_dir() {
            self.copy_tree(src, target)?;
            return fs::remove_dir_all(src).map_err(|e| HfwError::transfer(src, e));
        }
        match fs::rename(src, target) {
            Ok(()) => {
                if is_dir {
                    self.strip_system_files(target);
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                if is_dir {
                    self.copy_tree(src, target)?;
                    fs::remove_dir_all(src).map_err(|e| HfwError::transfer(src, e))
                } else {
                    copy_file_atomic(src, target)?;
                    fs::remove_file(src).map_err(|e| HfwError::transfer(src, e))
                }
            }
            Err(e) => Err(HfwError::transfer(src, e)),
        }
    }

    /// Recursively copy `src` into `dst`, merging with anything already there.
    fn copy_tree(&self, src: &Path, dst: &Path) -> Result<()> {
        fs::create_dir_all(dst).map_err(|e| HfwError::transfer(dst, e))?;
        for entry in fs::read_dir(src).map_err(|e| HfwError::transfer(src, e))? {
            let entry = entry.map_err(|e| HfwError::transfer(src, e))?;
            let name = entry.file_name();
            if self.options.filter.excludes(&name.to_string_lossy()) {
                continue;
            }
            let from = entry.path();
            let to = dst.join(&name);
            match entry.file_type() {
                Ok(t) if t.is_dir() => self.copy_tree(&from, &to)?,
                Ok(_) => copy_file_atomic(&from, &to)?,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(HfwError::transfer(&from, e)),
            }
        }
        if let Ok(meta) = fs::metadata(src) {
            let _ = filetime::set_file_mtime(dst, FileTime::from_last_modification_time(&meta));
        }
        Ok(())
    }

    fn strip_system_files(&self, root: &Path) {
        let Ok(entries) = fs::read_dir(root) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                self.strip_system_files(&path);
            } else if self.options.filter.excludes(&entry.file_name().to_string_lossy()) {
                let _ = fs::remove_file(&path);
            }
        }
    }

    fn stamp_metadata(&self, outcome: &mut TransferOutcome) {
        let Some(tag) = &self.options.metadata else { return };
        let mut images = Vec::new();
        for placed in &outcome.placed {
            collect_images(placed, &mut images);
        }
        if images.is_empty() {
            return;
        }
        let Some(field) = resolve_field(&tag.field) else {
            outcome.warnings.push(format!(
                "metadata enabled but field {:?} is not usable; {} image(s) left untagged",
                tag.field,
                images.len()
            ));
            return;
        };
        for image in images {
            if let Err(e) = self.metadata.write_field(&image, field, &tag.value) {
                outcome.warnings.push(e.to_string());
            }
        }
    }
}

fn collect_images(path: &Path, out: &mut Vec<PathBuf>) {
    if path.is_dir() {
        let Ok(entries) = fs::read_dir(path) else { return };
        let mut children: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        children.sort();
        for child in children {
            collect_images(&child, out);
        }
    } else if is_image_file(path) {
        out.push(path.to_path_buf());
    }
}

/// Copy one file via a temporary sibling, preserving times and permissions,
/// then atomically replace `dst`.
pub fn copy_file_atomic(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::metadata(src).map_err(|e| HfwError::transfer(src, e))?;
    let parent = dst.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| HfwError::transfer(parent, e))?;

    let name = dst
        .file_name()
        .map_or_else(|| "item".to_string(), |n| n.to_string_lossy().into_owned());
    let tmp = parent.join(format!(".{name}.hfw-{}.tmp", std::process::id()));

    let staged = fs::copy(src, &tmp)
        .and_then(|_| fs::set_permissions(&tmp, meta.permissions()))
        .and_then(|()| {
            filetime::set_file_times(
                &tmp,
                FileTime::from_last_access_time(&meta),
                FileTime::from_last_modification_time(&meta),
            )
        })
        .and_then(|()| fs::rename(&tmp, dst));
    if let Err(e) = staged {
        let _ = fs::remove_file(&tmp);
        return Err(HfwError::transfer(src, e));
    }
    Ok(())
}
