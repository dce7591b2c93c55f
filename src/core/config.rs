//! Configuration system: TOML file + env var overrides + per-folder overrides.
//!
//! The global file carries the hotfolder roots and the default [`FolderSettings`].
//! Each hotfolder may narrow those defaults with `.config/config.toml`, a grouped
//! TOML document whose keys are all optional. The effective settings are merged
//! and validated on every worker cycle, so edits take effect without a restart.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HfwError, Result};
use crate::core::paths::unescape_spaces;

/// Directory (inside each hotfolder) holding the per-folder override file.
pub const FOLDER_CONFIG_DIR: &str = ".config";
/// Per-folder override file name.
pub const FOLDER_CONFIG_FILE: &str = "config.toml";
/// Example file written next to the override location for operators to copy.
pub const FOLDER_CONFIG_EXAMPLE: &str = "config.toml.example";

/// Full watcher configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub hotfolders: HotfoldersConfig,
    pub dispatcher: DispatcherConfig,
    pub defaults: FolderSettings,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Which roots are watched and where output lands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HotfoldersConfig {
    /// Roots whose non-hidden subdirectories become hotfolders.
    pub roots: Vec<PathBuf>,
    /// Explicit output root. When unset, `<root>/../<output_dir_name>` is used.
    pub output_root: Option<PathBuf>,
    /// Name of the sibling output directory used when `output_root` is unset.
    pub output_dir_name: String,
}

/// Dispatcher timer and shutdown knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatcherConfig {
    pub discovery_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
}

/// Effective per-folder behavior. Also the shape of the global `[defaults]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FolderSettings {
    /// Seconds between worker cycles.
    pub scan_interval_secs: u64,
    /// Seconds an item must stay unchanged before it is transferred.
    pub resting_time_secs: u64,
    /// Flatten directory jobs into the output root.
    pub dissolve_folders: bool,
    /// Write the hotfolder name into a metadata field of transferred images.
    pub metadata: bool,
    pub metadata_field: String,
    /// Copy instead of move; the source is retained.
    pub keep_copy: bool,
    /// In copy mode, never re-transfer a job that was processed once.
    pub ignore_updates: bool,
    /// Purge retained sources after `cleanup_time_minutes`.
    pub retention: bool,
    pub cleanup_time_minutes: u64,
    /// Touch the destination mtime after transfer.
    pub update_mtime: bool,
    /// Never transfer `.DS_Store` files.
    pub skip_ds_store: bool,
    /// Never transfer `Thumbs.db` files.
    pub skip_thumbs_db: bool,
    /// Emit per-item debug events for this folder.
    pub debug: bool,
}

/// Activity log tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
    pub channel_capacity: usize,
    /// Also write a JSONL log inside each hotfolder (`.log/<name>.jsonl`).
    pub per_folder_logs: bool,
}

/// Filesystem paths used by hfw itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
    pub heartbeat_file: PathBuf,
}

impl Default for HotfoldersConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            output_root: None,
            output_dir_name: "OUT".to_string(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            discovery_interval_secs: 10,
            heartbeat_interval_secs: 30,
            shutdown_timeout_secs: 30,
        }
    }
}

impl Default for FolderSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: 10,
            resting_time_secs: 300,
            dissolve_folders: false,
            metadata: false,
            metadata_field: String::new(),
            keep_copy: false,
            ignore_updates: false,
            retention: false,
            cleanup_time_minutes: 1440,
            update_mtime: true,
            skip_ds_store: true,
            skip_thumbs_db: true,
            debug: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 20 * 1024 * 1024,
            max_rotated_files: 7,
            fsync_interval_secs: 30,
            channel_capacity: 1024,
            per_folder_logs: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[HFW-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("hfw").join("config.toml");
        let data = home_dir.join(".local").join("share").join("hfw");
        Self {
            config_file: cfg,
            activity_log: data.join("activity.jsonl"),
            heartbeat_file: data.join("heartbeat.json"),
        }
    }
}

impl HotfoldersConfig {
    /// Output root paired with a hotfolder root.
    #[must_use]
    pub fn output_root_for(&self, root: &Path) -> PathBuf {
        if let Some(explicit) = &self.output_root {
            return explicit.clone();
        }
        root.parent()
            .map_or_else(|| root.join(&self.output_dir_name), |parent| {
                parent.join(&self.output_dir_name)
            })
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| HfwError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(HfwError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("HFW_HOTFOLDERS") {
            self.hotfolders.roots = env::split_paths(&raw).collect();
        }
        if let Some(raw) = lookup("HFW_OUTPUT_ROOT") {
            self.hotfolders.output_root = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("HFW_DISCOVERY_INTERVAL_SECS") {
            self.dispatcher.discovery_interval_secs =
                parse_env_u64("HFW_DISCOVERY_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("HFW_SCAN_INTERVAL_SECS") {
            self.defaults.scan_interval_secs = parse_env_u64("HFW_SCAN_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("HFW_RESTING_TIME_SECS") {
            self.defaults.resting_time_secs = parse_env_u64("HFW_RESTING_TIME_SECS", &raw)?;
        }
        if let Some(raw) = lookup("HFW_KEEP_COPY") {
            self.defaults.keep_copy = parse_env_bool("HFW_KEEP_COPY", &raw)?;
        }
        if let Some(raw) = lookup("HFW_DEBUG") {
            self.defaults.debug = parse_env_bool("HFW_DEBUG", &raw)?;
        }
        if let Some(raw) = lookup("HFW_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("HFW_HEARTBEAT_FILE") {
            self.paths.heartbeat_file = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Undo escaped spaces and strip trailing slashes from configured roots.
    fn normalize_paths(&mut self) {
        for root in &mut self.hotfolders.roots {
            let raw = unescape_spaces(&root.to_string_lossy());
            let trimmed = if raw.len() > 1 {
                raw.strip_suffix('/').unwrap_or(&raw).to_string()
            } else {
                raw
            };
            *root = PathBuf::from(trimmed);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.discovery_interval_secs == 0 {
            return Err(HfwError::InvalidConfig {
                details: "dispatcher.discovery_interval_secs must be > 0".to_string(),
            });
        }
        if self.hotfolders.output_dir_name.is_empty()
            || self.hotfolders.output_dir_name.starts_with('.')
            || self.hotfolders.output_dir_name.contains('/')
        {
            return Err(HfwError::InvalidConfig {
                details: format!(
                    "hotfolders.output_dir_name must be a plain visible name, got {:?}",
                    self.hotfolders.output_dir_name
                ),
            });
        }
        if self.logging.channel_capacity == 0 {
            return Err(HfwError::InvalidConfig {
                details: "logging.channel_capacity must be >= 1".to_string(),
            });
        }
        self.defaults.validate()
    }

    /// Fail unless at least one hotfolder root is configured (daemon mode).
    pub fn require_roots(&self) -> Result<()> {
        if self.hotfolders.roots.is_empty() {
            return Err(HfwError::InvalidConfig {
                details: format!(
                    "hotfolders.roots is empty; add roots to {} or set HFW_HOTFOLDERS",
                    self.paths.config_file.display()
                ),
            });
        }
        Ok(())
    }
}

impl FolderSettings {
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_secs == 0 {
            return Err(HfwError::InvalidConfig {
                details: "scan_interval must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Resting time as fractional seconds.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn resting_secs_f64(&self) -> f64 {
        self.resting_time_secs as f64
    }

    /// Whether the retention sweep is armed for this folder.
    #[must_use]
    pub fn retention_armed(&self) -> bool {
        self.keep_copy && self.retention && self.cleanup_time_minutes > 0
    }

    /// Merge a parsed override file on top of these settings.
    fn merged_with(&self, overrides: &FolderOverrides) -> Result<Self> {
        let mut out = self.clone();
        let schedule = &overrides.schedule;
        if let Some(v) = schedule.scan_interval {
            out.scan_interval_secs = positive("schedule.scan_interval", v)?;
        }
        if let Some(v) = schedule.resting_time {
            out.resting_time_secs = non_negative("schedule.resting_time", v)?;
        }
        if let Some(v) = schedule.retention_cleanup_time {
            out.cleanup_time_minutes = non_negative("schedule.retention_cleanup_time", v)?;
        }
        if let Some(v) = overrides.retention.keep_copy {
            out.keep_copy = v;
        }
        if let Some(v) = overrides.retention.ignore_updates {
            out.ignore_updates = v;
        }
        if let Some(v) = overrides.structure.dissolve_folders {
            out.dissolve_folders = v;
        }
        if let Some(v) = overrides.metadata.metadata {
            out.metadata = v;
        }
        if let Some(v) = &overrides.metadata.metadata_field {
            out.metadata_field.clone_from(v);
        }
        if let Some(v) = overrides.auto_cleanup.ds_store {
            out.skip_ds_store = v;
        }
        if let Some(v) = overrides.auto_cleanup.thumbs_db {
            out.skip_thumbs_db = v;
        }
        if let Some(v) = overrides.auto_cleanup.retention {
            out.retention = v;
        }
        if let Some(v) = overrides.mtime.update_mtime {
            out.update_mtime = v;
        }
        if let Some(v) = overrides.debugging.debug {
            out.debug = v;
        }
        out.validate()?;
        Ok(out)
    }
}

fn positive(key: &str, value: i64) -> Result<u64> {
    if value <= 0 {
        return Err(HfwError::InvalidConfig {
            details: format!("{key} must be > 0, got {value}"),
        });
    }
    non_negative(key, value)
}

fn non_negative(key: &str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| HfwError::InvalidConfig {
        details: format!("{key} must be >= 0, got {value}"),
    })
}

// ──────────────────── per-folder overrides ────────────────────

/// Grouped per-folder override document (`<folder>/.config/config.toml`).
///
/// Unknown keys and mistyped values are rejected so that typos surface as a
/// configuration error instead of silently falling back to the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FolderOverrides {
    pub schedule: ScheduleOverrides,
    pub retention: RetentionOverrides,
    pub structure: StructureOverrides,
    pub metadata: MetadataOverrides,
    pub auto_cleanup: AutoCleanupOverrides,
    pub mtime: MtimeOverrides,
    pub debugging: DebuggingOverrides,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_interval: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resting_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_cleanup_time: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_copy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_updates: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StructureOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dissolve_folders: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_field: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AutoCleanupOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ds_store: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbs_db: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MtimeOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_mtime: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DebuggingOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
}

impl FolderOverrides {
    /// Fully-populated override document mirroring `settings` (used for the example file).
    #[must_use]
    pub fn from_settings(settings: &FolderSettings) -> Self {
        let as_i64 = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        Self {
            schedule: ScheduleOverrides {
                scan_interval: Some(as_i64(settings.scan_interval_secs)),
                resting_time: Some(as_i64(settings.resting_time_secs)),
                retention_cleanup_time: Some(as_i64(settings.cleanup_time_minutes)),
            },
            retention: RetentionOverrides {
                keep_copy: Some(settings.keep_copy),
                ignore_updates: Some(settings.ignore_updates),
            },
            structure: StructureOverrides {
                dissolve_folders: Some(settings.dissolve_folders),
            },
            metadata: MetadataOverrides {
                metadata: Some(settings.metadata),
                metadata_field: Some(settings.metadata_field.clone()),
            },
            auto_cleanup: AutoCleanupOverrides {
                ds_store: Some(settings.skip_ds_store),
                thumbs_db: Some(settings.skip_thumbs_db),
                retention: Some(settings.retention),
            },
            mtime: MtimeOverrides {
                update_mtime: Some(settings.update_mtime),
            },
            debugging: DebuggingOverrides {
                debug: Some(settings.debug),
            },
        }
    }
}

/// Path of a folder's override file.
#[must_use]
pub fn folder_override_path(folder: &Path) -> PathBuf {
    folder.join(FOLDER_CONFIG_DIR).join(FOLDER_CONFIG_FILE)
}

/// Compute the effective settings for `folder`: global defaults merged with the
/// folder's override file, if present.
pub fn effective_settings(folder: &Path, config: &Config) -> Result<FolderSettings> {
    let override_path = folder_override_path(folder);
    let raw = match fs::read_to_string(&override_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            config.defaults.validate()?;
            return Ok(config.defaults.clone());
        }
        Err(source) => {
            return Err(HfwError::Io {
                path: override_path,
                source,
            });
        }
    };
    let overrides: FolderOverrides = toml::from_str(&raw).map_err(|e| HfwError::ConfigParse {
        context: "folder override",
        details: format!("{}: {e}", override_path.display()),
    })?;
    config.defaults.merged_with(&overrides)
}

/// Write `.config/config.toml.example` when no override or example exists yet.
///
/// Returns `Ok(true)` when a file was written.
pub fn write_example_override(folder: &Path, settings: &FolderSettings) -> Result<bool> {
    let dir = folder.join(FOLDER_CONFIG_DIR);
    let example = dir.join(FOLDER_CONFIG_EXAMPLE);
    if example.exists() || dir.join(FOLDER_CONFIG_FILE).exists() {
        return Ok(false);
    }
    fs::create_dir_all(&dir).map_err(|e| HfwError::io(&dir, e))?;
    let body = toml::to_string_pretty(&FolderOverrides::from_settings(settings)).map_err(|e| {
        HfwError::Serialization {
            context: "toml",
            details: e.to_string(),
        }
    })?;
    fs::write(&example, body).map_err(|e| HfwError::io(&example, e))?;
    Ok(true)
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|error| HfwError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.parse::<bool>().map_err(|error| HfwError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
