//! HFW-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, HfwError>;

/// Top-level error type for the hotfolder watcher.
#[derive(Debug, Error)]
pub enum HfwError {
    #[error("[HFW-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[HFW-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[HFW-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[HFW-2001] transfer of {path} failed: {details}")]
    Transfer { path: PathBuf, details: String },

    #[error("[HFW-2002] metadata write to {path} failed: {details}")]
    Metadata { path: PathBuf, details: String },

    #[error("[HFW-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[HFW-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[HFW-2201] retention delete of {path} failed: {details}")]
    Retention { path: PathBuf, details: String },

    #[error("[HFW-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[HFW-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[HFW-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[HFW-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl HfwError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "HFW-1001",
            Self::MissingConfig { .. } => "HFW-1002",
            Self::ConfigParse { .. } => "HFW-1003",
            Self::Transfer { .. } => "HFW-2001",
            Self::Metadata { .. } => "HFW-2002",
            Self::Serialization { .. } => "HFW-2101",
            Self::Sql { .. } => "HFW-2102",
            Self::Retention { .. } => "HFW-2201",
            Self::PermissionDenied { .. } => "HFW-3001",
            Self::Io { .. } => "HFW-3002",
            Self::ChannelClosed { .. } => "HFW-3003",
            Self::Runtime { .. } => "HFW-3900",
        }
    }

    /// Whether retrying on a later cycle might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Transfer { .. }
                | Self::Retention { .. }
                | Self::ChannelClosed { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether this error belongs to the configuration family (halts the folder).
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::MissingConfig { .. } | Self::ConfigParse { .. }
        )
    }

    /// True when the underlying IO error means the path is gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap any failure during relocation of `path`.
    #[must_use]
    pub fn transfer(path: impl AsRef<Path>, details: impl std::fmt::Display) -> Self {
        Self::Transfer {
            path: path.as_ref().to_path_buf(),
            details: details.to_string(),
        }
    }
}

impl From<rusqlite::Error> for HfwError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for HfwError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for HfwError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
