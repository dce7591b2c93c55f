//! Metadata injection seam for transferred images.
//!
//! The watcher tags each transferred image with the name of the hotfolder it
//! came through. Writing the actual field is delegated to a [`MetadataWriter`];
//! the default [`NullMetadataWriter`] accepts every request without touching the
//! file.

use std::path::Path;

use crate::core::errors::Result;

/// File extensions (lowercase) that receive metadata.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff"];

/// Writes one metadata field into a file.
pub trait MetadataWriter: Send + Sync {
    fn write_field(&self, path: &Path, field: &str, value: &str) -> Result<()>;
}

/// Accepts every write and changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetadataWriter;

impl MetadataWriter for NullMetadataWriter {
    fn write_field(&self, _path: &Path, _field: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

/// Whether `path` has one of the [`IMAGE_EXTENSIONS`].
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|img| ext.eq_ignore_ascii_case(img)))
}

/// Field name as configured minus any `IPTC:` namespace. `None` when blank.
pub fn resolve_field(configured: &str) -> Option<&str> {
    let trimmed = configured.trim();
    let bare = match trimmed.get(..5) {
        Some(ns) if ns.eq_ignore_ascii_case("iptc:") => trimmed[5..].trim(),
        _ => trimmed,
    };
    if bare.is_empty() { None } else { Some(bare) }
}
