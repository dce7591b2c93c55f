//! Shared path manipulation utilities: absolute resolution, item ids, prefixes.

use std::env;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Separator used inside item ids regardless of platform.
pub const ID_SEPARATOR: char = '/';

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components.
///
/// If it fails (e.g. path does not exist), the path is made absolute relative
/// to CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Undo shell-style escaped spaces (`My\ Folder` → `My Folder`) pasted into config.
pub fn unescape_spaces(raw: &str) -> String {
    raw.replace("\\ ", " ")
}

/// Resolve an item id back to a filesystem path under `folder`.
pub fn id_to_path(folder: &Path, id: &str) -> PathBuf {
    id.split(ID_SEPARATOR)
        .filter(|part| !part.is_empty())
        .fold(folder.to_path_buf(), |acc, part| acc.join(part))
}

/// Whether `id` equals `prefix` or is nested under it.
///
/// `job` covers `job` and `job/a.txt` but never `job2/a.txt`.
pub fn id_is_under(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(ID_SEPARATOR))
}

/// Unix epoch seconds for a `SystemTime`, negative for pre-epoch stamps.
#[allow(clippy::cast_precision_loss)]
pub fn epoch_secs(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// Current wall-clock time as Unix epoch seconds.
pub fn now_epoch_secs() -> f64 {
    epoch_secs(SystemTime::now())
}
