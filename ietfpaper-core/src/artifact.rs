//! Artifact file helpers.
//!
//! Artifacts are never rewritten in place: content goes to a hidden
//! temporary sibling (`.<name>.tmp`) that is renamed over the destination.

use std::path::{Path, PathBuf};

/// Temporary sibling used while `path` is being written.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Whether `candidate` is a temporary sibling of `path` (including
/// companions such as SQLite journals).
pub fn is_temp_sibling_of(candidate: &Path, path: &Path) -> bool {
    let Some(prefix) = temp_sibling(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
    else {
        return false;
    };
    candidate.parent() == path.parent()
        && candidate
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(&prefix))
}

/// Write `contents` to `path` through a temporary sibling.
pub async fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = temp_sibling(path);
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Blocking variant of [`write_atomic`] for code running on a blocking pool.
pub fn write_atomic_sync(path: &Path, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    std::fs::write(&tmp, contents)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Serialize `value` as indented JSON and write it atomically.
pub async fn write_json<T: serde::Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> crate::error::Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, json).await?;
    Ok(())
}

/// Remove leftover temporary siblings of `path`. Returns what was removed.
pub fn remove_temp_siblings(path: &Path) -> Vec<PathBuf> {
    let dir = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Path::new("."),
        Some(p) => p,
        None => return Vec::new(),
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut removed = Vec::new();
    for entry in entries.flatten() {
        let candidate = path.with_file_name(entry.file_name());
        if is_temp_sibling_of(&candidate, path) && std::fs::remove_file(entry.path()).is_ok() {
            removed.push(candidate);
        }
    }
    removed
}
