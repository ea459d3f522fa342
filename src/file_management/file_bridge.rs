//! Host-side file operations on a user's bind-mounted workspace.
//!
//! Client paths are relative to the workspace root; a leading `/` denotes that root.
//! Every path is resolved and checked before the filesystem is touched.

use log::debug;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::error_handling::types::FileError;
use crate::file_management::types::EntryKind;

/// Joins a client path onto `workspace` without touching the filesystem.
///
/// `..` may not climb above the root, and drive prefixes are refused.
pub fn resolve_path(workspace: &Path, requested: &str) -> Result<PathBuf, FileError> {
    if requested.trim().is_empty() || requested.contains('\0') {
        return Err(FileError::InvalidPath(requested.to_string()));
    }

    let relative = requested.trim_start_matches(|c: char| c == '/' || c == '\\');
    let mut parts = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(FileError::PathEscapesWorkspace(requested.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(FileError::PathEscapesWorkspace(requested.to_string()));
            }
        }
    }

    let mut resolved = workspace.to_path_buf();
    resolved.extend(parts);
    Ok(resolved)
}

/// Rejects paths whose existing ancestors lead outside the workspace through symlinks.
/// With `follow_last`, a symlink at `path` itself is followed too.
async fn ensure_contained(
    workspace: &Path,
    path: &Path,
    requested: &str,
    follow_last: bool,
) -> Result<(), FileError> {
    let root = fs::canonicalize(workspace).await?;

    let mut candidate = if follow_last {
        Some(path)
    } else {
        path.parent()
    };
    while let Some(current) = candidate {
        match fs::canonicalize(current).await {
            Ok(real) => {
                return if real.starts_with(&root) {
                    Ok(())
                } else {
                    Err(FileError::PathEscapesWorkspace(requested.to_string()))
                };
            }
            Err(e) if e.kind() == ErrorKind::NotFound => candidate = current.parent(),
            Err(e) => return Err(FileError::IoError(e)),
        }
    }
    Err(FileError::PathEscapesWorkspace(requested.to_string()))
}

async fn resolve_checked(
    workspace: &Path,
    requested: &str,
    follow_last: bool,
) -> Result<PathBuf, FileError> {
    let path = resolve_path(workspace, requested)?;
    ensure_contained(workspace, &path, requested, follow_last).await?;
    Ok(path)
}

/// Same as [`resolve_checked`] but refuses the workspace root itself.
async fn resolve_entry(
    workspace: &Path,
    requested: &str,
    follow_last: bool,
) -> Result<PathBuf, FileError> {
    let path = resolve_path(workspace, requested)?;
    // the root's parent lies outside the workspace, so this must precede the containment check
    if path == workspace {
        return Err(FileError::InvalidPath(requested.to_string()));
    }
    ensure_contained(workspace, &path, requested, follow_last).await?;
    Ok(path)
}

async fn create_parent(path: &Path) -> Result<(), FileError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

fn not_found(requested: &str) -> impl FnOnce(std::io::Error) -> FileError + '_ {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            FileError::NotFound(requested.to_string())
        } else {
            FileError::IoError(e)
        }
    }
}

/// Reads a file as text. Invalid UTF-8 is replaced rather than refused.
pub async fn read_file(workspace: &Path, requested: &str) -> Result<String, FileError> {
    let path = resolve_checked(workspace, requested, true).await?;
    let metadata = fs::metadata(&path).await.map_err(not_found(requested))?;
    if !metadata.is_file() {
        return Err(FileError::NotAFile(requested.to_string()));
    }
    let bytes = fs::read(&path).await.map_err(not_found(requested))?;
    debug!("Read {} byte(s) from {}", bytes.len(), path.display());
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Replaces a file's content, creating it and its parent directories when missing.
pub async fn write_file(workspace: &Path, requested: &str, content: &str) -> Result<(), FileError> {
    let path = resolve_entry(workspace, requested, true).await?;
    if fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(FileError::NotAFile(requested.to_string()));
    }
    create_parent(&path).await?;
    fs::write(&path, content).await?;
    debug!("Wrote {} byte(s) to {}", content.len(), path.display());
    Ok(())
}

/// Creates an empty file or a directory. An existing file keeps its content.
pub async fn create(workspace: &Path, requested: &str, kind: EntryKind) -> Result<(), FileError> {
    let path = resolve_entry(workspace, requested, true).await?;
    match kind {
        EntryKind::File => {
            if fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
                return Err(FileError::NotAFile(requested.to_string()));
            }
            create_parent(&path).await?;
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .await?;
        }
        EntryKind::Folder => fs::create_dir_all(&path).await?,
    }
    debug!("Created {:?} {}", kind, path.display());
    Ok(())
}

/// Removes a file or a directory tree. Deleting something already gone succeeds.
pub async fn delete(workspace: &Path, requested: &str) -> Result<(), FileError> {
    let path = resolve_entry(workspace, requested, false).await?;
    let metadata = match fs::symlink_metadata(&path).await {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(FileError::IoError(e)),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(&path).await?;
    } else {
        fs::remove_file(&path).await?;
    }
    debug!("Deleted {}", path.display());
    Ok(())
}

/// Moves an entry, creating the destination's parent directories.
pub async fn rename(workspace: &Path, old: &str, new: &str) -> Result<(), FileError> {
    let from = resolve_entry(workspace, old, false).await?;
    let to = resolve_entry(workspace, new, false).await?;
    fs::symlink_metadata(&from).await.map_err(not_found(old))?;
    create_parent(&to).await?;
    fs::rename(&from, &to).await?;
    debug!("Renamed {} to {}", from.display(), to.display());
    Ok(())
}
