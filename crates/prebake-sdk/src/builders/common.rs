//! Filesystem helpers shared by the build, merge and publish steps.
//!
//! Framework bundles contain relative symlinks (`Versions/Current`,
//! `Headers -> Versions/Current/Headers`) that must survive every copy, so
//! all bundle copies in the crate go through [`copy_path`].
//!
//! ## Error Messages
//!
//! Failures are reported as [`PrebakeError::Io`] with the operation and the
//! path involved in the message, keeping the original error kind.

use std::fs;
use std::io;
use std::path::Path;

use crate::types::PrebakeError;

/// Wraps an I/O error with the operation and path that produced it.
pub(crate) fn fs_error(action: &str, path: &Path, err: io::Error) -> PrebakeError {
    PrebakeError::Io(io::Error::new(
        err.kind(),
        format!("Failed to {} {}: {}", action, path.display(), err),
    ))
}

/// Returns `true` if anything (file, directory, or dangling symlink) exists at `path`.
pub fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Validates the generated project before any compiler invocation.
///
/// # Returns
/// `Ok(())` if the project bundle exists, or a [`PrebakeError::Config`]
/// explaining what to check.
pub fn validate_project_path(project_path: &Path) -> Result<(), PrebakeError> {
    if !project_path.exists() {
        return Err(PrebakeError::Config(format!(
            "Project does not exist: {}\n\n\
             The install manifest must point at the project generated by the \
             dependency manager (usually Pods/Pods.xcodeproj).",
            project_path.display()
        )));
    }
    if !project_path.is_dir() {
        return Err(PrebakeError::Config(format!(
            "Project path is not a project bundle: {}\n\n\
             Expected a .xcodeproj directory.",
            project_path.display()
        )));
    }
    Ok(())
}

/// Removes a file, directory tree, or symlink.
///
/// Returns `Ok(false)` when nothing was there.
pub fn remove_if_exists(path: &Path) -> Result<bool, PrebakeError> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(fs_error("inspect", path, e)),
    };
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| fs_error("remove", path, e))?;
    Ok(true)
}

/// Copies `src` to `dest`, replacing whatever is at `dest`.
///
/// Directories are copied recursively and symlinks are recreated rather
/// than followed.
pub fn copy_path(src: &Path, dest: &Path) -> Result<(), PrebakeError> {
    remove_if_exists(dest)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| fs_error("create directory", parent, e))?;
    }
    copy_entry(src, dest)
}

fn copy_entry(src: &Path, dest: &Path) -> Result<(), PrebakeError> {
    let file_type = fs::symlink_metadata(src)
        .map_err(|e| fs_error("inspect", src, e))?
        .file_type();

    if file_type.is_symlink() {
        copy_symlink(src, dest)
    } else if file_type.is_dir() {
        copy_dir_recursive(src, dest)
    } else {
        fs::copy(src, dest)
            .map(|_| ())
            .map_err(|e| fs_error(&format!("copy to {} from", dest.display()), src, e))
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<(), PrebakeError> {
    fs::create_dir_all(dest).map_err(|e| fs_error("create directory", dest, e))?;

    for entry in fs::read_dir(src).map_err(|e| fs_error("read directory", src, e))? {
        let entry = entry.map_err(|e| fs_error("read entry in", src, e))?;
        copy_entry(&entry.path(), &dest.join(entry.file_name()))?;
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> Result<(), PrebakeError> {
    let link = fs::read_link(src).map_err(|e| fs_error("read symlink", src, e))?;
    std::os::unix::fs::symlink(&link, dest).map_err(|e| fs_error("create symlink", dest, e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> Result<(), PrebakeError> {
    if src.is_dir() {
        copy_dir_recursive(src, dest)
    } else {
        fs::copy(src, dest)
            .map(|_| ())
            .map_err(|e| fs_error(&format!("copy to {} from", dest.display()), src, e))
    }
}

/// Moves `src` to `dest`, replacing whatever is at `dest`.
pub fn move_path(src: &Path, dest: &Path) -> Result<(), PrebakeError> {
    remove_if_exists(dest)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| fs_error("create directory", parent, e))?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        // Cross-device moves fall back to copy and delete.
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            copy_entry(src, dest)?;
            remove_if_exists(src).map(|_| ())
        }
        Err(e) => Err(fs_error("move", src, e)),
    }
}
