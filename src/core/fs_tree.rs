// src/core/fs_tree.rs

//! Directory tree copy and clear helpers shared by the snapshot store and
//! the built-in install step.
//!
//! Symlinks are reproduced as symlinks (never followed), so a restored tree
//! has the same file/dir/symlink shape as the captured one.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{OtaError, Result};

/// Counts of what a copy produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    /// Regular files copied
    pub files: usize,
    /// Directories created (excluding the destination root)
    pub dirs: usize,
    /// Symlinks recreated
    pub symlinks: usize,
}

/// Recursively copies the contents of `src` into `dst`.
///
/// `dst` is created if missing; existing entries with the same names are
/// overwritten for files and merged for directories.
///
/// # Errors
///
/// [`OtaError::FileIo`] naming the first path that could not be read or
/// written. The destination may hold a partial copy afterwards.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<CopyStats> {
    let meta = fs::metadata(src).map_err(|e| OtaError::file_io(src, e))?;
    if !meta.is_dir() {
        return Err(OtaError::file_io(
            src,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }
    fs::create_dir_all(dst).map_err(|e| OtaError::file_io(dst, e))?;

    let mut stats = CopyStats::default();
    for entry in WalkDir::new(src).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| OtaError::invalid_input(format!("{} is not under {}", entry.path().display(), src.display())))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            stats.symlinks += 1;
        } else if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| OtaError::file_io(&target, e))?;
            stats.dirs += 1;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| OtaError::file_io(entry.path(), e))?;
            stats.files += 1;
        }
    }

    Ok(stats)
}

/// Removes everything inside `dir` (files, symlinks, subtrees) but keeps
/// `dir` itself.
pub fn clear_dir(dir: &Path) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| OtaError::file_io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| OtaError::file_io(dir, e))?;
        let path = entry.path();
        let meta = fs::symlink_metadata(&path).map_err(|e| OtaError::file_io(&path, e))?;
        if meta.is_dir() {
            fs::remove_dir_all(&path).map_err(|e| OtaError::file_io(&path, e))?;
        } else {
            remove_link_or_file(&path)?;
        }
    }
    Ok(())
}

/// Walks `root` without touching anything, failing on the first unreadable
/// entry. Returns the number of entries seen.
pub fn check_readable(root: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        entry.map_err(|e| walk_error(root, e))?;
        count += 1;
    }
    Ok(count)
}

/// Removes `path` whatever it is; a missing path is not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map_err(|e| OtaError::file_io(path, e)),
        Ok(_) => remove_link_or_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(OtaError::file_io(path, e)),
    }
}

fn remove_link_or_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        // Windows directory symlinks need remove_dir
        #[cfg(windows)]
        Err(_) if fs::remove_dir(path).is_ok() => Ok(()),
        Err(e) => Err(OtaError::file_io(path, e)),
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> OtaError {
    let path = err.path().unwrap_or(root).to_path_buf();
    match err.into_io_error() {
        Some(io) => OtaError::file_io(path, io),
        None => OtaError::file_io(
            path,
            std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop detected"),
        ),
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link_target = fs::read_link(src).map_err(|e| OtaError::file_io(src, e))?;
    remove_path(dst)?;
    std::os::unix::fs::symlink(&link_target, dst).map_err(|e| OtaError::file_io(dst, e))
}

#[cfg(windows)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link_target = fs::read_link(src).map_err(|e| OtaError::file_io(src, e))?;
    remove_path(dst)?;
    let points_to_dir = fs::metadata(src).map(|m| m.is_dir()).unwrap_or(false);
    let created = if points_to_dir {
        std::os::windows::fs::symlink_dir(&link_target, dst)
    } else {
        std::os::windows::fs::symlink_file(&link_target, dst)
    };
    created.map_err(|e| OtaError::file_io(dst, e))
}
