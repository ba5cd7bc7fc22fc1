//! Recursive copy and delete over directory trees.
//!
//! These operations carry the pipeline's per-entry failure policy: a copy
//! keeps going when an individual file is unreadable (the partial result is
//! observable through [`CopyOutcome`]), while a delete aborts the remainder
//! of the affected subtree so a half-deleted backup is never reported as
//! removed.
//!
//! No internal locking. Callers must not run these concurrently on
//! overlapping subtrees; the pipeline's single-job invariant serializes them.

use crate::utils::errors::{KeeperError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Counters for one recursive copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyOutcome {
    /// Files written to the destination
    pub copied: usize,

    /// Entries that could not be copied (logged and skipped)
    pub failed: usize,
}

impl CopyOutcome {
    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }
}

/// Recursively copy a directory (or a single file) to `dst`, creating
/// intermediate directories.
///
/// An existing destination is treated as a merge target: files already
/// present are overwritten entry by entry, nothing is deleted first.
/// Per-entry read failures are logged and counted rather than aborting the
/// whole copy. A missing source is an error.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<CopyOutcome> {
    let meta = fs::metadata(src).map_err(|e| match e.kind() {
        ErrorKind::NotFound => KeeperError::NotFound(src.to_path_buf()),
        _ => KeeperError::Io(e),
    })?;

    let mut outcome = CopyOutcome::default();

    if meta.is_file() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        outcome.copied = 1;
        return Ok(outcome);
    }

    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry during copy");
                outcome.failed += 1;
                continue;
            }
        };

        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            if let Err(e) = fs::create_dir_all(&target) {
                warn!(path = %target.display(), error = %e, "Failed to create directory during copy");
                outcome.failed += 1;
            }
        } else {
            match fs::copy(entry.path(), &target) {
                Ok(_) => outcome.copied += 1,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Failed to copy file");
                    outcome.failed += 1;
                }
            }
        }
    }

    Ok(outcome)
}

/// Recursively delete a directory and all descendants, depth-first.
///
/// Fails with an explicit error if `path` does not exist or is a plain file.
/// A deletion failure at any level aborts the remainder of that subtree.
pub fn delete_tree(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => KeeperError::NotFound(path.to_path_buf()),
        _ => KeeperError::Io(e),
    })?;

    if !meta.is_dir() {
        return Err(KeeperError::NotADirectory(path.to_path_buf()));
    }

    remove_recursive(path)
}

fn remove_recursive(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            remove_recursive(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    fs::remove_dir(dir)?;
    Ok(())
}
