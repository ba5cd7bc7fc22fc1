//! Archive creation and extraction (tar + zstd).
//!
//! Archives store paths relative to the source root so they stay
//! self-contained and relocatable. Empty directories are not preserved.

use crate::utils::errors::{KeeperError, Result};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// File extension appended to the archive stem.
pub const ARCHIVE_EXT: &str = "tar.zst";

/// zstd level 3 trades a little ratio for much faster jobs.
const COMPRESSION_LEVEL: i32 = 3;

/// Walk `src_dir` recursively and write every contained file into a single
/// compressed archive at `<dest_stem>.tar.zst`, with entry paths relative to
/// `src_dir`.
///
/// Per-entry I/O errors are logged and the entry is skipped, same policy as
/// [`super::tree::copy_tree`]. If the archive cannot be created or finalized,
/// the partial output file is removed and the error returned.
pub fn archive_dir(src_dir: &Path, dest_stem: &Path) -> Result<PathBuf> {
    let meta = fs::metadata(src_dir).map_err(|e| match e.kind() {
        ErrorKind::NotFound => KeeperError::NotFound(src_dir.to_path_buf()),
        _ => KeeperError::Io(e),
    })?;
    if !meta.is_dir() {
        return Err(KeeperError::NotADirectory(src_dir.to_path_buf()));
    }

    let out_path = archive_path(dest_stem);
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }

    match write_archive(src_dir, &out_path) {
        Ok(()) => Ok(out_path),
        Err(e) => {
            // Never leave a truncated archive behind looking like a backup.
            let _ = fs::remove_file(&out_path);
            Err(e)
        }
    }
}

fn write_archive(src_dir: &Path, out_path: &Path) -> Result<()> {
    let file = File::create(out_path)?;
    let encoder = zstd::stream::write::Encoder::new(BufWriter::new(file), COMPRESSION_LEVEL)?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(true);

    for entry in WalkDir::new(src_dir).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry during archiving");
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }

        let relative = entry.path().strip_prefix(src_dir).unwrap_or(entry.path());
        if let Err(e) = builder.append_path_with_name(entry.path(), relative) {
            warn!(path = %entry.path().display(), error = %e, "Failed to archive file");
        }
    }

    let encoder = builder.into_inner()?;
    let mut inner = encoder.finish()?;
    inner.flush()?;
    Ok(())
}

/// Unpack an archive produced by [`archive_dir`] into `dest`, creating it if
/// necessary.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| match e.kind() {
        ErrorKind::NotFound => KeeperError::NotFound(archive.to_path_buf()),
        _ => KeeperError::Io(e),
    })?;
    let decoder = zstd::stream::read::Decoder::new(file)?;

    fs::create_dir_all(dest)?;
    tar::Archive::new(decoder).unpack(dest)?;
    Ok(())
}

/// `<stem>.tar.zst`, without interpreting dots already present in the stem.
fn archive_path(dest_stem: &Path) -> PathBuf {
    let mut name = dest_stem.as_os_str().to_os_string();
    name.push(".");
    name.push(ARCHIVE_EXT);
    PathBuf::from(name)
}
