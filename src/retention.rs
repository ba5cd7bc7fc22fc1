//! Age-based retention pruning over the backup root.

use crate::fs::tree::delete_tree;
use crate::utils::errors::Result;
use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// Counters for one prune pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct PruneOutcome {
    /// Entries left in place
    pub retained: usize,

    /// Entries deleted
    pub deleted: usize,

    /// Entries that could not be deleted (logged; the cap may transiently
    /// be exceeded until the next prune)
    pub failed: usize,
}

/// One archive entry under the backup root, ranked by last-modified time.
struct Entry {
    path: PathBuf,
    name: String,
    modified: SystemTime,
    is_dir: bool,
}

/// Delete the oldest archive entries in `dir` beyond `keep`.
///
/// Immediate children of `dir` are ranked by last-modified time descending;
/// equal timestamps are broken by lexical name order so the retained set is
/// deterministic across filesystems. The `keep` most recent entries survive,
/// the remainder is deleted. No-op if the child count is within the cap.
pub fn prune(dir: &Path, keep: usize) -> Result<PruneOutcome> {
    let mut entries = Vec::new();
    for child in fs::read_dir(dir)? {
        let child = child?;
        let path = child.path();
        let meta = match child.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot stat archive entry, leaving it alone");
                continue;
            }
        };
        entries.push(Entry {
            name: child.file_name().to_string_lossy().into_owned(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_dir: meta.is_dir(),
            path,
        });
    }

    let mut outcome = PruneOutcome::default();
    if entries.len() <= keep {
        outcome.retained = entries.len();
        return Ok(outcome);
    }

    // Newest first; lexical tie-break on equal mtimes.
    entries.sort_by(|a, b| {
        Reverse(a.modified)
            .cmp(&Reverse(b.modified))
            .then_with(|| a.name.cmp(&b.name))
    });

    outcome.retained = keep;
    for entry in &entries[keep..] {
        info!(path = %entry.path.display(), "Removing backup beyond retention cap");
        let result = if entry.is_dir {
            delete_tree(&entry.path)
        } else {
            fs::remove_file(&entry.path).map_err(Into::into)
        };
        match result {
            Ok(()) => outcome.deleted += 1,
            Err(e) => {
                warn!(path = %entry.path.display(), error = %e, "Failed to delete old backup");
                outcome.failed += 1;
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch_with_age(dir: &Path, name: &str, age_secs: u64) {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        file.set_modified(mtime).unwrap();
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_prune_keeps_newest_entries() -> Result<()> {
        let temp = TempDir::new().unwrap();
        // t1 < t2 < t3 < t4 < t5, oldest has the largest age
        touch_with_age(temp.path(), "t1", 500);
        touch_with_age(temp.path(), "t2", 400);
        touch_with_age(temp.path(), "t3", 300);
        touch_with_age(temp.path(), "t4", 200);
        touch_with_age(temp.path(), "t5", 100);

        let outcome = prune(temp.path(), 3)?;
        assert_eq!(outcome.retained, 3);
        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.failed, 0);
        assert_eq!(names(temp.path()), vec!["t3", "t4", "t5"]);
        Ok(())
    }

    #[test]
    fn test_prune_noop_within_cap() -> Result<()> {
        let temp = TempDir::new().unwrap();
        touch_with_age(temp.path(), "a", 100);
        touch_with_age(temp.path(), "b", 200);

        let outcome = prune(temp.path(), 5)?;
        assert_eq!(outcome.retained, 2);
        assert_eq!(outcome.deleted, 0);
        assert_eq!(names(temp.path()), vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn test_prune_deletes_directories_recursively() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let old_dir = temp.path().join("old-backup");
        fs::create_dir_all(old_dir.join("region")).unwrap();
        fs::write(old_dir.join("region/r.dat"), b"x").unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(1000);
        File::open(&old_dir).unwrap().set_modified(mtime).unwrap();
        touch_with_age(temp.path(), "new-backup", 10);

        let outcome = prune(temp.path(), 1)?;
        assert_eq!(outcome.deleted, 1);
        assert!(!old_dir.exists());
        assert!(temp.path().join("new-backup").exists());
        Ok(())
    }

    #[test]
    fn test_prune_tie_break_is_lexical() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(100);
        for name in ["bravo", "alpha", "charlie"] {
            let file = File::create(temp.path().join(name)).unwrap();
            file.set_modified(mtime).unwrap();
        }

        let outcome = prune(temp.path(), 2)?;
        assert_eq!(outcome.deleted, 1);
        // Equal mtimes rank lexically ascending, so the retained pair is
        // always {alpha, bravo}.
        assert_eq!(names(temp.path()), vec!["alpha", "bravo"]);
        Ok(())
    }

    #[test]
    fn test_prune_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        assert!(prune(&temp.path().join("absent"), 3).is_err());
    }
}
