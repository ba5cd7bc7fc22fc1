//! File-tree operations: recursive copy/delete and archive handling.

pub mod archive;
pub mod tree;

pub use archive::{archive_dir, extract_archive, ARCHIVE_EXT};
pub use tree::{copy_tree, delete_tree, CopyOutcome};
