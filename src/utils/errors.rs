//! Custom error types for world-keeper.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Host error: {0}")]
    Host(String),
}

pub type Result<T> = std::result::Result<T, KeeperError>;
