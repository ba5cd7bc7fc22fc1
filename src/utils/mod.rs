//! Utility modules for world-keeper.

pub mod errors;
pub mod logger;

pub use errors::{KeeperError, Result};
