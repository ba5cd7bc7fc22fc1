//! world-keeper
//!
//! Point-in-time backups of live, mutable data directories ("worlds") with a
//! count-based retention cap. The heart of the crate is a two-phase
//! pipeline: a short synchronous freeze-and-enumerate stage that runs
//! exclusive of live mutation, and a long-running blocking execution stage
//! that copies, compresses and prunes without ever holding up the live
//! system.

pub mod config;
pub mod fs;
pub mod host;
pub mod pipeline;
pub mod retention;
pub mod triggers;
pub mod utils;

// Re-export commonly used types
pub use config::BackupConfig;
pub use host::{DirectoryHost, LiveDataHost, Target};
pub use pipeline::job::{BackupJobSpec, JobReport, TriggerReason, WorkItem};
pub use pipeline::{Phase, PipelineController, PipelineError, PipelineState};
pub use utils::errors::KeeperError;
pub type Result<T> = std::result::Result<T, KeeperError>;
