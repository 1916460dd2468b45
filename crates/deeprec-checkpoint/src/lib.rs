//! Checkpoint persistence for deeprec models.
//!
//! - [`ModelState`]: everything needed to resume training: dense variables,
//!   their collection tags, optimizer slot state and the global step.
//! - [`Checkpointer`]: serialization backend; [`JsonCheckpointer`] writes
//!   `checkpoint-{step}.json` files.
//! - [`CheckpointManager`]: saves into a directory and keeps only the newest
//!   `max_to_keep` checkpoints.
//!
//! ```no_run
//! use deeprec_checkpoint::{CheckpointConfig, CheckpointManager, JsonCheckpointer, ModelState};
//!
//! fn main() -> deeprec_checkpoint::Result<()> {
//!     let config = CheckpointConfig::new("/tmp/model").with_max_to_keep(10);
//!     let mut manager = CheckpointManager::new(config, JsonCheckpointer::new());
//!     manager.initialize()?;
//!
//!     let mut state = ModelState::new(1000);
//!     state.add_variable("wide/bias", vec![1], vec![0.25], ["wide", "variables"]);
//!     manager.save(&state)?;
//!
//!     let restored = manager.restore_latest()?;
//!     assert_eq!(restored.global_step, 1000);
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use thiserror::Error;

pub mod checkpointer;
pub mod manager;
pub mod state;

pub use checkpointer::{Checkpointer, JsonCheckpointer, Result};
pub use manager::{CheckpointConfig, CheckpointInfo, CheckpointManager};
pub use state::{ModelState, SlotState, VariableState, CHECKPOINT_VERSION};

/// Errors raised while saving or restoring checkpoints.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Filesystem failure at `path`.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// No checkpoint exists at the given location.
    #[error("Checkpoint not found: {0}")]
    NotFound(PathBuf),

    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// The file was written by an incompatible format version.
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this build understands.
        expected: u32,
        /// Version stored in the file.
        found: u32,
    },

    /// The file parsed but its contents are inconsistent.
    #[error("Corrupted checkpoint: {0}")]
    Corrupted(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CheckpointError::NotFound(PathBuf::from("/tmp/model"));
        assert_eq!(err.to_string(), "Checkpoint not found: /tmp/model");

        let err = CheckpointError::VersionMismatch {
            expected: 1,
            found: 7,
        };
        assert!(err.to_string().contains("expected 1, found 7"));
    }
}
