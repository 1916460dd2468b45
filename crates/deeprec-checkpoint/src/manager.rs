//! Checkpoint lifecycle: save into a directory, restore, prune old files.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::checkpointer::{Checkpointer, Result};
use crate::state::ModelState;
use crate::CheckpointError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub path: PathBuf,
    pub global_step: u64,
}

#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    pub checkpoint_dir: PathBuf,
    /// Number of most recent checkpoints retained; 0 keeps everything.
    pub max_to_keep: usize,
}

impl CheckpointConfig {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            max_to_keep: 5,
        }
    }

    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep;
        self
    }
}

/// Saves checkpoints into one directory and keeps the newest `max_to_keep`.
pub struct CheckpointManager<C: Checkpointer> {
    config: CheckpointConfig,
    checkpointer: C,
    history: VecDeque<CheckpointInfo>,
}

impl<C: Checkpointer> CheckpointManager<C> {
    pub fn new(config: CheckpointConfig, checkpointer: C) -> Self {
        Self {
            config,
            checkpointer,
            history: VecDeque::new(),
        }
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    pub fn checkpoint_count(&self) -> usize {
        self.history.len()
    }

    /// Picks up checkpoints left in the directory by an earlier run so they
    /// count towards `max_to_keep`.
    pub fn initialize(&mut self) -> Result<()> {
        self.history = self
            .checkpointer
            .list(&self.config.checkpoint_dir)
            .into_iter()
            .map(|(global_step, path)| CheckpointInfo { path, global_step })
            .collect();
        tracing::debug!(
            dir = %self.config.checkpoint_dir.display(),
            count = self.history.len(),
            "Initialized checkpoint manager"
        );
        self.cleanup_old()
    }

    pub fn save(&mut self, state: &ModelState) -> Result<CheckpointInfo> {
        let path = self
            .config
            .checkpoint_dir
            .join(self.checkpointer.filename(state.global_step));
        self.checkpointer.save(&path, state)?;

        let info = CheckpointInfo {
            path,
            global_step: state.global_step,
        };
        // Re-saving a step replaces its entry.
        self.history.retain(|c| c.global_step != info.global_step);
        self.history.push_back(info.clone());
        self.cleanup_old()?;
        Ok(info)
    }

    pub fn latest(&self) -> Option<PathBuf> {
        self.checkpointer.latest(&self.config.checkpoint_dir)
    }

    pub fn restore_latest(&self) -> Result<ModelState> {
        let path = self
            .latest()
            .ok_or_else(|| CheckpointError::NotFound(self.config.checkpoint_dir.clone()))?;
        self.checkpointer.restore(&path)
    }

    pub fn restore(&self, path: &Path) -> Result<ModelState> {
        self.checkpointer.restore(path)
    }

    pub fn restore_step(&self, step: u64) -> Result<ModelState> {
        let path = self
            .config
            .checkpoint_dir
            .join(self.checkpointer.filename(step));
        self.checkpointer.restore(&path)
    }

    pub fn list_checkpoints(&self) -> Vec<CheckpointInfo> {
        self.checkpointer
            .list(&self.config.checkpoint_dir)
            .into_iter()
            .map(|(global_step, path)| CheckpointInfo { path, global_step })
            .collect()
    }

    fn cleanup_old(&mut self) -> Result<()> {
        if self.config.max_to_keep == 0 {
            return Ok(());
        }
        while self.history.len() > self.config.max_to_keep {
            let Some(old) = self.history.pop_front() else {
                break;
            };
            tracing::debug!(
                path = %old.path.display(),
                step = old.global_step,
                "Removing old checkpoint"
            );
            if old.path.exists() {
                std::fs::remove_file(&old.path).map_err(|e| CheckpointError::Io {
                    path: old.path.clone(),
                    source: e,
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonCheckpointer;
    use tempfile::tempdir;

    fn manager(dir: &Path, keep: usize) -> CheckpointManager<JsonCheckpointer> {
        CheckpointManager::new(
            CheckpointConfig::new(dir).with_max_to_keep(keep),
            JsonCheckpointer::new(),
        )
    }

    #[test]
    fn test_keeps_newest() {
        let dir = tempdir().unwrap();
        let mut m = manager(dir.path(), 2);
        for step in [100, 200, 300] {
            m.save(&ModelState::new(step)).unwrap();
        }
        let steps: Vec<u64> = m.list_checkpoints().iter().map(|c| c.global_step).collect();
        assert_eq!(steps, vec![200, 300]);
        assert_eq!(m.checkpoint_count(), 2);
        assert_eq!(m.restore_latest().unwrap().global_step, 300);
    }

    #[test]
    fn test_initialize_counts_existing_files() {
        let dir = tempdir().unwrap();
        {
            let mut first = manager(dir.path(), 0);
            for step in [1, 2, 3] {
                first.save(&ModelState::new(step)).unwrap();
            }
        }
        let mut second = manager(dir.path(), 3);
        second.initialize().unwrap();
        second.save(&ModelState::new(4)).unwrap();

        let steps: Vec<u64> = second
            .list_checkpoints()
            .iter()
            .map(|c| c.global_step)
            .collect();
        assert_eq!(steps, vec![2, 3, 4]);
    }

    #[test]
    fn test_restore_step_and_missing() {
        let dir = tempdir().unwrap();
        let mut m = manager(dir.path(), 5);
        assert!(matches!(
            m.restore_latest(),
            Err(CheckpointError::NotFound(_))
        ));
        m.save(&ModelState::new(42)).unwrap();
        assert_eq!(m.restore_step(42).unwrap().global_step, 42);
        assert!(m.restore_step(43).is_err());
    }

    #[test]
    fn test_resave_same_step() {
        let dir = tempdir().unwrap();
        let mut m = manager(dir.path(), 2);
        m.save(&ModelState::new(10)).unwrap();
        m.save(&ModelState::new(10)).unwrap();
        m.save(&ModelState::new(20)).unwrap();
        assert_eq!(m.list_checkpoints().len(), 2);
    }
}
