//! Checkpoint serialization backends.

use std::path::{Path, PathBuf};

use crate::state::ModelState;
use crate::CheckpointError;

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Saves and restores [`ModelState`] files.
pub trait Checkpointer: Send + Sync {
    /// File name used for the checkpoint taken at `step`.
    fn filename(&self, step: u64) -> String;

    /// Global step encoded in `filename`, if it is one of ours.
    fn parse_step(&self, filename: &str) -> Option<u64>;

    fn save(&self, path: &Path, state: &ModelState) -> Result<()>;

    fn restore(&self, path: &Path) -> Result<ModelState>;

    /// All checkpoints in `dir`, sorted by ascending step.
    fn list(&self, dir: &Path) -> Vec<(u64, PathBuf)> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut found: Vec<(u64, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let step = path
                    .file_name()
                    .and_then(|f| f.to_str())
                    .and_then(|f| self.parse_step(f))?;
                Some((step, path))
            })
            .collect();
        found.sort_by_key(|(step, _)| *step);
        found
    }

    /// Path of the checkpoint with the highest step in `dir`.
    fn latest(&self, dir: &Path) -> Option<PathBuf> {
        self.list(dir).pop().map(|(_, path)| path)
    }
}

/// Writes `checkpoint-{step}.json` files.
#[derive(Debug, Clone, Default)]
pub struct JsonCheckpointer {
    pub pretty: bool,
}

impl JsonCheckpointer {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Checkpointer for JsonCheckpointer {
    fn filename(&self, step: u64) -> String {
        format!("checkpoint-{step}.json")
    }

    fn parse_step(&self, filename: &str) -> Option<u64> {
        filename
            .strip_prefix("checkpoint-")?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }

    fn save(&self, path: &Path, state: &ModelState) -> Result<()> {
        tracing::info!(path = %path.display(), step = state.global_step, "Saving checkpoint");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let json = if self.pretty {
            serde_json::to_string_pretty(state)
        } else {
            serde_json::to_string(state)
        }
        .map_err(CheckpointError::Serialization)?;

        // Readers never observe a half-written file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| CheckpointError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, path).map_err(|e| CheckpointError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!(
            path = %path.display(),
            variables = state.variables.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<ModelState> {
        if !path.exists() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }

        let json = std::fs::read_to_string(path).map_err(|e| CheckpointError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let state: ModelState =
            serde_json::from_str(&json).map_err(CheckpointError::Deserialization)?;
        state.validate()?;

        tracing::info!(
            path = %path.display(),
            step = state.global_step,
            variables = state.variables.len(),
            "Checkpoint restored"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_json_checkpointer_save_restore() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint-1000.json");

        let checkpointer = JsonCheckpointer::new();
        let mut state = ModelState::new(1000);
        state.add_variable("wide/bias", vec![1], vec![-0.3], ["wide", "variables"]);
        state.set_metadata("model", "wdl");

        checkpointer.save(&path, &state).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let restored = checkpointer.restore(&path).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_json_checkpointer_pretty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint-5.json");

        JsonCheckpointer::pretty()
            .save(&path, &ModelState::new(5))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains('\n'));
    }

    #[test]
    fn test_restore_not_found() {
        let result = JsonCheckpointer::new().restore(Path::new("/nonexistent/checkpoint-1.json"));
        assert!(matches!(result, Err(CheckpointError::NotFound(_))));
    }

    #[test]
    fn test_restore_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint-1.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonCheckpointer::new().restore(&path),
            Err(CheckpointError::Deserialization(_))
        ));
    }

    #[test]
    fn test_latest_includes_step_zero() {
        let dir = tempdir().unwrap();
        let checkpointer = JsonCheckpointer::new();
        assert!(checkpointer.latest(dir.path()).is_none());

        checkpointer
            .save(&dir.path().join("checkpoint-0.json"), &ModelState::new(0))
            .unwrap();
        assert_eq!(
            checkpointer.latest(dir.path()),
            Some(dir.path().join("checkpoint-0.json"))
        );
    }

    #[test]
    fn test_list_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        let checkpointer = JsonCheckpointer::new();
        for step in [300, 100, 700, 200] {
            let path = dir.path().join(checkpointer.filename(step));
            checkpointer.save(&path, &ModelState::new(step)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("eval")).unwrap();

        let steps: Vec<u64> = checkpointer
            .list(dir.path())
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        assert_eq!(steps, vec![100, 200, 300, 700]);
        assert!(checkpointer
            .latest(dir.path())
            .unwrap()
            .ends_with("checkpoint-700.json"));
    }

    #[test]
    fn test_parse_step() {
        let c = JsonCheckpointer::new();
        assert_eq!(c.parse_step("checkpoint-100.json"), Some(100));
        assert_eq!(c.parse_step("checkpoint-0.json"), Some(0));
        assert_eq!(c.parse_step("checkpoint-abc.json"), None);
        assert_eq!(c.parse_step("checkpoint-1.json.tmp"), None);
        assert_eq!(c.parse_step("invalid.json"), None);
    }
}
