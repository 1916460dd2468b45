//! Run and session configuration for the estimator.
//!
//! `RunConfig` carries where checkpoints go and how often they are written,
//! the random seed, and a [`SessionConfig`] describing devices and thread
//! pools. Both serialize with serde so a JSON file can override any field.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid run config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid run config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, RunConfigError>;

/// Devices and thread pools available to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of devices of each type, e.g. `{"GPU": 0}`.
    pub device_count: BTreeMap<String, u32>,
    /// Threads for running independent parts of the model concurrently.
    pub inter_op_parallelism_threads: usize,
    /// Threads for data-parallel work inside one part.
    pub intra_op_parallelism_threads: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl SessionConfig {
    /// CPU-only session with the given pool sizes. A size of 0 lets rayon
    /// pick the number of cores.
    pub fn new(inter_op_parallelism_threads: usize, intra_op_parallelism_threads: usize) -> Self {
        Self {
            device_count: BTreeMap::from([("GPU".to_string(), 0)]),
            inter_op_parallelism_threads,
            intra_op_parallelism_threads,
        }
    }

    pub fn gpu_count(&self) -> u32 {
        self.device_count.get("GPU").copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Where checkpoints and evaluation results go. `None` means a fresh
    /// temporary directory.
    pub model_dir: Option<PathBuf>,
    pub tf_random_seed: Option<u64>,
    pub save_checkpoints_steps: u64,
    pub keep_checkpoint_max: usize,
    pub log_step_count_steps: u64,
    pub session_config: SessionConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            tf_random_seed: None,
            save_checkpoints_steps: 1000,
            keep_checkpoint_max: 5,
            log_step_count_steps: 100,
            session_config: SessionConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_dir(mut self, model_dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(model_dir.into());
        self
    }

    pub fn with_tf_random_seed(mut self, seed: u64) -> Self {
        self.tf_random_seed = Some(seed);
        self
    }

    pub fn with_save_checkpoints_steps(mut self, steps: u64) -> Self {
        self.save_checkpoints_steps = steps;
        self
    }

    pub fn with_keep_checkpoint_max(mut self, max: usize) -> Self {
        self.keep_checkpoint_max = max;
        self
    }

    pub fn with_log_step_count_steps(mut self, steps: u64) -> Self {
        self.log_step_count_steps = steps;
        self
    }

    pub fn with_session_config(mut self, session_config: SessionConfig) -> Self {
        self.session_config = session_config;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.save_checkpoints_steps == 0 {
            return Err(RunConfigError::Invalid(
                "save_checkpoints_steps must be positive".into(),
            ));
        }
        if self.log_step_count_steps == 0 {
            return Err(RunConfigError::Invalid(
                "log_step_count_steps must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Seed for variable initialization; random when unset.
    pub fn seed(&self) -> u64 {
        self.tf_random_seed.unwrap_or_else(rand::random)
    }

    /// The configured model directory, or a new temporary one that is kept
    /// after the process exits.
    pub fn resolve_model_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.model_dir {
            return Ok(dir.clone());
        }
        let dir = tempfile::Builder::new()
            .prefix("deeprec-model-")
            .tempdir()
            .map_err(|source| RunConfigError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        let path = dir.keep();
        tracing::warn!(model_dir = %path.display(), "Using temporary folder as model directory");
        Ok(path)
    }

    /// Returns a copy with the fields present in `overrides` replaced.
    /// Nested objects (such as `session_config`) merge key by key.
    pub fn with_overrides(&self, overrides: Value) -> Result<Self> {
        let mut base = serde_json::to_value(self)?;
        merge_json(&mut base, overrides);
        let merged: RunConfig = serde_json::from_value(base)?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn with_overrides_from_file(&self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RunConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.with_overrides(serde_json::from_str(&content)?)
    }
}

fn merge_json(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overrides) => *base = overrides,
    }
}
