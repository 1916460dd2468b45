//! Serializable model state.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::CheckpointError;

/// Format version written into every checkpoint.
pub const CHECKPOINT_VERSION: u32 = 1;

/// A dense variable: its shape, row-major values and collection tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableState {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
    #[serde(default)]
    pub collections: Vec<String>,
}

impl VariableState {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Optimizer state for one variable.
///
/// Stored under `"{optimizer}/{variable}"` so the same variable can carry
/// state for more than one optimizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotState {
    /// Number of updates applied so far.
    pub step: u64,
    /// Named slot buffers (e.g. `accumulator`, `m`), each shaped like the
    /// variable.
    pub slots: BTreeMap<String, Vec<f32>>,
}

/// Everything needed to resume training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub version: u32,
    pub global_step: u64,
    /// Seconds since the Unix epoch when the state was captured.
    pub timestamp: u64,
    pub variables: BTreeMap<String, VariableState>,
    #[serde(default)]
    pub optimizer_slots: BTreeMap<String, SlotState>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ModelState {
    pub fn new(global_step: u64) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            version: CHECKPOINT_VERSION,
            global_step,
            timestamp,
            variables: BTreeMap::new(),
            optimizer_slots: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn add_variable<I, S>(
        &mut self,
        name: impl Into<String>,
        shape: Vec<usize>,
        data: Vec<f32>,
        collections: I,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables.insert(
            name.into(),
            VariableState {
                shape,
                data,
                collections: collections.into_iter().map(Into::into).collect(),
            },
        );
    }

    pub fn add_slots(&mut self, optimizer: &str, variable: &str, slots: SlotState) {
        self.optimizer_slots
            .insert(slot_key(optimizer, variable), slots);
    }

    pub fn slots(&self, optimizer: &str, variable: &str) -> Option<&SlotState> {
        self.optimizer_slots.get(&slot_key(optimizer, variable))
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn num_parameters(&self) -> usize {
        self.variables.values().map(|v| v.data.len()).sum()
    }

    /// Checks the version and that every buffer matches its variable's size.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: CHECKPOINT_VERSION,
                found: self.version,
            });
        }
        for (name, var) in &self.variables {
            if var.data.len() != var.numel() {
                return Err(CheckpointError::Corrupted(format!(
                    "variable {name} has {} values for shape {:?}",
                    var.data.len(),
                    var.shape
                )));
            }
        }
        for (key, state) in &self.optimizer_slots {
            let variable = key.split_once('/').map(|(_, v)| v).ok_or_else(|| {
                CheckpointError::Corrupted(format!("malformed slot key {key}"))
            })?;
            let var = self.variables.get(variable).ok_or_else(|| {
                CheckpointError::Corrupted(format!("slots {key} refer to unknown variable"))
            })?;
            if let Some((slot, values)) = state
                .slots
                .iter()
                .find(|(_, values)| values.len() != var.data.len())
            {
                return Err(CheckpointError::Corrupted(format!(
                    "slot {slot} of {key} has {} values, variable has {}",
                    values.len(),
                    var.data.len()
                )));
            }
        }
        Ok(())
    }
}

fn slot_key(optimizer: &str, variable: &str) -> String {
    format!("{optimizer}/{variable}")
}
