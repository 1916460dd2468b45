//! Evaluation results persisted as JSON lines under `model_dir/eval`.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::hooks::{HookError, HookResult};

pub const EVAL_HISTORY_FILE: &str = "metrics.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub global_step: u64,
    pub metrics: BTreeMap<String, f64>,
}

/// Append-only log of evaluation results, shared between the evaluator
/// and early-stopping hooks.
#[derive(Debug)]
pub struct EvalHistory {
    path: PathBuf,
    records: Mutex<Vec<EvalRecord>>,
}

impl EvalHistory {
    /// Opens the history in `eval_dir`, loading records written by earlier
    /// runs. A missing file is an empty history.
    pub fn open(eval_dir: impl AsRef<Path>) -> HookResult<Self> {
        let path = eval_dir.as_ref().join(EVAL_HISTORY_FILE);
        let records = if path.exists() {
            read_records(&path)?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: EvalRecord) -> HookResult<()> {
        let mut records = self.records.lock();
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let line = serde_json::to_string(&record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        records.push(record);
        Ok(())
    }

    /// Records sorted by global step. For a step evaluated more than once
    /// the latest record wins.
    pub fn records(&self) -> Vec<EvalRecord> {
        let mut by_step: BTreeMap<u64, EvalRecord> = BTreeMap::new();
        for record in self.records.lock().iter() {
            by_step.insert(record.global_step, record.clone());
        }
        by_step.into_values().collect()
    }

    pub fn latest(&self) -> Option<EvalRecord> {
        self.records().pop()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

fn read_records(path: &Path) -> HookResult<Vec<EvalRecord>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                HookError::Custom(format!("{}:{}: {e}", path.display(), i + 1))
            })
        })
        .collect()
}
