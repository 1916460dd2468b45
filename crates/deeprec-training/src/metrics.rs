//! Training and evaluation metrics.
//!
//! - [`log_loss`] / [`log_loss_gradient`]: the binary cross-entropy used by
//!   ranking heads.
//! - [`StreamingAuc`]: ROC AUC accumulated over batches with a fixed set of
//!   thresholds.
//! - [`MetricOp`]: a mergeable metric produced by a model function per batch.
//! - [`Metrics`] / [`MetricsRecorder`]: what hooks see and how evaluation
//!   aggregates batches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Added inside the logarithms of [`log_loss`].
pub const LOG_LOSS_EPSILON: f32 = 1e-7;

/// Thresholds used by [`StreamingAuc::new`].
pub const DEFAULT_AUC_THRESHOLDS: usize = 200;

/// Mean binary cross-entropy of `probs` against `labels`.
///
/// Per example: `-(y ln(p + eps) + (1 - y) ln(1 - p + eps))`.
pub fn log_loss(probs: &[f32], labels: &[f32]) -> f32 {
    if probs.is_empty() {
        return 0.0;
    }
    let total: f32 = probs
        .iter()
        .zip(labels)
        .map(|(&p, &y)| {
            -(y * (p + LOG_LOSS_EPSILON).ln() + (1.0 - y) * (1.0 - p + LOG_LOSS_EPSILON).ln())
        })
        .sum();
    total / probs.len() as f32
}

/// Gradient of the mean log-loss with respect to the logits that produced
/// `probs` through a sigmoid: `(p - y) / batch`.
pub fn log_loss_gradient(probs: &[f32], labels: &[f32]) -> Vec<f32> {
    let n = probs.len().max(1) as f32;
    probs
        .iter()
        .zip(labels)
        .map(|(&p, &y)| (p - y) / n)
        .collect()
}

/// Confusion counts at evenly spaced thresholds, merged across batches.
///
/// Thresholds are `0 - eps`, `i / (n - 1)` for `0 < i < n - 1`, and
/// `1 + eps`; a prediction counts as positive when it is strictly greater
/// than the threshold. The area is computed with the trapezoidal rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingAuc {
    thresholds: Vec<f32>,
    true_positives: Vec<u64>,
    false_positives: Vec<u64>,
    true_negatives: Vec<u64>,
    false_negatives: Vec<u64>,
}

impl Default for StreamingAuc {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingAuc {
    pub fn new() -> Self {
        Self::with_thresholds(DEFAULT_AUC_THRESHOLDS)
    }

    pub fn with_thresholds(num_thresholds: usize) -> Self {
        let n = num_thresholds.max(3);
        let eps = 1e-7;
        let mut thresholds: Vec<f32> = (0..n)
            .map(|i| i as f32 / (n - 1) as f32)
            .collect();
        thresholds[0] = -eps;
        thresholds[n - 1] = 1.0 + eps;
        Self {
            thresholds,
            true_positives: vec![0; n],
            false_positives: vec![0; n],
            true_negatives: vec![0; n],
            false_negatives: vec![0; n],
        }
    }

    pub fn num_thresholds(&self) -> usize {
        self.thresholds.len()
    }

    pub fn update(&mut self, predictions: &[f32], labels: &[f32]) {
        for (&p, &y) in predictions.iter().zip(labels) {
            let positive = y >= 0.5;
            for (i, &t) in self.thresholds.iter().enumerate() {
                match (p > t, positive) {
                    (true, true) => self.true_positives[i] += 1,
                    (true, false) => self.false_positives[i] += 1,
                    (false, false) => self.true_negatives[i] += 1,
                    (false, true) => self.false_negatives[i] += 1,
                }
            }
        }
    }

    /// Adds the counts of `other`. Both must use the same thresholds.
    pub fn merge(&mut self, other: &StreamingAuc) {
        if other.thresholds.len() != self.thresholds.len() {
            tracing::warn!(
                ours = self.thresholds.len(),
                theirs = other.thresholds.len(),
                "Ignoring AUC with different thresholds"
            );
            return;
        }
        let add = |a: &mut Vec<u64>, b: &Vec<u64>| a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
        add(&mut self.true_positives, &other.true_positives);
        add(&mut self.false_positives, &other.false_positives);
        add(&mut self.true_negatives, &other.true_negatives);
        add(&mut self.false_negatives, &other.false_negatives);
    }

    pub fn result(&self) -> f64 {
        const EPS: f64 = 1e-7;
        let rates: Vec<(f64, f64)> = (0..self.thresholds.len())
            .map(|i| {
                let tp = self.true_positives[i] as f64;
                let fp = self.false_positives[i] as f64;
                let tn = self.true_negatives[i] as f64;
                let fn_ = self.false_negatives[i] as f64;
                let tpr = (tp + EPS) / (tp + fn_ + EPS);
                let fpr = fp / (fp + tn + EPS);
                (fpr, tpr)
            })
            .collect();
        rates
            .windows(2)
            .map(|w| (w[0].0 - w[1].0) * (w[0].1 + w[1].1) / 2.0)
            .sum()
    }
}

/// A metric a model function computes for one batch; the evaluator merges
/// them across batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricOp {
    Auc(StreamingAuc),
    Mean { sum: f64, count: u64 },
}

impl MetricOp {
    pub fn auc(predictions: &[f32], labels: &[f32]) -> Self {
        let mut auc = StreamingAuc::new();
        auc.update(predictions, labels);
        MetricOp::Auc(auc)
    }

    pub fn mean(values: &[f32]) -> Self {
        MetricOp::Mean {
            sum: values.iter().map(|&v| f64::from(v)).sum(),
            count: values.len() as u64,
        }
    }

    /// Folds `other` into `self`. Mismatched kinds are ignored with a warning.
    pub fn merge(&mut self, other: &MetricOp) {
        match (self, other) {
            (MetricOp::Auc(a), MetricOp::Auc(b)) => a.merge(b),
            (MetricOp::Mean { sum, count }, MetricOp::Mean { sum: s, count: c }) => {
                *sum += s;
                *count += c;
            }
            _ => tracing::warn!("Cannot merge metrics of different kinds"),
        }
    }

    pub fn result(&self) -> f64 {
        match self {
            MetricOp::Auc(auc) => auc.result(),
            MetricOp::Mean { sum, count } => {
                if *count == 0 {
                    0.0
                } else {
                    sum / *count as f64
                }
            }
        }
    }
}

/// Loss and named metric values at a global step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub loss: f64,
    pub global_step: u64,
    pub values: BTreeMap<String, f64>,
}

impl Metrics {
    pub fn new(loss: f64, global_step: u64) -> Self {
        Self {
            loss,
            global_step,
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Looks up `name`, treating `"loss"` as the loss.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "loss" => Some(self.loss),
            other => self.values.get(other).copied(),
        }
    }

    /// All values including `loss`, as written to the eval history.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = self.values.clone();
        map.insert("loss".to_string(), self.loss);
        map
    }
}

/// Averages batch losses and merges metric ops over an evaluation.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder {
    loss_sum: f64,
    count: u64,
    ops: BTreeMap<String, MetricOp>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_loss(&mut self, loss: f64) {
        self.loss_sum += loss;
        self.count += 1;
    }

    pub fn record_ops(&mut self, ops: &BTreeMap<String, MetricOp>) {
        for (name, op) in ops {
            match self.ops.get_mut(name) {
                Some(existing) => existing.merge(op),
                None => {
                    self.ops.insert(name.clone(), op.clone());
                }
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn average_loss(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.loss_sum / self.count as f64
        }
    }

    pub fn aggregate(&self, global_step: u64) -> Metrics {
        self.ops
            .iter()
            .fold(Metrics::new(self.average_loss(), global_step), |m, (name, op)| {
                m.with_value(name.clone(), op.result())
            })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
