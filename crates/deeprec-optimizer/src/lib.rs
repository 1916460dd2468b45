//! Optimizers for deeprec.
//!
//! Each optimizer instance owns the slot state (accumulators, moments) of
//! exactly one variable. Trainers keep one instance per `(optimizer,
//! variable)` pair and checkpoint it through [`OptimizerSlots`].
//!
//! # Available Optimizers
//!
//! - [`Ftrl`] - Follow The Regularized Leader (proximal), for sparse linear weights
//! - [`Adam`] - Adaptive Moment Estimation, for embeddings and dense layers
//!
//! # Example
//!
//! ```
//! use deeprec_optimizer::{create_optimizer, OptimizerConfig};
//!
//! let mut optimizer = create_optimizer(OptimizerConfig::adam(0.01)).unwrap();
//! let mut weights = vec![1.0, 2.0, 3.0];
//! optimizer.apply_gradients(&mut weights, &[0.1, 0.2, 0.3]);
//! assert!(weights[0] < 1.0);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod adam;
mod ftrl;

pub use adam::Adam;
pub use ftrl::Ftrl;

/// Errors from optimizer construction and state restore.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// The config variant does not match the optimizer type.
    #[error("Config mismatch: expected {expected}, got {got}")]
    ConfigMismatch {
        /// Expected optimizer name.
        expected: String,
        /// Name found in the config.
        got: String,
    },

    /// A hyperparameter is out of range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Restored slot state does not fit the optimizer.
    #[error("Invalid slot state: {0}")]
    InvalidSlots(String),
}

/// Optimizer hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptimizerConfig {
    /// FTRL-Proximal.
    Ftrl {
        /// Learning rate.
        learning_rate: f32,
        /// Power applied to the accumulator, `<= 0`.
        learning_rate_power: f32,
        /// L1 regularization strength.
        l1_reg: f32,
        /// L2 regularization strength.
        l2_reg: f32,
        /// Starting value of the squared-gradient accumulator.
        initial_accumulator_value: f32,
    },

    /// Adam with bias correction.
    Adam {
        /// Learning rate.
        learning_rate: f32,
        /// Decay of the first moment.
        beta1: f32,
        /// Decay of the second moment.
        beta2: f32,
        /// Numerical stability term.
        epsilon: f32,
    },
}

impl OptimizerConfig {
    /// FTRL with `learning_rate_power = -0.5`, no L2, accumulator starting at 0.1.
    pub fn ftrl(learning_rate: f32, l1_reg: f32) -> Self {
        OptimizerConfig::Ftrl {
            learning_rate,
            learning_rate_power: -0.5,
            l1_reg,
            l2_reg: 0.0,
            initial_accumulator_value: 0.1,
        }
    }

    /// Adam with `beta1 = 0.9`, `beta2 = 0.999`, `epsilon = 1e-8`.
    pub fn adam(learning_rate: f32) -> Self {
        OptimizerConfig::Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }

    /// Returns the optimizer name.
    pub fn name(&self) -> &'static str {
        match self {
            OptimizerConfig::Ftrl { .. } => "Ftrl",
            OptimizerConfig::Adam { .. } => "Adam",
        }
    }

    /// Returns the learning rate.
    pub fn learning_rate(&self) -> f32 {
        match self {
            OptimizerConfig::Ftrl { learning_rate, .. } => *learning_rate,
            OptimizerConfig::Adam { learning_rate, .. } => *learning_rate,
        }
    }

    /// Checks hyperparameter ranges.
    pub fn validate(&self) -> Result<(), OptimizerError> {
        let invalid = |msg: String| Err(OptimizerError::InvalidParameter(msg));
        if !(self.learning_rate() > 0.0) {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate()
            ));
        }
        match *self {
            OptimizerConfig::Ftrl {
                learning_rate_power,
                l1_reg,
                l2_reg,
                initial_accumulator_value,
                ..
            } => {
                if learning_rate_power > 0.0 {
                    return invalid(format!(
                        "learning_rate_power must be <= 0, got {learning_rate_power}"
                    ));
                }
                if l1_reg < 0.0 || l2_reg < 0.0 {
                    return invalid(format!(
                        "regularization must be >= 0, got l1={l1_reg} l2={l2_reg}"
                    ));
                }
                if initial_accumulator_value < 0.0 {
                    return invalid(format!(
                        "initial_accumulator_value must be >= 0, got {initial_accumulator_value}"
                    ));
                }
            }
            OptimizerConfig::Adam {
                beta1,
                beta2,
                epsilon,
                ..
            } => {
                if !(0.0..1.0).contains(&beta1) || !(0.0..1.0).contains(&beta2) {
                    return invalid(format!(
                        "betas must be in [0, 1), got beta1={beta1} beta2={beta2}"
                    ));
                }
                if epsilon <= 0.0 {
                    return invalid(format!("epsilon must be positive, got {epsilon}"));
                }
            }
        }
        Ok(())
    }
}

/// Exported slot state of one optimizer instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSlots {
    /// Number of updates applied.
    pub step: u64,
    /// Slot name to values, one value per variable element.
    pub slots: BTreeMap<String, Vec<f32>>,
}

/// An optimizer bound to a single variable.
pub trait Optimizer: Sized {
    /// Creates an optimizer from a configuration.
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError>;

    /// Updates `weights` in place. Slot state is sized lazily on first use.
    fn apply_gradients(&mut self, weights: &mut [f32], gradients: &[f32]);

    /// Returns the configuration.
    fn config(&self) -> &OptimizerConfig;

    /// Exports the slot state.
    fn slots(&self) -> OptimizerSlots;

    /// Replaces the slot state.
    fn restore_slots(&mut self, slots: OptimizerSlots) -> Result<(), OptimizerError>;
}

/// Creates a boxed optimizer for `config`.
pub fn create_optimizer(config: OptimizerConfig) -> Result<Box<dyn OptimizerDyn>, OptimizerError> {
    Ok(match &config {
        OptimizerConfig::Ftrl { .. } => Box::new(Ftrl::new(config)?),
        OptimizerConfig::Adam { .. } => Box::new(Adam::new(config)?),
    })
}

/// Object-safe view of [`Optimizer`].
pub trait OptimizerDyn: Send + Sync {
    /// See [`Optimizer::apply_gradients`].
    fn apply_gradients(&mut self, weights: &mut [f32], gradients: &[f32]);

    /// See [`Optimizer::config`].
    fn config(&self) -> &OptimizerConfig;

    /// See [`Optimizer::slots`].
    fn slots(&self) -> OptimizerSlots;

    /// See [`Optimizer::restore_slots`].
    fn restore_slots(&mut self, slots: OptimizerSlots) -> Result<(), OptimizerError>;
}

impl<T: Optimizer + Send + Sync> OptimizerDyn for T {
    fn apply_gradients(&mut self, weights: &mut [f32], gradients: &[f32]) {
        Optimizer::apply_gradients(self, weights, gradients)
    }

    fn config(&self) -> &OptimizerConfig {
        Optimizer::config(self)
    }

    fn slots(&self) -> OptimizerSlots {
        Optimizer::slots(self)
    }

    fn restore_slots(&mut self, slots: OptimizerSlots) -> Result<(), OptimizerError> {
        Optimizer::restore_slots(self, slots)
    }
}

pub(crate) fn take_slot(
    slots: &mut OptimizerSlots,
    name: &str,
) -> Result<Vec<f32>, OptimizerError> {
    slots
        .slots
        .remove(name)
        .ok_or_else(|| OptimizerError::InvalidSlots(format!("missing slot '{name}'")))
}
