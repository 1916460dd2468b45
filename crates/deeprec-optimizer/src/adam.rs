//! Adam optimizer.
//!
//! Keeps exponential moving averages of the gradient (`m`) and of its
//! square (`v`) and applies the bias-corrected step
//! `w -= lr * m_hat / (sqrt(v_hat) + epsilon)`.

use serde::{Deserialize, Serialize};

use crate::{take_slot, Optimizer, OptimizerConfig, OptimizerError, OptimizerSlots};

/// Adam optimizer state for one variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m: Vec<f32>,
    v: Vec<f32>,
    t: u64,
    config: OptimizerConfig,
}

impl Adam {
    /// Returns the first moment estimates.
    pub fn first_moment(&self) -> &[f32] {
        &self.m
    }

    /// Returns the second moment estimates.
    pub fn second_moment(&self) -> &[f32] {
        &self.v
    }

    /// Returns the number of updates applied.
    pub fn timestep(&self) -> u64 {
        self.t
    }
}

impl Optimizer for Adam {
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        config.validate()?;
        match config {
            OptimizerConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Ok(Self {
                learning_rate,
                beta1,
                beta2,
                epsilon,
                m: Vec::new(),
                v: Vec::new(),
                t: 0,
                config,
            }),
            _ => Err(OptimizerError::ConfigMismatch {
                expected: "Adam".to_string(),
                got: config.name().to_string(),
            }),
        }
    }

    fn apply_gradients(&mut self, weights: &mut [f32], gradients: &[f32]) {
        if self.m.len() != weights.len() {
            self.m = vec![0.0; weights.len()];
            self.v = vec![0.0; weights.len()];
        }
        self.t += 1;

        let t = self.t.min(i32::MAX as u64) as i32;
        let bias_correction1 = 1.0 - self.beta1.powi(t);
        let bias_correction2 = 1.0 - self.beta2.powi(t);

        for (i, (w, &g)) in weights.iter_mut().zip(gradients.iter()).enumerate() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;

            let m_hat = self.m[i] / bias_correction1;
            let v_hat = self.v[i] / bias_correction2;
            *w -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }

    fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    fn slots(&self) -> OptimizerSlots {
        let mut slots = OptimizerSlots {
            step: self.t,
            ..Default::default()
        };
        slots.slots.insert("m".to_string(), self.m.clone());
        slots.slots.insert("v".to_string(), self.v.clone());
        slots
    }

    fn restore_slots(&mut self, mut slots: OptimizerSlots) -> Result<(), OptimizerError> {
        let m = take_slot(&mut slots, "m")?;
        let v = take_slot(&mut slots, "v")?;
        if m.len() != v.len() {
            return Err(OptimizerError::InvalidSlots(format!(
                "m has {} values, v has {}",
                m.len(),
                v.len()
            )));
        }
        self.m = m;
        self.v = v;
        self.t = slots.step;
        Ok(())
    }
}
