//! FTRL-Proximal optimizer.
//!
//! Per element, with accumulator `n`, linear term `z`, learning rate `a`
//! and power `p` (typically -0.5):
//!
//! ```text
//! n' = n + g^2
//! sigma = (n'^(-p) - n^(-p)) / a
//! z = z + g - sigma * w
//! w = 0                                          if |z| <= l1
//! w = -(z - sign(z) * l1) / (n'^(-p) / a + 2 * l2)   otherwise
//! ```
//!
//! The L1 threshold keeps rarely useful weights at exactly zero, which is
//! what the wide part of a wide-and-deep model wants.

use serde::{Deserialize, Serialize};

use crate::{take_slot, Optimizer, OptimizerConfig, OptimizerError, OptimizerSlots};

/// FTRL optimizer state for one variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ftrl {
    learning_rate: f32,
    learning_rate_power: f32,
    l1_reg: f32,
    l2_reg: f32,
    initial_accumulator_value: f32,
    /// Accumulated squared gradients (n in the algorithm).
    accumulator: Vec<f32>,
    /// Linear term (z in the algorithm).
    linear: Vec<f32>,
    step: u64,
    config: OptimizerConfig,
}

impl Ftrl {
    /// Returns the current accumulator state.
    pub fn accumulator(&self) -> &[f32] {
        &self.accumulator
    }

    /// Returns the current linear state.
    pub fn linear(&self) -> &[f32] {
        &self.linear
    }

    fn sign(x: f32) -> f32 {
        if x > 0.0 {
            1.0
        } else if x < 0.0 {
            -1.0
        } else {
            0.0
        }
    }

    fn power(&self, n: f32) -> f32 {
        if self.learning_rate_power == -0.5 {
            n.sqrt()
        } else {
            n.powf(-self.learning_rate_power)
        }
    }
}

impl Optimizer for Ftrl {
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        config.validate()?;
        match config {
            OptimizerConfig::Ftrl {
                learning_rate,
                learning_rate_power,
                l1_reg,
                l2_reg,
                initial_accumulator_value,
            } => Ok(Self {
                learning_rate,
                learning_rate_power,
                l1_reg,
                l2_reg,
                initial_accumulator_value,
                accumulator: Vec::new(),
                linear: Vec::new(),
                step: 0,
                config,
            }),
            _ => Err(OptimizerError::ConfigMismatch {
                expected: "Ftrl".to_string(),
                got: config.name().to_string(),
            }),
        }
    }

    fn apply_gradients(&mut self, weights: &mut [f32], gradients: &[f32]) {
        if self.accumulator.len() != weights.len() {
            self.accumulator = vec![self.initial_accumulator_value; weights.len()];
            self.linear = vec![0.0; weights.len()];
        }
        self.step += 1;

        for (i, (w, &g)) in weights.iter_mut().zip(gradients.iter()).enumerate() {
            if g == 0.0 {
                continue;
            }
            let n_prev = self.accumulator[i];
            let n_new = n_prev + g * g;
            self.accumulator[i] = n_new;

            let sigma = (self.power(n_new) - self.power(n_prev)) / self.learning_rate;
            self.linear[i] += g - sigma * *w;

            let z = self.linear[i];
            if z.abs() <= self.l1_reg {
                *w = 0.0;
            } else {
                let denominator = self.power(n_new) / self.learning_rate + 2.0 * self.l2_reg;
                *w = -(z - Self::sign(z) * self.l1_reg) / denominator;
            }
        }
    }

    fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    fn slots(&self) -> OptimizerSlots {
        let mut slots = OptimizerSlots {
            step: self.step,
            ..Default::default()
        };
        slots
            .slots
            .insert("accumulator".to_string(), self.accumulator.clone());
        slots.slots.insert("linear".to_string(), self.linear.clone());
        slots
    }

    fn restore_slots(&mut self, mut slots: OptimizerSlots) -> Result<(), OptimizerError> {
        let accumulator = take_slot(&mut slots, "accumulator")?;
        let linear = take_slot(&mut slots, "linear")?;
        if accumulator.len() != linear.len() {
            return Err(OptimizerError::InvalidSlots(format!(
                "accumulator has {} values, linear has {}",
                accumulator.len(),
                linear.len()
            )));
        }
        self.accumulator = accumulator;
        self.linear = linear;
        self.step = slots.step;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ftrl(l1: f32) -> Ftrl {
        Ftrl::new(OptimizerConfig::Ftrl {
            learning_rate: 0.1,
            learning_rate_power: -0.5,
            l1_reg: l1,
            l2_reg: 0.0,
            initial_accumulator_value: 0.1,
        })
        .unwrap()
    }

    #[test]
    fn test_ftrl_first_step_matches_closed_form() {
        let mut opt = ftrl(0.0);
        let mut w = vec![0.0];
        opt.apply_gradients(&mut w, &[1.0]);

        // n: 0.1 -> 1.1, z = 1.0, w = -z * a / sqrt(n)
        let expected = -0.1 / 1.1f32.sqrt();
        assert!((w[0] - expected).abs() < 1e-6);
        assert!((opt.accumulator()[0] - 1.1).abs() < 1e-6);
        assert!((opt.linear()[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ftrl_l1_keeps_weights_at_zero() {
        let mut opt = ftrl(0.5);
        let mut w = vec![0.0, 0.0];
        opt.apply_gradients(&mut w, &[0.3, 2.0]);
        // |z| = 0.3 <= l1 stays zero, |z| = 2.0 > l1 moves
        assert_eq!(w[0], 0.0);
        assert!(w[1] < 0.0);
    }

    #[test]
    fn test_ftrl_zero_gradient_leaves_weight() {
        let mut opt = ftrl(0.0);
        let mut w = vec![0.0, 0.0];
        opt.apply_gradients(&mut w, &[1.0, 1.0]);
        let before = w.clone();
        opt.apply_gradients(&mut w, &[0.0, 1.0]);
        assert_eq!(w[0], before[0]);
        assert_ne!(w[1], before[1]);
    }

    #[test]
    fn test_ftrl_config_mismatch() {
        assert!(matches!(
            Ftrl::new(OptimizerConfig::adam(0.01)),
            Err(OptimizerError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn test_ftrl_slot_restore() {
        let mut a = ftrl(0.0);
        let mut wa = vec![0.0; 3];
        a.apply_gradients(&mut wa, &[0.5, -0.5, 1.0]);

        let mut b = ftrl(0.0);
        b.restore_slots(a.slots()).unwrap();
        let mut wb = wa.clone();
        a.apply_gradients(&mut wa, &[0.1, 0.2, 0.3]);
        b.apply_gradients(&mut wb, &[0.1, 0.2, 0.3]);
        assert_eq!(wa, wb);

        let mut broken = a.slots();
        broken.slots.remove("linear");
        assert!(b.restore_slots(broken).is_err());
    }
}
