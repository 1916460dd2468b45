//! Grouped training operations.
//!
//! A [`TrainOp`] is what a model function hands back in training mode: one
//! [`OptimizerStep`] per parameter group plus framework update ops. Running
//! it applies every step and then the update ops, so the global step moves
//! by exactly one per run no matter how many groups there are.

use std::collections::BTreeMap;

use deeprec_layers::Tensor;
use deeprec_optimizer::OptimizerConfig;

use crate::estimator::EstimatorResult;
use crate::variables::VariableStore;

/// Gradients by variable name.
pub type Gradients = BTreeMap<String, Tensor>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    IncrementGlobalStep,
}

/// One optimizer applied to a fixed list of variables.
#[derive(Debug, Clone)]
pub struct OptimizerStep {
    config: OptimizerConfig,
    var_list: Vec<String>,
    gradients: Gradients,
}

impl OptimizerStep {
    /// Builds a step that updates only `var_list` with `gradients`.
    ///
    /// Variables in `var_list` without a gradient are left untouched.
    pub fn minimize(
        config: OptimizerConfig,
        gradients: &Gradients,
        var_list: Vec<String>,
    ) -> EstimatorResult<Self> {
        config.validate()?;
        let gradients: Gradients = var_list
            .iter()
            .filter_map(|name| gradients.get(name).map(|g| (name.clone(), g.clone())))
            .collect();
        if gradients.len() < var_list.len() {
            tracing::debug!(
                optimizer = config.name(),
                missing = var_list.len() - gradients.len(),
                "Some variables have no gradient"
            );
        }
        Ok(Self {
            config,
            var_list,
            gradients,
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn var_list(&self) -> &[String] {
        &self.var_list
    }

    fn run(&self, vars: &mut VariableStore) -> EstimatorResult<()> {
        for (name, gradient) in &self.gradients {
            vars.apply_gradients(&self.config, name, gradient)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TrainOp {
    update_ops: Vec<UpdateOp>,
    steps: Vec<OptimizerStep>,
}

impl TrainOp {
    pub fn group(update_ops: Vec<UpdateOp>, steps: Vec<OptimizerStep>) -> Self {
        Self { update_ops, steps }
    }

    pub fn update_ops(&self) -> &[UpdateOp] {
        &self.update_ops
    }

    pub fn steps(&self) -> &[OptimizerStep] {
        &self.steps
    }

    /// Whether some step updates only variables tagged `tag` in `vars`.
    pub fn has_step_for(&self, tag: &str, vars: &VariableStore) -> bool {
        let members = vars.collection(tag);
        self.steps.iter().any(|step| {
            !step.var_list.is_empty() && step.var_list.iter().all(|v| members.contains(v))
        })
    }

    /// Applies all optimizer steps, then the update ops. Returns the global
    /// step afterwards.
    pub fn run(&self, vars: &mut VariableStore) -> EstimatorResult<u64> {
        for step in &self.steps {
            step.run(vars)?;
        }
        for op in &self.update_ops {
            match op {
                UpdateOp::IncrementGlobalStep => {
                    vars.increment_global_step();
                }
            }
        }
        Ok(vars.global_step())
    }
}
