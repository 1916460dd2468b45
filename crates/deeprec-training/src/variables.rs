//! Named variables with collection tags and per-optimizer slot state.
//!
//! Variables are addressed by `scope/.../leaf` names. Each carries a set of
//! collection tags (see [`deeprec_core::graph_keys`]); optimizers select
//! their variables by tag. Optimizer instances are kept per
//! `(optimizer, variable)` pair so their accumulators and moments survive
//! across steps and are saved with checkpoints.

use std::collections::{BTreeMap, BTreeSet};

use deeprec_checkpoint::{ModelState, SlotState};
use deeprec_core::feature_column::fingerprint;
use deeprec_core::graph_keys::GLOBAL_VARIABLES;
use deeprec_layers::{Initializer, Tensor};
use deeprec_optimizer::{create_optimizer, OptimizerConfig, OptimizerDyn, OptimizerSlots};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::estimator::{EstimatorError, EstimatorResult};

#[derive(Debug, Clone)]
pub struct Variable {
    value: Tensor,
    collections: BTreeSet<String>,
}

impl Variable {
    pub fn value(&self) -> &Tensor {
        &self.value
    }

    pub fn collections(&self) -> &BTreeSet<String> {
        &self.collections
    }

    pub fn in_collection(&self, tag: &str) -> bool {
        self.collections.contains(tag)
    }
}

/// Owner of all model variables and optimizer slots of one session.
pub struct VariableStore {
    seed: u64,
    global_step: u64,
    variables: BTreeMap<String, Variable>,
    /// Live optimizer instances keyed by `"{optimizer}/{variable}"`.
    optimizers: BTreeMap<String, Box<dyn OptimizerDyn>>,
    /// Slots read from a checkpoint, applied when the optimizer is first used.
    pending_slots: BTreeMap<String, OptimizerSlots>,
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableStore")
            .field("seed", &self.seed)
            .field("global_step", &self.global_step)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("optimizers", &self.optimizers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl VariableStore {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            global_step: 0,
            variables: BTreeMap::new(),
            optimizers: BTreeMap::new(),
            pending_slots: BTreeMap::new(),
        }
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn increment_global_step(&mut self) -> u64 {
        self.global_step += 1;
        self.global_step
    }

    /// Returns the variable `name`, creating it on first use.
    ///
    /// The initial value depends only on the store seed and the name, so
    /// creation order does not matter. `GLOBAL_VARIABLES` is always added to
    /// the tags.
    ///
    /// # Errors
    ///
    /// Fails if the variable exists with a different shape.
    pub fn get_or_create<I, S>(
        &mut self,
        name: &str,
        shape: &[usize],
        initializer: &Initializer,
        collections: I,
    ) -> EstimatorResult<&Tensor>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.variables.contains_key(name) {
            let mut rng = StdRng::seed_from_u64(self.variable_seed(name));
            let value = initializer.initialize(shape, &mut rng)?;
            let mut tags: BTreeSet<String> = collections.into_iter().map(Into::into).collect();
            tags.insert(GLOBAL_VARIABLES.to_string());
            tracing::debug!(name, ?shape, tags = ?tags, "Created variable");
            self.variables.insert(
                name.to_string(),
                Variable {
                    value,
                    collections: tags,
                },
            );
        }
        let var = self
            .variables
            .get(name)
            .ok_or_else(|| EstimatorError::UnknownVariable(name.to_string()))?;
        if var.value.shape() != shape {
            return Err(EstimatorError::VariableShape {
                name: name.to_string(),
                expected: shape.to_vec(),
                actual: var.value.shape().to_vec(),
            });
        }
        Ok(&var.value)
    }

    fn variable_seed(&self, name: &str) -> u64 {
        self.seed ^ (u64::from(fingerprint(name)) << 16)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.variables.get(name).map(|v| &v.value)
    }

    /// Like [`VariableStore::get`] but fails for unknown names.
    pub fn value(&self, name: &str) -> EstimatorResult<&Tensor> {
        self.get(name)
            .ok_or_else(|| EstimatorError::UnknownVariable(name.to_string()))
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Sorted names of the variables tagged `tag`.
    pub fn collection(&self, tag: &str) -> Vec<String> {
        self.variables
            .iter()
            .filter(|(_, v)| v.in_collection(tag))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Applies one optimizer update to `name`.
    ///
    /// The optimizer instance for `(config, name)` is created on first use
    /// and restored from checkpointed slots if there are any.
    pub fn apply_gradients(
        &mut self,
        config: &OptimizerConfig,
        name: &str,
        gradient: &Tensor,
    ) -> EstimatorResult<()> {
        let var = self
            .variables
            .get_mut(name)
            .ok_or_else(|| EstimatorError::UnknownVariable(name.to_string()))?;
        if gradient.shape() != var.value.shape() {
            return Err(EstimatorError::VariableShape {
                name: name.to_string(),
                expected: var.value.shape().to_vec(),
                actual: gradient.shape().to_vec(),
            });
        }

        let key = slot_key(config.name(), name);
        let optimizer = match self.optimizers.entry(key) {
            std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::btree_map::Entry::Vacant(entry) => {
                let mut optimizer = create_optimizer(config.clone())?;
                if let Some(slots) = self.pending_slots.remove(entry.key()) {
                    optimizer.restore_slots(slots)?;
                }
                entry.insert(optimizer)
            }
        };
        if optimizer.config() != config {
            return Err(EstimatorError::Model(format!(
                "optimizer for {name} changed configuration between steps"
            )));
        }
        optimizer.apply_gradients(var.value.data_mut(), gradient.data());
        Ok(())
    }

    /// Snapshot of every variable, its tags, the optimizer slots and the
    /// global step.
    pub fn to_model_state(&self) -> ModelState {
        let mut state = ModelState::new(self.global_step);
        for (name, var) in &self.variables {
            state.add_variable(
                name.clone(),
                var.value.shape().to_vec(),
                var.value.data().to_vec(),
                var.collections.iter().cloned(),
            );
        }
        for (key, slots) in &self.pending_slots {
            state.optimizer_slots.insert(key.clone(), to_slot_state(slots.clone()));
        }
        for (key, optimizer) in &self.optimizers {
            state
                .optimizer_slots
                .insert(key.clone(), to_slot_state(optimizer.slots()));
        }
        state
    }

    /// Replaces the contents of the store with `state`.
    pub fn restore(&mut self, state: &ModelState) -> EstimatorResult<()> {
        state.validate()?;
        let mut variables = BTreeMap::new();
        for (name, var) in &state.variables {
            let value = Tensor::try_from_data(&var.shape, var.data.clone())?;
            variables.insert(
                name.clone(),
                Variable {
                    value,
                    collections: var.collections.iter().cloned().collect(),
                },
            );
        }
        self.variables = variables;
        self.optimizers.clear();
        self.pending_slots = state
            .optimizer_slots
            .iter()
            .map(|(key, slots)| {
                (
                    key.clone(),
                    OptimizerSlots {
                        step: slots.step,
                        slots: slots.slots.clone(),
                    },
                )
            })
            .collect();
        self.global_step = state.global_step;
        tracing::debug!(
            global_step = self.global_step,
            variables = self.variables.len(),
            slots = self.pending_slots.len(),
            "Restored variable store"
        );
        Ok(())
    }
}

fn slot_key(optimizer: &str, variable: &str) -> String {
    format!("{optimizer}/{variable}")
}

fn to_slot_state(slots: OptimizerSlots) -> SlotState {
    SlotState {
        step: slots.step,
        slots: slots.slots,
    }
}
