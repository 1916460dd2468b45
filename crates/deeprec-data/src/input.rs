//! Input functions: batched iteration over an in-memory split.
//!
//! A training input repeats forever and reshuffles every epoch from a seeded
//! RNG; a testing input makes exactly one ordered pass.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::batch::{Batch, BatchIter, LabeledExample};
use crate::error::{DataError, DataResult};

/// Something that can produce a fresh stream of batches.
pub trait InputFn: Send + Sync {
    /// Starts a new pass over the input.
    fn batches(&self) -> DataResult<BatchIter>;
}

impl<F> InputFn for F
where
    F: Fn() -> DataResult<BatchIter> + Send + Sync,
{
    fn batches(&self) -> DataResult<BatchIter> {
        self()
    }
}

/// Batched view of a shared example list.
#[derive(Debug, Clone)]
pub struct DatasetInput {
    examples: Arc<Vec<LabeledExample>>,
    batch_size: usize,
    repeat: bool,
    shuffle_seed: Option<u64>,
}

impl DatasetInput {
    /// Single ordered pass.
    pub fn once(examples: Arc<Vec<LabeledExample>>, batch_size: usize) -> Self {
        Self {
            examples,
            batch_size,
            repeat: false,
            shuffle_seed: None,
        }
    }

    /// Endless repetition, reshuffled every epoch.
    pub fn repeated(examples: Arc<Vec<LabeledExample>>, batch_size: usize, seed: u64) -> Self {
        Self {
            examples,
            batch_size,
            repeat: true,
            shuffle_seed: Some(seed),
        }
    }

    /// Number of examples in one epoch.
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Returns true if there are no examples.
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

impl InputFn for DatasetInput {
    fn batches(&self) -> DataResult<BatchIter> {
        if self.batch_size == 0 {
            return Err(DataError::InvalidConfig("batch_size must be positive".into()));
        }
        if self.repeat && self.examples.is_empty() {
            return Err(DataError::InvalidConfig(
                "cannot repeat an empty dataset".into(),
            ));
        }
        Ok(Box::new(BatchStream {
            examples: Arc::clone(&self.examples),
            order: Vec::new(),
            cursor: 0,
            batch_size: self.batch_size,
            repeat: self.repeat,
            rng: self.shuffle_seed.map(StdRng::seed_from_u64),
            epoch: 0,
        }))
    }
}

struct BatchStream {
    examples: Arc<Vec<LabeledExample>>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    repeat: bool,
    rng: Option<StdRng>,
    epoch: u64,
}

impl BatchStream {
    fn start_epoch(&mut self) {
        self.order = (0..self.examples.len()).collect();
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
        self.cursor = 0;
        self.epoch += 1;
    }
}

impl Iterator for BatchStream {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.epoch == 0 || (self.cursor >= self.order.len() && self.repeat) {
            self.start_epoch();
        }
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.order[self.cursor..end]
            .iter()
            .map(|&i| self.examples[i].clone())
            .collect();
        self.cursor = end;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deeprec_core::feature::Features;

    fn examples(n: usize) -> Arc<Vec<LabeledExample>> {
        Arc::new(
            (0..n)
                .map(|i| LabeledExample::new(Features::new().with("user_id", i as i64), 0.0))
                .collect(),
        )
    }

    #[test]
    fn test_once_is_single_ordered_pass() {
        let input = DatasetInput::once(examples(10), 4);
        let sizes: Vec<usize> = input.batches().unwrap().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);

        let first = input.batches().unwrap().next().unwrap();
        assert_eq!(
            first.features()[0].get("user_id"),
            Some(&deeprec_core::FeatureValue::Int(0))
        );
    }

    #[test]
    fn test_repeated_never_ends() {
        let input = DatasetInput::repeated(examples(5), 2, 42);
        let total: usize = input.batches().unwrap().take(20).map(|b| b.len()).sum();
        // 3 batches per epoch: 2 + 2 + 1
        assert!(total > 5 * 6);
    }

    #[test]
    fn test_repeated_is_seeded() {
        let a = DatasetInput::repeated(examples(50), 8, 42);
        let b = DatasetInput::repeated(examples(50), 8, 42);
        let xa: Vec<Batch> = a.batches().unwrap().take(10).collect();
        let xb: Vec<Batch> = b.batches().unwrap().take(10).collect();
        assert_eq!(xa, xb);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(DatasetInput::once(examples(3), 0).batches().is_err());
        assert!(DatasetInput::repeated(examples(0), 2, 1).batches().is_err());
        assert_eq!(DatasetInput::once(examples(0), 2).batches().unwrap().count(), 0);
    }

    #[test]
    fn test_closure_input_fn() {
        let input = || -> DataResult<BatchIter> { Ok(Box::new(std::iter::empty())) };
        assert_eq!(input.batches().unwrap().count(), 0);
    }
}
