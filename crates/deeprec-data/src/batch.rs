//! Labeled examples and batches.

use deeprec_core::feature::Features;

/// One example with its binary label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    /// Raw features.
    pub features: Features,
    /// `1.0` for a positive example, `0.0` otherwise.
    pub label: f32,
}

impl LabeledExample {
    /// Creates a labeled example.
    pub fn new(features: Features, label: f32) -> Self {
        Self { features, label }
    }
}

/// A group of examples processed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    features: Vec<Features>,
    labels: Vec<f32>,
}

impl Batch {
    /// Creates a batch from parallel feature and label vectors.
    ///
    /// # Panics
    ///
    /// Panics if the lengths differ.
    pub fn new(features: Vec<Features>, labels: Vec<f32>) -> Self {
        assert_eq!(
            features.len(),
            labels.len(),
            "features and labels must have the same length"
        );
        Self { features, labels }
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Returns true if the batch holds no examples.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Raw features, one per example.
    pub fn features(&self) -> &[Features] {
        &self.features
    }

    /// Labels, one per example.
    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    /// Splits the batch into features and labels.
    pub fn into_parts(self) -> (Vec<Features>, Vec<f32>) {
        (self.features, self.labels)
    }
}

impl FromIterator<LabeledExample> for Batch {
    fn from_iter<I: IntoIterator<Item = LabeledExample>>(iter: I) -> Self {
        let mut batch = Batch::default();
        for example in iter {
            batch.features.push(example.features);
            batch.labels.push(example.label);
        }
        batch
    }
}

/// Stream of batches produced by an input function.
pub type BatchIter = Box<dyn Iterator<Item = Batch> + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_from_examples() {
        let batch: Batch = (0..3)
            .map(|i| LabeledExample::new(Features::new().with("user_id", i as i64), (i % 2) as f32))
            .collect();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.labels(), &[0.0, 1.0, 0.0]);
        let (features, labels) = batch.into_parts();
        assert_eq!(features.len(), labels.len());
    }

    #[test]
    #[should_panic(expected = "same length")]
    fn test_batch_length_mismatch() {
        Batch::new(vec![Features::new()], vec![]);
    }
}
