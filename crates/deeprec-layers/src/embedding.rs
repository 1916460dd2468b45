//! Pooled embedding lookup.
//!
//! [`EmbeddingBag`] reads rows of an embedding table for every id of an
//! example and reduces them with a [`Combiner`]. The table itself is owned
//! by the caller, so a single table can be shared between lookups and
//! updated in place by an optimizer.

use deeprec_core::feature_column::{Combiner, SparseIds};

use crate::error::{LayerError, LayerResult};
use crate::tensor::Tensor;

/// Pooled lookup into a `[num_rows, dim]` table.
///
/// ```
/// use deeprec_core::feature_column::Combiner;
/// use deeprec_layers::embedding::EmbeddingBag;
/// use deeprec_layers::tensor::Tensor;
///
/// let table = Tensor::from_data(&[3, 2], vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
/// let bag = EmbeddingBag::new(Combiner::Mean);
/// let out = bag.forward(&table, &[vec![0, 2], vec![]]).unwrap();
/// assert_eq!(out.data(), &[2.0, 2.0, 0.0, 0.0]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EmbeddingBag {
    combiner: Combiner,
    cached_ids: Option<Vec<SparseIds>>,
}

impl EmbeddingBag {
    /// Creates a lookup that reduces rows with `combiner`.
    pub fn new(combiner: Combiner) -> Self {
        Self {
            combiner,
            cached_ids: None,
        }
    }

    /// Pooled embeddings of shape `[batch, dim]`. Examples without ids get zeros.
    pub fn forward(&self, table: &Tensor, ids: &[SparseIds]) -> LayerResult<Tensor> {
        if table.ndim() != 2 {
            return Err(LayerError::EmbeddingError {
                message: format!("table must be 2D, got shape {:?}", table.shape()),
            });
        }
        let rows = table.shape()[0];
        let dim = table.shape()[1];

        let mut out = Tensor::zeros(&[ids.len(), dim]);
        for (b, example) in ids.iter().enumerate() {
            let weight = self.combiner.weight(example.len());
            let target = out.row_mut(b);
            for &id in example {
                if id >= rows {
                    return Err(LayerError::EmbeddingError {
                        message: format!("id {id} out of range for table with {rows} rows"),
                    });
                }
                for (o, v) in target.iter_mut().zip(table.row(id)) {
                    *o += weight * v;
                }
            }
        }
        Ok(out)
    }

    /// Forward pass that remembers the ids for [`EmbeddingBag::backward`].
    pub fn forward_train(&mut self, table: &Tensor, ids: &[SparseIds]) -> LayerResult<Tensor> {
        let out = self.forward(table, ids)?;
        self.cached_ids = Some(ids.to_vec());
        Ok(out)
    }

    /// Scatters `grad` (`[batch, dim]`) back onto a zero table of
    /// `num_rows` rows.
    pub fn backward(&self, grad: &Tensor, num_rows: usize) -> LayerResult<Tensor> {
        let ids = self.cached_ids.as_ref().ok_or(LayerError::NotInitialized)?;
        if grad.ndim() != 2 || grad.shape()[0] != ids.len() {
            return Err(LayerError::ShapeMismatch {
                expected: vec![ids.len(), grad.shape().last().copied().unwrap_or(0)],
                actual: grad.shape().to_vec(),
            });
        }
        let dim = grad.shape()[1];

        let mut table_grad = Tensor::zeros(&[num_rows, dim]);
        for (b, example) in ids.iter().enumerate() {
            let weight = self.combiner.weight(example.len());
            let g = grad.row(b);
            for &id in example {
                for (t, v) in table_grad.row_mut(id).iter_mut().zip(g) {
                    *t += weight * v;
                }
            }
        }
        Ok(table_grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Tensor {
        Tensor::from_data(&[4, 2], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0])
    }

    #[test]
    fn test_sum_combiner() {
        let bag = EmbeddingBag::new(Combiner::Sum);
        let out = bag.forward(&table(), &[vec![1, 3]]).unwrap();
        assert_eq!(out.data(), &[8.0, 10.0]);
    }

    #[test]
    fn test_sqrtn_combiner_forward_and_backward() {
        let mut bag = EmbeddingBag::new(Combiner::Sqrtn);
        let ids = vec![vec![0, 1, 2, 3], vec![2]];
        let out = bag.forward_train(&table(), &ids).unwrap();
        // (0 + 2 + 4 + 6) / 2, (1 + 3 + 5 + 7) / 2
        assert_eq!(out.row(0), &[6.0, 8.0]);
        assert_eq!(out.row(1), &[4.0, 5.0]);

        let grad = Tensor::from_data(&[2, 2], vec![1.0, 2.0, 1.0, 1.0]);
        let g = bag.backward(&grad, 4).unwrap();
        assert_eq!(g.row(0), &[0.5, 1.0]);
        assert_eq!(g.row(1), &[0.5, 1.0]);
        assert_eq!(g.row(2), &[1.5, 2.0]);
        assert_eq!(g.row(3), &[0.5, 1.0]);
    }

    #[test]
    fn test_out_of_range_id() {
        let bag = EmbeddingBag::new(Combiner::Mean);
        assert!(bag.forward(&table(), &[vec![4]]).is_err());
    }

    #[test]
    fn test_backward_scatters_mean_weights() {
        let mut bag = EmbeddingBag::new(Combiner::Mean);
        bag.forward_train(&table(), &[vec![0, 2], vec![2]]).unwrap();
        let grad = Tensor::from_data(&[2, 2], vec![1.0, 1.0, 1.0, 1.0]);
        let g = bag.backward(&grad, 4).unwrap();
        assert_eq!(g.shape(), &[4, 2]);
        assert_eq!(g.row(0), &[0.5, 0.5]);
        assert_eq!(g.row(1), &[0.0, 0.0]);
        assert_eq!(g.row(2), &[1.5, 1.5]);
    }

    #[test]
    fn test_backward_requires_forward() {
        let bag = EmbeddingBag::new(Combiner::Mean);
        assert!(bag.backward(&Tensor::zeros(&[1, 2]), 4).is_err());
    }
}
