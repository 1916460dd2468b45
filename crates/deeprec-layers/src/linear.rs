//! Sparse linear model over multi-hot inputs.

use crate::error::{LayerError, LayerResult};
use crate::tensor::Tensor;

/// Non-zero entries of one example's multi-hot vector, `(index, value)`.
pub type SparseRow = Vec<(usize, f32)>;

/// `logit = sum_i value_i * w[index_i]` against a caller-owned
/// `[num_buckets, 1]` weight column.
#[derive(Debug, Clone, Default)]
pub struct SparseLinear {
    cached_rows: Option<Vec<SparseRow>>,
}

impl SparseLinear {
    /// Creates a layer with no cached input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Weighted sums of shape `[batch, 1]`.
    pub fn forward(&self, weights: &Tensor, rows: &[SparseRow]) -> LayerResult<Tensor> {
        let buckets = weights.numel();
        let w = weights.data();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut acc = 0.0;
            for &(index, value) in row {
                if index >= buckets {
                    return Err(LayerError::InvalidInputDimension {
                        expected: buckets,
                        actual: index + 1,
                    });
                }
                acc += value * w[index];
            }
            out.push(acc);
        }
        Ok(Tensor::from_data(&[rows.len(), 1], out))
    }

    /// Forward pass that remembers the input for [`SparseLinear::backward`].
    pub fn forward_train(&mut self, weights: &Tensor, rows: &[SparseRow]) -> LayerResult<Tensor> {
        let out = self.forward(weights, rows)?;
        self.cached_rows = Some(rows.to_vec());
        Ok(out)
    }

    /// Gradient with respect to the weight column, given `grad` of shape
    /// `[batch, 1]`.
    pub fn backward(&self, grad: &Tensor, num_buckets: usize) -> LayerResult<Tensor> {
        let rows = self.cached_rows.as_ref().ok_or(LayerError::NotInitialized)?;
        if grad.numel() != rows.len() {
            return Err(LayerError::ShapeMismatch {
                expected: vec![rows.len(), 1],
                actual: grad.shape().to_vec(),
            });
        }

        let mut weights_grad = Tensor::zeros(&[num_buckets, 1]);
        let data = weights_grad.data_mut();
        for (row, &g) in rows.iter().zip(grad.data()) {
            for &(index, value) in row {
                data[index] += g * value;
            }
        }
        Ok(weights_grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward() {
        let weights = Tensor::from_data(&[3, 1], vec![0.5, -1.0, 2.0]);
        let layer = SparseLinear::new();
        let out = layer
            .forward(&weights, &[vec![(0, 1.0), (2, 2.0)], vec![]])
            .unwrap();
        assert_eq!(out.shape(), &[2, 1]);
        assert_eq!(out.data(), &[4.5, 0.0]);
    }

    #[test]
    fn test_forward_rejects_out_of_range() {
        let weights = Tensor::zeros(&[3, 1]);
        assert!(SparseLinear::new().forward(&weights, &[vec![(3, 1.0)]]).is_err());
    }

    #[test]
    fn test_backward() {
        let weights = Tensor::zeros(&[3, 1]);
        let mut layer = SparseLinear::new();
        layer
            .forward_train(&weights, &[vec![(0, 1.0), (2, 2.0)], vec![(2, 1.0)]])
            .unwrap();
        let grad = Tensor::from_data(&[2, 1], vec![0.5, -1.0]);
        let g = layer.backward(&grad, 3).unwrap();
        assert_eq!(g.data(), &[0.5, 0.0, 0.0]);
    }
}
