#![allow(clippy::needless_range_loop)]
//! Dense row-major tensor used by the layers.

use serde::{Deserialize, Serialize};

use crate::error::{LayerError, LayerResult};

/// A multi-dimensional array of `f32` in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a new tensor with the given shape, filled with zeros.
    ///
    /// ```
    /// use deeprec_layers::tensor::Tensor;
    ///
    /// let t = Tensor::zeros(&[2, 3]);
    /// assert_eq!(t.shape(), &[2, 3]);
    /// assert_eq!(t.numel(), 6);
    /// ```
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Creates a tensor filled with `value`.
    pub fn full(shape: &[usize], value: f32) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![value; numel],
        }
    }

    /// Creates a new tensor with the given shape and data.
    ///
    /// # Panics
    ///
    /// Panics if the data length doesn't match the shape
    pub fn from_data(shape: &[usize], data: Vec<f32>) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            numel
        );
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Fallible variant of [`Tensor::from_data`] for externally supplied data.
    pub fn try_from_data(shape: &[usize], data: Vec<f32>) -> LayerResult<Self> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(LayerError::ShapeMismatch {
                expected: shape.to_vec(),
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns a reference to the underlying data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns a mutable reference to the underlying data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor and returns its data.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Row `i` of a 2D tensor.
    pub fn row(&self, i: usize) -> &[f32] {
        let n = self.shape[1];
        &self.data[i * n..(i + 1) * n]
    }

    /// Mutable row `i` of a 2D tensor.
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        let n = self.shape[1];
        &mut self.data[i * n..(i + 1) * n]
    }

    /// Matrix multiplication between two 2D tensors.
    ///
    /// # Panics
    ///
    /// Panics if the inner dimensions don't match
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(
            self.shape[1], other.shape[0],
            "Inner dimensions must match for matmul"
        );

        let m = self.shape[0];
        let k = self.shape[1];
        let n = other.shape[1];

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for l in 0..k {
                let a = self.data[i * k + l];
                if a == 0.0 {
                    continue;
                }
                let row = &other.data[l * n..(l + 1) * n];
                let out = &mut result[i * n..(i + 1) * n];
                for j in 0..n {
                    out[j] += a * row[j];
                }
            }
        }

        Tensor::from_data(&[m, n], result)
    }

    /// Transposes a 2D tensor.
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires 2D tensor");
        let m = self.shape[0];
        let n = self.shape[1];

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                result[j * m + i] = self.data[i * n + j];
            }
        }

        Tensor::from_data(&[n, m], result)
    }

    /// Element-wise addition with broadcasting of a scalar or a row bias.
    pub fn add(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            self.zip_map(other, |a, b| a + b)
        } else if other.numel() == 1 {
            let scalar = other.data[0];
            self.map(|a| a + scalar)
        } else if self.ndim() == 2 && other.ndim() == 1 && self.shape[1] == other.shape[0] {
            let mut data = self.data.clone();
            let n = self.shape[1];
            for i in 0..self.shape[0] {
                for j in 0..n {
                    data[i * n + j] += other.data[j];
                }
            }
            Tensor::from_data(&self.shape, data)
        } else {
            panic!(
                "Cannot broadcast shapes {:?} and {:?}",
                self.shape, other.shape
            );
        }
    }

    /// Scalar multiplication.
    pub fn scale(&self, scalar: f32) -> Tensor {
        self.map(|a| a * scalar)
    }

    /// Sum all elements in the tensor.
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Sum along an axis of a 2D tensor.
    pub fn sum_axis(&self, axis: usize) -> Tensor {
        assert_eq!(self.ndim(), 2, "sum_axis only implemented for 2D tensors");
        let m = self.shape[0];
        let n = self.shape[1];
        if axis == 0 {
            let mut result = vec![0.0; n];
            for i in 0..m {
                for j in 0..n {
                    result[j] += self.data[i * n + j];
                }
            }
            Tensor::from_data(&[n], result)
        } else {
            let result: Vec<f32> = (0..m).map(|i| self.row(i).iter().sum()).collect();
            Tensor::from_data(&[m], result)
        }
    }

    /// Applies a function element-wise.
    pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> Tensor {
        let data: Vec<f32> = self.data.iter().map(|&x| f(x)).collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Combines two equally shaped tensors element-wise.
    pub fn zip_map<F: Fn(f32, f32) -> f32>(&self, other: &Tensor, f: F) -> Tensor {
        let data: Vec<f32> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Returns a tensor with the same data and a new shape.
    pub fn reshape(&self, shape: &[usize]) -> LayerResult<Tensor> {
        Tensor::try_from_data(shape, self.data.clone())
    }

    /// Concatenates 2D tensors with equal row counts along the columns.
    pub fn concat_columns(parts: &[Tensor]) -> LayerResult<Tensor> {
        let rows = parts.first().map(|t| t.shape[0]).unwrap_or(0);
        let mut width = 0;
        for part in parts {
            if part.ndim() != 2 || part.shape[0] != rows {
                return Err(LayerError::ShapeMismatch {
                    expected: vec![rows, part.shape.last().copied().unwrap_or(0)],
                    actual: part.shape.clone(),
                });
            }
            width += part.shape[1];
        }

        let mut data = Vec::with_capacity(rows * width);
        for i in 0..rows {
            for part in parts {
                data.extend_from_slice(part.row(i));
            }
        }
        Ok(Tensor::from_data(&[rows, width], data))
    }

    /// Splits a 2D tensor into column blocks of the given widths.
    pub fn split_columns(&self, widths: &[usize]) -> LayerResult<Vec<Tensor>> {
        let total: usize = widths.iter().sum();
        if self.ndim() != 2 || self.shape[1] != total {
            return Err(LayerError::ShapeMismatch {
                expected: vec![self.shape[0], total],
                actual: self.shape.clone(),
            });
        }

        let rows = self.shape[0];
        let mut parts: Vec<Vec<f32>> = widths
            .iter()
            .map(|w| Vec::with_capacity(rows * w))
            .collect();
        for i in 0..rows {
            let mut offset = 0;
            let row = self.row(i);
            for (part, &w) in parts.iter_mut().zip(widths) {
                part.extend_from_slice(&row[offset..offset + w]);
                offset += w;
            }
        }
        Ok(parts
            .into_iter()
            .zip(widths)
            .map(|(data, &w)| Tensor::from_data(&[rows, w], data))
            .collect())
    }
}

impl std::ops::Add for &Tensor {
    type Output = Tensor;

    fn add(self, other: &Tensor) -> Tensor {
        Tensor::add(self, other)
    }
}

impl std::ops::Mul<f32> for &Tensor {
    type Output = Tensor;

    fn mul(self, scalar: f32) -> Tensor {
        self.scale(scalar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul() {
        let a = Tensor::from_data(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = Tensor::from_data(&[3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let c = a.matmul(&b);
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.data(), &[22.0, 28.0, 49.0, 64.0]);
    }

    #[test]
    fn test_transpose() {
        let a = Tensor::from_data(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let t = a.transpose();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_add_bias_broadcast() {
        let a = Tensor::zeros(&[2, 3]);
        let bias = Tensor::from_data(&[3], vec![1.0, 2.0, 3.0]);
        let c = a.add(&bias);
        assert_eq!(c.data(), &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_sum_axis() {
        let a = Tensor::from_data(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(a.sum_axis(0).data(), &[5.0, 7.0, 9.0]);
        assert_eq!(a.sum_axis(1).data(), &[6.0, 15.0]);
        assert_eq!(a.sum(), 21.0);
    }

    #[test]
    fn test_try_from_data_rejects_bad_length() {
        assert!(Tensor::try_from_data(&[2, 2], vec![1.0; 3]).is_err());
        assert!(Tensor::full(&[4], 1.0).reshape(&[2, 2]).is_ok());
    }

    #[test]
    fn test_concat_and_split_columns() {
        let a = Tensor::from_data(&[2, 1], vec![1.0, 2.0]);
        let b = Tensor::from_data(&[2, 2], vec![3.0, 4.0, 5.0, 6.0]);
        let c = Tensor::concat_columns(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(c.data(), &[1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);

        let parts = c.split_columns(&[1, 2]).unwrap();
        assert_eq!(parts[0], a);
        assert_eq!(parts[1], b);
        assert!(c.split_columns(&[1, 1]).is_err());
    }
}
