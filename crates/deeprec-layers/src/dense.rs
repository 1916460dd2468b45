//! Dense (fully connected) layer.
//!
//! [`Dense`] computes `y = xW + b` with `W` of shape `[in_features,
//! out_features]` and `b` of shape `[out_features]`.

use serde::{Deserialize, Serialize};

use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;

/// A dense (fully connected) neural network layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    /// Weight matrix of shape [in_features, out_features]
    weights: Tensor,
    /// Bias vector of shape [out_features]
    bias: Tensor,
    weights_grad: Option<Tensor>,
    bias_grad: Option<Tensor>,
    /// Cached input for backward pass
    #[serde(skip)]
    cached_input: Option<Tensor>,
    in_features: usize,
    out_features: usize,
}

impl Dense {
    /// Creates a layer with zero weights and bias.
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            weights: Tensor::zeros(&[in_features, out_features]),
            bias: Tensor::zeros(&[out_features]),
            weights_grad: None,
            bias_grad: None,
            cached_input: None,
            in_features,
            out_features,
        }
    }

    /// Creates a layer from existing parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the shapes are incompatible
    pub fn from_weights(weights: Tensor, bias: Tensor) -> Result<Self, LayerError> {
        if weights.ndim() != 2 {
            return Err(LayerError::ConfigError {
                message: format!("Weights must be 2D, got {}D", weights.ndim()),
            });
        }
        if bias.ndim() != 1 {
            return Err(LayerError::ConfigError {
                message: format!("Bias must be 1D, got {}D", bias.ndim()),
            });
        }
        if weights.shape()[1] != bias.shape()[0] {
            return Err(LayerError::ShapeMismatch {
                expected: vec![weights.shape()[1]],
                actual: vec![bias.shape()[0]],
            });
        }

        let in_features = weights.shape()[0];
        let out_features = weights.shape()[1];
        Ok(Self {
            weights,
            bias,
            weights_grad: None,
            bias_grad: None,
            cached_input: None,
            in_features,
            out_features,
        })
    }

    /// Returns the input dimension.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Returns the output dimension.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Returns the weight matrix.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// Returns the bias vector.
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Gradient of the weights from the last backward pass.
    pub fn weights_grad(&self) -> Option<&Tensor> {
        self.weights_grad.as_ref()
    }

    /// Gradient of the bias from the last backward pass.
    pub fn bias_grad(&self) -> Option<&Tensor> {
        self.bias_grad.as_ref()
    }

    /// Performs forward pass and caches input for backward pass.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let output = self.forward(input)?;
        self.cached_input = Some(input.clone());
        Ok(output)
    }
}

impl Layer for Dense {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        if input.ndim() != 2 {
            return Err(LayerError::ShapeMismatch {
                expected: vec![0, self.in_features],
                actual: input.shape().to_vec(),
            });
        }
        if input.shape()[1] != self.in_features {
            return Err(LayerError::InvalidInputDimension {
                expected: self.in_features,
                actual: input.shape()[1],
            });
        }
        Ok(input.matmul(&self.weights).add(&self.bias))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let input = self
            .cached_input
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;

        let expected = [input.shape()[0], self.out_features];
        if grad.shape() != expected {
            return Err(LayerError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: grad.shape().to_vec(),
            });
        }

        // dL/dW = x^T @ dL/dy
        self.weights_grad = Some(input.transpose().matmul(grad));
        // dL/db = sum(dL/dy, axis=0)
        self.bias_grad = Some(grad.sum_axis(0));
        // dL/dx = dL/dy @ W^T
        Ok(grad.matmul(&self.weights.transpose()))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weights, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.weights, &mut self.bias]
    }

    fn gradients(&self) -> Vec<&Tensor> {
        self.weights_grad.iter().chain(self.bias_grad.iter()).collect()
    }

    fn name(&self) -> &str {
        "Dense"
    }
}
