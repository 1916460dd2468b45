//! Layer trait definition for neural network layers.

use crate::error::LayerError;
use crate::tensor::Tensor;

/// A neural network layer that supports forward and backward propagation.
///
/// Layers own their parameters. A training forward pass caches whatever the
/// backward pass needs; `backward` then fills the parameter gradients and
/// returns the gradient with respect to the input.
///
/// ```
/// use deeprec_layers::dense::Dense;
/// use deeprec_layers::layer::Layer;
/// use deeprec_layers::tensor::Tensor;
///
/// let layer = Dense::new(96, 64);
/// let input = Tensor::zeros(&[32, 96]);
/// let output = layer.forward(&input).unwrap();
/// assert_eq!(output.shape(), &[32, 64]);
/// ```
pub trait Layer: Send + Sync {
    /// Computes the output for `input` without caching anything.
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError>;

    /// Back-propagates `grad` (d loss / d output) through the last training
    /// forward pass and returns d loss / d input.
    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError>;

    /// Learnable parameters, in a stable order.
    fn parameters(&self) -> Vec<&Tensor>;

    /// Mutable learnable parameters, same order as [`Layer::parameters`].
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    /// Gradients from the last backward pass, same order as
    /// [`Layer::parameters`]. Empty before any backward pass.
    fn gradients(&self) -> Vec<&Tensor> {
        Vec::new()
    }

    /// Returns the name of the layer for debugging and logging purposes.
    fn name(&self) -> &str {
        "Layer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler {
        scale: Tensor,
        grad: Option<Tensor>,
    }

    impl Layer for Doubler {
        fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
            Ok(input.scale(self.scale.data()[0]))
        }

        fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
            self.grad = Some(Tensor::from_data(&[1], vec![grad.sum()]));
            Ok(grad.scale(self.scale.data()[0]))
        }

        fn parameters(&self) -> Vec<&Tensor> {
            vec![&self.scale]
        }

        fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
            vec![&mut self.scale]
        }

        fn gradients(&self) -> Vec<&Tensor> {
            self.grad.iter().collect()
        }
    }

    #[test]
    fn test_layer_defaults() {
        let mut layer = Doubler {
            scale: Tensor::from_data(&[1], vec![2.0]),
            grad: None,
        };
        assert_eq!(layer.name(), "Layer");
        assert!(layer.gradients().is_empty());

        let out = layer.forward(&Tensor::full(&[2, 2], 1.0)).unwrap();
        assert_eq!(out.data(), &[2.0; 4]);

        let input_grad = layer.backward(&Tensor::full(&[2, 2], 1.0)).unwrap();
        assert_eq!(input_grad.data(), &[2.0; 4]);
        assert_eq!(layer.gradients()[0].data(), &[4.0]);
        assert_eq!(layer.parameters().len(), layer.parameters_mut().len());
    }
}
