//! Multi-layer perceptron (MLP).
//!
//! An [`MLP`] is a stack of [`Dense`] layers, each followed by an activation.

use serde::{Deserialize, Serialize};

use crate::activation::ReLU;
use crate::dense::Dense;
use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;

/// Activation function types supported by MLP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivationType {
    /// Rectified Linear Unit
    #[default]
    ReLU,
    /// No activation (identity)
    None,
}

/// Configuration for building an MLP.
///
/// ```
/// use deeprec_layers::mlp::{MLPConfig, ActivationType};
///
/// let config = MLPConfig::new(96)
///     .add_layer(64, ActivationType::ReLU)
///     .add_layer(16, ActivationType::ReLU);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.layer_shapes(), vec![(96, 64), (64, 16)]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MLPConfig {
    /// Input dimension
    pub input_dim: usize,
    /// Layer configurations: (output_dim, activation)
    pub layers: Vec<(usize, ActivationType)>,
}

impl MLPConfig {
    /// Creates a new MLP configuration with the specified input dimension.
    pub fn new(input_dim: usize) -> Self {
        Self {
            input_dim,
            layers: Vec::new(),
        }
    }

    /// Adds a layer to the MLP configuration.
    pub fn add_layer(mut self, output_dim: usize, activation: ActivationType) -> Self {
        self.layers.push((output_dim, activation));
        self
    }

    /// `(in, out)` of every dense layer, in order.
    pub fn layer_shapes(&self) -> Vec<(usize, usize)> {
        let mut prev = self.input_dim;
        self.layers
            .iter()
            .map(|&(dim, _)| {
                let shape = (prev, dim);
                prev = dim;
                shape
            })
            .collect()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), LayerError> {
        if self.input_dim == 0 {
            return Err(LayerError::ConfigError {
                message: "Input dimension must be greater than 0".to_string(),
            });
        }
        if self.layers.is_empty() {
            return Err(LayerError::ConfigError {
                message: "MLP must have at least one layer".to_string(),
            });
        }
        for (i, (dim, _)) in self.layers.iter().enumerate() {
            if *dim == 0 {
                return Err(LayerError::ConfigError {
                    message: format!("Layer {} has zero output dimension", i),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum ActivationLayer {
    ReLU(ReLU),
    None,
}

impl ActivationLayer {
    fn from_type(activation: ActivationType) -> Self {
        match activation {
            ActivationType::ReLU => ActivationLayer::ReLU(ReLU::new()),
            ActivationType::None => ActivationLayer::None,
        }
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        match self {
            ActivationLayer::ReLU(a) => a.forward(input),
            ActivationLayer::None => Ok(input.clone()),
        }
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        match self {
            ActivationLayer::ReLU(a) => a.forward_train(input),
            ActivationLayer::None => Ok(input.clone()),
        }
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        match self {
            ActivationLayer::ReLU(a) => a.backward(grad),
            ActivationLayer::None => Ok(grad.clone()),
        }
    }
}

/// A stack of dense layers with activations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLP {
    dense_layers: Vec<Dense>,
    activations: Vec<ActivationLayer>,
    config: MLPConfig,
}

impl MLP {
    /// Assembles an MLP from existing dense layers.
    ///
    /// # Errors
    ///
    /// Returns an error if the layers do not match the configuration.
    pub fn from_dense_layers(config: MLPConfig, dense_layers: Vec<Dense>) -> Result<Self, LayerError> {
        config.validate()?;
        let shapes = config.layer_shapes();
        if shapes.len() != dense_layers.len() {
            return Err(LayerError::ConfigError {
                message: format!(
                    "expected {} dense layers, got {}",
                    shapes.len(),
                    dense_layers.len()
                ),
            });
        }
        for (&(i, o), dense) in shapes.iter().zip(&dense_layers) {
            if dense.in_features() != i || dense.out_features() != o {
                return Err(LayerError::ShapeMismatch {
                    expected: vec![i, o],
                    actual: vec![dense.in_features(), dense.out_features()],
                });
            }
        }

        let activations = config
            .layers
            .iter()
            .map(|&(_, a)| ActivationLayer::from_type(a))
            .collect();
        Ok(Self {
            dense_layers,
            activations,
            config,
        })
    }

    /// Returns the number of layers in the MLP.
    pub fn num_layers(&self) -> usize {
        self.dense_layers.len()
    }

    /// Returns a reference to the dense layers.
    pub fn dense_layers(&self) -> &[Dense] {
        &self.dense_layers
    }

    /// Returns the configuration used to build this MLP.
    pub fn config(&self) -> &MLPConfig {
        &self.config
    }

    /// Returns the output dimension.
    pub fn output_dim(&self) -> usize {
        self.config.layers.last().map(|(d, _)| *d).unwrap_or(0)
    }

    /// Performs forward pass with training mode (caches activations).
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let mut x = input.clone();
        for (dense, activation) in self
            .dense_layers
            .iter_mut()
            .zip(self.activations.iter_mut())
        {
            x = dense.forward_train(&x)?;
            x = activation.forward_train(&x)?;
        }
        Ok(x)
    }
}

impl Layer for MLP {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let mut x = input.clone();
        for (dense, activation) in self.dense_layers.iter().zip(self.activations.iter()) {
            x = dense.forward(&x)?;
            x = activation.forward(&x)?;
        }
        Ok(x)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let mut g = grad.clone();
        for (dense, activation) in self
            .dense_layers
            .iter_mut()
            .zip(self.activations.iter_mut())
            .rev()
        {
            g = activation.backward(&g)?;
            g = dense.backward(&g)?;
        }
        Ok(g)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.dense_layers
            .iter()
            .flat_map(|layer| layer.parameters())
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.dense_layers
            .iter_mut()
            .flat_map(|layer| layer.parameters_mut())
            .collect()
    }

    fn gradients(&self) -> Vec<&Tensor> {
        self.dense_layers
            .iter()
            .flat_map(|layer| layer.gradients())
            .collect()
    }

    fn name(&self) -> &str {
        "MLP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initializer::Initializer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn glorot_mlp(config: MLPConfig, seed: u64) -> MLP {
        let mut rng = StdRng::seed_from_u64(seed);
        let dense = config
            .layer_shapes()
            .into_iter()
            .map(|(i, o)| {
                let kernel = Initializer::GlorotUniform.initialize(&[i, o], &mut rng).unwrap();
                Dense::from_weights(kernel, Tensor::zeros(&[o])).unwrap()
            })
            .collect();
        MLP::from_dense_layers(config, dense).unwrap()
    }

    #[test]
    fn test_mlp_config_invalid() {
        assert!(MLPConfig::new(0).validate().is_err());
        assert!(MLPConfig::new(128).validate().is_err());
        assert!(MLPConfig::new(128)
            .add_layer(0, ActivationType::ReLU)
            .validate()
            .is_err());
    }

    #[test]
    fn test_mlp_forward() {
        let mlp = glorot_mlp(
            MLPConfig::new(10)
                .add_layer(5, ActivationType::ReLU)
                .add_layer(2, ActivationType::None),
            42,
        );

        let output = mlp.forward(&Tensor::full(&[3, 10], 1.0)).unwrap();
        assert_eq!(output.shape(), &[3, 2]);
        assert_eq!(mlp.num_layers(), 2);
        assert_eq!(mlp.output_dim(), 2);
    }

    #[test]
    fn test_mlp_backward_fills_gradients() {
        let mut mlp = glorot_mlp(
            MLPConfig::new(10)
                .add_layer(5, ActivationType::ReLU)
                .add_layer(1, ActivationType::None),
            42,
        );

        mlp.forward_train(&Tensor::full(&[3, 10], 1.0)).unwrap();
        let input_grad = mlp.backward(&Tensor::full(&[3, 1], 1.0)).unwrap();
        assert_eq!(input_grad.shape(), &[3, 10]);
        // kernel + bias per layer
        assert_eq!(mlp.gradients().len(), 4);
        assert_eq!(mlp.parameters().len(), 4);
    }

    #[test]
    fn test_from_dense_layers_checks_shapes() {
        let config = MLPConfig::new(4).add_layer(2, ActivationType::ReLU);
        assert!(MLP::from_dense_layers(config.clone(), vec![Dense::new(3, 2)]).is_err());
        assert!(MLP::from_dense_layers(config.clone(), vec![]).is_err());
        assert!(MLP::from_dense_layers(config, vec![Dense::new(4, 2)]).is_ok());
    }
}
