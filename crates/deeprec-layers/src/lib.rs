//! Neural network layers for deeprec.
//!
//! - **Tensor**: a small row-major `f32` array with the ops the layers need
//! - **Dense / MLP**: fully connected layers with backpropagation
//! - **Activations**: ReLU, plus a stable scalar `sigmoid`
//! - **Embeddings**: pooled lookups into caller-owned tables
//! - **Sparse linear**: weighted sums over multi-hot inputs
//! - **Initializers**: seeded weight initialization
//!
//! # Quick Start
//!
//! ```
//! use deeprec_layers::prelude::*;
//!
//! let config = MLPConfig::new(96)
//!     .add_layer(64, ActivationType::ReLU)
//!     .add_layer(16, ActivationType::ReLU);
//! let mut mlp =
//!     MLP::from_dense_layers(config, vec![Dense::new(96, 64), Dense::new(64, 16)]).unwrap();
//!
//! let input = Tensor::full(&[32, 96], 1.0);
//! let output = mlp.forward_train(&input).unwrap();
//! assert_eq!(output.shape(), &[32, 16]);
//! mlp.backward(&Tensor::full(&[32, 16], 1.0)).unwrap();
//! ```

#![warn(missing_docs)]

pub mod activation;
pub mod dense;
pub mod embedding;
pub mod error;
pub mod initializer;
pub mod layer;
pub mod linear;
pub mod mlp;
pub mod tensor;

pub use activation::{sigmoid, ReLU};
pub use dense::Dense;
pub use embedding::EmbeddingBag;
pub use error::{LayerError, LayerResult};
pub use initializer::Initializer;
pub use layer::Layer;
pub use linear::{SparseLinear, SparseRow};
pub use mlp::{ActivationType, MLPConfig, MLP};
pub use tensor::Tensor;

/// Commonly used items.
pub mod prelude {
    pub use crate::activation::ReLU;
    pub use crate::dense::Dense;
    pub use crate::embedding::EmbeddingBag;
    pub use crate::error::{LayerError, LayerResult};
    pub use crate::initializer::Initializer;
    pub use crate::layer::Layer;
    pub use crate::linear::SparseLinear;
    pub use crate::mlp::{ActivationType, MLPConfig, MLP};
    pub use crate::tensor::Tensor;
}
