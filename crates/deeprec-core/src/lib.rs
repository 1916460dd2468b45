//! Core feature types for deeprec.
//!
//! This crate holds the pieces every other deeprec crate agrees on:
//!
//! - [`feature`]: raw feature records as produced by input pipelines.
//! - [`feature_column`]: declarative feature columns (hash buckets,
//!   vocabulary lists, crosses, indicators, embeddings) and the stable
//!   fingerprint used for hashing.
//! - [`graph_keys`]: collection names used to tag variables.
//! - [`error`]: the crate error type.
//!
//! # Example
//!
//! ```
//! use deeprec_core::feature::Features;
//! use deeprec_core::feature_column::{CategoricalColumn, CrossedColumn};
//!
//! let gender = CategoricalColumn::vocabulary_list("user_gender", ["F", "M"]);
//! let age = CategoricalColumn::vocabulary_list("user_age", [1, 18, 25, 35, 45, 50, 56]);
//! let cross = CrossedColumn::new([gender, age], 14);
//!
//! let record = Features::new().with("user_gender", "F").with("user_age", 35i64);
//! let ids = cross.ids(&record).unwrap();
//! assert!(ids[0] < 14);
//! ```

pub mod error;
pub mod feature;
pub mod feature_column;
pub mod graph_keys;

pub use error::{CoreError, Result};
pub use feature::{FeatureValue, Features};
pub use feature_column::{
    fingerprint, CategoricalColumn, Combiner, CrossKey, CrossedColumn, EmbeddingColumn,
    FeatureColumn, IndicatorColumn, SparseColumn, SparseIds,
};
