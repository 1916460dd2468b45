//! Input pipeline for deeprec.
//!
//! - [`movielens`]: the MovieLens ranking dataset (file loader and a
//!   synthetic generator) with its vocabularies and cardinalities.
//! - [`input`]: the [`InputFn`] trait and batched iteration over a split.
//! - [`batch`]: labeled examples and batches.
//!
//! # Example
//!
//! ```
//! use deeprec_data::{InputFn, MovielensRanking};
//!
//! let data = MovielensRanking::synthetic(100, 50, 2_000, 42).unwrap();
//! let mut batches = data.training_input_fn(256).batches().unwrap();
//! let batch = batches.next().unwrap();
//! assert_eq!(batch.len(), 256);
//! ```

pub mod batch;
pub mod error;
pub mod input;
pub mod movielens;

pub use batch::{Batch, BatchIter, LabeledExample};
pub use error::{DataError, DataResult};
pub use input::{DatasetInput, InputFn};
pub use movielens::{Movie, MovielensRanking, Rating, User};
