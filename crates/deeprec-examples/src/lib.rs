//! Example applications for deeprec.
//!
//! - [`wdl_movielens`]: feature columns, crosses, model function and
//!   estimator setup for wide-and-deep ranking on MovieLens.
//!
//! # Running
//!
//! ```bash
//! # MovieLens 1M files (users.dat, movies.dat, ratings.dat)
//! cargo run -p deeprec-examples --bin train_wdl_with_movielens -- \
//!     --data-dir /data/ml-1m
//!
//! # Generated data, no download needed
//! cargo run -p deeprec-examples --bin train_wdl_with_movielens -- \
//!     --synthetic --max-steps 2000
//! ```

pub mod wdl_movielens;

pub use wdl_movielens::{
    build_columns, build_estimator, cross_product_transformation, run, run_config, RunOptions,
    WdlModelFn,
};
