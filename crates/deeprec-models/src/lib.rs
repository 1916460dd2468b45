//! Models built on the deeprec layers and variable store.
//!
//! - [`wdl`]: wide-and-deep ranking model. A linear part over indicator
//!   (and crossed indicator) columns memorizes feature co-occurrences, an
//!   MLP over embedding columns generalizes. Wide variables are tagged
//!   `wide` and deep ones `deep` so each part can get its own optimizer.

pub mod wdl;

pub use wdl::{Wdl, WdlForward};
