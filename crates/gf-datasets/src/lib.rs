//! # gf-datasets
//!
//! Binned datasets and the Poisson (Cash) likelihood.
//!
//! A [`MapDataset`] holds observed counts, an optional background template,
//! safe and fit masks, and an [`gf_irf::IrfResponse`]. Binding [`gf_models::Models`]
//! creates one [`MapEvaluator`] per source model; predictions are cached on
//! parameter fingerprints so a fit only recomputes what moved.
//! [`Datasets`] adds statistics of several datasets into one joint
//! likelihood and differentiates it for the optimizer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod datasets;
pub mod evaluator;
pub mod fd;
pub mod map_dataset;

pub use config::EvaluationConfig;
pub use datasets::Datasets;
pub use evaluator::{CacheStats, MapEvaluator};
pub use map_dataset::{DatasetInfo, DatasetState, MapDataset, ResidualMethod, TimeInterval};
