//! # gf-inference
//!
//! Fit engine for gammafit.
//!
//! - [`Fit`]: minimize the joint statistic of [`gf_datasets::Datasets`],
//!   estimate the covariance, scan profiles and surfaces, find
//!   profile-likelihood confidence intervals
//! - [`optimizer`]: bounded L-BFGS and Nelder-Mead on top of argmin
//! - [`CancelToken`]: cooperative cancellation of fits and scans

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod config;
pub mod fit;
pub mod objective;
pub mod optimizer;

pub use cancel::CancelToken;
pub use config::{Backend, FitConfig, OptimizerConfig};
pub use fit::{ConfidenceInterval, Covariance, Fit, ProfileScan, SurfaceScan};
pub use objective::DatasetsObjective;
pub use optimizer::{
    LbfgsbOptimizer, Minimizer, NelderMeadOptimizer, ObjectiveFunction, OptimizationResult, minimizer_for,
};
