//! # gf-core
//!
//! Core types and traits for gammafit.
//!
//! This crate provides:
//! - the error taxonomy shared by every gammafit crate ([`Error`])
//! - the immutable fit snapshot handed to reporting layers ([`FitResult`])
//! - the objective-model trait consumed by the fit engine ([`traits::LikelihoodModel`])
//!
//! Higher-level crates (maps, models, datasets, inference) depend on these
//! definitions, never on each other's concrete error types.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use types::{FitResult, ParameterEstimate};
