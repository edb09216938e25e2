//! # gf-ad
//!
//! Automatic differentiation (AD) primitives for gammafit.
//!
//! Provides:
//! - **Forward-mode AD** via [`dual::Dual`] numbers (one tangent per pass,
//!   efficient for the handful of spectral parameters a source carries)
//! - [`Scalar`] trait for writing model code once, generic over `f64` and `Dual`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dual;
pub mod scalar;

pub use dual::Dual;
pub use scalar::Scalar;
