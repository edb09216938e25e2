//! # gf-irf
//!
//! Instrument response functions and their application to true-sky flux.
//!
//! - [`EffectiveArea`]: collection area vs true energy and offset, and the
//!   exposure maps derived from it
//! - [`PsfTable`] / [`PsfKernel`]: radial PSF tables and the normalized,
//!   truncated convolution kernels built from them
//! - [`EDispKernel`] / [`EDispTable`]: true-to-reconstructed energy
//!   redistribution
//! - [`IrfResponse`]: `EDISP o (PSF * (flux x exposure))` on a dataset geometry
//!
//! Axis names follow one convention: `energy_true` for true energy,
//! `energy` for reconstructed energy.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aeff;
pub mod edisp;
pub mod kernel;
pub mod psf;
pub mod response;

pub use aeff::EffectiveArea;
pub use edisp::{EDispKernel, EDispTable};
pub use kernel::PsfKernel;
pub use psf::PsfTable;
pub use response::IrfResponse;

/// Name of the true-energy axis.
pub const ENERGY_TRUE: &str = "energy_true";

/// Name of the reconstructed-energy axis.
pub const ENERGY: &str = "energy";
