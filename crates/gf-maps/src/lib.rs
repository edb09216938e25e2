//! # gf-maps
//!
//! Gridded data for gammafit.
//!
//! - [`MapAxis`]: non-spatial axes (energy, time, ...) with lin/log/sqrt scales
//! - [`Geometry`]: a spatial footprint ([`WcsFootprint`] or [`HpxFootprint`])
//!   plus extra axes, with coordinate/index transforms shared by both variants
//! - [`Map`] / [`Mask`]: arrays addressed by a shared [`Geometry`]
//! - [`GridInterpolator`]: scaled regular-grid interpolation for IRF tables
//!
//! All spatial coordinates are in degrees. Out-of-footprint lookups return
//! `None` (or NaN in bulk value arrays) rather than an error.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod axis;
pub mod coord;
pub mod geom;
pub mod interp;
pub mod map;
pub mod mask;

pub use axis::{Interp, MapAxis, NodeType};
pub use coord::{Frame, SkyCoord};
pub use geom::hpx::{HpxFootprint, HpxScheme};
pub use geom::wcs::{Projection, WcsFootprint};
pub use geom::{Footprint, Geometry, MapCoord, SpatialGrid};
pub use interp::GridInterpolator;
pub use map::{Extrapolation, Map, ResampleMode};
pub use mask::Mask;
