//! # gf-models
//!
//! Parametric sky models for gammafit.
//!
//! A [`SkyModel`] factorizes into a spectral, a spatial and an optional
//! temporal component. Every component exposes its [`Parameter`]s, which
//! are shared handles: the fit engine writes one value and every dataset
//! that uses the model sees it. [`Models`] collects source and
//! [`FoVBackgroundModel`]s under unique names and ties parameters together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod models;
pub mod parameter;
pub mod parameters;
pub mod sky_model;
pub mod spatial;
pub mod spec;
pub mod spectral;
pub mod temporal;

pub use models::Models;
pub use parameter::Parameter;
pub use parameters::Parameters;
pub use sky_model::{FoVBackgroundModel, SkyModel};
pub use spatial::{DiskSpatial, GaussianSpatial, PointSpatial, SpatialModel, TemplateSpatial};
pub use spec::{ModelsSpec, SkyModelSpec};
pub use spectral::{
    DEFAULT_INTEGRAL_STEPS, ExpCutoffPowerLaw, LogParabola, PowerLaw, PowerLawNorm, SpectralModel,
    TemplateSpectral,
};
pub use temporal::TemporalModel;
