//! JSON model specifications.
//!
//! Every spec builds its model from the defaults of the corresponding type
//! and then applies the listed parameter overrides by name, so a spec only
//! mentions what differs from the defaults.
//!
//! ```json
//! {
//!   "models": [{
//!     "name": "crab",
//!     "spectral": {"type": "PowerLaw", "parameters": [{"name": "index", "value": 2.6}]},
//!     "spatial": {"type": "Point", "frame": "icrs",
//!                 "parameters": [{"name": "lon_0", "value": 83.63}, {"name": "lat_0", "value": 22.01}]}
//!   }],
//!   "backgrounds": [{"dataset_name": "obs-1"}]
//! }
//! ```

// Field names mirror the JSON keys.
#![allow(missing_docs)]

use gf_core::{Error, Result};
use gf_maps::Frame;
use serde::Deserialize;

use crate::models::Models;
use crate::parameter::Parameter;
use crate::parameters::Parameters;
use crate::sky_model::{FoVBackgroundModel, SkyModel};
use crate::spatial::{DiskSpatial, GaussianSpatial, PointSpatial, SpatialModel};
use crate::spectral::{ExpCutoffPowerLaw, LogParabola, PowerLaw, PowerLawNorm, SpectralModel};
use crate::temporal::TemporalModel;

/// Override of one parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub frozen: Option<bool>,
}

impl ParameterSpec {
    fn apply(&self, p: &Parameter) -> Result<()> {
        let (min, max) = (self.min.unwrap_or(p.min()), self.max.unwrap_or(p.max()));
        if let Some(v) = self.value {
            p.set_bounds(f64::NEG_INFINITY, f64::INFINITY)?;
            p.set_value(v)?;
            p.autoscale();
        }
        p.set_bounds(min, max)?;
        match self.frozen {
            Some(true) => p.freeze(),
            Some(false) => p.unfreeze(),
            None => {}
        }
        Ok(())
    }
}

fn apply_all(kind: &str, params: &Parameters, specs: &[ParameterSpec]) -> Result<()> {
    for s in specs {
        let p = params
            .get(&s.name)
            .ok_or_else(|| Error::Validation(format!("{} has no parameter '{}'", kind, s.name)))?;
        s.apply(p)?;
    }
    Ok(())
}

/// Spectral model specification.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SpectralSpec {
    PowerLaw {
        #[serde(default)]
        parameters: Vec<ParameterSpec>,
    },
    ExpCutoffPowerLaw {
        #[serde(default)]
        parameters: Vec<ParameterSpec>,
    },
    LogParabola {
        #[serde(default)]
        parameters: Vec<ParameterSpec>,
    },
    PowerLawNorm {
        #[serde(default)]
        parameters: Vec<ParameterSpec>,
    },
}

impl SpectralSpec {
    /// Build the model.
    pub fn build(&self) -> Result<SpectralModel> {
        let (model, specs): (SpectralModel, _) = match self {
            SpectralSpec::PowerLaw { parameters } => (PowerLaw::default().into(), parameters),
            SpectralSpec::ExpCutoffPowerLaw { parameters } => (ExpCutoffPowerLaw::new(1.5, 1e-12, 1.0, 10.0)?.into(), parameters),
            SpectralSpec::LogParabola { parameters } => (LogParabola::default().into(), parameters),
            SpectralSpec::PowerLawNorm { parameters } => (PowerLawNorm::default().into(), parameters),
        };
        apply_all(model.tag(), &model.parameters(), specs)?;
        model.check_domain(&model.parameters().values())?;
        Ok(model)
    }
}

/// Spatial model specification.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SpatialSpec {
    Point {
        #[serde(default)]
        frame: Frame,
        #[serde(default)]
        parameters: Vec<ParameterSpec>,
    },
    Gaussian {
        #[serde(default)]
        frame: Frame,
        #[serde(default)]
        parameters: Vec<ParameterSpec>,
    },
    Disk {
        #[serde(default)]
        frame: Frame,
        #[serde(default)]
        parameters: Vec<ParameterSpec>,
    },
}

impl SpatialSpec {
    /// Build the model.
    pub fn build(&self) -> Result<SpatialModel> {
        let (model, specs): (SpatialModel, _) = match self {
            SpatialSpec::Point { frame, parameters } => (PointSpatial::new(0.0, 0.0, *frame)?.into(), parameters),
            SpatialSpec::Gaussian { frame, parameters } => {
                (GaussianSpatial::new(0.0, 0.0, 0.1, *frame)?.into(), parameters)
            }
            SpatialSpec::Disk { frame, parameters } => (DiskSpatial::new(0.0, 0.0, 0.1, *frame)?.into(), parameters),
        };
        apply_all(model.tag(), &model.parameters(), specs)?;
        Ok(model)
    }
}

/// Temporal model specification.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum TemporalSpec {
    Constant,
    Linear {
        #[serde(default)]
        parameters: Vec<ParameterSpec>,
    },
    ExpDecay {
        #[serde(default)]
        parameters: Vec<ParameterSpec>,
    },
    Gaussian {
        #[serde(default)]
        parameters: Vec<ParameterSpec>,
    },
}

impl TemporalSpec {
    /// Build the model.
    pub fn build(&self) -> Result<TemporalModel> {
        let (model, specs) = match self {
            TemporalSpec::Constant => return Ok(TemporalModel::Constant),
            TemporalSpec::Linear { parameters } => (TemporalModel::linear(1.0, 0.0, 0.0), parameters),
            TemporalSpec::ExpDecay { parameters } => (TemporalModel::exp_decay(1.0, 0.0), parameters),
            TemporalSpec::Gaussian { parameters } => (TemporalModel::gaussian(0.0, 1.0), parameters),
        };
        apply_all(model.tag(), &model.parameters(), specs)?;
        Ok(model)
    }
}

/// Source model specification.
#[derive(Debug, Clone, Deserialize)]
pub struct SkyModelSpec {
    pub name: String,
    pub spectral: SpectralSpec,
    pub spatial: SpatialSpec,
    #[serde(default)]
    pub temporal: Option<TemporalSpec>,
    #[serde(default)]
    pub datasets_names: Option<Vec<String>>,
}

impl SkyModelSpec {
    /// Build the model.
    pub fn build(&self) -> Result<SkyModel> {
        let mut m = SkyModel::new(&self.name, self.spectral.build()?, self.spatial.build()?);
        if let Some(t) = &self.temporal {
            m = m.with_temporal(t.build()?);
        }
        if let Some(names) = &self.datasets_names {
            m = m.with_datasets_names(names.clone());
        }
        Ok(m)
    }
}

/// Background model specification.
#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundSpec {
    pub dataset_name: String,
    #[serde(default)]
    pub spectral: Option<SpectralSpec>,
}

/// `model.parameter` mirrors `target_model.target_parameter`.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkSpec {
    pub model: String,
    pub parameter: String,
    pub target_model: String,
    pub target_parameter: String,
}

/// Full model configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsSpec {
    #[serde(default)]
    pub models: Vec<SkyModelSpec>,
    #[serde(default)]
    pub backgrounds: Vec<BackgroundSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

impl ModelsSpec {
    /// Parse from JSON text.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Build every model, then apply the links.
    pub fn build(&self) -> Result<Models> {
        let mut out = Models::new();
        for m in &self.models {
            out.push(m.build()?)?;
        }
        for b in &self.backgrounds {
            let mut bkg = FoVBackgroundModel::new(&b.dataset_name);
            if let Some(s) = &b.spectral {
                bkg = bkg.with_spectral(s.build()?);
            }
            out.push_background(bkg)?;
        }
        for l in &self.links {
            out.link(&l.model, &l.parameter, &l.target_model, &l.target_parameter)?;
        }
        log::debug!("built {} models from spec", out.len());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_overrides_applied() {
        let spec: SpectralSpec = serde_json::from_str(
            r#"{"type": "PowerLaw", "parameters": [{"name": "index", "value": 2.6, "min": 1.0, "max": 4.0}, {"name": "amplitude", "value": 3e-11}]}"#,
        )
        .unwrap();
        let m = spec.build().unwrap();
        let p = m.parameters();
        assert_eq!(p.get("index").unwrap().value(), 2.6);
        assert_eq!(p.get("index").unwrap().max(), 4.0);
        assert_relative_eq!(p.get("amplitude").unwrap().scale(), 1e-11);
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let spec: SpatialSpec =
            serde_json::from_str(r#"{"type": "Gaussian", "parameters": [{"name": "radius", "value": 0.2}]}"#).unwrap();
        assert!(matches!(spec.build(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_domain_checked_at_build() {
        let spec: SpectralSpec = serde_json::from_str(
            r#"{"type": "ExpCutoffPowerLaw", "parameters": [{"name": "e_cutoff", "value": -1.0}]}"#,
        )
        .unwrap();
        assert!(matches!(spec.build(), Err(Error::ParameterDomain(_))));
    }

    #[test]
    fn test_bad_json_is_error() {
        assert!(matches!(ModelsSpec::from_json_str("{\"models\": 3}"), Err(Error::Json(_))));
    }
}
