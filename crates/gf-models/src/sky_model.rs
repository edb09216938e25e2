//! Factorized source models and background normalization models.

use std::sync::Arc;

use gf_core::{Error, Result};
use gf_maps::{Geometry, Map, SkyCoord};

use crate::parameters::Parameters;
use crate::spatial::SpatialModel;
use crate::spectral::{PowerLawNorm, SpectralModel};
use crate::temporal::TemporalModel;

/// Name of the true-energy axis a flux cube must carry.
const ENERGY_TRUE: &str = "energy_true";

/// Source model `spatial(lon, lat) x spectral(E) x temporal(t)`.
#[derive(Debug, Clone)]
pub struct SkyModel {
    name: String,
    /// Spectral component.
    pub spectral: SpectralModel,
    /// Spatial component.
    pub spatial: SpatialModel,
    /// Optional light curve; absent means constant.
    pub temporal: Option<TemporalModel>,
    datasets_names: Option<Vec<String>>,
}

impl SkyModel {
    /// Model called `name`.
    pub fn new(name: &str, spectral: impl Into<SpectralModel>, spatial: impl Into<SpatialModel>) -> Self {
        Self {
            name: name.to_string(),
            spectral: spectral.into(),
            spatial: spatial.into(),
            temporal: None,
            datasets_names: None,
        }
    }

    /// Builder: attach a light curve.
    pub fn with_temporal(mut self, temporal: TemporalModel) -> Self {
        self.temporal = Some(temporal);
        self
    }

    /// Builder: restrict the model to the named datasets.
    pub fn with_datasets_names(mut self, names: Vec<String>) -> Self {
        self.datasets_names = Some(names);
        self
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Datasets the model contributes to (`None` = all).
    pub fn datasets_names(&self) -> Option<&[String]> {
        self.datasets_names.as_deref()
    }

    /// Whether the model contributes to `dataset`.
    pub fn applies_to(&self, dataset: &str) -> bool {
        self.datasets_names.as_ref().is_none_or(|names| names.iter().any(|n| n == dataset))
    }

    /// Spectral, then spatial, then temporal parameters.
    pub fn parameters(&self) -> Parameters {
        let mut out = self.spectral.parameters();
        out.extend(self.spatial.parameters().iter().cloned());
        if let Some(t) = &self.temporal {
            out.extend(t.parameters().iter().cloned());
        }
        out
    }

    /// Differential flux density `dN/dE/dOmega` (cm^-2 s^-1 TeV^-1 sr^-1) at
    /// `coord` (model frame) and `energy` (TeV).
    pub fn evaluate(&self, coord: &SkyCoord, energy: f64) -> Result<f64> {
        Ok(self.spatial.evaluate(coord)? * self.spectral.evaluate(energy)?)
    }

    /// Mean temporal factor over `intervals` (1 without a light curve or
    /// without intervals).
    pub fn temporal_factor(&self, intervals: &[(f64, f64)]) -> Result<f64> {
        match &self.temporal {
            Some(t) if !intervals.is_empty() => t.integral_intervals(intervals),
            _ => Ok(1.0),
        }
    }

    /// Integrated flux (cm^-2 s^-1) per pixel of a geometry whose only extra
    /// axis is true energy.
    pub fn integrate_geom(&self, geom: Arc<Geometry>, oversample: usize, n_steps: usize) -> Result<Map> {
        if geom.axes().len() != 1 {
            return Err(Error::Validation(format!(
                "flux geometry needs exactly one '{}' axis, got {}",
                ENERGY_TRUE,
                geom.axes().len()
            )));
        }
        let edges = geom.axis(ENERGY_TRUE)?.edges();
        let flux = self.spectral.integral_bins(&edges, &self.spectral.parameters().values(), n_steps)?;
        let spatial = self.spatial.integrate_geom(&geom, oversample)?;
        let values: Vec<f64> = flux.iter().flat_map(|f| spatial.iter().map(move |s| f * s)).collect();
        Map::from_vec(geom, values, "cm-2 s-1")
    }
}

/// Field-of-view background scaling for one dataset.
#[derive(Debug, Clone)]
pub struct FoVBackgroundModel {
    dataset_name: String,
    /// Spectral scaling of the background template.
    pub spectral: SpectralModel,
}

impl FoVBackgroundModel {
    /// Unit-norm, zero-tilt scaling for `dataset_name`.
    pub fn new(dataset_name: &str) -> Self {
        Self { dataset_name: dataset_name.to_string(), spectral: PowerLawNorm::default().into() }
    }

    /// Builder: replace the spectral scaling.
    pub fn with_spectral(mut self, spectral: impl Into<SpectralModel>) -> Self {
        self.spectral = spectral.into();
        self
    }

    /// `"{dataset}-bkg"`.
    pub fn name(&self) -> String {
        format!("{}-bkg", self.dataset_name)
    }

    /// Dataset this model scales.
    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    /// Parameters.
    pub fn parameters(&self) -> Parameters {
        self.spectral.parameters()
    }

    /// Scale factor per energy bin, evaluated at the log-center of each bin.
    pub fn factors(&self, energy_edges: &[f64]) -> Result<Vec<f64>> {
        energy_edges.windows(2).map(|w| self.spectral.evaluate((w[0] * w[1]).sqrt())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::PointSpatial;
    use crate::spectral::PowerLaw;
    use approx::assert_relative_eq;
    use gf_maps::{Frame, MapAxis, Projection, WcsFootprint};

    fn point_model() -> SkyModel {
        SkyModel::new("src", PowerLaw::new(2.0, 1e-12, 1.0), PointSpatial::new(0.0, 0.0, Frame::Galactic).unwrap())
    }

    #[test]
    fn test_parameters_concatenated() {
        let m = point_model().with_temporal(TemporalModel::gaussian(1.0, 2.0));
        assert_eq!(m.parameters().names(), vec!["index", "amplitude", "reference", "lon_0", "lat_0", "t_ref", "sigma"]);
    }

    #[test]
    fn test_integrate_point_source_flux() {
        let m = point_model();
        let wcs = WcsFootprint::new(SkyCoord::new(0.0, 0.0), 0.1, (11, 11), Projection::Car, Frame::Galactic).unwrap();
        let axis = MapAxis::from_energy_bounds(1.0, 10.0, 2, "TeV", ENERGY_TRUE).unwrap();
        let geom = Arc::new(Geometry::wcs(wcs, vec![axis]).unwrap());
        let flux = m.integrate_geom(geom, 1, 16).unwrap();
        assert_relative_eq!(flux.sum(), 0.9e-12, max_relative = 1e-5);
        // all flux of the first energy bin lands in the central pixel
        assert_relative_eq!(flux.values()[60], 1e-12 * (1.0 - 1.0 / 10f64.sqrt()), max_relative = 1e-5);
    }

    #[test]
    fn test_dataset_selection() {
        let m = point_model().with_datasets_names(vec!["a".into()]);
        assert!(m.applies_to("a"));
        assert!(!m.applies_to("b"));
        assert!(point_model().applies_to("b"));
    }

    #[test]
    fn test_background_factors() {
        let bkg = FoVBackgroundModel::new("obs1");
        assert_eq!(bkg.name(), "obs1-bkg");
        assert_eq!(bkg.factors(&[1.0, 2.0, 4.0]).unwrap(), vec![1.0, 1.0]);
        bkg.parameters().get("norm").unwrap().set_value(1.2).unwrap();
        assert_relative_eq!(bkg.factors(&[1.0, 2.0]).unwrap()[0], 1.2);
    }
}
