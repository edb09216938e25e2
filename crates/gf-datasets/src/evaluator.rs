//! Per-model prediction with a fingerprint cache.
//!
//! A [`MapEvaluator`] turns one [`SkyModel`] into predicted counts on a
//! dataset geometry: spatial fractions x binned spectral integral x temporal
//! factor, pushed through the [`IrfResponse`].
//!
//! # Caching
//!
//! - **Key**: `(parameter fingerprint, geometry fingerprint, config
//!   fingerprint)`. Any difference recomputes; there is no staleness window.
//! - **Value**: `Arc<Map>` so concurrent readers share one prediction.
//! - **Spatial fractions** are cached separately, keyed on the spatial
//!   parameters only, since spectral parameters change far more often
//!   during a fit.
//! - **Thread-safety**: `Mutex` around each slot; evaluation happens outside
//!   the lock.

use std::sync::{Arc, Mutex};

use gf_ad::Dual;
use gf_core::Result;
use gf_irf::IrfResponse;
use gf_models::{Parameter, SkyModel};
use gf_maps::Map;

use crate::config::EvaluationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheKey {
    parameters: u64,
    geometry: u64,
    config: u64,
}

#[derive(Debug, Default)]
struct Slot {
    entry: Option<(CacheKey, Arc<Map>)>,
    hits: u64,
    misses: u64,
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Predictions served from the cache.
    pub hits: u64,
    /// Predictions recomputed.
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate as a fraction in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// Predicted counts of one model on one dataset.
#[derive(Debug)]
pub struct MapEvaluator {
    model: SkyModel,
    response: Arc<IrfResponse>,
    intervals: Vec<(f64, f64)>,
    config: EvaluationConfig,
    spatial: Mutex<Option<(u64, Arc<Vec<f64>>)>>,
    slot: Mutex<Slot>,
}

impl MapEvaluator {
    /// Evaluator for `model` through `response`, averaging the light curve
    /// over `intervals` (MJD).
    pub fn new(model: SkyModel, response: Arc<IrfResponse>, intervals: Vec<(f64, f64)>, config: EvaluationConfig) -> Self {
        Self { model, response, intervals, config, spatial: Mutex::new(None), slot: Mutex::new(Slot::default()) }
    }

    /// The model.
    pub fn model(&self) -> &SkyModel {
        &self.model
    }

    fn key(&self) -> CacheKey {
        CacheKey {
            parameters: self.model.parameters().fingerprint(),
            geometry: self.response.true_geom().fingerprint(),
            config: self.config.fingerprint(),
        }
    }

    /// Whether the next [`MapEvaluator::compute_npred`] recomputes.
    pub fn needs_update(&self) -> bool {
        let slot = self.slot.lock().expect("evaluator cache mutex poisoned");
        !matches!(&slot.entry, Some((k, _)) if *k == self.key())
    }

    /// Predicted counts in reconstructed energy.
    pub fn compute_npred(&self) -> Result<Arc<Map>> {
        let key = self.key();
        if self.config.use_cache {
            let mut slot = self.slot.lock().expect("evaluator cache mutex poisoned");
            let hit = match &slot.entry {
                Some((k, map)) if *k == key => Some(map.clone()),
                _ => None,
            };
            if let Some(map) = hit {
                slot.hits += 1;
                return Ok(map);
            }
        }

        log::debug!("evaluating model '{}'", self.model.name());
        let spatial = self.spatial_fractions()?;
        let edges = self.response.true_geom().axes()[0].edges();
        let spectral = &self.model.spectral;
        let flux = spectral.integral_bins(&edges, &spectral.parameters().values(), self.config.integral_steps)?;
        let npred = Arc::new(self.fold(&flux, &spatial)?);

        let mut slot = self.slot.lock().expect("evaluator cache mutex poisoned");
        slot.misses += 1;
        if self.config.use_cache {
            slot.entry = Some((key, npred.clone()));
        }
        Ok(npred)
    }

    fn spatial_fractions(&self) -> Result<Arc<Vec<f64>>> {
        let key = self.model.spatial.parameters().fingerprint();
        {
            let cached = self.spatial.lock().expect("evaluator cache mutex poisoned");
            if let Some((k, v)) = cached.as_ref() {
                if *k == key {
                    return Ok(v.clone());
                }
            }
        }
        let fractions = Arc::new(self.model.spatial.integrate_geom(self.response.true_geom(), self.config.oversample)?);
        *self.spatial.lock().expect("evaluator cache mutex poisoned") = Some((key, fractions.clone()));
        Ok(fractions)
    }

    /// Outer product of per-bin flux and spatial fractions, scaled by the
    /// temporal factor, then folded through the response.
    fn fold(&self, bin_flux: &[f64], spatial: &[f64]) -> Result<Map> {
        let tf = self.model.temporal_factor(&self.intervals)?;
        let values: Vec<f64> = bin_flux.iter().flat_map(|f| spatial.iter().map(move |s| tf * f * s)).collect();
        let flux = Map::from_vec(self.response.true_geom().clone(), values, "cm-2 s-1")?;
        self.response.apply(&flux)
    }

    /// Whether `p` drives any parameter of the model.
    pub fn depends_on(&self, p: &Parameter) -> bool {
        self.model.parameters().iter().any(|q| q.resolves_to(p))
    }

    /// Whether `p` drives a spatial or temporal parameter, which have no
    /// analytic derivative.
    pub fn depends_on_non_spectral(&self, p: &Parameter) -> bool {
        let spatial = self.model.spatial.parameters();
        let temporal = self.model.temporal.as_ref().map(|t| t.parameters()).unwrap_or_default();
        spatial.iter().chain(temporal.iter()).any(|q| q.resolves_to(p))
    }

    /// `d npred / d p` through the spectral model, or `None` when no spectral
    /// parameter depends on `p`.
    ///
    /// The response is linear in the flux, so the derivative of the binned
    /// spectral integral (from dual numbers) is folded exactly like the flux.
    pub fn npred_derivative(&self, p: &Parameter) -> Result<Option<Map>> {
        let params = self.model.spectral.parameters();
        let seeds: Vec<Dual> =
            params.iter().map(|q| Dual::new(q.value(), if q.resolves_to(p) { 1.0 } else { 0.0 })).collect();
        if seeds.iter().all(|d| d.dot == 0.0) {
            return Ok(None);
        }
        let edges = self.response.true_geom().axes()[0].edges();
        let flux = self.model.spectral.integral_bins(&edges, &seeds, self.config.integral_steps)?;
        let dflux: Vec<f64> = flux.iter().map(|d| d.dot).collect();
        let spatial = self.spatial_fractions()?;
        Ok(Some(self.fold(&dflux, &spatial)?))
    }

    /// Cache statistics snapshot.
    pub fn cache_stats(&self) -> CacheStats {
        let slot = self.slot.lock().expect("evaluator cache mutex poisoned");
        CacheStats { hits: slot.hits, misses: slot.misses }
    }

    /// Drop cached predictions.
    pub fn reset_cache(&self) {
        self.slot.lock().expect("evaluator cache mutex poisoned").entry = None;
        *self.spatial.lock().expect("evaluator cache mutex poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use gf_irf::ENERGY_TRUE;
    use gf_maps::{Frame, Geometry, MapAxis, Projection, SkyCoord, WcsFootprint};
    use gf_models::{PointSpatial, PowerLaw};

    fn evaluator(config: EvaluationConfig) -> MapEvaluator {
        let w = WcsFootprint::new(SkyCoord::new(0.0, 0.0), 0.1, (11, 11), Projection::Car, Frame::Galactic).unwrap();
        let e = MapAxis::from_energy_bounds(1.0, 10.0, 2, "TeV", ENERGY_TRUE).unwrap();
        let exposure = Map::full(Arc::new(Geometry::wcs(w, vec![e]).unwrap()), 1e12, "cm2 s");
        let response = Arc::new(IrfResponse::new(exposure, None, None).unwrap());
        let model = SkyModel::new("src", PowerLaw::new(2.0, 1e-12, 1.0), PointSpatial::new(0.0, 0.0, Frame::Galactic).unwrap());
        MapEvaluator::new(model, response, Vec::new(), config)
    }

    #[test]
    fn test_cache_hit_until_parameter_changes() {
        let ev = evaluator(EvaluationConfig::default());
        let a = ev.compute_npred().unwrap();
        let b = ev.compute_npred().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(ev.cache_stats(), CacheStats { hits: 1, misses: 1 });

        ev.model().spectral.parameters().get("amplitude").unwrap().set_value(2e-12).unwrap();
        assert!(ev.needs_update());
        let c = ev.compute_npred().unwrap();
        assert_relative_eq!(c.sum(), 2.0 * a.sum(), max_relative = 1e-12);
        assert_eq!(ev.cache_stats().misses, 2);
    }

    #[test]
    fn test_cache_disabled_always_recomputes() {
        let ev = evaluator(EvaluationConfig { use_cache: false, ..Default::default() });
        ev.compute_npred().unwrap();
        ev.compute_npred().unwrap();
        assert_eq!(ev.cache_stats(), CacheStats { hits: 0, misses: 2 });
    }

    #[test]
    fn test_amplitude_derivative_is_npred_over_amplitude() {
        let ev = evaluator(EvaluationConfig::default());
        let amp = ev.model().spectral.parameters().get("amplitude").unwrap().clone();
        let d = ev.npred_derivative(&amp).unwrap().unwrap();
        let npred = ev.compute_npred().unwrap();
        assert_relative_eq!(d.sum(), npred.sum() / 1e-12, max_relative = 1e-9);

        let lon = ev.model().spatial.parameters().get("lon_0").unwrap().clone();
        assert!(ev.npred_derivative(&lon).unwrap().is_none());
        assert!(ev.depends_on_non_spectral(&lon));
    }
}
