//! Binned counts cube with its response, models and Cash likelihood.

use std::ops::Range;
use std::sync::{Arc, Mutex};

use gf_ad::Dual;
use gf_core::{Error, Result};
use gf_irf::{EDispKernel, ENERGY, ENERGY_TRUE, EffectiveArea, IrfResponse, PsfKernel, PsfTable};
use gf_maps::{MapAxis, Map, Mask, SkyCoord};
use gf_models::{FoVBackgroundModel, Models, Parameter, Parameters};
use gf_stats::{CashCountsStatistic, cash, cash_generic, cash_sum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};

use crate::config::EvaluationConfig;
use crate::evaluator::MapEvaluator;
use crate::fd;

/// Relative slack when matching energy bounds to bin edges.
const EDGE_RTOL: f64 = 1e-6;

/// Good time interval in MJD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
    /// Start (MJD).
    pub start: f64,
    /// Stop (MJD).
    pub stop: f64,
}

impl TimeInterval {
    /// Interval `[start, stop]`; `stop` must be after `start`.
    pub fn new(start: f64, stop: f64) -> Result<Self> {
        if !(stop > start) {
            return Err(Error::Validation(format!("empty time interval [{}, {}]", start, stop)));
        }
        Ok(Self { start, stop })
    }

    /// Length in days.
    pub fn duration(&self) -> f64 {
        self.stop - self.start
    }
}

/// Where a dataset is in its evaluation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetState {
    /// No models set.
    Uninitialized,
    /// Models set, nothing predicted yet.
    Bound,
    /// The last prediction matches the current parameter values.
    Evaluated,
    /// A parameter changed since the last prediction.
    Stale,
}

/// Residual definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualMethod {
    /// `counts - npred`.
    Diff,
    /// `(counts - npred) / npred`.
    DiffOverModel,
    /// `(counts - npred) / sqrt(npred)`.
    DiffOverSqrtModel,
}

/// Summary numbers of a dataset, summed inside the safe mask.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetInfo {
    /// Dataset name.
    pub name: String,
    /// Observed counts.
    pub counts: f64,
    /// Background template counts (unscaled), NaN without background.
    pub background: f64,
    /// Counts minus background, NaN without background.
    pub excess: f64,
    /// Signed `sqrt(TS)` of the excess, NaN without background.
    pub sqrt_ts: f64,
    /// Total predicted counts.
    pub npred: f64,
    /// Predicted source counts.
    pub npred_signal: f64,
    /// Predicted (scaled) background counts.
    pub npred_background: f64,
    /// Number of bins.
    pub n_bins: usize,
    /// Number of bins entering the likelihood.
    pub n_fit_bins: usize,
    /// Cash statistic over the fit bins.
    pub stat_sum: f64,
}

/// A binned dataset: counts in reconstructed energy, an optional
/// background template, the instrument response and the models that
/// predict it.
///
/// The likelihood is the Cash statistic summed over bins that are inside
/// both `mask_safe` and `mask_fit`.
#[derive(Debug)]
pub struct MapDataset {
    name: String,
    counts: Map,
    background: Option<Map>,
    response: Arc<IrfResponse>,
    mask_safe: Option<Mask>,
    mask_fit: Option<Mask>,
    mask: Option<Mask>,
    gti: Vec<TimeInterval>,
    config: EvaluationConfig,
    models: Option<Models>,
    evaluators: Vec<MapEvaluator>,
    background_model: Option<FoVBackgroundModel>,
    last_evaluated: Mutex<Option<u64>>,
}

impl MapDataset {
    /// Dataset from counts and a response whose reconstructed geometry
    /// matches the counts geometry.
    pub fn new(name: &str, counts: Map, response: IrfResponse) -> Result<Self> {
        let geom = counts.geom();
        if geom.axes().len() != 1 || geom.axis_index(ENERGY).is_none() {
            return Err(Error::Validation(format!("counts of '{}' need exactly one '{}' axis", name, ENERGY)));
        }
        geom.require_aligned(&response.reco_geom()?, "counts vs response")?;
        Ok(Self {
            name: name.to_string(),
            counts,
            background: None,
            response: Arc::new(response),
            mask_safe: None,
            mask_fit: None,
            mask: None,
            gti: Vec::new(),
            config: EvaluationConfig::default(),
            models: None,
            evaluators: Vec::new(),
            background_model: None,
            last_evaluated: Mutex::new(None),
        })
    }

    /// Dataset whose response is built from IRF tables for a pointing at
    /// `pointing` with `livetime` seconds.
    ///
    /// The true-energy axis is taken from `edisp` when given, otherwise it
    /// is the reconstructed axis. PSF kernels use the offset of the counts
    /// center from the pointing and the kernel settings of `config`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_irfs(
        name: &str,
        counts: Map,
        aeff: &EffectiveArea,
        psf: Option<&PsfTable>,
        edisp: Option<EDispKernel>,
        pointing: &SkyCoord,
        livetime: f64,
        config: EvaluationConfig,
    ) -> Result<Self> {
        let energy_true = match &edisp {
            Some(e) => e.energy_true_axis().clone(),
            None => counts.geom().axis(ENERGY)?.renamed(ENERGY_TRUE),
        };
        let true_geom = Arc::new(counts.geom().to_cube(vec![energy_true])?);
        let exposure = aeff.exposure_map(true_geom.clone(), pointing, livetime)?;
        let kernel = match psf {
            Some(table) => {
                let offset = counts.geom().center().separation(pointing);
                Some(PsfKernel::for_geom(table, &true_geom, offset, config.psf_max_radius, config.psf_oversample)?)
            }
            None => None,
        };
        let response = IrfResponse::new(exposure, kernel, edisp)?;
        Ok(Self::new(name, counts, response)?.with_config(config))
    }

    /// Builder: background template aligned with the counts.
    pub fn with_background(mut self, background: Map) -> Result<Self> {
        self.counts.geom().require_aligned(background.geom(), "background")?;
        self.background = Some(background);
        Ok(self)
    }

    /// Builder: safe-data mask.
    pub fn with_mask_safe(mut self, mask: Mask) -> Result<Self> {
        self.counts.geom().require_aligned(mask.geom(), "mask_safe")?;
        self.mask_safe = Some(mask);
        self.update_mask()?;
        Ok(self)
    }

    /// Builder: fit-range mask.
    pub fn with_mask_fit(mut self, mask: Mask) -> Result<Self> {
        self.counts.geom().require_aligned(mask.geom(), "mask_fit")?;
        self.mask_fit = Some(mask);
        self.update_mask()?;
        Ok(self)
    }

    /// Builder: good time intervals.
    pub fn with_gti(mut self, gti: Vec<TimeInterval>) -> Self {
        self.gti = gti;
        self.rebind();
        self
    }

    /// Builder: evaluation settings.
    pub fn with_config(mut self, config: EvaluationConfig) -> Self {
        self.config = config;
        self.rebind();
        self
    }

    /// Builder form of [`MapDataset::set_models`].
    pub fn with_models(mut self, models: &Models) -> Self {
        self.set_models(models);
        self
    }

    fn update_mask(&mut self) -> Result<()> {
        self.mask = match (&self.mask_safe, &self.mask_fit) {
            (Some(a), Some(b)) => Some(a.and(b)?),
            (Some(a), None) | (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };
        Ok(())
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observed counts.
    pub fn counts(&self) -> &Map {
        &self.counts
    }

    /// Background template.
    pub fn background(&self) -> Option<&Map> {
        self.background.as_ref()
    }

    /// Instrument response.
    pub fn response(&self) -> &IrfResponse {
        &self.response
    }

    /// Exposure in true energy.
    pub fn exposure(&self) -> &Map {
        self.response.exposure()
    }

    /// Safe-data mask.
    pub fn mask_safe(&self) -> Option<&Mask> {
        self.mask_safe.as_ref()
    }

    /// Fit-range mask.
    pub fn mask_fit(&self) -> Option<&Mask> {
        self.mask_fit.as_ref()
    }

    /// Combined mask used by the likelihood.
    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }

    /// Good time intervals.
    pub fn gti(&self) -> &[TimeInterval] {
        &self.gti
    }

    /// Evaluation settings.
    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Per-model evaluators.
    pub fn evaluators(&self) -> &[MapEvaluator] {
        &self.evaluators
    }

    /// Background model bound to this dataset.
    pub fn background_model(&self) -> Option<&FoVBackgroundModel> {
        self.background_model.as_ref()
    }

    /// Bind the source models that apply to this dataset and its
    /// background model. Parameters stay shared with `models`.
    pub fn set_models(&mut self, models: &Models) {
        self.models = Some(models.clone());
        self.rebind();
    }

    fn rebind(&mut self) {
        let Some(models) = &self.models else {
            return;
        };
        let intervals: Vec<(f64, f64)> = self.gti.iter().map(|t| (t.start, t.stop)).collect();
        self.evaluators = models
            .select_for(&self.name)
            .map(|m| MapEvaluator::new(m.clone(), self.response.clone(), intervals.clone(), self.config))
            .collect();
        self.background_model = models.background_for(&self.name).cloned();
        if self.background_model.is_some() && self.background.is_none() {
            log::warn!("dataset '{}' has a background model but no background template", self.name);
        }
        *self.last_evaluated.lock().expect("dataset state mutex poisoned") = None;
        log::debug!("dataset '{}' bound to {} source models", self.name, self.evaluators.len());
    }

    /// Parameters of every bound model, once.
    pub fn parameters(&self) -> Parameters {
        let mut out = Parameters::default();
        for ev in &self.evaluators {
            out.extend(ev.model().parameters().iter().cloned());
        }
        if let Some(b) = &self.background_model {
            out.extend(b.parameters().iter().cloned());
        }
        out
    }

    /// Parameters of every bound model, once, with `<model>.<parameter>`
    /// names.
    pub fn named_parameters(&self) -> Vec<(String, Parameter)> {
        let sources = self.evaluators.iter().map(|ev| (ev.model().name().to_string(), ev.model().parameters()));
        let background = self.background_model.iter().map(|b| (b.name(), b.parameters()));
        let mut out: Vec<(String, Parameter)> = Vec::new();
        for (model, params) in sources.chain(background) {
            for p in params.iter() {
                if !out.iter().any(|(_, q)| q.ptr_eq(p)) {
                    out.push((format!("{}.{}", model, p.name()), p.clone()));
                }
            }
        }
        out
    }

    /// Lifecycle state.
    pub fn state(&self) -> DatasetState {
        if self.models.is_none() {
            return DatasetState::Uninitialized;
        }
        match *self.last_evaluated.lock().expect("dataset state mutex poisoned") {
            None => DatasetState::Bound,
            Some(fp) if fp == self.parameters().fingerprint() => DatasetState::Evaluated,
            Some(_) => DatasetState::Stale,
        }
    }

    fn zeros(&self) -> Map {
        Map::new(self.counts.geom().clone(), "")
    }

    /// Predicted source counts summed over models.
    pub fn npred_signal(&self) -> Result<Map> {
        let mut out = self.zeros();
        {
            let values = out.values_mut();
            for ev in &self.evaluators {
                let npred = ev.compute_npred()?;
                for (o, v) in values.iter_mut().zip(npred.values()) {
                    *o += v;
                }
            }
        }
        Ok(out)
    }

    fn background_factors(&self) -> Result<Option<Vec<f64>>> {
        match &self.background_model {
            Some(m) => Ok(Some(m.factors(&self.counts.geom().axes()[0].edges())?)),
            None => Ok(None),
        }
    }

    /// Background template scaled by the background model.
    pub fn npred_background(&self) -> Result<Map> {
        let Some(bkg) = &self.background else {
            return Ok(self.zeros());
        };
        let Some(factors) = self.background_factors()? else {
            return Ok(bkg.clone());
        };
        let ns = self.counts.geom().n_spatial();
        let mut out = bkg.clone();
        for (k, v) in out.values_mut().iter_mut().enumerate() {
            *v *= factors[k / ns];
        }
        Ok(out)
    }

    /// Total predicted counts, clipped at zero.
    pub fn npred(&self) -> Result<Map> {
        let fingerprint = self.parameters().fingerprint();
        let mut total = self.npred_signal()?;
        let bkg = self.npred_background()?;
        for (t, b) in total.values_mut().iter_mut().zip(bkg.values()) {
            *t = (*t + b).max(0.0);
        }
        *self.last_evaluated.lock().expect("dataset state mutex poisoned") = Some(fingerprint);
        Ok(total)
    }

    /// Cash statistic per bin (mask not applied).
    pub fn stat_array(&self) -> Result<Map> {
        let npred = self.npred()?;
        let values = self.counts.values().iter().zip(npred.values()).map(|(&n, &mu)| cash(n, mu)).collect();
        Map::from_vec(self.counts.geom().clone(), values, "")
    }

    /// Cash statistic summed over the masked bins.
    pub fn stat_sum(&self) -> Result<f64> {
        let npred = self.npred()?;
        Ok(cash_sum(self.counts.values(), npred.values(), self.mask.as_ref().map(|m| m.values())))
    }

    /// Whether the derivative with respect to `p` needs finite differences.
    pub fn requires_numeric(&self, p: &Parameter) -> bool {
        self.evaluators.iter().any(|ev| ev.depends_on_non_spectral(p))
    }

    /// `d C / d mu` per bin, zero outside the mask.
    fn cash_weights(&self, npred: &Map) -> Vec<f64> {
        let mask = self.mask.as_ref().map(|m| m.values());
        self.counts
            .values()
            .iter()
            .zip(npred.values())
            .enumerate()
            .map(|(k, (&n, &mu))| {
                if mask.is_some_and(|m| !m[k]) { 0.0 } else { cash_generic(n, Dual::new(mu, 1.0)).dot }
            })
            .collect()
    }

    /// Derivatives through the spectral models and the background model,
    /// valid for parameters where [`MapDataset::requires_numeric`] is false.
    pub fn stat_gradient_analytic(&self, params: &[Parameter]) -> Result<Vec<f64>> {
        let npred = self.npred()?;
        let w = self.cash_weights(&npred);
        let ns = self.counts.geom().n_spatial();
        let centers: Vec<f64> = self.counts.geom().axes()[0].edges().windows(2).map(|e| (e[0] * e[1]).sqrt()).collect();

        let mut grad = Vec::with_capacity(params.len());
        for p in params {
            let mut g = 0.0;
            for ev in &self.evaluators {
                if let Some(d) = ev.npred_derivative(p)? {
                    g += w.iter().zip(d.values()).map(|(a, b)| a * b).sum::<f64>();
                }
            }
            if let (Some(model), Some(bkg)) = (&self.background_model, &self.background) {
                let bp = model.parameters();
                if bp.iter().any(|q| q.resolves_to(p)) {
                    let seeds: Vec<Dual> = bp
                        .iter()
                        .map(|q| Dual::new(q.value(), if q.resolves_to(p) { 1.0 } else { 0.0 }))
                        .collect();
                    let dfac = centers
                        .iter()
                        .map(|&e| model.spectral.evaluate_with(e, &seeds).map(|d| d.dot))
                        .collect::<Result<Vec<f64>>>()?;
                    g += bkg.values().iter().enumerate().map(|(k, b)| w[k] * b * dfac[k / ns]).sum::<f64>();
                }
            }
            grad.push(g);
        }
        Ok(grad)
    }

    /// Gradient of [`MapDataset::stat_sum`] with respect to `params`:
    /// dual numbers for spectral and background parameters, finite
    /// differences for spatial and temporal ones.
    pub fn stat_gradient(&self, params: &Parameters) -> Result<Vec<f64>> {
        let analytic: Vec<Parameter> = params.iter().filter(|p| !self.requires_numeric(p)).cloned().collect();
        let mut analytic_grad = self.stat_gradient_analytic(&analytic)?.into_iter();
        params
            .iter()
            .map(|p| {
                if self.requires_numeric(p) {
                    fd::derivative(p, || self.stat_sum())
                } else {
                    Ok(analytic_grad.next().unwrap_or(0.0))
                }
            })
            .collect()
    }

    /// Gradient of [`MapDataset::stat_sum`] by finite differences only.
    pub fn stat_gradient_numeric(&self, params: &Parameters) -> Result<Vec<f64>> {
        params.iter().map(|p| fd::derivative(p, || self.stat_sum())).collect()
    }

    /// Residual map.
    pub fn residuals(&self, method: ResidualMethod) -> Result<Map> {
        let npred = self.npred()?;
        let values = self
            .counts
            .values()
            .iter()
            .zip(npred.values())
            .map(|(&n, &mu)| match method {
                ResidualMethod::Diff => n - mu,
                ResidualMethod::DiffOverModel => (n - mu) / mu,
                ResidualMethod::DiffOverSqrtModel => (n - mu) / mu.sqrt(),
            })
            .collect();
        Map::from_vec(self.counts.geom().clone(), values, "")
    }

    /// Counts minus predicted background.
    pub fn excess(&self) -> Result<Map> {
        self.counts.sub(&self.npred_background()?)
    }

    fn sum_safe(&self, map: &Map) -> Result<f64> {
        match &self.mask_safe {
            Some(m) => map.sum_masked(m),
            None => Ok(map.sum()),
        }
    }

    /// Summary numbers inside the safe mask.
    pub fn info(&self) -> Result<DatasetInfo> {
        let counts = self.sum_safe(&self.counts)?;
        let (background, excess, sqrt_ts) = match &self.background {
            Some(b) => {
                let background = self.sum_safe(b)?;
                let stat = CashCountsStatistic::new(counts, background);
                (background, stat.excess(), stat.sqrt_ts())
            }
            None => (f64::NAN, f64::NAN, f64::NAN),
        };
        Ok(DatasetInfo {
            name: self.name.clone(),
            counts,
            background,
            excess,
            sqrt_ts,
            npred: self.sum_safe(&self.npred()?)?,
            npred_signal: self.sum_safe(&self.npred_signal()?)?,
            npred_background: self.sum_safe(&self.npred_background()?)?,
            n_bins: self.counts.geom().npix(),
            n_fit_bins: self.mask.as_ref().map_or(self.counts.geom().npix(), |m| m.count()),
            stat_sum: self.stat_sum()?,
        })
    }

    /// Rename; models are rebound under the new name.
    pub fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self.rebind();
        self
    }

    /// Copy under a new name, bound to the same models.
    pub fn copy(&self, name: &str) -> Result<Self> {
        let mut out = Self::new(name, self.counts.clone(), (*self.response).clone())?;
        out.background = self.background.clone();
        out.mask_safe = self.mask_safe.clone();
        out.mask_fit = self.mask_fit.clone();
        out.update_mask()?;
        out.gti = self.gti.clone();
        out.config = self.config;
        out.models = self.models.clone();
        out.rebind();
        Ok(out)
    }

    /// Energy dispersion, or the diagonal response when there is none.
    fn edisp_or_diagonal(&self) -> Result<EDispKernel> {
        match self.response.edisp() {
            Some(e) => Ok(e.clone()),
            None => EDispKernel::from_diagonal_response(
                self.response.true_geom().axis(ENERGY_TRUE)?,
                self.counts.geom().axis(ENERGY)?,
            ),
        }
    }

    fn derived(&self, name: &str, counts: Map, background: Option<Map>, edisp: EDispKernel) -> Result<Self> {
        let response = IrfResponse::new(self.response.exposure().clone(), self.response.psf().cloned(), Some(edisp))?;
        let mut out = Self::new(name, counts, response)?;
        out.background = background;
        out.gti = self.gti.clone();
        out.config = self.config;
        out.models = self.models.clone();
        Ok(out)
    }

    fn resample_mask(mask: &Option<Mask>, axis: &MapAxis) -> Result<Option<Mask>> {
        mask.as_ref().map(|m| Ok(Mask::from_threshold(&m.to_map().resample_axis(axis)?, 0.5))).transpose()
    }

    /// Merge reconstructed-energy bins into `axis`, whose edges must be a
    /// subset of the current ones. Counts and background outside the safe
    /// mask are dropped; masks merge with logical or.
    pub fn resample_energy_axis(&self, axis: &MapAxis, name: &str) -> Result<Self> {
        let axis = axis.renamed(ENERGY);
        let safe = |m: &Map| -> Result<Map> {
            match &self.mask_safe {
                Some(mask) => m.to_masked(mask),
                None => Ok(m.clone()),
            }
        };
        let counts = safe(&self.counts)?.resample_axis(&axis)?;
        let background = self.background.as_ref().map(|b| safe(b)?.resample_axis(&axis)).transpose()?;
        let edisp = self.edisp_or_diagonal()?.resample_energy_axis(&axis)?;
        let mut out = self.derived(name, counts, background, edisp)?;
        out.mask_safe = Self::resample_mask(&self.mask_safe, &axis)?;
        out.mask_fit = Self::resample_mask(&self.mask_fit, &axis)?;
        out.update_mask()?;
        out.rebind();
        Ok(out)
    }

    /// Sum over reconstructed energy into a single bin.
    pub fn to_image(&self, name: &str) -> Result<Self> {
        let axis = self.counts.geom().axis(ENERGY)?.squash();
        self.resample_energy_axis(&axis, name)
    }

    fn slice_mask(mask: &Option<Mask>, range: &Range<usize>) -> Result<Option<Mask>> {
        mask.as_ref()
            .map(|m| Ok(Mask::from_threshold(&m.to_map().slice_by_idx(ENERGY, range.clone())?, 0.5)))
            .transpose()
    }

    /// Keep the reconstructed-energy bins inside `[energy_min, energy_max]`.
    pub fn slice_by_energy(&self, energy_min: f64, energy_max: f64, name: &str) -> Result<Self> {
        let edges = self.counts.geom().axis(ENERGY)?.edges();
        let start = edges.iter().position(|&e| e >= energy_min * (1.0 - EDGE_RTOL));
        let stop = edges.iter().rposition(|&e| e <= energy_max * (1.0 + EDGE_RTOL));
        let range = match (start, stop) {
            (Some(a), Some(b)) if b > a => a..b,
            _ => {
                return Err(Error::Validation(format!(
                    "no complete energy bin inside [{}, {}]",
                    energy_min, energy_max
                )));
            }
        };
        let counts = self.counts.slice_by_idx(ENERGY, range.clone())?;
        let background = self.background.as_ref().map(|b| b.slice_by_idx(ENERGY, range.clone())).transpose()?;
        let edisp = self.edisp_or_diagonal()?.slice_energy(range.clone())?;
        let mut out = self.derived(name, counts, background, edisp)?;
        out.mask_safe = Self::slice_mask(&self.mask_safe, &range)?;
        out.mask_fit = Self::slice_mask(&self.mask_fit, &range)?;
        out.update_mask()?;
        out.rebind();
        Ok(out)
    }

    /// Replace the counts by a Poisson realization of the prediction.
    pub fn fake(&mut self, seed: u64) -> Result<()> {
        let npred = self.npred()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut counts = self.counts.clone();
        for (c, &mu) in counts.values_mut().iter_mut().zip(npred.values()) {
            *c = if mu > 0.0 {
                let dist = Poisson::new(mu).map_err(|e| Error::Computation(format!("poisson({}): {}", mu, e)))?;
                dist.sample(&mut rng)
            } else {
                0.0
            };
        }
        self.counts = counts;
        Ok(())
    }

    /// Replace the counts by the prediction itself.
    pub fn asimov(&mut self) -> Result<()> {
        let npred = self.npred()?;
        self.counts = self.counts.with_data(npred.data().clone())?;
        Ok(())
    }

    /// Add `other` into this dataset.
    ///
    /// Counts and scaled background of `other` enter only inside its safe
    /// mask; exposure enters where `other`'s safe mask has any energy bin.
    /// Energy dispersion is averaged with exposure weights per true-energy
    /// bin; the PSF of this dataset is kept. Models are unbound afterwards
    /// and must be set again.
    pub fn stack(&mut self, other: &MapDataset) -> Result<()> {
        self.counts.geom().require_aligned(other.counts.geom(), "stack")?;
        self.counts.stack(&other.counts, other.mask_safe.as_ref())?;

        let other_bkg = match &other.background {
            Some(_) => Some(other.npred_background()?),
            None => None,
        };
        self.background = match (self.background.is_some(), other_bkg) {
            (true, Some(ob)) => {
                let mut b = self.npred_background()?;
                b.stack(&ob, other.mask_safe.as_ref())?;
                Some(b)
            }
            (false, Some(ob)) => Some(match &other.mask_safe {
                Some(m) => ob.to_masked(m)?,
                None => ob,
            }),
            (_, None) => self.background.take(),
        };

        let other_exposure = match &other.mask_safe {
            Some(m) => other.exposure().mul_image(&m.reduce_any().to_map())?,
            None => other.exposure().clone(),
        };
        let exposure = self.exposure().add(&other_exposure)?;

        let edisp = if self.response.edisp().is_some() || other.response.edisp().is_some() {
            let row_weights = |m: &Map| -> Vec<f64> {
                let ns = m.geom().n_spatial();
                m.values().chunks(ns).map(|c| c.iter().sum()).collect()
            };
            Some(self.edisp_or_diagonal()?.stack(
                &other.edisp_or_diagonal()?,
                &row_weights(self.exposure()),
                &row_weights(&other_exposure),
            )?)
        } else {
            None
        };

        let psf = match (self.response.psf(), other.response.psf()) {
            (Some(a), Some(b)) => {
                if a.size() != b.size() || a.binsz() != b.binsz() {
                    log::warn!("stacking '{}' into '{}': PSF kernels differ, keeping the first", other.name, self.name);
                }
                Some(a.clone())
            }
            (a, b) => a.or(b).cloned(),
        };
        self.response = Arc::new(IrfResponse::new(exposure, psf, edisp)?);

        self.mask_safe = match (&self.mask_safe, &other.mask_safe) {
            (Some(a), Some(b)) => Some(a.or(b)?),
            _ => None,
        };
        self.mask_fit = match (&self.mask_fit, &other.mask_fit) {
            (Some(a), Some(b)) => Some(a.or(b)?),
            (a, b) => a.as_ref().or(b.as_ref()).cloned(),
        };
        self.update_mask()?;

        self.gti.extend(other.gti.iter().copied());
        self.gti.sort_by(|a, b| a.start.total_cmp(&b.start));

        // the background now includes the old model scaling
        self.models = None;
        self.evaluators.clear();
        self.background_model = None;
        *self.last_evaluated.lock().expect("dataset state mutex poisoned") = None;
        Ok(())
    }
}
