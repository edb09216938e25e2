//! Spectral models `dN/dE` (cm^-2 s^-1 TeV^-1, energies in TeV).
//!
//! Evaluation is generic over [`Scalar`]: calling with `f64` values gives the
//! flux, calling with [`gf_ad::Dual`] values seeded on one parameter gives the
//! flux and its derivative with respect to that parameter.

use gf_ad::Scalar;
use gf_core::{Error, Result};
use gf_maps::{GridInterpolator, Interp};
use gf_stats::math::integrate_log_simpson;
use ndarray::{ArrayD, IxDyn};

use crate::parameter::Parameter;
use crate::parameters::Parameters;

/// Default number of log-Simpson steps for integrals.
pub const DEFAULT_INTEGRAL_STEPS: usize = 8;

fn check_energy(energy: f64) -> Result<()> {
    if !(energy > 0.0 && energy.is_finite()) {
        return Err(Error::ParameterDomain(format!("spectral model evaluated at energy {}", energy)));
    }
    Ok(())
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0) {
        return Err(Error::ParameterDomain(format!("{} must be > 0, got {}", name, value)));
    }
    Ok(())
}

/// `A (E / E0)^-index`.
#[derive(Debug, Clone)]
pub struct PowerLaw {
    /// Spectral index.
    pub index: Parameter,
    /// Differential flux at `reference`.
    pub amplitude: Parameter,
    /// Reference energy (frozen by default).
    pub reference: Parameter,
}

impl PowerLaw {
    /// Power law with the given index, amplitude and reference energy.
    pub fn new(index: f64, amplitude: f64, reference: f64) -> Self {
        Self {
            index: Parameter::new("index", index),
            amplitude: Parameter::new("amplitude", amplitude).with_unit("cm-2 s-1 TeV-1"),
            reference: Parameter::new("reference", reference).with_unit("TeV").with_frozen(true),
        }
    }

    fn params(&self) -> Vec<Parameter> {
        vec![self.index.clone(), self.amplitude.clone(), self.reference.clone()]
    }

    fn check(&self, p: &[f64]) -> Result<()> {
        require_positive("reference", p[2])
    }

    fn eval<S: Scalar>(&self, energy: f64, p: &[S]) -> S {
        let x = S::from_f64(energy) / p[2];
        p[1] * x.powd(-p[0])
    }
}

impl Default for PowerLaw {
    fn default() -> Self {
        Self::new(2.0, 1e-12, 1.0)
    }
}

/// `A (E / E0)^-index exp(-(E / E_c)^alpha)`.
#[derive(Debug, Clone)]
pub struct ExpCutoffPowerLaw {
    /// Spectral index.
    pub index: Parameter,
    /// Differential flux at `reference` before the cutoff term.
    pub amplitude: Parameter,
    /// Reference energy (frozen by default).
    pub reference: Parameter,
    /// Cutoff energy.
    pub e_cutoff: Parameter,
    /// Cutoff sharpness (frozen by default).
    pub alpha: Parameter,
}

impl ExpCutoffPowerLaw {
    /// Cutoff power law; `alpha` starts at 1. `e_cutoff` must be positive.
    pub fn new(index: f64, amplitude: f64, reference: f64, e_cutoff: f64) -> Result<Self> {
        Ok(Self {
            index: Parameter::new("index", index),
            amplitude: Parameter::new("amplitude", amplitude).with_unit("cm-2 s-1 TeV-1"),
            reference: Parameter::new("reference", reference).with_unit("TeV").with_frozen(true),
            e_cutoff: Parameter::bounded("e_cutoff", e_cutoff, f64::MIN_POSITIVE, f64::INFINITY)?.with_unit("TeV"),
            alpha: Parameter::new("alpha", 1.0).with_frozen(true),
        })
    }

    fn params(&self) -> Vec<Parameter> {
        vec![
            self.index.clone(),
            self.amplitude.clone(),
            self.reference.clone(),
            self.e_cutoff.clone(),
            self.alpha.clone(),
        ]
    }

    fn check(&self, p: &[f64]) -> Result<()> {
        require_positive("reference", p[2])?;
        require_positive("e_cutoff", p[3])
    }

    fn eval<S: Scalar>(&self, energy: f64, p: &[S]) -> S {
        let e = S::from_f64(energy);
        let cut = (e / p[3]).powd(p[4]);
        p[1] * (e / p[2]).powd(-p[0]) * (-cut).exp()
    }
}

/// `A (E / E0)^(-alpha - beta ln(E / E0))`.
#[derive(Debug, Clone)]
pub struct LogParabola {
    /// Differential flux at `reference`.
    pub amplitude: Parameter,
    /// Reference energy (frozen by default).
    pub reference: Parameter,
    /// Index at `reference`.
    pub alpha: Parameter,
    /// Curvature.
    pub beta: Parameter,
}

impl LogParabola {
    /// Log-parabola.
    pub fn new(amplitude: f64, reference: f64, alpha: f64, beta: f64) -> Self {
        Self {
            amplitude: Parameter::new("amplitude", amplitude).with_unit("cm-2 s-1 TeV-1"),
            reference: Parameter::new("reference", reference).with_unit("TeV").with_frozen(true),
            alpha: Parameter::new("alpha", alpha),
            beta: Parameter::new("beta", beta),
        }
    }

    fn params(&self) -> Vec<Parameter> {
        vec![self.amplitude.clone(), self.reference.clone(), self.alpha.clone(), self.beta.clone()]
    }

    fn check(&self, p: &[f64]) -> Result<()> {
        require_positive("reference", p[1])
    }

    fn eval<S: Scalar>(&self, energy: f64, p: &[S]) -> S {
        let lx = (S::from_f64(energy) / p[1]).ln();
        let exponent = -p[2] - p[3] * lx;
        p[0] * (exponent * lx).exp()
    }
}

impl Default for LogParabola {
    fn default() -> Self {
        Self::new(1e-12, 10.0, 2.0, 1.0)
    }
}

/// Tabulated spectrum, interpolated log-log and scaled by `norm`.
#[derive(Debug, Clone)]
pub struct TemplateSpectral {
    /// Multiplicative normalization.
    pub norm: Parameter,
    energy: Vec<f64>,
    values: Vec<f64>,
    interp: GridInterpolator,
}

impl TemplateSpectral {
    /// Template from strictly increasing energies (TeV) and `dN/dE` values.
    pub fn new(energy: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if energy.len() != values.len() || energy.len() < 2 {
            return Err(Error::Validation("template spectrum needs >= 2 matching energy/value pairs".into()));
        }
        if energy[0] <= 0.0 || values.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(Error::Validation("template spectrum needs positive energies and non-negative values".into()));
        }
        let table = ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.clone())
            .map_err(|e| Error::Validation(format!("template spectrum shape: {}", e)))?;
        let interp = GridInterpolator::new(vec![energy.clone()], table)?
            .with_axis_scales(vec![Interp::Log])?
            .with_values_scale(Interp::Log);
        Ok(Self { norm: Parameter::new("norm", 1.0), energy, values, interp })
    }

    /// Tabulated energies.
    pub fn energy(&self) -> &[f64] {
        &self.energy
    }

    /// Tabulated values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    fn params(&self) -> Vec<Parameter> {
        vec![self.norm.clone()]
    }

    fn eval<S: Scalar>(&self, energy: f64, p: &[S]) -> S {
        p[0].scale(self.interp.evaluate(&[energy]))
    }
}

/// `norm (E / E0)^-tilt`: a scaling of a fixed spectral shape, used for
/// background normalization.
#[derive(Debug, Clone)]
pub struct PowerLawNorm {
    /// Multiplicative normalization.
    pub norm: Parameter,
    /// Spectral tilt (frozen by default).
    pub tilt: Parameter,
    /// Reference energy (frozen).
    pub reference: Parameter,
}

impl PowerLawNorm {
    /// Scaling with the given norm and tilt at 1 TeV.
    pub fn new(norm: f64, tilt: f64) -> Self {
        Self {
            norm: Parameter::new("norm", norm),
            tilt: Parameter::new("tilt", tilt).with_frozen(true),
            reference: Parameter::new("reference", 1.0).with_unit("TeV").with_frozen(true),
        }
    }

    fn params(&self) -> Vec<Parameter> {
        vec![self.norm.clone(), self.tilt.clone(), self.reference.clone()]
    }

    fn check(&self, p: &[f64]) -> Result<()> {
        require_positive("reference", p[2])
    }

    fn eval<S: Scalar>(&self, energy: f64, p: &[S]) -> S {
        p[0] * (S::from_f64(energy) / p[2]).powd(-p[1])
    }
}

impl Default for PowerLawNorm {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

/// Any spectral model.
#[derive(Debug, Clone)]
pub enum SpectralModel {
    /// Power law.
    PowerLaw(PowerLaw),
    /// Power law with exponential cutoff.
    ExpCutoffPowerLaw(ExpCutoffPowerLaw),
    /// Log-parabola.
    LogParabola(LogParabola),
    /// Tabulated spectrum.
    Template(TemplateSpectral),
    /// Normalization and tilt.
    PowerLawNorm(PowerLawNorm),
}

impl SpectralModel {
    /// Model type tag.
    pub fn tag(&self) -> &'static str {
        match self {
            SpectralModel::PowerLaw(_) => "PowerLawSpectralModel",
            SpectralModel::ExpCutoffPowerLaw(_) => "ExpCutoffPowerLawSpectralModel",
            SpectralModel::LogParabola(_) => "LogParabolaSpectralModel",
            SpectralModel::Template(_) => "TemplateSpectralModel",
            SpectralModel::PowerLawNorm(_) => "PowerLawNormSpectralModel",
        }
    }

    fn params(&self) -> Vec<Parameter> {
        match self {
            SpectralModel::PowerLaw(m) => m.params(),
            SpectralModel::ExpCutoffPowerLaw(m) => m.params(),
            SpectralModel::LogParabola(m) => m.params(),
            SpectralModel::Template(m) => m.params(),
            SpectralModel::PowerLawNorm(m) => m.params(),
        }
    }

    /// Parameters in evaluation order.
    pub fn parameters(&self) -> Parameters {
        Parameters::new(self.params())
    }

    /// Number of parameters (length of the value slices taken below).
    pub fn n_parameters(&self) -> usize {
        self.params().len()
    }

    /// Fail with [`Error::ParameterDomain`] where the functional form is
    /// undefined for `values`.
    pub fn check_domain(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.n_parameters() {
            return Err(Error::Validation(format!(
                "{} takes {} parameter values, got {}",
                self.tag(),
                self.n_parameters(),
                values.len()
            )));
        }
        match self {
            SpectralModel::PowerLaw(m) => m.check(values),
            SpectralModel::ExpCutoffPowerLaw(m) => m.check(values),
            SpectralModel::LogParabola(m) => m.check(values),
            SpectralModel::Template(_) => Ok(()),
            SpectralModel::PowerLawNorm(m) => m.check(values),
        }
    }

    #[inline]
    fn eval<S: Scalar>(&self, energy: f64, p: &[S]) -> S {
        match self {
            SpectralModel::PowerLaw(m) => m.eval(energy, p),
            SpectralModel::ExpCutoffPowerLaw(m) => m.eval(energy, p),
            SpectralModel::LogParabola(m) => m.eval(energy, p),
            SpectralModel::Template(m) => m.eval(energy, p),
            SpectralModel::PowerLawNorm(m) => m.eval(energy, p),
        }
    }

    fn checked<S: Scalar>(&self, values: &[S]) -> Result<()> {
        let plain: Vec<f64> = values.iter().map(|v| v.value()).collect();
        self.check_domain(&plain)
    }

    /// `dN/dE` at `energy` with the current parameter values.
    pub fn evaluate(&self, energy: f64) -> Result<f64> {
        self.evaluate_with(energy, &self.parameters().values())
    }

    /// `dN/dE` at `energy` for explicit parameter `values`.
    pub fn evaluate_with<S: Scalar>(&self, energy: f64, values: &[S]) -> Result<S> {
        check_energy(energy)?;
        self.checked(values)?;
        Ok(self.eval(energy, values))
    }

    /// Integral flux between `emin` and `emax` (cm^-2 s^-1).
    pub fn integral(&self, emin: f64, emax: f64) -> Result<f64> {
        self.integral_with(emin, emax, &self.parameters().values(), DEFAULT_INTEGRAL_STEPS)
    }

    /// Integral flux for explicit parameter `values` with `n_steps`
    /// log-Simpson steps.
    pub fn integral_with<S: Scalar>(&self, emin: f64, emax: f64, values: &[S], n_steps: usize) -> Result<S> {
        check_energy(emin)?;
        check_energy(emax)?;
        self.checked(values)?;
        Ok(integrate_log_simpson(|e| self.eval(e, values), emin, emax, n_steps))
    }

    /// Integral flux in every bin of `edges`.
    pub fn integral_bins<S: Scalar>(&self, edges: &[f64], values: &[S], n_steps: usize) -> Result<Vec<S>> {
        if let Some(&e) = edges.first() {
            check_energy(e)?;
        }
        self.checked(values)?;
        Ok(edges.windows(2).map(|w| integrate_log_simpson(|e| self.eval(e, values), w[0], w[1], n_steps)).collect())
    }

    /// Energy flux `int E dN/dE` between `emin` and `emax` (TeV cm^-2 s^-1).
    pub fn energy_flux(&self, emin: f64, emax: f64) -> Result<f64> {
        check_energy(emin)?;
        check_energy(emax)?;
        let values = self.parameters().values();
        self.check_domain(&values)?;
        Ok(integrate_log_simpson(|e| self.eval(e, &values) * e, emin, emax, 4 * DEFAULT_INTEGRAL_STEPS))
    }
}

impl From<PowerLaw> for SpectralModel {
    fn from(m: PowerLaw) -> Self {
        SpectralModel::PowerLaw(m)
    }
}

impl From<ExpCutoffPowerLaw> for SpectralModel {
    fn from(m: ExpCutoffPowerLaw) -> Self {
        SpectralModel::ExpCutoffPowerLaw(m)
    }
}

impl From<LogParabola> for SpectralModel {
    fn from(m: LogParabola) -> Self {
        SpectralModel::LogParabola(m)
    }
}

impl From<TemplateSpectral> for SpectralModel {
    fn from(m: TemplateSpectral) -> Self {
        SpectralModel::Template(m)
    }
}

impl From<PowerLawNorm> for SpectralModel {
    fn from(m: PowerLawNorm) -> Self {
        SpectralModel::PowerLawNorm(m)
    }
}
