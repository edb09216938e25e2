//! Temporal models: dimensionless light curves (times in MJD days).

use std::f64::consts::{PI, SQRT_2};

use gf_core::{Error, Result};
use statrs::function::erf::erf;

use crate::parameter::Parameter;
use crate::parameters::Parameters;

/// Any temporal model.
#[derive(Debug, Clone)]
pub enum TemporalModel {
    /// Constant light curve.
    Constant,
    /// `alpha + beta (t - t_ref)`.
    Linear {
        /// Value at `t_ref`.
        alpha: Parameter,
        /// Slope per day.
        beta: Parameter,
        /// Reference time (frozen).
        t_ref: Parameter,
    },
    /// `exp(-(t - t_ref) / t0)`.
    ExpDecay {
        /// Decay time (days).
        t0: Parameter,
        /// Reference time (frozen).
        t_ref: Parameter,
    },
    /// `exp(-(t - t_ref)^2 / (2 sigma^2))`.
    Gaussian {
        /// Peak time.
        t_ref: Parameter,
        /// Width (days).
        sigma: Parameter,
    },
}

impl TemporalModel {
    /// Linear light curve.
    pub fn linear(alpha: f64, beta: f64, t_ref: f64) -> Self {
        TemporalModel::Linear {
            alpha: Parameter::new("alpha", alpha),
            beta: Parameter::new("beta", beta).with_unit("d-1"),
            t_ref: Parameter::new("t_ref", t_ref).with_unit("d").with_frozen(true),
        }
    }

    /// Exponential decay.
    pub fn exp_decay(t0: f64, t_ref: f64) -> Self {
        TemporalModel::ExpDecay {
            t0: Parameter::new("t0", t0).with_unit("d"),
            t_ref: Parameter::new("t_ref", t_ref).with_unit("d").with_frozen(true),
        }
    }

    /// Gaussian flare.
    pub fn gaussian(t_ref: f64, sigma: f64) -> Self {
        TemporalModel::Gaussian {
            t_ref: Parameter::new("t_ref", t_ref).with_unit("d"),
            sigma: Parameter::new("sigma", sigma).with_unit("d"),
        }
    }

    /// Model type tag.
    pub fn tag(&self) -> &'static str {
        match self {
            TemporalModel::Constant => "ConstantTemporalModel",
            TemporalModel::Linear { .. } => "LinearTemporalModel",
            TemporalModel::ExpDecay { .. } => "ExpDecayTemporalModel",
            TemporalModel::Gaussian { .. } => "GaussianTemporalModel",
        }
    }

    /// Parameters.
    pub fn parameters(&self) -> Parameters {
        match self {
            TemporalModel::Constant => Parameters::default(),
            TemporalModel::Linear { alpha, beta, t_ref } => Parameters::new([alpha.clone(), beta.clone(), t_ref.clone()]),
            TemporalModel::ExpDecay { t0, t_ref } => Parameters::new([t0.clone(), t_ref.clone()]),
            TemporalModel::Gaussian { t_ref, sigma } => Parameters::new([t_ref.clone(), sigma.clone()]),
        }
    }

    fn check_domain(&self) -> Result<()> {
        let (name, v) = match self {
            TemporalModel::ExpDecay { t0, .. } => ("t0", t0.value()),
            TemporalModel::Gaussian { sigma, .. } => ("sigma", sigma.value()),
            _ => return Ok(()),
        };
        if !(v > 0.0) {
            return Err(Error::ParameterDomain(format!("{} must be > 0, got {}", name, v)));
        }
        Ok(())
    }

    /// Light-curve value at time `t`.
    pub fn evaluate(&self, t: f64) -> Result<f64> {
        self.check_domain()?;
        Ok(match self {
            TemporalModel::Constant => 1.0,
            TemporalModel::Linear { alpha, beta, t_ref } => alpha.value() + beta.value() * (t - t_ref.value()),
            TemporalModel::ExpDecay { t0, t_ref } => (-(t - t_ref.value()) / t0.value()).exp(),
            TemporalModel::Gaussian { t_ref, sigma } => (-0.5 * ((t - t_ref.value()) / sigma.value()).powi(2)).exp(),
        })
    }

    /// Mean of the light curve over `[t_start, t_stop]`.
    pub fn integral(&self, t_start: f64, t_stop: f64) -> Result<f64> {
        if !(t_stop > t_start) {
            return Err(Error::Validation(format!("empty time interval [{}, {}]", t_start, t_stop)));
        }
        self.check_domain()?;
        let dt = t_stop - t_start;
        let area = match self {
            TemporalModel::Constant => dt,
            TemporalModel::Linear { alpha, beta, t_ref } => {
                let (a, b) = (t_start - t_ref.value(), t_stop - t_ref.value());
                alpha.value() * dt + 0.5 * beta.value() * (b * b - a * a)
            }
            TemporalModel::ExpDecay { t0, t_ref } => {
                let (a, b) = (t_start - t_ref.value(), t_stop - t_ref.value());
                let t0 = t0.value();
                t0 * ((-a / t0).exp() - (-b / t0).exp())
            }
            TemporalModel::Gaussian { t_ref, sigma } => {
                let s = sigma.value();
                let (a, b) = ((t_start - t_ref.value()) / (SQRT_2 * s), (t_stop - t_ref.value()) / (SQRT_2 * s));
                s * (PI / 2.0).sqrt() * (erf(b) - erf(a))
            }
        };
        Ok(area / dt)
    }

    /// Duration-weighted mean over several intervals.
    pub fn integral_intervals(&self, intervals: &[(f64, f64)]) -> Result<f64> {
        let total: f64 = intervals.iter().map(|(a, b)| b - a).sum();
        if intervals.is_empty() || !(total > 0.0) {
            return Err(Error::Validation("no time intervals to integrate over".into()));
        }
        let mut acc = 0.0;
        for &(a, b) in intervals {
            acc += self.integral(a, b)? * (b - a);
        }
        Ok(acc / total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant_mean_is_one() {
        assert_eq!(TemporalModel::Constant.integral(0.0, 5.0).unwrap(), 1.0);
    }

    #[test]
    fn test_linear_mean_is_midpoint_value() {
        let m = TemporalModel::linear(1.0, 0.5, 10.0);
        assert_relative_eq!(m.integral(10.0, 14.0).unwrap(), 2.0, max_relative = 1e-12);
    }

    #[test]
    fn test_exp_decay_integral() {
        let m = TemporalModel::exp_decay(2.0, 0.0);
        // mean of exp(-t/2) on [0, 2] = (1 - e^-1)
        assert_relative_eq!(m.integral(0.0, 2.0).unwrap(), 1.0 - (-1.0f64).exp(), max_relative = 1e-12);
    }

    #[test]
    fn test_gaussian_full_integral() {
        let m = TemporalModel::gaussian(50.0, 1.5);
        let mean = m.integral(0.0, 100.0).unwrap();
        assert_relative_eq!(mean * 100.0, 1.5 * (2.0 * PI).sqrt(), max_relative = 1e-9);
        assert_relative_eq!(m.evaluate(50.0).unwrap(), 1.0);
    }

    #[test]
    fn test_weighted_intervals() {
        let m = TemporalModel::linear(0.0, 1.0, 0.0);
        // means 0.5 over [0, 1] and 2.5 over [2, 3]
        assert_relative_eq!(m.integral_intervals(&[(0.0, 1.0), (2.0, 3.0)]).unwrap(), 1.5, max_relative = 1e-12);
        assert!(m.integral(1.0, 1.0).is_err());
    }
}
