//! Maximum-likelihood fits of [`Datasets`].
//!
//! [`Fit::run`] minimizes the joint Cash statistic over every free
//! parameter and estimates the covariance from the finite-difference
//! Hessian. The statistic is `-2 ln L`, so the covariance is `2 H^-1`.
//! Scans ([`Fit::stat_profile`], [`Fit::stat_surface`], [`Fit::confidence`])
//! hold the scanned parameters fixed and re-fit the others at every point.

use nalgebra::DMatrix;

use gf_core::traits::LikelihoodModel;
use gf_core::{Error, FitResult, ParameterEstimate, Result};
use gf_datasets::Datasets;
use gf_models::Parameter;

use crate::cancel::CancelToken;
use crate::config::FitConfig;
use crate::objective::{DatasetsObjective, NllObjective};
use crate::optimizer::{OptimizationResult, minimizer_for};

/// Relative distance to a bound below which a parameter counts as on it.
const AT_BOUND_RTOL: f64 = 1e-4;

/// Hessian condition number above which the fit is reported as poorly
/// constrained.
const MAX_CONDITION: f64 = 1e8;

/// Covariance of the free parameters.
#[derive(Debug, Clone)]
pub struct Covariance {
    /// Free parameter names, in row/column order.
    pub names: Vec<String>,
    /// Row-major matrix in value units; `None` if the Hessian is singular
    /// or indefinite.
    pub matrix: Option<Vec<f64>>,
    /// Diagnostics.
    pub warnings: Vec<String>,
}

/// One-dimensional statistic profile.
#[derive(Debug, Clone)]
pub struct ProfileScan {
    /// Scanned values (only those reached before a cancellation).
    pub values: Vec<f64>,
    /// Joint statistic after re-fitting the other free parameters.
    pub stat: Vec<f64>,
    /// Convergence of each re-fit.
    pub converged: Vec<bool>,
    /// Whether the scan stopped early.
    pub cancelled: bool,
}

/// Two-dimensional statistic surface.
#[derive(Debug, Clone)]
pub struct SurfaceScan {
    /// Values of the first parameter.
    pub x_values: Vec<f64>,
    /// Values of the second parameter.
    pub y_values: Vec<f64>,
    /// Statistic, row-major over `(x, y)`; shorter than
    /// `x_values.len() * y_values.len()` after a cancellation.
    pub stat: Vec<f64>,
    /// Whether the scan stopped early.
    pub cancelled: bool,
}

/// Profile-likelihood confidence interval around the current value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    /// Best-fit value the interval is built around.
    pub value: f64,
    /// Distance to the upper end, `None` if no crossing inside the bounds.
    pub errp: Option<f64>,
    /// Distance to the lower end, `None` if no crossing inside the bounds.
    pub errn: Option<f64>,
}

/// Values and frozen flags of every parameter, restored after a scan.
struct Snapshot(Vec<(Parameter, f64, bool)>);

impl Snapshot {
    fn take(datasets: &Datasets) -> Self {
        Self(
            datasets
                .named_parameters()
                .into_iter()
                .filter(|(_, p)| !p.is_linked())
                .map(|(_, p)| {
                    let (v, f) = (p.value(), p.is_frozen());
                    (p, v, f)
                })
                .collect(),
        )
    }

    fn restore_values(&self) -> Result<()> {
        for (p, v, _) in &self.0 {
            p.set_value(*v)?;
        }
        Ok(())
    }

    fn restore(&self) -> Result<()> {
        for (p, _, frozen) in &self.0 {
            if *frozen { p.freeze() } else { p.unfreeze() }
        }
        self.restore_values()
    }
}

/// Fit engine.
#[derive(Debug, Clone, Default)]
pub struct Fit {
    config: FitConfig,
    cancel: CancelToken,
}

impl Fit {
    /// Fit with `config`.
    pub fn new(config: FitConfig) -> Self {
        Self { config, cancel: CancelToken::new() }
    }

    /// Builder: use an externally owned cancellation token.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Configuration.
    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Token that stops running fits and scans.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Minimize, then (if configured) estimate the covariance.
    ///
    /// Parameters are left at the best point found. Non-convergence and a
    /// singular Hessian are reported in the result, not as errors.
    pub fn run(&self, datasets: &Datasets) -> Result<FitResult> {
        let mut result = self.optimize(datasets)?;
        if !self.config.covariance || result.free_names.is_empty() || self.cancel.is_cancelled() {
            return Ok(result);
        }
        let cov = self.covariance(datasets)?;
        result.warnings.extend(cov.warnings);
        result.parameters = estimates(datasets);
        if let Some(matrix) = cov.matrix {
            result = result.with_covariance(matrix);
        }
        Ok(result)
    }

    /// Minimize the joint statistic over the free parameters.
    pub fn optimize(&self, datasets: &Datasets) -> Result<FitResult> {
        let objective = DatasetsObjective::new(datasets, self.config.parallel);
        let params = objective.parameters();
        params.autoscale();
        for p in params.iter() {
            p.set_error(None);
        }

        let opt = if objective.dim() == 0 {
            OptimizationResult {
                parameters: Vec::new(),
                fval: datasets.stat_sum_with(self.config.parallel)?,
                n_iter: 0,
                n_fev: 1,
                n_gev: 0,
                converged: true,
                message: "no free parameters".to_string(),
            }
        } else {
            let init = objective.parameter_init();
            let bounds = objective.parameter_bounds();
            log::debug!("minimizing over {} free parameters", init.len());
            minimizer_for(&self.config.optimizer).minimize(&NllObjective(&objective), &init, &bounds, &self.cancel)?
        };

        params.set_factors(&opt.parameters)?;
        let total_stat = datasets.stat_sum_with(self.config.parallel)?;
        if !opt.converged {
            log::warn!("fit did not converge: {}", opt.message);
        }

        let mut result = FitResult::new(
            estimates(datasets),
            objective.parameter_names(),
            total_stat,
            opt.converged,
            opt.n_iter as usize,
            opt.n_fev,
            opt.n_gev,
        )
        .with_message(opt.message);

        let at_bound: Vec<String> = result.parameters_at_bound().into_iter().map(String::from).collect();
        for name in at_bound {
            log::warn!("parameter '{}' is at a bound", name);
            result.warnings.push(format!("Parameter '{}' is at a bound", name));
        }
        Ok(result)
    }

    /// Covariance of the free parameters at their current values.
    ///
    /// Parameter errors are set from the diagonal, or cleared when the
    /// Hessian cannot be inverted.
    pub fn covariance(&self, datasets: &Datasets) -> Result<Covariance> {
        let objective = DatasetsObjective::new(datasets, self.config.parallel);
        let x = objective.parameter_init();
        let names = objective.parameter_names();
        let hessian = self.hessian(&objective, &x);
        objective.parameters().set_factors(&x)?;
        let hessian = hessian?;

        let mut warnings = identifiability_warnings(&hessian, &names);
        let params = objective.parameters();
        let matrix = match invert_hessian(&hessian) {
            Some(inv) => {
                let scales = params.scales();
                let n = x.len();
                let cov: Vec<f64> =
                    (0..n).flat_map(|i| (0..n).map(move |j| (i, j))).map(|(i, j)| 2.0 * inv[(i, j)] * scales[i] * scales[j]).collect();
                for (i, p) in params.iter().enumerate() {
                    p.set_error(Some(cov[i * n + i].sqrt()));
                }
                Some(cov)
            }
            None => {
                log::warn!("Hessian is singular or indefinite; parameter errors are undefined");
                warnings.push("Hessian is singular or indefinite: errors undefined".into());
                for p in params.iter() {
                    p.set_error(None);
                }
                None
            }
        };
        Ok(Covariance { names, matrix, warnings })
    }

    /// `H_ij = (g_i(x + eps e_j) - g_i(x)) / eps`, symmetrized.
    fn hessian(&self, objective: &DatasetsObjective<'_>, x: &[f64]) -> Result<DMatrix<f64>> {
        let n = x.len();
        let grad_center = objective.grad_nll(x)?;
        let mut hessian = DMatrix::zeros(n, n);
        let mut work = x.to_vec();
        for j in 0..n {
            let eps = self.config.hessian_step * x[j].abs().max(1.0);
            work[j] = x[j] + eps;
            let grad_plus = objective.grad_nll(&work)?;
            work[j] = x[j];
            for i in 0..n {
                hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / eps;
            }
        }
        let ht = hessian.transpose();
        Ok((&hessian + &ht) * 0.5)
    }

    /// Joint statistic with `param` fixed at each of `values` and the other
    /// free parameters re-fitted. All parameters are restored afterwards.
    pub fn stat_profile(&self, datasets: &Datasets, param: &Parameter, values: &[f64]) -> Result<ProfileScan> {
        require_member(datasets, param)?;
        let snapshot = Snapshot::take(datasets);
        param.freeze();
        let scan = self.profile_points(datasets, &snapshot, param, values);
        snapshot.restore()?;
        scan
    }

    fn profile_points(
        &self,
        datasets: &Datasets,
        snapshot: &Snapshot,
        param: &Parameter,
        values: &[f64],
    ) -> Result<ProfileScan> {
        let mut scan = ProfileScan { values: Vec::new(), stat: Vec::new(), converged: Vec::new(), cancelled: false };
        for &v in values {
            if self.cancel.is_cancelled() {
                scan.cancelled = true;
                break;
            }
            snapshot.restore_values()?;
            param.set_value(v)?;
            let r = self.optimize(datasets)?;
            scan.values.push(v);
            scan.stat.push(r.total_stat);
            scan.converged.push(r.converged);
        }
        Ok(scan)
    }

    /// Joint statistic on the grid `xs x ys` of two parameters, re-fitting
    /// the other free parameters at every point.
    pub fn stat_surface(
        &self,
        datasets: &Datasets,
        x: &Parameter,
        xs: &[f64],
        y: &Parameter,
        ys: &[f64],
    ) -> Result<SurfaceScan> {
        require_member(datasets, x)?;
        require_member(datasets, y)?;
        if x.ptr_eq(y) {
            return Err(Error::Validation("surface scan needs two different parameters".into()));
        }
        let snapshot = Snapshot::take(datasets);
        x.freeze();
        y.freeze();
        let scan = self.surface_points(datasets, &snapshot, x, xs, y, ys);
        snapshot.restore()?;
        scan
    }

    fn surface_points(
        &self,
        datasets: &Datasets,
        snapshot: &Snapshot,
        x: &Parameter,
        xs: &[f64],
        y: &Parameter,
        ys: &[f64],
    ) -> Result<SurfaceScan> {
        let mut scan =
            SurfaceScan { x_values: xs.to_vec(), y_values: ys.to_vec(), stat: Vec::with_capacity(xs.len() * ys.len()), cancelled: false };
        'grid: for &vx in xs {
            for &vy in ys {
                if self.cancel.is_cancelled() {
                    scan.cancelled = true;
                    break 'grid;
                }
                snapshot.restore_values()?;
                x.set_value(vx)?;
                y.set_value(vy)?;
                scan.stat.push(self.optimize(datasets)?.total_stat);
            }
        }
        Ok(scan)
    }

    /// Interval where the profile statistic stays within `sigma^2` of its
    /// value at the current (best-fit) point.
    ///
    /// Each side is bracketed by doubling steps starting at the parameter
    /// error (or a tenth of its magnitude) and refined by bisection.
    pub fn confidence(&self, datasets: &Datasets, param: &Parameter, sigma: f64) -> Result<ConfidenceInterval> {
        require_member(datasets, param)?;
        if sigma.is_nan() || sigma <= 0.0 {
            return Err(Error::Validation(format!("sigma must be positive, got {}", sigma)));
        }
        let best = param.value();
        let stat_min = datasets.stat_sum_with(self.config.parallel)?;
        let target = sigma * sigma;
        let step = param.error().filter(|e| *e > 0.0).unwrap_or(0.1 * best.abs().max(param.scale()));

        let delta = |v: f64| -> Result<f64> {
            let scan = self.stat_profile(datasets, param, &[v])?;
            if scan.cancelled {
                return Err(Error::Cancelled);
            }
            Ok(scan.stat[0] - stat_min - target)
        };

        let mut ends = [None, None];
        for (k, dir) in [1.0, -1.0].into_iter().enumerate() {
            let bound = if dir > 0.0 { param.max() } else { param.min() };
            let (mut inside, mut outside, mut s) = (best, None, step);
            for _ in 0..30 {
                let v = if dir > 0.0 { (best + s).min(bound) } else { (best - s).max(bound) };
                if delta(v)? > 0.0 {
                    outside = Some(v);
                    break;
                }
                inside = v;
                if v == bound {
                    break;
                }
                s *= 2.0;
            }
            let Some(mut outside) = outside else {
                log::warn!("no {} confidence limit for '{}' inside its bounds", if dir > 0.0 { "upper" } else { "lower" }, param.name());
                continue;
            };
            for _ in 0..60 {
                if (outside - inside).abs() <= 1e-6 * step {
                    break;
                }
                let mid = 0.5 * (inside + outside);
                if delta(mid)? > 0.0 {
                    outside = mid;
                } else {
                    inside = mid;
                }
            }
            ends[k] = Some((0.5 * (inside + outside) - best).abs());
        }
        Ok(ConfidenceInterval { value: best, errp: ends[0], errn: ends[1] })
    }
}

fn require_member(datasets: &Datasets, param: &Parameter) -> Result<()> {
    if datasets.named_parameters().iter().any(|(_, p)| p.ptr_eq(param)) {
        Ok(())
    } else {
        Err(Error::Validation(format!("parameter '{}' is not used by these datasets", param.name())))
    }
}

fn estimates(datasets: &Datasets) -> Vec<ParameterEstimate> {
    datasets
        .named_parameters()
        .into_iter()
        .map(|(name, p)| ParameterEstimate {
            name,
            value: p.value(),
            error: p.error(),
            unit: p.unit(),
            frozen: !p.is_free(),
            at_bound: p.at_bound(AT_BOUND_RTOL),
        })
        .collect()
}

/// Cholesky inverse, falling back to LU. `None` unless every variance is
/// finite and positive.
fn invert_hessian(hessian: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = hessian.nrows();
    let inv = match nalgebra::linalg::Cholesky::new(hessian.clone()) {
        Some(chol) => chol.inverse(),
        None => hessian.clone().lu().try_inverse()?,
    };
    (0..n).all(|i| inv[(i, i)].is_finite() && inv[(i, i)] > 0.0).then_some(inv)
}

/// Conditioning and flat-direction diagnostics of the Hessian.
fn identifiability_warnings(hessian: &DMatrix<f64>, names: &[String]) -> Vec<String> {
    let mut warnings = Vec::new();
    if hessian.nrows() > 0 {
        let svals = hessian.clone().svd(false, false).singular_values;
        let s_max = svals.iter().fold(0.0_f64, |a, &b| a.max(b));
        let s_min = svals.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        if s_min > 0.0 && s_max / s_min > MAX_CONDITION {
            warnings.push(format!("Hessian condition number = {:.1e}: fit may be poorly constrained", s_max / s_min));
        }
    }
    for (i, name) in names.iter().enumerate() {
        if hessian[(i, i)].abs() < 1e-12 {
            warnings.push(format!("Parameter '{}': near-zero Hessian diagonal, not constrained by the data", name));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_invert_hessian_rejects_singular() {
        let h = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 8.0]);
        let inv = invert_hessian(&h).unwrap();
        assert_relative_eq!(inv[(0, 0)], 0.5);
        assert_relative_eq!(inv[(1, 1)], 0.125);

        let singular = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        assert!(invert_hessian(&singular).is_none());

        let indefinite = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        assert!(invert_hessian(&indefinite).is_none());
    }

    #[test]
    fn test_identifiability_warnings() {
        let names = vec!["a".to_string(), "b".to_string()];
        let good = DMatrix::from_row_slice(2, 2, &[2.0, 0.1, 0.1, 3.0]);
        assert!(identifiability_warnings(&good, &names).is_empty());

        let flat = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 0.0]);
        let w = identifiability_warnings(&flat, &names);
        assert!(w.iter().any(|m| m.contains("'b'")));

        let stiff = DMatrix::from_row_slice(2, 2, &[1e10, 0.0, 0.0, 1e-2]);
        assert!(identifiability_warnings(&stiff, &names).iter().any(|m| m.contains("condition number")));
    }
}
