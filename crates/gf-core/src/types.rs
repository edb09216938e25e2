//! Common data types for gammafit

use serde::{Deserialize, Serialize};

/// Best-fit estimate of a single model parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEstimate {
    /// Qualified parameter name (`<model>.<parameter>`)
    pub name: String,
    /// Best-fit (or fixed) value
    pub value: f64,
    /// 1-sigma error from the covariance diagonal. `None` when undefined.
    pub error: Option<f64>,
    /// Unit label
    pub unit: String,
    /// Whether the parameter was held fixed during the fit
    pub frozen: bool,
    /// Whether the value ended on (or within tolerance of) one of its bounds
    pub at_bound: bool,
}

/// Fit result containing parameter estimates and uncertainties
///
/// An immutable snapshot produced at the end of a fit run. Non-convergence and
/// a degenerate covariance are reported through [`FitResult::converged`] and
/// [`FitResult::errors_defined`]; callers must check both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// All parameters seen by the fit, free and frozen, in joint order
    pub parameters: Vec<ParameterEstimate>,

    /// Names of the free parameters, in covariance row/column order
    pub free_names: Vec<String>,

    /// Covariance matrix of the free parameters (row-major, N×N, value units).
    /// `None` if the Hessian could not be inverted.
    pub covariance: Option<Vec<f64>>,

    /// Total fit statistic (summed Cash statistic) at the best point
    pub total_stat: f64,

    /// Convergence status
    pub converged: bool,

    /// False when the Hessian at the optimum was singular or indefinite
    pub errors_defined: bool,

    /// Number of optimizer iterations
    pub n_iter: usize,

    /// Number of objective evaluations
    pub n_fev: usize,

    /// Number of gradient evaluations
    pub n_gev: usize,

    /// Optimizer termination message
    pub message: String,

    /// Human-readable diagnostics (bounds hit, identifiability, ...)
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl FitResult {
    /// Create a new fit result without covariance
    pub fn new(
        parameters: Vec<ParameterEstimate>,
        free_names: Vec<String>,
        total_stat: f64,
        converged: bool,
        n_iter: usize,
        n_fev: usize,
        n_gev: usize,
    ) -> Self {
        Self {
            parameters,
            free_names,
            covariance: None,
            total_stat,
            converged,
            errors_defined: false,
            n_iter,
            n_fev,
            n_gev,
            message: String::new(),
            warnings: Vec::new(),
        }
    }

    /// Attach a covariance matrix; marks errors as defined.
    pub fn with_covariance(mut self, covariance: Vec<f64>) -> Self {
        self.covariance = Some(covariance);
        self.errors_defined = true;
        self
    }

    /// Attach the optimizer termination message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Look up a parameter estimate by qualified name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterEstimate> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Best-fit values of the free parameters, in covariance order.
    pub fn free_values(&self) -> Vec<f64> {
        self.free_names
            .iter()
            .filter_map(|n| self.parameter(n).map(|p| p.value))
            .collect()
    }

    /// Names of free parameters that ended on a bound.
    pub fn parameters_at_bound(&self) -> Vec<&str> {
        self.parameters.iter().filter(|p| p.at_bound && !p.frozen).map(|p| p.name.as_str()).collect()
    }

    /// Get correlation matrix element (i, j) over free parameters.
    /// Returns `None` if covariance is unavailable.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.free_names.len();
        if i >= n || j >= n {
            return None;
        }
        let var_i = cov[i * n + i];
        let var_j = cov[j * n + j];
        if var_i <= 0.0 || var_j <= 0.0 {
            return None;
        }
        Some(cov[i * n + j] / (var_i.sqrt() * var_j.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn estimate(name: &str, value: f64, error: Option<f64>) -> ParameterEstimate {
        ParameterEstimate {
            name: name.into(),
            value,
            error,
            unit: String::new(),
            frozen: false,
            at_bound: false,
        }
    }

    #[test]
    fn test_fit_result() {
        let result = FitResult::new(
            vec![estimate("src.amplitude", 1.0, None), estimate("src.index", 2.0, None)],
            vec!["src.amplitude".into(), "src.index".into()],
            123.45,
            true,
            10,
            100,
            20,
        );
        assert_eq!(result.parameters.len(), 2);
        assert!(result.converged);
        assert!(!result.errors_defined);
        assert!(result.covariance.is_none());
        assert_eq!(result.free_values(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_correlation_from_covariance() {
        let result = FitResult::new(
            vec![estimate("a", 0.0, Some(2.0)), estimate("b", 0.0, Some(3.0))],
            vec!["a".into(), "b".into()],
            0.0,
            true,
            1,
            1,
            1,
        )
        .with_covariance(vec![4.0, 3.0, 3.0, 9.0]);

        assert!(result.errors_defined);
        assert_relative_eq!(result.correlation(0, 1).unwrap(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(result.correlation(1, 1).unwrap(), 1.0, epsilon = 1e-12);
        assert!(result.correlation(2, 0).is_none());
    }

    #[test]
    fn test_serde_roundtrip_keeps_flags() {
        let result = FitResult::new(vec![estimate("a", 1.5, None)], vec!["a".into()], 3.0, false, 1, 2, 0)
            .with_message("MaxItersReached");
        let json = serde_json::to_string(&result).unwrap();
        let back: FitResult = serde_json::from_str(&json).unwrap();
        assert!(!back.converged);
        assert_eq!(back.message, "MaxItersReached");
        assert_eq!(back.parameter("a").unwrap().value, 1.5);
    }
}
