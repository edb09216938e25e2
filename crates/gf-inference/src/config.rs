//! Fit engine configuration.

use gf_core::Result;
use serde::{Deserialize, Serialize};

/// Minimizer backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Bounded L-BFGS (gradient-based).
    #[default]
    Lbfgs,
    /// Nelder-Mead simplex (derivative-free).
    NelderMead,
}

/// Configuration for the minimizers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Convergence tolerance (gradient norm for L-BFGS, simplex spread for
    /// Nelder-Mead)
    pub tol: f64,
    /// Number of corrections kept by L-BFGS
    pub m: usize,
    /// Which minimizer to run
    pub backend: Backend,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10, backend: Backend::Lbfgs }
    }
}

impl OptimizerConfig {
    /// Parse from JSON; missing keys take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Configuration of a fit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Minimizer settings
    pub optimizer: OptimizerConfig,
    /// Estimate the covariance after minimizing
    pub covariance: bool,
    /// Relative finite-difference step of the Hessian, in factor space
    pub hessian_step: f64,
    /// Evaluate datasets on the rayon pool
    pub parallel: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self { optimizer: OptimizerConfig::default(), covariance: true, hessian_step: 1e-4, parallel: false }
    }
}

impl FitConfig {
    /// Parse from JSON; missing keys take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = FitConfig::from_json_str(r#"{"optimizer": {"backend": "nelder-mead", "max_iter": 50}}"#).unwrap();
        assert_eq!(cfg.optimizer.backend, Backend::NelderMead);
        assert_eq!(cfg.optimizer.max_iter, 50);
        assert_eq!(cfg.optimizer.m, 10);
        assert!(cfg.covariance);
        assert!(OptimizerConfig::from_json_str(r#"{"backend": "simplex"}"#).is_err());
    }
}
