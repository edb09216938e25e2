//! Core traits for gammafit
//!
//! The fit engine only sees a [`LikelihoodModel`]: a box-bounded objective over a
//! flat parameter vector. Datasets, models and IRFs stay behind this seam so
//! that the optimizer layer does not depend on any of them.

use crate::Result;

/// Objective model minimized by the fit engine.
///
/// `nll` returns the fit statistic to be minimized (for gammafit: the summed
/// Cash statistic, which is twice the negative Poisson log-likelihood up to a
/// data-only constant).
pub trait LikelihoodModel: Send + Sync {
    /// Number of (free) parameters
    fn dim(&self) -> usize;

    /// Parameter names
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds (min, max)
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Initial parameter values
    fn parameter_init(&self) -> Vec<f64>;

    /// Objective value at `params`
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of the objective. Default: central finite differences.
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut grad = vec![0.0; params.len()];
        let mut work = params.to_vec();
        for i in 0..params.len() {
            let eps = 1e-8_f64.sqrt() * params[i].abs().max(1.0);
            work[i] = params[i] + eps;
            let f_plus = self.nll(&work)?;
            work[i] = params[i] - eps;
            let f_minus = self.nll(&work)?;
            work[i] = params[i];
            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Parabola;

    impl LikelihoodModel for Parabola {
        fn dim(&self) -> usize {
            2
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["x".into(), "y".into()]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(-10.0, 10.0); 2]
        }

        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn nll(&self, params: &[f64]) -> Result<f64> {
            Ok((params[0] - 1.0).powi(2) + 3.0 * params[1].powi(2))
        }
    }

    #[test]
    fn test_default_gradient_is_central_difference() {
        let g = Parabola.grad_nll(&[2.0, 1.0]).unwrap();
        assert_relative_eq!(g[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(g[1], 6.0, epsilon = 1e-6);
    }
}
