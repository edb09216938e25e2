//! Summary statistics for an observed-counts / expected-background pair.

use crate::cash::cash;
use serde::{Deserialize, Serialize};

/// Cash-based counts statistic for `n_on` observed counts over a known
/// background expectation `mu_bkg`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CashCountsStatistic {
    /// Observed counts.
    pub n_on: f64,
    /// Expected background counts.
    pub mu_bkg: f64,
}

impl CashCountsStatistic {
    /// Create a statistic for one (counts, background) pair.
    pub fn new(n_on: f64, mu_bkg: f64) -> Self {
        Self { n_on, mu_bkg }
    }

    /// Excess counts `n_on - mu_bkg`.
    pub fn excess(&self) -> f64 {
        self.n_on - self.mu_bkg
    }

    /// Symmetric excess error, `sqrt(n_on)`.
    pub fn error(&self) -> f64 {
        self.n_on.max(0.0).sqrt()
    }

    /// Cash statistic of the background-only hypothesis.
    pub fn stat_null(&self) -> f64 {
        cash(self.n_on, self.mu_bkg)
    }

    /// Cash statistic at the best-fit excess (`mu = n_on`).
    pub fn stat_max(&self) -> f64 {
        cash(self.n_on, self.n_on)
    }

    /// Test statistic `stat_null - stat_max` (non-negative).
    pub fn ts(&self) -> f64 {
        (self.stat_null() - self.stat_max()).max(0.0)
    }

    /// Signed significance `sign(excess) * sqrt(ts)`.
    pub fn sqrt_ts(&self) -> f64 {
        self.excess().signum() * self.ts().sqrt()
    }

    /// One-sided p-value of the background-only hypothesis from `sqrt_ts`.
    pub fn p_value(&self) -> f64 {
        0.5 * statrs::function::erf::erfc(self.sqrt_ts() / std::f64::consts::SQRT_2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_excess_and_error() {
        let s = CashCountsStatistic::new(13.0, 5.5);
        assert_relative_eq!(s.excess(), 7.5, epsilon = 1e-15);
        assert_relative_eq!(s.error(), 13.0_f64.sqrt(), epsilon = 1e-15);
    }

    #[test]
    fn test_ts_closed_form() {
        // ts = 2 [mu - n + n ln(n / mu)]
        let (n, mu) = (13.0_f64, 5.5_f64);
        let s = CashCountsStatistic::new(n, mu);
        let expected = 2.0 * (mu - n + n * (n / mu).ln());
        assert_relative_eq!(s.ts(), expected, epsilon = 1e-10);
        assert!(s.sqrt_ts() > 0.0);
    }

    #[test]
    fn test_deficit_gives_negative_significance() {
        let s = CashCountsStatistic::new(2.0, 6.0);
        assert!(s.sqrt_ts() < 0.0);
        assert!(s.p_value() > 0.5);
    }

    #[test]
    fn test_no_excess_is_zero() {
        let s = CashCountsStatistic::new(4.0, 4.0);
        assert_relative_eq!(s.ts(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(s.p_value(), 0.5, epsilon = 1e-12);
    }
}
