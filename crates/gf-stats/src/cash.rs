//! Cash fit statistic for Poisson-distributed counts.
//!
//! `C = 2 (mu - n ln mu)`, i.e. twice the negative Poisson log-likelihood with
//! the data-only `ln n!` term dropped.
//!
//! The predicted counts `mu` are floored at [`CASH_TRUNCATION`] before the
//! logarithm. This is a numerical boundary: bins whose prediction is exactly
//! zero while counts are observed get a large but finite penalty instead of
//! `inf`.

use gf_ad::Scalar;

/// Floor applied to predicted counts before taking the logarithm.
pub const CASH_TRUNCATION: f64 = 1e-25;

/// Cash statistic for a single bin.
#[inline]
pub fn cash(n_on: f64, mu_on: f64) -> f64 {
    let mu = mu_on.max(CASH_TRUNCATION);
    if n_on > 0.0 { 2.0 * (mu - n_on * mu.ln()) } else { 2.0 * mu }
}

/// Cash statistic for a single bin, generic over [`Scalar`] so that analytic
/// parameter derivatives flow through dual numbers.
#[inline]
pub fn cash_generic<S: Scalar>(n_on: f64, mu_on: S) -> S {
    let mu = mu_on.max_s(S::from_f64(CASH_TRUNCATION));
    let two = S::from_f64(2.0);
    if n_on > 0.0 { two * (mu - mu.ln().scale(n_on)) } else { two * mu }
}

/// Summed Cash statistic over bins, skipping bins where `mask` is `false`.
///
/// `mask = None` includes every bin. Slices must have equal length.
pub fn cash_sum(n_on: &[f64], mu_on: &[f64], mask: Option<&[bool]>) -> f64 {
    debug_assert_eq!(n_on.len(), mu_on.len());
    match mask {
        Some(m) => n_on
            .iter()
            .zip(mu_on)
            .zip(m)
            .filter(|(_, keep)| **keep)
            .map(|((&n, &mu), _)| cash(n, mu))
            .sum(),
        None => n_on.iter().zip(mu_on).map(|(&n, &mu)| cash(n, mu)).sum(),
    }
}
