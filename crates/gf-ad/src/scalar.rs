//! [`Scalar`] trait: abstraction over `f64` and [`Dual`](crate::dual::Dual)
//! that enables writing model-evaluation code once, then reusing it
//! for both evaluation **and** forward-mode gradient computation.

use crate::dual::Dual;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A scalar type suitable for model evaluation.
///
/// Implemented for `f64` (plain evaluation) and `Dual` (forward-mode AD).
pub trait Scalar:
    Copy
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Sum
    + PartialOrd
    + Send
    + Sync
    + Sized
{
    /// Wrap an `f64` constant (derivative = 0 for AD types).
    fn from_f64(v: f64) -> Self;

    /// Extract the primal (function) value.
    fn value(&self) -> f64;

    /// Natural logarithm.
    fn ln(self) -> Self;

    /// Exponential.
    fn exp(self) -> Self;

    /// Power with f64 exponent.
    fn powf(self, n: f64) -> Self;

    /// Integer power.
    fn powi(self, n: i32) -> Self;

    /// Square root.
    fn sqrt(self) -> Self;

    /// Absolute value.
    fn abs(self) -> Self;

    /// Maximum of two values (non-smooth; passes derivative of the winner).
    fn max_s(self, other: Self) -> Self;

    /// `self^k` with a scalar exponent; `self` must be positive.
    #[inline]
    fn powd(self, k: Self) -> Self {
        (k * self.ln()).exp()
    }

    /// Multiply by an `f64` constant.
    #[inline]
    fn scale(self, k: f64) -> Self {
        self * Self::from_f64(k)
    }
}

// --- f64 implementation ---

impl Scalar for f64 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }

    #[inline]
    fn ln(self) -> Self {
        f64::ln(self)
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn powf(self, n: f64) -> Self {
        f64::powf(self, n)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    #[inline]
    fn abs(self) -> Self {
        f64::abs(self)
    }

    #[inline]
    fn max_s(self, other: Self) -> Self {
        f64::max(self, other)
    }

    #[inline]
    fn powd(self, k: Self) -> Self {
        f64::powf(self, k)
    }
}

// --- Dual implementation ---

impl Scalar for Dual {
    #[inline]
    fn from_f64(v: f64) -> Self {
        Dual::constant(v)
    }

    #[inline]
    fn value(&self) -> f64 {
        self.val
    }

    #[inline]
    fn ln(self) -> Self {
        Dual::ln(self)
    }

    #[inline]
    fn exp(self) -> Self {
        Dual::exp(self)
    }

    #[inline]
    fn powf(self, n: f64) -> Self {
        Dual::powf(self, n)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        Dual::powi(self, n)
    }

    #[inline]
    fn sqrt(self) -> Self {
        Dual::sqrt(self)
    }

    #[inline]
    fn abs(self) -> Self {
        Dual::abs(self)
    }

    #[inline]
    fn max_s(self, other: Self) -> Self {
        Dual::max(self, other)
    }

    #[inline]
    fn powd(self, k: Self) -> Self {
        Dual::powd(self, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Cash statistic for a single bin.
    fn cash_bin<S: Scalar>(obs: f64, expected: S) -> S {
        let expected = expected.max_s(S::from_f64(1e-25));
        let two = S::from_f64(2.0);
        if obs > 0.0 { two * (expected - S::from_f64(obs) * expected.ln()) } else { two * expected }
    }

    #[test]
    fn test_scalar_f64_cash() {
        let c = cash_bin::<f64>(10.0, 12.0);
        assert_relative_eq!(c, 2.0 * (12.0 - 10.0 * 12.0_f64.ln()), epsilon = 1e-12);
    }

    #[test]
    fn test_scalar_dual_cash_gradient() {
        // d/dlam 2 [lam - n ln(lam)] = 2 (1 - n/lam)
        let c = cash_bin(10.0, Dual::var(12.0));
        assert_relative_eq!(c.dot, 2.0 * (1.0 - 10.0 / 12.0), epsilon = 1e-12);
    }

    #[test]
    fn test_scalar_generic_code_works_for_both() {
        fn quadratic<S: Scalar>(x: S) -> S {
            x * x + S::from_f64(3.0) * x + S::from_f64(2.0)
        }

        let val: f64 = quadratic(3.0);
        assert_relative_eq!(val, 20.0, epsilon = 1e-12);

        let dual_result = quadratic(Dual::var(3.0));
        assert_relative_eq!(dual_result.val, 20.0, epsilon = 1e-12);
        assert_relative_eq!(dual_result.dot, 9.0, epsilon = 1e-12);
    }
}
