//! Forward-mode automatic differentiation via dual numbers.
//!
//! A [`Dual`] carries a primal value and a single tangent. Seeding one model
//! parameter with [`Dual::var`] and every other input with [`Dual::constant`]
//! yields the exact partial derivative with respect to that parameter.

use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A dual number for forward-mode AD.
///
/// `val` holds the primal value, `dot` holds the derivative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dual {
    /// Primal (function) value.
    pub val: f64,
    /// Tangent (derivative) value.
    pub dot: f64,
}

impl Dual {
    /// Create a constant (derivative = 0).
    #[inline]
    pub fn constant(val: f64) -> Self {
        Self { val, dot: 0.0 }
    }

    /// Create an independent variable (derivative = 1).
    #[inline]
    pub fn var(val: f64) -> Self {
        Self { val, dot: 1.0 }
    }

    /// Create a dual with explicit tangent.
    #[inline]
    pub fn new(val: f64, dot: f64) -> Self {
        Self { val, dot }
    }

    /// Apply a unary function with value `f` and slope `df` at `self.val`.
    #[inline]
    fn chain(self, f: f64, df: f64) -> Self {
        Self { val: f, dot: self.dot * df }
    }

    /// `ln x`.
    #[inline]
    pub fn ln(self) -> Self {
        self.chain(self.val.ln(), self.val.recip())
    }

    /// `exp x`.
    #[inline]
    pub fn exp(self) -> Self {
        let e = self.val.exp();
        self.chain(e, e)
    }

    /// `x^n` for a constant exponent.
    #[inline]
    pub fn powf(self, n: f64) -> Self {
        self.chain(self.val.powf(n), n * self.val.powf(n - 1.0))
    }

    /// `x^n` for an integer exponent.
    #[inline]
    pub fn powi(self, n: i32) -> Self {
        self.chain(self.val.powi(n), n as f64 * self.val.powi(n - 1))
    }

    /// `x^k` where both base and exponent carry tangents (`x > 0`).
    ///
    /// Spectral indices enter this way: `d/dk x^k = x^k ln x`.
    #[inline]
    pub fn powd(self, k: Self) -> Self {
        let v = self.val.powf(k.val);
        Self { val: v, dot: v * (k.dot * self.val.ln() + k.val * self.dot / self.val) }
    }

    /// `sqrt x`.
    #[inline]
    pub fn sqrt(self) -> Self {
        let r = self.val.sqrt();
        self.chain(r, 0.5 / r)
    }

    /// `|x|`; the slope at zero is taken as zero.
    #[inline]
    pub fn abs(self) -> Self {
        self.chain(self.val.abs(), if self.val == 0.0 { 0.0 } else { self.val.signum() })
    }

    /// Larger operand, tangent included.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        if other.val > self.val { other } else { self }
    }
}

// --- Arithmetic: Dual op Dual ---

impl Add for Dual {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self { val: self.val + rhs.val, dot: self.dot + rhs.dot }
    }
}

impl Sub for Dual {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self { val: self.val - rhs.val, dot: self.dot - rhs.dot }
    }
}

impl Mul for Dual {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self { val: self.val * rhs.val, dot: self.dot * rhs.val + self.val * rhs.dot }
    }
}

impl Div for Dual {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        Self {
            val: self.val / rhs.val,
            dot: (self.dot * rhs.val - self.val * rhs.dot) / (rhs.val * rhs.val),
        }
    }
}

impl Neg for Dual {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self { val: -self.val, dot: -self.dot }
    }
}

// --- Arithmetic: Dual op f64 ---

impl Mul<f64> for Dual {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: f64) -> Self {
        Self { val: self.val * rhs, dot: self.dot * rhs }
    }
}

impl Add<f64> for Dual {
    type Output = Self;
    #[inline]
    fn add(self, rhs: f64) -> Self {
        Self { val: self.val + rhs, dot: self.dot }
    }
}

impl Sum for Dual {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Dual::constant(0.0), |acc, x| acc + x)
    }
}

impl From<f64> for Dual {
    fn from(val: f64) -> Self {
        Self::constant(val)
    }
}

impl PartialOrd for Dual {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.val.partial_cmp(&other.val)
    }
}
