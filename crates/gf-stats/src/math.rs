//! Small numerically-stable math utilities shared by models and IRFs.

use gf_ad::Scalar;

/// Exponential with a conservative clamp to avoid overflow.
///
/// For `x > 700`, `exp(x)` overflows to `inf`. Spectral shapes with free
/// cutoffs can briefly visit such regions during a line search; clamping keeps
/// the objective finite so the optimizer can recover.
#[inline]
pub fn exp_clamped(x: f64) -> f64 {
    x.clamp(-700.0, 700.0).exp()
}

/// `n` log-spaced values between `start` and `stop` (inclusive).
///
/// Returns an empty vector for `n == 0` and `[start]` for `n == 1`.
pub fn logspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let (l0, l1) = (start.ln(), stop.ln());
            let step = (l1 - l0) / (n - 1) as f64;
            (0..n).map(|i| (l0 + step * i as f64).exp()).collect()
        }
    }
}

/// `n` linearly spaced values between `start` and `stop` (inclusive).
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Composite Simpson integration of `f` over `[a, b]` in `log(x)`.
///
/// `n_steps` is rounded up to the next even number. Suited to steeply falling
/// spectra where linear-space rules lose most of their accuracy in the first bin.
/// Generic over [`Scalar`] so integrated spectra keep their parameter
/// derivatives.
pub fn integrate_log_simpson<S, F>(f: F, a: f64, b: f64, n_steps: usize) -> S
where
    S: Scalar,
    F: Fn(f64) -> S,
{
    let n = (n_steps.max(2) + 1) & !1;
    let (la, lb) = (a.ln(), b.ln());
    let h = (lb - la) / n as f64;
    // dx = x dlnx
    let g = |lx: f64| {
        let x = lx.exp();
        f(x).scale(x)
    };
    let mut acc = g(la) + g(lb);
    for i in 1..n {
        let w = if i % 2 == 1 { 4.0 } else { 2.0 };
        acc = acc + g(la + h * i as f64).scale(w);
    }
    acc.scale(h / 3.0)
}

/// Signed square root: `sign(x) * sqrt(|x|)`.
#[inline]
pub fn signed_sqrt(x: f64) -> f64 {
    x.signum() * x.abs().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exp_clamped_is_finite_extremes() {
        for x in [-1e6, -100.0, 100.0, 1e6] {
            let y = exp_clamped(x);
            assert!(y.is_finite(), "x={} produced {}", x, y);
            assert!(y >= 0.0);
        }
        assert!((exp_clamped(1e6).ln() - 700.0).abs() < 1e-12);
    }

    #[test]
    fn test_logspace_endpoints() {
        let v = logspace(0.1, 100.0, 4);
        assert_eq!(v.len(), 4);
        assert_relative_eq!(v[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(v[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(v[3], 100.0, epsilon = 1e-10);
    }

    #[test]
    fn test_log_simpson_power_law() {
        // int_1^10 x^-2 dx = 0.9
        let v: f64 = integrate_log_simpson(|x| x.powi(-2), 1.0, 10.0, 32);
        assert_relative_eq!(v, 0.9, max_relative = 1e-5);
    }

    #[test]
    fn test_log_simpson_rounds_odd_steps() {
        let a: f64 = integrate_log_simpson(|x| x, 1.0, 2.0, 7);
        assert_relative_eq!(a, 1.5, max_relative = 1e-4);
    }
}
