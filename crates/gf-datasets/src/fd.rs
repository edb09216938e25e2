//! Finite-difference derivatives with respect to shared parameters.

use gf_core::Result;
use gf_models::Parameter;

/// Step relative to `max(|value|, scale)`.
pub const FD_REL_STEP: f64 = 1e-4;

/// `d f / d p` by central differences, one-sided next to a bound.
///
/// `p` is restored to its original value before returning, also when `f`
/// fails.
pub fn derivative<F: Fn() -> Result<f64>>(p: &Parameter, f: F) -> Result<f64> {
    let v = p.value();
    let h = FD_REL_STEP * v.abs().max(p.scale());
    let (a, b) = if v + h > p.max() {
        (v - h, v)
    } else if v - h < p.min() {
        (v, v + h)
    } else {
        (v - h, v + h)
    };
    let eval_at = |x: f64| -> Result<f64> {
        p.set_value(x)?;
        f()
    };
    let fb = eval_at(b);
    let fa = eval_at(a);
    p.set_value(v)?;
    Ok((fb? - fa?) / (b - a))
}
