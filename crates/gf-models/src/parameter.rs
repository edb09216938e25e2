//! Shared model parameters.
//!
//! A [`Parameter`] is a cheap-to-clone handle: every clone refers to the same
//! value, so a model used by several datasets reads one canonical value that
//! the fit engine updates in one place. Identity (not name) decides whether
//! two handles are the same parameter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use gf_core::{Error, Result};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct ParameterData {
    name: String,
    value: f64,
    unit: String,
    min: f64,
    max: f64,
    frozen: bool,
    scale: f64,
    error: Option<f64>,
    link: Option<Parameter>,
}

/// Power of ten closest below `|value|`, or 1 for zero / non-finite values.
fn auto_scale(value: f64) -> f64 {
    if value != 0.0 && value.is_finite() { 10f64.powf(value.abs().log10().floor()) } else { 1.0 }
}

/// Handle to a model parameter.
#[derive(Clone)]
pub struct Parameter {
    id: u64,
    inner: Arc<RwLock<ParameterData>>,
}

impl Parameter {
    /// Unbounded, free parameter.
    pub fn new(name: &str, value: f64) -> Self {
        let data = ParameterData {
            name: name.to_string(),
            value,
            unit: String::new(),
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            frozen: false,
            scale: auto_scale(value),
            error: None,
            link: None,
        };
        Self { id: NEXT_ID.fetch_add(1, Ordering::Relaxed), inner: Arc::new(RwLock::new(data)) }
    }

    /// Parameter with bounds `[min, max]`; `value` must lie inside.
    pub fn bounded(name: &str, value: f64, min: f64, max: f64) -> Result<Self> {
        let p = Self::new(name, value);
        p.set_bounds(min, max)?;
        Ok(p)
    }

    /// Builder: set the unit.
    pub fn with_unit(self, unit: &str) -> Self {
        self.write().unit = unit.to_string();
        self
    }

    /// Builder: set the frozen flag.
    pub fn with_frozen(self, frozen: bool) -> Self {
        self.write().frozen = frozen;
        self
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ParameterData> {
        self.inner.read().expect("parameter lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ParameterData> {
        self.inner.write().expect("parameter lock poisoned")
    }

    /// Process-unique identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether both handles refer to the same parameter.
    pub fn ptr_eq(&self, other: &Parameter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Name.
    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    /// Unit string.
    pub fn unit(&self) -> String {
        self.read().unit.clone()
    }

    /// Current value; linked parameters report their target's value.
    pub fn value(&self) -> f64 {
        let link = self.read().link.clone();
        match link {
            Some(target) => target.value(),
            None => self.read().value,
        }
    }

    /// Set the value.
    ///
    /// Fails with [`Error::ParameterDomain`] outside `[min, max]` or for NaN.
    /// Writes to a linked parameter are ignored.
    pub fn set_value(&self, value: f64) -> Result<()> {
        let mut d = self.write();
        if let Some(target) = &d.link {
            log::warn!(
                "ignoring write of {} to '{}': linked to '{}'",
                value,
                d.name,
                target.name()
            );
            return Ok(());
        }
        if value.is_nan() || value < d.min || value > d.max {
            return Err(Error::ParameterDomain(format!(
                "{} = {} outside [{}, {}]",
                d.name, value, d.min, d.max
            )));
        }
        d.value = value;
        Ok(())
    }

    /// Lower bound.
    pub fn min(&self) -> f64 {
        self.read().min
    }

    /// Upper bound.
    pub fn max(&self) -> f64 {
        self.read().max
    }

    /// Replace the bounds; the current value must lie inside.
    pub fn set_bounds(&self, min: f64, max: f64) -> Result<()> {
        let mut d = self.write();
        if min.is_nan() || max.is_nan() || min > max {
            return Err(Error::Validation(format!("invalid bounds [{}, {}] for '{}'", min, max, d.name)));
        }
        if d.value < min || d.value > max {
            return Err(Error::ParameterDomain(format!(
                "{} = {} outside new bounds [{}, {}]",
                d.name, d.value, min, max
            )));
        }
        d.min = min;
        d.max = max;
        Ok(())
    }

    /// Whether the parameter is held fixed.
    pub fn is_frozen(&self) -> bool {
        self.read().frozen
    }

    /// Hold fixed.
    pub fn freeze(&self) {
        self.write().frozen = true;
    }

    /// Release.
    pub fn unfreeze(&self) {
        self.write().frozen = false;
    }

    /// Whether the value mirrors another parameter.
    pub fn is_linked(&self) -> bool {
        self.read().link.is_some()
    }

    /// Free for fitting: neither frozen nor linked.
    pub fn is_free(&self) -> bool {
        let d = self.read();
        !d.frozen && d.link.is_none()
    }

    /// Mirror `target`'s value from now on.
    pub fn link_to(&self, target: &Parameter) -> Result<()> {
        let mut cursor = Some(target.clone());
        while let Some(p) = cursor {
            if p.ptr_eq(self) {
                return Err(Error::Validation(format!(
                    "linking '{}' to '{}' would create a cycle",
                    self.name(),
                    target.name()
                )));
            }
            cursor = p.read().link.clone();
        }
        self.write().link = Some(target.clone());
        Ok(())
    }

    /// Drop the link, keeping the currently mirrored value.
    pub fn unlink(&self) {
        let v = self.value();
        let mut d = self.write();
        d.link = None;
        d.value = v;
    }

    /// Link target, if any.
    pub fn link(&self) -> Option<Parameter> {
        self.read().link.clone()
    }

    /// Whether this is `other` or mirrors it through a chain of links.
    pub fn resolves_to(&self, other: &Parameter) -> bool {
        let mut cursor = Some(self.clone());
        while let Some(p) = cursor {
            if p.ptr_eq(other) {
                return true;
            }
            cursor = p.link();
        }
        false
    }

    /// Optimizer scale (power of ten).
    pub fn scale(&self) -> f64 {
        self.read().scale
    }

    /// Re-derive the scale from the current value.
    pub fn autoscale(&self) {
        let v = self.value();
        self.write().scale = auto_scale(v);
    }

    /// `value / scale`.
    pub fn factor(&self) -> f64 {
        self.value() / self.scale()
    }

    /// Set `value = factor * scale`, clamped to the bounds to absorb rounding.
    pub fn set_factor(&self, factor: f64) -> Result<()> {
        let (scale, min, max) = {
            let d = self.read();
            (d.scale, d.min, d.max)
        };
        let v = factor * scale;
        if v.is_nan() {
            return Err(Error::ParameterDomain(format!("{}: NaN factor", self.name())));
        }
        self.set_value(v.clamp(min, max))
    }

    /// Bounds in factor space.
    pub fn factor_bounds(&self) -> (f64, f64) {
        let d = self.read();
        (d.min / d.scale, d.max / d.scale)
    }

    /// Uncertainty estimate, if one was computed.
    pub fn error(&self) -> Option<f64> {
        self.read().error
    }

    /// Store an uncertainty estimate.
    pub fn set_error(&self, error: Option<f64>) {
        self.write().error = error;
    }

    /// Whether the value sits on a bound within `rtol` of the bound's scale.
    pub fn at_bound(&self, rtol: f64) -> bool {
        let v = self.value();
        let (min, max) = (self.min(), self.max());
        let near = |b: f64| b.is_finite() && (v - b).abs() <= rtol * b.abs().max(self.scale());
        near(min) || near(max)
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.read();
        f.debug_struct("Parameter")
            .field("id", &self.id)
            .field("name", &d.name)
            .field("value", &d.value)
            .field("unit", &d.unit)
            .field("min", &d.min)
            .field("max", &d.max)
            .field("frozen", &d.frozen)
            .field("linked", &d.link.as_ref().map(|p| p.id))
            .finish()
    }
}
