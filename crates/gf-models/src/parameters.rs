//! Ordered, identity-deduplicated parameter collections.

use std::hash::Hasher;

use gf_core::{Error, Result};
use twox_hash::XxHash64;

use crate::parameter::Parameter;

/// Ordered parameter list in which every parameter appears once.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    items: Vec<Parameter>,
}

impl Parameters {
    /// Collection from `items`, dropping repeated handles.
    pub fn new(items: impl IntoIterator<Item = Parameter>) -> Self {
        let mut out = Self::default();
        out.extend(items);
        out
    }

    /// Append `p` unless the same parameter is already present.
    pub fn push(&mut self, p: Parameter) {
        if !self.items.iter().any(|q| q.ptr_eq(&p)) {
            self.items.push(p);
        }
    }

    /// Append every parameter of `items` not yet present.
    pub fn extend(&mut self, items: impl IntoIterator<Item = Parameter>) {
        for p in items {
            self.push(p);
        }
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.items.iter()
    }

    /// Parameter names in order.
    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|p| p.name()).collect()
    }

    /// First parameter called `name`.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.items.iter().find(|p| p.name() == name)
    }

    /// Position of `p` (by identity).
    pub fn index_of(&self, p: &Parameter) -> Option<usize> {
        self.items.iter().position(|q| q.ptr_eq(p))
    }

    /// Whether `p` (by identity) is in the collection.
    pub fn contains(&self, p: &Parameter) -> bool {
        self.index_of(p).is_some()
    }

    /// Parameters that are neither frozen nor linked.
    pub fn free(&self) -> Parameters {
        Parameters { items: self.items.iter().filter(|p| p.is_free()).cloned().collect() }
    }

    /// Current values.
    pub fn values(&self) -> Vec<f64> {
        self.items.iter().map(|p| p.value()).collect()
    }

    /// Set every value; `values` must match the collection length.
    pub fn set_values(&self, values: &[f64]) -> Result<()> {
        self.check_len(values.len())?;
        for (p, &v) in self.items.iter().zip(values) {
            p.set_value(v)?;
        }
        Ok(())
    }

    /// Current values divided by their scales.
    pub fn factors(&self) -> Vec<f64> {
        self.items.iter().map(|p| p.factor()).collect()
    }

    /// Set every value from factors.
    pub fn set_factors(&self, factors: &[f64]) -> Result<()> {
        self.check_len(factors.len())?;
        for (p, &f) in self.items.iter().zip(factors) {
            p.set_factor(f)?;
        }
        Ok(())
    }

    /// Scales in order.
    pub fn scales(&self) -> Vec<f64> {
        self.items.iter().map(|p| p.scale()).collect()
    }

    /// Bounds in factor space.
    pub fn bounds_factor(&self) -> Vec<(f64, f64)> {
        self.items.iter().map(|p| p.factor_bounds()).collect()
    }

    /// Re-derive every scale from the current values.
    pub fn autoscale(&self) {
        for p in &self.items {
            p.autoscale();
        }
    }

    /// Hash of identities and effective values.
    ///
    /// Two calls return the same fingerprint iff no value changed in
    /// between, which is what prediction caches key on.
    pub fn fingerprint(&self) -> u64 {
        let mut h = XxHash64::with_seed(0);
        for p in &self.items {
            h.write_u64(p.id());
            h.write_u64(p.value().to_bits());
        }
        h.finish()
    }

    /// Freeze every parameter.
    pub fn freeze_all(&self) {
        for p in &self.items {
            p.freeze();
        }
    }

    /// Unfreeze every parameter.
    pub fn unfreeze_all(&self) {
        for p in &self.items {
            p.unfreeze();
        }
    }

    /// Unfreeze the parameter called `name`.
    pub fn unfreeze(&self, name: &str) -> Result<()> {
        self.get(name).ok_or_else(|| Error::Validation(format!("no parameter named '{}'", name)))?.unfreeze();
        Ok(())
    }

    fn check_len(&self, n: usize) -> Result<()> {
        if n != self.items.len() {
            return Err(Error::Validation(format!("expected {} values, got {}", self.items.len(), n)));
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Parameters {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_by_identity() {
        let a = Parameter::new("index", 2.0);
        let b = Parameter::new("index", 2.0);
        let ps = Parameters::new([a.clone(), b.clone(), a.clone()]);
        assert_eq!(ps.len(), 2);
        assert_eq!(ps.index_of(&b), Some(1));
    }

    #[test]
    fn test_free_excludes_frozen_and_linked() {
        let a = Parameter::new("a", 1.0);
        let b = Parameter::new("b", 1.0).with_frozen(true);
        let c = Parameter::new("c", 1.0);
        c.link_to(&a).unwrap();
        let ps = Parameters::new([a, b, c]);
        assert_eq!(ps.free().names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_fingerprint_tracks_values() {
        let a = Parameter::new("a", 1.0);
        let ps = Parameters::new([a.clone()]);
        let f0 = ps.fingerprint();
        assert_eq!(f0, ps.fingerprint());
        a.set_value(1.5).unwrap();
        assert_ne!(f0, ps.fingerprint());
        a.set_value(1.0).unwrap();
        assert_eq!(f0, ps.fingerprint());
    }

    #[test]
    fn test_set_values_length_checked() {
        let ps = Parameters::new([Parameter::new("a", 1.0)]);
        assert!(ps.set_values(&[1.0, 2.0]).is_err());
        ps.set_factors(&[3.0]).unwrap();
        assert_eq!(ps.values(), vec![3.0]);
    }
}
