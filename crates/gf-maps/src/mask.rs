//! Boolean maps used as validity / fit masks.

use std::sync::Arc;

use gf_core::{Error, Result};
use ndarray::{ArrayD, IxDyn, Zip};

use crate::coord::SkyCoord;
use crate::geom::Geometry;
use crate::map::Map;

/// A boolean array on a [`Geometry`]; `true` marks pixels that are used.
#[derive(Debug, Clone)]
pub struct Mask {
    geom: Arc<Geometry>,
    data: ArrayD<bool>,
}

impl Mask {
    /// Mask with every element set to `value`.
    pub fn full(geom: Arc<Geometry>, value: bool) -> Self {
        let data = ArrayD::from_elem(IxDyn(&geom.data_shape()), value);
        Self { geom, data }
    }

    /// Mask from an array of matching shape.
    pub fn from_array(geom: Arc<Geometry>, data: ArrayD<bool>) -> Result<Self> {
        if data.shape() != geom.data_shape().as_slice() {
            return Err(Error::GeometryMismatch(format!(
                "mask shape {:?} does not match geometry shape {:?}",
                data.shape(),
                geom.data_shape()
            )));
        }
        let data = if data.is_standard_layout() { data } else { data.as_standard_layout().into_owned() };
        Ok(Self { geom, data })
    }

    /// `true` where `map >= threshold` (NaN counts as `false`).
    pub fn from_threshold(map: &Map, threshold: f64) -> Self {
        Self { geom: map.geom().clone(), data: map.data().mapv(|v| v >= threshold) }
    }

    /// `true` for spatial pixels whose centers lie within `radius` degrees of
    /// `center` (or outside it when `inside` is `false`), on every extra-axis
    /// bin.
    pub fn from_circle(geom: Arc<Geometry>, center: &SkyCoord, radius: f64, inside: bool) -> Self {
        let sep = geom.separation(center);
        let ns = geom.n_spatial();
        let values: Vec<bool> = (0..geom.npix()).map(|k| (sep[k % ns] <= radius) == inside).collect();
        let data = ArrayD::from_shape_vec(IxDyn(&geom.data_shape()), values).expect("mask shape matches geometry");
        Self { geom, data }
    }

    /// Geometry.
    pub fn geom(&self) -> &Arc<Geometry> {
        &self.geom
    }

    /// Array view.
    pub fn data(&self) -> &ArrayD<bool> {
        &self.data
    }

    /// Values in row-major order.
    pub fn values(&self) -> &[bool] {
        self.data.as_slice().expect("mask data is kept in standard layout")
    }

    fn combine<F: Fn(bool, bool) -> bool>(&self, other: &Mask, op: &str, f: F) -> Result<Mask> {
        self.geom.require_aligned(&other.geom, op)?;
        let data = Zip::from(&self.data).and(&other.data).map_collect(|&a, &b| f(a, b));
        Ok(Mask { geom: self.geom.clone(), data })
    }

    /// Elementwise AND.
    pub fn and(&self, other: &Mask) -> Result<Mask> {
        self.combine(other, "and", |a, b| a && b)
    }

    /// Elementwise OR.
    pub fn or(&self, other: &Mask) -> Result<Mask> {
        self.combine(other, "or", |a, b| a || b)
    }

    /// Elementwise NOT.
    pub fn not(&self) -> Mask {
        Mask { geom: self.geom.clone(), data: self.data.mapv(|v| !v) }
    }

    /// Number of `true` elements.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// `1.0` where set, `0.0` elsewhere.
    pub fn to_map(&self) -> Map {
        Map::from_array(self.geom.clone(), self.data.mapv(|v| if v { 1.0 } else { 0.0 }), "")
            .expect("mask and map share the geometry shape")
    }

    /// Spatial image that is `true` where any extra-axis bin is set.
    pub fn reduce_any(&self) -> Mask {
        let ns = self.geom.n_spatial();
        let mut out = vec![false; ns];
        for (k, &v) in self.values().iter().enumerate() {
            out[k % ns] |= v;
        }
        let geom = Arc::new(self.geom.to_image());
        let data = ArrayD::from_shape_vec(IxDyn(&geom.data_shape()), out).expect("image shape matches spatial size");
        Mask { geom, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::MapAxis;
    use crate::coord::Frame;
    use crate::geom::wcs::{Projection, WcsFootprint};

    fn geom() -> Arc<Geometry> {
        let w = WcsFootprint::new(SkyCoord::new(0.0, 0.0), 0.1, (5, 5), Projection::Car, Frame::Galactic).unwrap();
        let e = MapAxis::from_energy_bounds(1.0, 10.0, 2, "TeV", "energy").unwrap();
        Arc::new(Geometry::wcs(w, vec![e]).unwrap())
    }

    #[test]
    fn test_logic_ops() {
        let g = geom();
        let a = Mask::full(g.clone(), true);
        let b = Mask::full(g, false);
        assert_eq!(a.and(&b).unwrap().count(), 0);
        assert_eq!(a.or(&b).unwrap().count(), 50);
        assert_eq!(b.not().count(), 50);
    }

    #[test]
    fn test_circle_mask() {
        let g = geom();
        let m = Mask::from_circle(g.clone(), &SkyCoord::new(0.0, 0.0), 0.05, true);
        // only the central pixel on each of the two energy bins
        assert_eq!(m.count(), 2);
        let excl = Mask::from_circle(g, &SkyCoord::new(0.0, 0.0), 0.05, false);
        assert_eq!(excl.count(), 48);
        assert_eq!(m.reduce_any().count(), 1);
    }

    #[test]
    fn test_threshold_and_to_map() {
        let g = geom();
        let mut map = Map::new(g, "");
        map.values_mut()[3] = 5.0;
        let m = Mask::from_threshold(&map, 1.0);
        assert_eq!(m.count(), 1);
        assert_eq!(m.to_map().sum(), 1.0);
    }

    #[test]
    fn test_misaligned_rejected() {
        let a = Mask::full(geom(), true);
        let b = Mask::full(Arc::new(geom().to_image()), true);
        assert!(a.and(&b).is_err());
    }
}
