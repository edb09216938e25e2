//! Effective area tables and exposure maps.

use std::sync::Arc;

use gf_core::{Error, Result};
use gf_maps::{Geometry, GridInterpolator, Interp, Map, MapAxis, SkyCoord};
use ndarray::{ArrayD, IxDyn};

use crate::ENERGY_TRUE;

/// Effective area (cm^2) tabulated on true-energy x offset nodes.
///
/// Interpolation is log in energy and linear in offset. Offsets beyond the
/// table give zero area.
#[derive(Debug, Clone)]
pub struct EffectiveArea {
    energy_true: MapAxis,
    offset: MapAxis,
    interp: GridInterpolator,
}

impl EffectiveArea {
    /// Table from axes and row-major `data[energy][offset]` in cm^2.
    pub fn new(energy_true: MapAxis, offset: MapAxis, data: Vec<f64>) -> Result<Self> {
        if data.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(Error::Validation("effective area must be finite and non-negative".into()));
        }
        let values = ArrayD::from_shape_vec(IxDyn(&[energy_true.nbin(), offset.nbin()]), data)
            .map_err(|e| Error::Validation(format!("effective area shape: {}", e)))?;
        let interp = GridInterpolator::new(vec![energy_true.centers(), offset.centers()], values)?
            .with_axis_scales(vec![Interp::Log, Interp::Lin])?
            .with_fill_value(None);
        Ok(Self { energy_true, offset, interp })
    }

    /// Offset-independent area `value` up to `max_offset` degrees.
    pub fn constant(energy_true: MapAxis, value: f64, max_offset: f64) -> Result<Self> {
        let offset = MapAxis::from_nodes(vec![0.0, max_offset], "offset", "deg", Interp::Lin)?;
        let n = energy_true.nbin();
        Self::new(energy_true, offset, vec![value; n * 2])
    }

    /// True-energy axis of the table.
    pub fn energy_axis(&self) -> &MapAxis {
        &self.energy_true
    }

    /// Offset axis of the table.
    pub fn offset_axis(&self) -> &MapAxis {
        &self.offset
    }

    /// Area (cm^2) at `energy` and `offset` (deg).
    pub fn evaluate(&self, energy: f64, offset: f64) -> f64 {
        let max_offset = self.offset.nodes()[self.offset.nodes().len() - 1];
        if !(offset <= max_offset) {
            return 0.0;
        }
        self.interp.evaluate(&[energy, offset])
    }

    /// Exposure map (cm^2 s) for a pointing and livetime (s) on `geom`,
    /// which must carry an `energy_true` axis. Evaluated at bin centers.
    pub fn exposure_map(&self, geom: Arc<Geometry>, pointing: &SkyCoord, livetime: f64) -> Result<Map> {
        let k = geom
            .axis_index(ENERGY_TRUE)
            .ok_or_else(|| Error::Validation("exposure geometry needs an energy_true axis".into()))?;
        if geom.axes().len() != 1 {
            return Err(Error::Validation("exposure geometry must have exactly one extra axis".into()));
        }
        let energies = geom.axes()[k].centers();
        let offsets = geom.separation(pointing);
        let mut values = Vec::with_capacity(geom.npix());
        for &e in &energies {
            values.extend(offsets.iter().map(|&o| self.evaluate(e, o) * livetime));
        }
        Map::from_vec(geom, values, "cm2 s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use gf_maps::{Frame, Projection, WcsFootprint};

    fn energy() -> MapAxis {
        MapAxis::from_energy_bounds(0.1, 100.0, 6, "TeV", ENERGY_TRUE).unwrap()
    }

    #[test]
    fn test_constant_area_and_offset_cut() {
        let a = EffectiveArea::constant(energy(), 1e9, 2.5).unwrap();
        assert_relative_eq!(a.evaluate(1.0, 1.0), 1e9, max_relative = 1e-12);
        assert_eq!(a.evaluate(1.0, 3.0), 0.0);
    }

    #[test]
    fn test_interpolates_in_offset() {
        let e = energy();
        let off = MapAxis::from_nodes(vec![0.0, 2.0], "offset", "deg", Interp::Lin).unwrap();
        let data: Vec<f64> = (0..6).flat_map(|_| [2.0, 1.0]).collect();
        let a = EffectiveArea::new(e, off, data).unwrap();
        assert_relative_eq!(a.evaluate(3.0, 1.0), 1.5, max_relative = 1e-12);
    }

    #[test]
    fn test_exposure_map() {
        let w = WcsFootprint::new(SkyCoord::new(0.0, 0.0), 0.5, (8, 8), Projection::Car, Frame::Galactic).unwrap();
        let g = Arc::new(Geometry::wcs(w, vec![energy()]).unwrap());
        let a = EffectiveArea::constant(energy(), 2e9, 1.0).unwrap();
        let exp = a.exposure_map(g.clone(), &SkyCoord::new(0.0, 0.0), 100.0).unwrap();
        assert_eq!(exp.unit(), "cm2 s");
        let max = exp.values().iter().cloned().fold(0.0, f64::max);
        assert_relative_eq!(max, 2e11, max_relative = 1e-12);
        // corners are beyond 1 deg offset
        assert_eq!(exp.values()[0], 0.0);
    }

    #[test]
    fn test_rejects_negative_area() {
        let off = MapAxis::from_nodes(vec![0.0, 1.0], "offset", "deg", Interp::Lin).unwrap();
        assert!(EffectiveArea::new(energy(), off, vec![-1.0; 12]).is_err());
    }
}
