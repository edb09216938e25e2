//! Tabulated point-spread function.

use std::f64::consts::PI;

use gf_core::{Error, Result};
use gf_maps::{GridInterpolator, Interp, MapAxis};
use ndarray::{ArrayD, IxDyn};

use crate::kernel::PsfKernel;

const CONTAINMENT_STEPS: usize = 400;

/// PSF density (sr^-1) tabulated on true energy x offset x radius.
///
/// Radii and offsets are in degrees. Radii beyond the last tabulated node
/// evaluate to zero.
#[derive(Debug, Clone)]
pub struct PsfTable {
    energy_true: MapAxis,
    offset: MapAxis,
    rad: MapAxis,
    interp: GridInterpolator,
}

impl PsfTable {
    /// Table from axes and row-major `data[energy][offset][rad]`.
    pub fn new(energy_true: MapAxis, offset: MapAxis, rad: MapAxis, data: Vec<f64>) -> Result<Self> {
        if data.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(Error::Validation("psf values must be finite and non-negative".into()));
        }
        let shape = [energy_true.nbin(), offset.nbin(), rad.nbin()];
        let values = ArrayD::from_shape_vec(IxDyn(&shape), data)
            .map_err(|e| Error::Validation(format!("psf table shape: {}", e)))?;
        let interp = GridInterpolator::new(vec![energy_true.centers(), offset.centers(), rad.centers()], values)?
            .with_axis_scales(vec![Interp::Log, Interp::Lin, Interp::Lin])?;
        Ok(Self { energy_true, offset, rad, interp })
    }

    /// Offset-independent Gaussian PSF with width `sigmas[i]` (deg) in true
    /// energy bin `i`, tabulated on the nodes of `rad`.
    pub fn from_gauss(energy_true: MapAxis, rad: MapAxis, sigmas: &[f64]) -> Result<Self> {
        if sigmas.len() != energy_true.nbin() {
            return Err(Error::Validation(format!(
                "need one sigma per energy bin: got {} for {} bins",
                sigmas.len(),
                energy_true.nbin()
            )));
        }
        if sigmas.iter().any(|s| !(*s > 0.0)) {
            return Err(Error::Validation("gaussian psf sigma must be > 0".into()));
        }
        let offset = MapAxis::from_nodes(vec![0.0], "offset", "deg", Interp::Lin)?;
        let radii = rad.centers();
        let mut data = Vec::with_capacity(sigmas.len() * radii.len());
        for &s in sigmas {
            let s = s.to_radians();
            let norm = 1.0 / (2.0 * PI * s * s);
            data.extend(radii.iter().map(|r| norm * (-0.5 * (r.to_radians() / s).powi(2)).exp()));
        }
        Self::new(energy_true, offset, rad, data)
    }

    /// True-energy axis.
    pub fn energy_axis(&self) -> &MapAxis {
        &self.energy_true
    }

    /// Offset axis.
    pub fn offset_axis(&self) -> &MapAxis {
        &self.offset
    }

    /// Largest tabulated radius (deg).
    pub fn rad_max(&self) -> f64 {
        let r = self.rad.nodes();
        r[r.len() - 1]
    }

    /// PSF density (sr^-1) at `rad` degrees from the true position.
    pub fn evaluate(&self, energy: f64, offset: f64, rad: f64) -> f64 {
        if !(rad >= 0.0 && rad <= self.rad_max()) {
            return 0.0;
        }
        self.interp.evaluate(&[energy, offset, rad])
    }

    /// Fraction of the PSF contained within `rad` degrees.
    pub fn containment(&self, energy: f64, offset: f64, rad: f64) -> f64 {
        let upper = rad.min(self.rad_max()).to_radians();
        if !(upper > 0.0) {
            return 0.0;
        }
        let n = CONTAINMENT_STEPS;
        let h = upper / n as f64;
        let f = |t: f64| 2.0 * PI * t.sin() * self.evaluate(energy, offset, t.to_degrees());
        let mut acc = f(0.0) + f(upper);
        for i in 1..n {
            let w = if i % 2 == 1 { 4.0 } else { 2.0 };
            acc += w * f(h * i as f64);
        }
        acc * h / 3.0
    }

    /// Smallest radius (deg) containing `fraction` of the PSF, `None` if the
    /// table does not reach that fraction.
    pub fn containment_radius(&self, energy: f64, offset: f64, fraction: f64) -> Option<f64> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return None;
        }
        let (mut lo, mut hi) = (0.0, self.rad_max());
        if self.containment(energy, offset, hi) < fraction {
            return None;
        }
        for _ in 0..60 {
            let mid = 0.5 * (lo + hi);
            if self.containment(energy, offset, mid) < fraction {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo < 1e-6 * self.rad_max() {
                break;
            }
        }
        Some(0.5 * (lo + hi))
    }

    /// Convolution kernel for `energy_true` bins at a fixed `offset`.
    pub fn kernel(
        &self,
        energy_true: &MapAxis,
        offset: f64,
        binsz: f64,
        max_radius: f64,
        oversample: usize,
    ) -> Result<PsfKernel> {
        PsfKernel::new(self, energy_true, offset, binsz, max_radius, oversample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table(sigma: f64) -> PsfTable {
        let e = MapAxis::from_energy_bounds(1.0, 10.0, 2, "TeV", "energy_true").unwrap();
        let nodes: Vec<f64> = (0..=600).map(|i| i as f64 * 6.0 * sigma / 600.0).collect();
        let rad = MapAxis::from_nodes(nodes, "rad", "deg", Interp::Lin).unwrap();
        PsfTable::from_gauss(e, rad, &[sigma, sigma]).unwrap()
    }

    #[test]
    fn test_gauss_peak_value() {
        let t = table(0.1);
        let s = 0.1_f64.to_radians();
        assert_relative_eq!(t.evaluate(3.0, 0.0, 0.0), 1.0 / (2.0 * PI * s * s), max_relative = 1e-9);
        assert_eq!(t.evaluate(3.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_gauss_containment() {
        let t = table(0.1);
        // 1 - exp(-1/2) in the small-angle limit
        assert_relative_eq!(t.containment(3.0, 0.0, 0.1), 0.393_469_34, max_relative = 1e-4);
        assert_relative_eq!(t.containment(3.0, 0.0, 0.6), 1.0, max_relative = 1e-4);
    }

    #[test]
    fn test_containment_radius() {
        let t = table(0.2);
        let r68 = t.containment_radius(3.0, 0.0, 0.68).unwrap();
        // sigma * sqrt(-2 ln(0.32))
        assert_relative_eq!(r68, 0.2 * 1.509_596_1, max_relative = 1e-3);
        assert!(t.containment_radius(3.0, 0.0, 1.5).is_none());
    }

    #[test]
    fn test_sigma_count_checked() {
        let e = MapAxis::from_energy_bounds(1.0, 10.0, 3, "TeV", "energy_true").unwrap();
        let rad = MapAxis::from_nodes(vec![0.0, 0.1, 0.2], "rad", "deg", Interp::Lin).unwrap();
        assert!(PsfTable::from_gauss(e, rad, &[0.1]).is_err());
    }
}
