//! Regular-grid multilinear interpolation with per-axis scales.
//!
//! Coordinates are transformed by each axis' [`Interp`] scale and the values
//! by the value scale before linear interpolation, then transformed back.
//! A log value scale clips tabulated values at [`LOG_TINY`] so zeros stay
//! representable.

use gf_core::{Error, Result};
use ndarray::{ArrayD, IxDyn};

use crate::axis::Interp;

/// Smallest value kept before taking the log of tabulated values.
pub const LOG_TINY: f64 = 1.175_494_4e-38;

/// Interpolator over a rectilinear grid of nodes.
#[derive(Debug, Clone)]
pub struct GridInterpolator {
    points: Vec<Vec<f64>>,
    scales: Vec<Interp>,
    values: ArrayD<f64>,
    values_scale: Interp,
    fill_value: Option<f64>,
    clip_negative: bool,
}

impl GridInterpolator {
    /// Interpolator over `points` (one strictly increasing node list per
    /// dimension) and `values` of matching shape. Extrapolates linearly by
    /// default.
    pub fn new(points: Vec<Vec<f64>>, values: ArrayD<f64>) -> Result<Self> {
        let shape: Vec<usize> = points.iter().map(|p| p.len()).collect();
        if values.shape() != shape.as_slice() {
            return Err(Error::Validation(format!(
                "interpolator values shape {:?} does not match grid {:?}",
                values.shape(),
                shape
            )));
        }
        if points.iter().any(|p| p.is_empty() || p.windows(2).any(|w| !(w[1] > w[0]))) {
            return Err(Error::Validation("interpolator nodes must be non-empty and strictly increasing".into()));
        }
        let n = points.len();
        Ok(Self {
            points,
            scales: vec![Interp::Lin; n],
            values,
            values_scale: Interp::Lin,
            fill_value: None,
            clip_negative: true,
        })
    }

    /// Per-axis coordinate scales.
    pub fn with_axis_scales(mut self, scales: Vec<Interp>) -> Result<Self> {
        if scales.len() != self.points.len() {
            return Err(Error::Validation("one scale per interpolation axis required".into()));
        }
        self.scales = scales;
        Ok(self)
    }

    /// Value scale.
    pub fn with_values_scale(mut self, scale: Interp) -> Self {
        self.values_scale = scale;
        self
    }

    /// Value returned outside the grid instead of extrapolating.
    pub fn with_fill_value(mut self, fill: Option<f64>) -> Self {
        self.fill_value = fill;
        self
    }

    /// Whether negative interpolated values are clipped to zero (default on).
    pub fn with_clip_negative(mut self, clip: bool) -> Self {
        self.clip_negative = clip;
        self
    }

    fn scaled_value(&self, v: f64) -> f64 {
        match self.values_scale {
            Interp::Lin => v,
            Interp::Log => v.max(LOG_TINY).ln(),
            Interp::Sqrt => v.max(0.0).sqrt(),
        }
    }

    /// Interpolated value at `coord` (one coordinate per grid dimension).
    pub fn evaluate(&self, coord: &[f64]) -> f64 {
        debug_assert_eq!(coord.len(), self.points.len());
        let mut lo = Vec::with_capacity(coord.len());
        let mut t = Vec::with_capacity(coord.len());
        for ((nodes, &scale), &c) in self.points.iter().zip(&self.scales).zip(coord) {
            if nodes.len() == 1 {
                lo.push(0usize);
                t.push(0.0);
                continue;
            }
            let (first, last) = (nodes[0], nodes[nodes.len() - 1]);
            if let Some(fill) = self.fill_value {
                if !(c >= first && c <= last) {
                    return fill;
                }
            }
            let x = scale.forward(c);
            let i = nodes.partition_point(|&v| scale.forward(v) <= x).saturating_sub(1).min(nodes.len() - 2);
            let (a, b) = (scale.forward(nodes[i]), scale.forward(nodes[i + 1]));
            lo.push(i);
            t.push((x - a) / (b - a));
        }
        let ndim = coord.len();
        let mut acc = 0.0;
        let mut idx = vec![0usize; ndim];
        for corner in 0..(1usize << ndim) {
            let mut w = 1.0;
            for d in 0..ndim {
                let upper = (corner >> d) & 1 == 1;
                if self.points[d].len() == 1 {
                    if upper {
                        w = 0.0;
                        break;
                    }
                    idx[d] = 0;
                    continue;
                }
                idx[d] = lo[d] + upper as usize;
                w *= if upper { t[d] } else { 1.0 - t[d] };
            }
            if w != 0.0 {
                acc += w * self.scaled_value(self.values[IxDyn(&idx)]);
            }
        }
        let v = self.values_scale.inverse(acc);
        if self.clip_negative { v.max(0.0) } else { v }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array;

    #[test]
    fn test_linear_1d() {
        let v = Array::from_shape_vec(IxDyn(&[3]), vec![0.0, 10.0, 30.0]).unwrap();
        let ip = GridInterpolator::new(vec![vec![0.0, 1.0, 2.0]], v).unwrap();
        assert_relative_eq!(ip.evaluate(&[0.5]), 5.0, epsilon = 1e-12);
        assert_relative_eq!(ip.evaluate(&[1.5]), 20.0, epsilon = 1e-12);
        // linear extrapolation
        assert_relative_eq!(ip.evaluate(&[2.5]), 40.0, epsilon = 1e-12);
    }

    #[test]
    fn test_log_log_power_law_is_exact() {
        let e = vec![1.0, 10.0, 100.0];
        let v = Array::from_shape_vec(IxDyn(&[3]), e.iter().map(|x: &f64| x.powf(-2.7)).collect()).unwrap();
        let ip = GridInterpolator::new(vec![e], v).unwrap().with_axis_scales(vec![Interp::Log]).unwrap().with_values_scale(Interp::Log);
        assert_relative_eq!(ip.evaluate(&[3.0]), 3.0_f64.powf(-2.7), max_relative = 1e-12);
    }

    #[test]
    fn test_bilinear_and_fill() {
        let v = Array::from_shape_vec(IxDyn(&[2, 2]), vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let ip = GridInterpolator::new(vec![vec![0.0, 1.0], vec![0.0, 1.0]], v).unwrap().with_fill_value(Some(f64::NAN));
        assert_relative_eq!(ip.evaluate(&[0.5, 0.5]), 1.5, epsilon = 1e-12);
        assert!(ip.evaluate(&[1.5, 0.5]).is_nan());
    }

    #[test]
    fn test_single_node_axis() {
        let v = Array::from_shape_vec(IxDyn(&[2, 1]), vec![4.0, 8.0]).unwrap();
        let ip = GridInterpolator::new(vec![vec![0.0, 1.0], vec![0.5]], v).unwrap();
        assert_relative_eq!(ip.evaluate(&[0.25, 3.0]), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_shape_mismatch() {
        let v = Array::from_shape_vec(IxDyn(&[2]), vec![1.0, 2.0]).unwrap();
        assert!(GridInterpolator::new(vec![vec![0.0, 1.0, 2.0]], v).is_err());
    }
}
