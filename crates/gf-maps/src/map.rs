//! Maps: numeric arrays addressed by a shared [`Geometry`].
//!
//! The array shape is always `geom.data_shape()`. Values change only through
//! setters that keep the shape (`fill`, `iadd_region`, `stack`, ...); every
//! shape-changing operation returns a new map on a new geometry.

use std::ops::Range;
use std::sync::Arc;

use gf_core::{Error, Result};
use ndarray::{ArrayD, Axis, IxDyn, Slice, Zip};
use serde::{Deserialize, Serialize};

use crate::axis::MapAxis;
use crate::coord::SkyCoord;
use crate::geom::{Footprint, Geometry, MapCoord, SpatialGrid};
use crate::mask::Mask;

/// Policy for interpolation outside the geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extrapolation {
    /// Use the nearest edge values.
    Clip,
    /// Return NaN.
    #[default]
    Nan,
}

/// What a resampled map conserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMode {
    /// Counts-like: totals are conserved by redistributing sub-pixels.
    Sum,
    /// Density-like: target pixels take the interpolated source value at
    /// their center.
    Mean,
}

/// Upper bound on sub-pixels per axis when redistributing a WCS pixel.
const MAX_SUBPIX: usize = 32;

/// Upper bound on extra HEALPix orders when redistributing a HEALPix pixel.
const MAX_SUBORDER: u8 = 6;

/// A numeric array on a [`Geometry`].
#[derive(Debug, Clone)]
pub struct Map {
    geom: Arc<Geometry>,
    data: ArrayD<f64>,
    unit: String,
}

impl Map {
    /// Zero-filled map.
    pub fn new(geom: Arc<Geometry>, unit: &str) -> Self {
        Self::full(geom, 0.0, unit)
    }

    /// Map filled with `value`.
    pub fn full(geom: Arc<Geometry>, value: f64, unit: &str) -> Self {
        let data = ArrayD::from_elem(IxDyn(&geom.data_shape()), value);
        Self { geom, data, unit: unit.to_string() }
    }

    /// Map from an array; the shape must equal `geom.data_shape()`.
    pub fn from_array(geom: Arc<Geometry>, data: ArrayD<f64>, unit: &str) -> Result<Self> {
        let shape = geom.data_shape();
        if data.shape() != shape.as_slice() {
            return Err(Error::GeometryMismatch(format!(
                "data shape {:?} does not match geometry shape {:?}",
                data.shape(),
                shape
            )));
        }
        let data = if data.is_standard_layout() { data } else { data.as_standard_layout().into_owned() };
        Ok(Self { geom, data, unit: unit.to_string() })
    }

    /// Map from row-major values.
    pub fn from_vec(geom: Arc<Geometry>, values: Vec<f64>, unit: &str) -> Result<Self> {
        let shape = geom.data_shape();
        let data = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| Error::GeometryMismatch(format!("values do not fit geometry {:?}: {}", shape, e)))?;
        Ok(Self { geom, data, unit: unit.to_string() })
    }

    /// New map on the same geometry with different data.
    pub fn with_data(&self, data: ArrayD<f64>) -> Result<Self> {
        Self::from_array(self.geom.clone(), data, &self.unit)
    }

    /// Same data on another geometry with an identical data shape (e.g. an
    /// axis renamed or relabelled).
    pub fn with_geom(self, geom: Arc<Geometry>) -> Result<Self> {
        Self::from_array(geom, self.data, &self.unit)
    }

    /// Geometry.
    pub fn geom(&self) -> &Arc<Geometry> {
        &self.geom
    }

    /// Array view.
    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    /// Consume into the array.
    pub fn into_data(self) -> ArrayD<f64> {
        self.data
    }

    /// Values in row-major order.
    pub fn values(&self) -> &[f64] {
        self.data.as_slice().expect("map data is kept in standard layout")
    }

    /// Mutable values in row-major order (shape cannot change).
    pub fn values_mut(&mut self) -> &mut [f64] {
        self.data.as_slice_mut().expect("map data is kept in standard layout")
    }

    /// Unit string.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Replace the unit string.
    pub fn set_unit(&mut self, unit: &str) {
        self.unit = unit.to_string();
    }

    // --- arithmetic ---

    fn zip_with<F: Fn(f64, f64) -> f64>(&self, other: &Map, op: &str, f: F) -> Result<Map> {
        self.geom.require_aligned(&other.geom, op)?;
        let data = Zip::from(&self.data).and(&other.data).map_collect(|&a, &b| f(a, b));
        Ok(Map { geom: self.geom.clone(), data, unit: self.unit.clone() })
    }

    /// Elementwise sum with an aligned map.
    pub fn add(&self, other: &Map) -> Result<Map> {
        self.zip_with(other, "add", |a, b| a + b)
    }

    /// Elementwise difference with an aligned map.
    pub fn sub(&self, other: &Map) -> Result<Map> {
        self.zip_with(other, "sub", |a, b| a - b)
    }

    /// Elementwise product with an aligned map.
    pub fn mul(&self, other: &Map) -> Result<Map> {
        self.zip_with(other, "mul", |a, b| a * b)
    }

    /// Elementwise quotient with an aligned map.
    pub fn div(&self, other: &Map) -> Result<Map> {
        self.zip_with(other, "div", |a, b| a / b)
    }

    /// Add a scalar to every element.
    pub fn add_scalar(&self, v: f64) -> Map {
        self.map_values(|x| x + v)
    }

    /// Multiply every element by a scalar.
    pub fn mul_scalar(&self, v: f64) -> Map {
        self.map_values(|x| x * v)
    }

    /// Apply `f` to every element.
    pub fn map_values<F: Fn(f64) -> f64>(&self, f: F) -> Map {
        Map { geom: self.geom.clone(), data: self.data.mapv(f), unit: self.unit.clone() }
    }

    /// In-place sum with an aligned map.
    pub fn iadd(&mut self, other: &Map) -> Result<()> {
        self.geom.require_aligned(&other.geom, "iadd")?;
        self.data += &other.data;
        Ok(())
    }

    /// Multiply every spatial image by `image` (an image on the same footprint).
    pub fn mul_image(&self, image: &Map) -> Result<Map> {
        if !image.geom.is_image() || !self.geom.footprint().is_aligned(image.geom.footprint()) {
            return Err(Error::GeometryMismatch("mul_image: footprints are not aligned".into()));
        }
        let ns = self.geom.n_spatial();
        let img = image.values();
        let mut out = self.clone();
        for (k, v) in out.values_mut().iter_mut().enumerate() {
            *v *= img[k % ns];
        }
        Ok(out)
    }

    // --- setters ---

    /// Set every element to `value`.
    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Histogram `coords` into the map, adding `weights` (1 each if `None`).
    /// Coordinates outside the geometry are skipped; returns how many were
    /// filled.
    pub fn fill_by_coord(&mut self, coords: &[MapCoord], weights: Option<&[f64]>) -> Result<usize> {
        if let Some(w) = weights {
            if w.len() != coords.len() {
                return Err(Error::Validation(format!(
                    "fill_by_coord: {} weights for {} coordinates",
                    w.len(),
                    coords.len()
                )));
            }
        }
        let geom = self.geom.clone();
        let values = self.values_mut();
        let mut filled = 0;
        for (i, c) in coords.iter().enumerate() {
            if let Some(k) = geom.coord_to_flat(c) {
                values[k] += weights.map_or(1.0, |w| w[i]);
                filled += 1;
            }
        }
        if filled < coords.len() {
            log::debug!("fill_by_coord: {} of {} coordinates outside the geometry", coords.len() - filled, coords.len());
        }
        Ok(filled)
    }

    /// Add `region` into the block starting at `offset` (one offset per
    /// data dimension).
    pub fn iadd_region(&mut self, region: &ArrayD<f64>, offset: &[usize]) -> Result<()> {
        let shape = self.data.shape().to_vec();
        if region.ndim() != shape.len() || offset.len() != shape.len() {
            return Err(Error::GeometryMismatch(format!(
                "region of rank {} cannot be added to map of rank {}",
                region.ndim(),
                shape.len()
            )));
        }
        if region.shape().iter().zip(offset).zip(&shape).any(|((&n, &o), &s)| o + n > s) {
            return Err(Error::GeometryMismatch(format!(
                "region {:?} at offset {:?} exceeds map shape {:?}",
                region.shape(),
                offset,
                shape
            )));
        }
        let mut view = self
            .data
            .slice_each_axis_mut(|ax| Slice::from(offset[ax.axis.index()]..offset[ax.axis.index()] + region.shape()[ax.axis.index()]));
        view += region;
        Ok(())
    }

    /// Add `other` into `self`, optionally weighted by `weights` (a mask on
    /// `other`'s geometry). `other` may be aligned or a WCS cutout of `self`.
    pub fn stack(&mut self, other: &Map, weights: Option<&Mask>) -> Result<()> {
        if !self.geom.axes_aligned(&other.geom) {
            return Err(Error::GeometryMismatch("stack: non-spatial axes are not aligned".into()));
        }
        let mut contribution = other.data.clone();
        if let Some(mask) = weights {
            if !mask.geom().is_aligned(&other.geom) {
                return Err(Error::GeometryMismatch("stack: weights are not aligned with the stacked map".into()));
            }
            Zip::from(&mut contribution).and(mask.data()).for_each(|v, &m| {
                if !m {
                    *v = 0.0;
                }
            });
        }
        if self.geom.footprint().is_aligned(other.geom.footprint()) {
            self.data += &contribution;
            return Ok(());
        }
        let offset = match (self.geom.footprint(), other.geom.footprint()) {
            (Footprint::Wcs(parent), Footprint::Wcs(child)) => child.offset_in(parent),
            _ => None,
        };
        let (x0, y0) =
            offset.ok_or_else(|| Error::GeometryMismatch("stack: footprint is neither aligned nor a cutout".into()))?;
        let mut full_offset = vec![0; self.geom.axes().len()];
        full_offset.extend([y0, x0]);
        self.iadd_region(&contribution, &full_offset)
    }

    // --- lookup ---

    /// Value at a data-order index, `None` outside.
    pub fn get_by_idx(&self, idx: &[usize]) -> Option<f64> {
        self.data.get(IxDyn(idx)).copied()
    }

    /// Value of the pixel containing each coordinate (NaN outside).
    pub fn get_by_coord(&self, coords: &[MapCoord]) -> Vec<f64> {
        let values = self.values();
        coords.iter().map(|c| self.geom.coord_to_flat(c).map_or(f64::NAN, |k| values[k])).collect()
    }

    /// Multilinear interpolation at each coordinate across the spatial and
    /// extra axes (pixel space; HEALPix uses four-neighbour weights).
    pub fn interp_by_coord(&self, coords: &[MapCoord], extrapolation: Extrapolation) -> Vec<f64> {
        coords.iter().map(|c| self.interp_one(c, extrapolation).unwrap_or(f64::NAN)).collect()
    }

    fn interp_one(&self, coord: &MapCoord, extrapolation: Extrapolation) -> Option<f64> {
        let clip = extrapolation == Extrapolation::Clip;
        let axes = self.geom.axes();
        if coord.axes.len() != axes.len() {
            return None;
        }
        let spatial = self.geom.footprint().interp_weights(&coord.sky, clip)?;
        let mut brackets = Vec::with_capacity(axes.len());
        for (axis, &c) in axes.iter().zip(&coord.axes) {
            if !clip && !axis.contains(c) {
                return None;
            }
            let p = axis.coord_to_pix(c);
            if p.is_nan() {
                return None;
            }
            let n = axis.nbin();
            let p = p.clamp(0.0, (n - 1) as f64);
            let lo = (p.floor() as usize).min(n - 1);
            let hi = (lo + 1).min(n - 1);
            let w = if hi == lo { 0.0 } else { p - lo as f64 };
            brackets.push((lo, hi, w));
        }
        let values = self.values();
        let mut acc = 0.0;
        let mut idx = vec![0; axes.len()];
        for corner in 0..(1usize << axes.len()) {
            let mut w_axes = 1.0;
            for (d, &(lo, hi, w)) in brackets.iter().enumerate() {
                let upper = (corner >> d) & 1 == 1;
                idx[d] = if upper { hi } else { lo };
                w_axes *= if upper { w } else { 1.0 - w };
            }
            if w_axes == 0.0 {
                continue;
            }
            for &(s, w_sp) in &spatial {
                acc += w_axes * w_sp * values[self.geom.flat_index(&idx, s)];
            }
        }
        Some(acc)
    }

    // --- reprojection ---

    /// Reproject onto `geom` (extra axes must be aligned).
    pub fn resample(&self, geom: Arc<Geometry>, mode: ResampleMode) -> Result<Map> {
        if !self.geom.axes_aligned(&geom) {
            return Err(Error::GeometryMismatch("resample: non-spatial axes are not aligned".into()));
        }
        if self.geom.footprint().frame() != geom.footprint().frame() {
            return Err(Error::GeometryMismatch("resample: footprints use different frames".into()));
        }
        let n_axes = self.geom.n_axes_bins();
        let (ns_src, ns_dst) = (self.geom.n_spatial(), geom.n_spatial());
        let src = self.values();
        let mut out = vec![0.0; n_axes * ns_dst];
        match mode {
            ResampleMode::Sum => {
                let samples = self.subpixel_samples(geom.pixel_scale())?;
                for (s, subs) in samples.iter().enumerate() {
                    for &(sky, frac) in subs {
                        if let Some(t) = geom.footprint().coord_to_spatial_idx(&sky) {
                            for a in 0..n_axes {
                                out[a * ns_dst + t] += frac * src[a * ns_src + s];
                            }
                        }
                    }
                }
            }
            ResampleMode::Mean => {
                for (t, center) in geom.spatial_coords().iter().enumerate() {
                    match self.geom.footprint().interp_weights(center, false) {
                        Some(weights) => {
                            for a in 0..n_axes {
                                out[a * ns_dst + t] = weights.iter().map(|&(s, w)| w * src[a * ns_src + s]).sum();
                            }
                        }
                        None => {
                            for a in 0..n_axes {
                                out[a * ns_dst + t] = f64::NAN;
                            }
                        }
                    }
                }
            }
        }
        Map::from_vec(geom, out, &self.unit)
    }

    /// Sub-pixel sample positions and area fractions for every source pixel,
    /// fine enough to resolve `target_scale` degrees.
    fn subpixel_samples(&self, target_scale: f64) -> Result<Vec<Vec<(SkyCoord, f64)>>> {
        let ratio = self.geom.pixel_scale() / target_scale;
        match self.geom.footprint() {
            Footprint::Wcs(w) => {
                let k = ((2.0 * ratio).ceil() as usize).clamp(1, MAX_SUBPIX);
                log::debug!("resample: {}x{} sub-pixels per wcs pixel (scale ratio {:.3})", k, k, ratio);
                let frac = 1.0 / (k * k) as f64;
                Ok((0..w.ny() * w.nx())
                    .map(|s| {
                        let (ix, iy) = ((s % w.nx()) as f64, (s / w.nx()) as f64);
                        let mut subs = Vec::with_capacity(k * k);
                        for j in 0..k {
                            for i in 0..k {
                                let x = ix - 0.5 + (i as f64 + 0.5) / k as f64;
                                let y = iy - 0.5 + (j as f64 + 0.5) / k as f64;
                                if let Some(c) = w.pix_to_coord(x, y) {
                                    subs.push((c, frac));
                                }
                            }
                        }
                        subs
                    })
                    .collect())
            }
            Footprint::Hpx(h) => {
                let levels = ((2.0 * ratio).log2().ceil().max(0.0) as u8).min(MAX_SUBORDER);
                log::debug!("resample: {} extra healpix orders per pixel (scale ratio {:.3})", levels, ratio);
                (0..h.n_stored())
                    .map(|s| {
                        let (child, pixels) = h.children(h.global_index(s), levels)?;
                        let frac = 1.0 / pixels.len() as f64;
                        Ok(pixels.iter().map(|&p| (child.pix2ang(p), frac)).collect())
                    })
                    .collect()
            }
        }
    }

    /// Sum groups of bins along `axis.name()` so the axis becomes `axis`,
    /// whose edges must be a subset of the current edges.
    pub fn resample_axis(&self, axis: &MapAxis) -> Result<Map> {
        let k = self
            .geom
            .axis_index(axis.name())
            .ok_or_else(|| Error::Validation(format!("map has no axis named '{}'", axis.name())))?;
        let edges = self.geom.axes()[k].edge_indices_of(axis)?;
        let parts: Vec<ArrayD<f64>> = edges
            .windows(2)
            .map(|w| self.data.slice_axis(Axis(k), Slice::from(w[0]..w[1])).sum_axis(Axis(k)).insert_axis(Axis(k)))
            .collect();
        let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
        let data = ndarray::concatenate(Axis(k), &views).map_err(|e| Error::Computation(e.to_string()))?;
        let geom = Arc::new(self.geom.replace_axis(axis.clone())?);
        Map::from_array(geom, data, &self.unit)
    }

    /// Sum over all extra axes.
    pub fn sum_over_axes(&self) -> Map {
        let ns = self.geom.n_spatial();
        let mut out = vec![0.0; ns];
        for (k, v) in self.values().iter().enumerate() {
            out[k % ns] += v;
        }
        let geom = Arc::new(self.geom.to_image());
        let data = ArrayD::from_shape_vec(IxDyn(&geom.data_shape()), out).expect("image shape matches spatial size");
        Map { geom, data, unit: self.unit.clone() }
    }

    /// Sum over one extra axis, removing it.
    pub fn sum_over_axis(&self, name: &str) -> Result<Map> {
        let k = self.geom.axis_index(name).ok_or_else(|| Error::Validation(format!("map has no axis named '{}'", name)))?;
        let geom = Arc::new(self.geom.drop_axis(name)?);
        Map::from_array(geom, self.data.sum_axis(Axis(k)), &self.unit)
    }

    /// Keep bins `range` of axis `name`.
    pub fn slice_by_idx(&self, name: &str, range: Range<usize>) -> Result<Map> {
        let k = self.geom.axis_index(name).ok_or_else(|| Error::Validation(format!("map has no axis named '{}'", name)))?;
        let axis = self.geom.axes()[k].slice(range.clone())?;
        let geom = Arc::new(self.geom.replace_axis(axis)?);
        let data = self.data.slice_axis(Axis(k), Slice::from(range)).to_owned();
        Map::from_array(geom, data, &self.unit)
    }

    /// Spatial image at extra-axis indices `idx`.
    pub fn get_image_by_idx(&self, idx: &[usize]) -> Result<Map> {
        let axes = self.geom.axes();
        if idx.len() != axes.len() || idx.iter().zip(axes).any(|(&i, a)| i >= a.nbin()) {
            return Err(Error::Validation(format!("image index {:?} out of range", idx)));
        }
        let mut view = self.data.view();
        for &i in idx {
            view = view.index_axis_move(Axis(0), i);
        }
        let geom = Arc::new(self.geom.to_image());
        Map::from_array(geom, view.to_owned(), &self.unit)
    }

    /// Spatial cutout (WCS).
    pub fn cutout(&self, position: &SkyCoord, width: (f64, f64)) -> Result<Map> {
        let (geom, (x0, y0)) = self.geom.cutout(position, width)?;
        let w = geom.footprint().as_wcs().ok_or_else(|| Error::Computation("cutout lost WCS footprint".into()))?;
        let k = self.geom.axes().len();
        let data = self
            .data
            .slice_axis(Axis(k), Slice::from(y0..y0 + w.ny()))
            .slice_axis(Axis(k + 1), Slice::from(x0..x0 + w.nx()))
            .to_owned();
        Map::from_array(Arc::new(geom), data, &self.unit)
    }

    /// Merge `factor x factor` pixel blocks (WCS). Sums when
    /// `preserve_counts`, averages otherwise.
    pub fn downsample(&self, factor: usize, preserve_counts: bool) -> Result<Map> {
        let geom = Arc::new(self.geom.downsample(factor)?);
        let (nx_in, ny_out, nx_out) = match (self.geom.footprint(), geom.footprint()) {
            (Footprint::Wcs(a), Footprint::Wcs(b)) => (a.nx(), b.ny(), b.nx()),
            _ => return Err(Error::Computation("downsample requires WCS footprints".into())),
        };
        let (ns_in, ns_out) = (self.geom.n_spatial(), ny_out * nx_out);
        let scale = if preserve_counts { 1.0 } else { 1.0 / (factor * factor) as f64 };
        let src = self.values();
        let mut out = vec![0.0; self.geom.n_axes_bins() * ns_out];
        for a in 0..self.geom.n_axes_bins() {
            for s in 0..ns_in {
                let (ix, iy) = (s % nx_in, s / nx_in);
                out[a * ns_out + (iy / factor) * nx_out + ix / factor] += scale * src[a * ns_in + s];
            }
        }
        Map::from_vec(geom, out, &self.unit)
    }

    /// Split pixels into `factor x factor` blocks (WCS). Divides values by
    /// `factor^2` when `preserve_counts`, copies them otherwise.
    pub fn upsample(&self, factor: usize, preserve_counts: bool) -> Result<Map> {
        let geom = Arc::new(self.geom.upsample(factor)?);
        let (nx_in, nx_out) = match (self.geom.footprint(), geom.footprint()) {
            (Footprint::Wcs(a), Footprint::Wcs(b)) => (a.nx(), b.nx()),
            _ => return Err(Error::Computation("upsample requires WCS footprints".into())),
        };
        let (ns_in, ns_out) = (self.geom.n_spatial(), geom.n_spatial());
        let scale = if preserve_counts { 1.0 / (factor * factor) as f64 } else { 1.0 };
        let src = self.values();
        let mut out = vec![0.0; self.geom.n_axes_bins() * ns_out];
        for (k, v) in out.iter_mut().enumerate() {
            let (a, t) = (k / ns_out, k % ns_out);
            let (ix, iy) = (t % nx_out, t / nx_out);
            *v = scale * src[a * ns_in + (iy / factor) * nx_in + ix / factor];
        }
        Map::from_vec(geom, out, &self.unit)
    }

    // --- reductions ---

    /// Sum of all elements.
    pub fn sum(&self) -> f64 {
        self.data.sum()
    }

    /// Sum of elements where `mask` is set.
    pub fn sum_masked(&self, mask: &Mask) -> Result<f64> {
        self.geom.require_aligned(mask.geom(), "sum_masked")?;
        Ok(Zip::from(&self.data).and(mask.data()).fold(0.0, |acc, &v, &m| if m { acc + v } else { acc }))
    }

    /// Copy with elements outside `mask` set to zero.
    pub fn to_masked(&self, mask: &Mask) -> Result<Map> {
        self.geom.require_aligned(mask.geom(), "to_masked")?;
        let data = Zip::from(&self.data).and(mask.data()).map_collect(|&v, &m| if m { v } else { 0.0 });
        Ok(Map { geom: self.geom.clone(), data, unit: self.unit.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Frame;
    use crate::geom::hpx::{HpxFootprint, HpxScheme};
    use crate::geom::wcs::{Projection, WcsFootprint};
    use approx::assert_relative_eq;

    fn geom(nx: usize, binsz: f64, nbin: usize) -> Arc<Geometry> {
        let w = WcsFootprint::new(SkyCoord::new(83.6, 22.0), binsz, (nx, nx), Projection::Tan, Frame::Icrs).unwrap();
        let e = MapAxis::from_energy_bounds(1.0, 10.0, nbin, "TeV", "energy").unwrap();
        Arc::new(Geometry::wcs(w, vec![e]).unwrap())
    }

    fn ramp(g: &Arc<Geometry>) -> Map {
        let n = g.npix();
        Map::from_vec(g.clone(), (0..n).map(|i| i as f64 * 0.5 + 1.0).collect(), "").unwrap()
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let g = geom(4, 0.1, 2);
        assert!(Map::from_vec(g, vec![0.0; 5], "").is_err());
    }

    #[test]
    fn test_arithmetic_requires_alignment() {
        let a = Map::full(geom(4, 0.1, 2), 1.0, "");
        let b = Map::full(geom(4, 0.2, 2), 1.0, "");
        assert!(matches!(a.add(&b), Err(Error::GeometryMismatch(_))));
        assert!(matches!(a.mul(&b), Err(Error::GeometryMismatch(_))));
    }

    #[test]
    fn test_fill_by_coord_skips_outside() {
        let g = geom(4, 0.1, 2);
        let mut m = Map::new(g.clone(), "");
        let inside = MapCoord::new(g.center(), vec![2.0]);
        let outside = MapCoord::new(SkyCoord::new(0.0, 0.0), vec![2.0]);
        assert_eq!(m.fill_by_coord(&[inside.clone(), inside, outside], None).unwrap(), 2);
        assert_relative_eq!(m.sum(), 2.0);
    }

    #[test]
    fn test_fill_by_coord_rejects_weight_length_mismatch() {
        let g = geom(4, 0.1, 2);
        let mut m = Map::new(g.clone(), "");
        let inside = MapCoord::new(g.center(), vec![2.0]);
        let coords = [inside.clone(), inside];
        assert!(matches!(m.fill_by_coord(&coords, Some(&[1.0])), Err(Error::Validation(_))));
        assert!(matches!(m.fill_by_coord(&coords, Some(&[1.0, 2.0, 3.0])), Err(Error::Validation(_))));
        assert_eq!(m.sum(), 0.0);
        assert_eq!(m.fill_by_coord(&coords, Some(&[1.5, 2.5])).unwrap(), 2);
        assert_relative_eq!(m.sum(), 4.0);
    }

    #[test]
    fn test_interp_at_pixel_centers_reproduces_values() {
        let g = geom(5, 0.1, 3);
        let m = ramp(&g);
        let e = g.axes()[0].center(1);
        let sky = g.spatial_coords()[7];
        let v = m.interp_by_coord(&[MapCoord::new(sky, vec![e])], Extrapolation::Nan);
        assert_relative_eq!(v[0], m.values()[g.flat_index(&[1], 7)], max_relative = 1e-9);
    }

    #[test]
    fn test_interp_outside_nan_or_clip() {
        let g = geom(5, 0.1, 3);
        let m = Map::full(g.clone(), 2.0, "");
        let far = MapCoord::new(SkyCoord::new(83.6, 23.0), vec![2.0]);
        assert!(m.interp_by_coord(&[far.clone()], Extrapolation::Nan)[0].is_nan());
        assert_relative_eq!(m.interp_by_coord(&[far], Extrapolation::Clip)[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hpx_cone_clip_uses_nearest_stored_pixel() {
        let h = HpxFootprint::cone(4, HpxScheme::Nested, Frame::Icrs, SkyCoord::new(83.6, 22.0), 5.0).unwrap();
        let g = Arc::new(Geometry::hpx(h, vec![]).unwrap());
        let values: Vec<f64> = (0..g.n_spatial()).map(|i| i as f64 + 1.0).collect();
        let m = Map::from_vec(g.clone(), values, "").unwrap();
        let far = SkyCoord::new(83.6, 40.0);
        let nearest = g
            .spatial_coords()
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.separation(&far).total_cmp(&b.1.separation(&far)))
            .map(|(i, _)| i)
            .unwrap();

        let coord = MapCoord::new(far, vec![]);
        assert!(m.interp_by_coord(&[coord.clone()], Extrapolation::Nan)[0].is_nan());
        assert_eq!(m.interp_by_coord(&[coord], Extrapolation::Clip)[0], nearest as f64 + 1.0);
    }

    #[test]
    fn test_resample_axis_sums_groups() {
        let g = geom(3, 0.1, 4);
        let m = Map::full(g.clone(), 1.0, "");
        let coarse = g.axes()[0].downsample(2).unwrap();
        let r = m.resample_axis(&coarse).unwrap();
        assert_eq!(r.geom().data_shape(), vec![2, 3, 3]);
        assert!(r.values().iter().all(|&v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn test_slice_and_image() {
        let g = geom(3, 0.1, 4);
        let m = ramp(&g);
        let s = m.slice_by_idx("energy", 1..3).unwrap();
        assert_eq!(s.geom().data_shape(), vec![2, 3, 3]);
        assert_relative_eq!(s.values()[0], m.values()[9], epsilon = 1e-12);
        let img = m.get_image_by_idx(&[2]).unwrap();
        assert_relative_eq!(img.values()[4], m.values()[2 * 9 + 4], epsilon = 1e-12);
        let total = m.sum_over_axes();
        assert_relative_eq!(total.sum(), m.sum(), max_relative = 1e-12);
        let reduced = m.sum_over_axis("energy").unwrap();
        assert!(reduced.geom().is_image());
    }

    #[test]
    fn test_cutout_and_stack_back() {
        let g = geom(8, 0.1, 2);
        let m = ramp(&g);
        let center = g.spatial_coords()[3 * 8 + 4];
        let cut = m.cutout(&center, (0.25, 0.25)).unwrap();
        let mut acc = Map::new(g.clone(), "");
        acc.stack(&cut, None).unwrap();
        assert_relative_eq!(acc.sum(), cut.sum(), max_relative = 1e-12);
    }

    #[test]
    fn test_downsample_upsample_preserve_counts() {
        let g = geom(4, 0.1, 2);
        let m = ramp(&g);
        let down = m.downsample(2, true).unwrap();
        assert_relative_eq!(down.sum(), m.sum(), max_relative = 1e-12);
        let up = m.upsample(3, true).unwrap();
        assert_relative_eq!(up.sum(), m.sum(), max_relative = 1e-12);
        let up_density = m.upsample(2, false).unwrap();
        assert_relative_eq!(up_density.values()[0], m.values()[0], epsilon = 1e-12);
    }

    #[test]
    fn test_hpx_map_interp_constant() {
        let h = HpxFootprint::allsky(2, HpxScheme::Nested, Frame::Icrs).unwrap();
        let g = Arc::new(Geometry::hpx(h, vec![]).unwrap());
        let m = Map::full(g, 3.0, "");
        let v = m.interp_by_coord(&[MapCoord::new(SkyCoord::new(12.0, 34.0), vec![])], Extrapolation::Nan);
        assert_relative_eq!(v[0], 3.0, epsilon = 1e-12);
    }
}
