//! Geometries: a spatial footprint plus zero or more extra axes.
//!
//! The two footprint variants ([`WcsFootprint`], [`HpxFootprint`]) implement
//! one small capability interface, [`SpatialGrid`], and [`Footprint`]
//! dispatches on the variant. Everything above the spatial layer
//! ([`Geometry`], `Map`) is written once against that interface.
//!
//! Data layout is `[axis_0, ..., axis_{k-1}, spatial...]` where the spatial
//! part is `[ny, nx]` for WCS and `[npix]` for HEALPix. Spatial pixels are
//! also addressed by a flat index (`iy * nx + ix` for WCS, the stored-pixel
//! position for HEALPix).

pub mod hpx;
pub mod wcs;

use std::hash::Hasher;
use std::sync::Arc;

use gf_core::{Error, Result};
use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

use crate::axis::MapAxis;
use crate::coord::{Frame, SkyCoord};
use hpx::HpxFootprint;
use wcs::WcsFootprint;

/// Spatial capability shared by every footprint variant.
pub trait SpatialGrid {
    /// Spatial part of the data shape (`[ny, nx]` or `[npix]`).
    fn spatial_shape(&self) -> Vec<usize>;

    /// Number of spatial pixels.
    fn n_spatial(&self) -> usize {
        self.spatial_shape().iter().product()
    }

    /// Fractional spatial pixel coordinates in array order, `None` if the
    /// coordinate cannot be mapped onto the grid.
    fn coord_to_spatial_pix(&self, coord: &SkyCoord) -> Option<Vec<f64>>;

    /// Flat index of the spatial pixel containing `coord`, `None` outside.
    fn coord_to_spatial_idx(&self, coord: &SkyCoord) -> Option<usize>;

    /// Center of spatial pixel `idx`.
    fn spatial_center(&self, idx: usize) -> SkyCoord;

    /// Solid angle (sr) of spatial pixel `idx`.
    fn spatial_solid_angle(&self, idx: usize) -> f64;

    /// Flat pixel indices and weights interpolating at `coord`.
    ///
    /// With `clip = false` coordinates outside the footprint give `None`;
    /// with `clip = true` they use the nearest edge pixels where possible.
    fn interp_weights(&self, coord: &SkyCoord, clip: bool) -> Option<Vec<(usize, f64)>>;

    /// Typical pixel size in degrees.
    fn pixel_scale(&self) -> f64;

    /// Reference center of the footprint.
    fn center(&self) -> SkyCoord;

    /// Frame label.
    fn frame(&self) -> Frame;
}

impl SpatialGrid for WcsFootprint {
    fn spatial_shape(&self) -> Vec<usize> {
        vec![self.ny(), self.nx()]
    }

    fn coord_to_spatial_pix(&self, coord: &SkyCoord) -> Option<Vec<f64>> {
        self.coord_to_pix(coord).map(|(x, y)| vec![y, x])
    }

    fn coord_to_spatial_idx(&self, coord: &SkyCoord) -> Option<usize> {
        let (x, y) = self.coord_to_pix(coord)?;
        self.pix_to_idx(x, y).map(|(ix, iy)| iy * self.nx() + ix)
    }

    fn spatial_center(&self, idx: usize) -> SkyCoord {
        let (ix, iy) = (idx % self.nx(), idx / self.nx());
        // pixel centers of a valid grid always project
        self.pix_to_coord(ix as f64, iy as f64).unwrap_or(self.crval())
    }

    fn spatial_solid_angle(&self, idx: usize) -> f64 {
        self.solid_angle(idx % self.nx(), idx / self.nx())
    }

    fn interp_weights(&self, coord: &SkyCoord, clip: bool) -> Option<Vec<(usize, f64)>> {
        let (x, y) = self.coord_to_pix(coord)?;
        if !clip && self.pix_to_idx(x, y).is_none() {
            return None;
        }
        let (nx, ny) = (self.nx(), self.ny());
        let (x0, x1, wx) = bracket(x, nx);
        let (y0, y1, wy) = bracket(y, ny);
        Some(vec![
            (y0 * nx + x0, (1.0 - wx) * (1.0 - wy)),
            (y0 * nx + x1, wx * (1.0 - wy)),
            (y1 * nx + x0, (1.0 - wx) * wy),
            (y1 * nx + x1, wx * wy),
        ])
    }

    fn pixel_scale(&self) -> f64 {
        self.binsz()
    }

    fn center(&self) -> SkyCoord {
        let x = (self.nx() as f64 - 1.0) / 2.0;
        let y = (self.ny() as f64 - 1.0) / 2.0;
        self.pix_to_coord(x, y).unwrap_or(self.crval())
    }

    fn frame(&self) -> Frame {
        WcsFootprint::frame(self)
    }
}

/// Lower/upper neighbour and upper weight of fractional pixel `p` on an axis
/// of `n` centers, clamped to the edge pixels.
fn bracket(p: f64, n: usize) -> (usize, usize, f64) {
    let p = p.clamp(0.0, (n - 1) as f64);
    let lo = (p.floor() as usize).min(n - 1);
    let hi = (lo + 1).min(n - 1);
    let w = if hi == lo { 0.0 } else { p - lo as f64 };
    (lo, hi, w)
}

impl SpatialGrid for HpxFootprint {
    fn spatial_shape(&self) -> Vec<usize> {
        vec![self.n_stored()]
    }

    fn coord_to_spatial_pix(&self, coord: &SkyCoord) -> Option<Vec<f64>> {
        self.coord_to_spatial_idx(coord).map(|i| vec![i as f64])
    }

    fn coord_to_spatial_idx(&self, coord: &SkyCoord) -> Option<usize> {
        self.local_index(self.ang2pix(coord))
    }

    fn spatial_center(&self, idx: usize) -> SkyCoord {
        self.pix2ang(self.global_index(idx))
    }

    fn spatial_solid_angle(&self, _idx: usize) -> f64 {
        self.pixel_solid_angle()
    }

    fn interp_weights(&self, coord: &SkyCoord, clip: bool) -> Option<Vec<(usize, f64)>> {
        if !clip && self.coord_to_spatial_idx(coord).is_none() {
            return None;
        }
        let kept: Vec<(usize, f64)> = self
            .interpolation_weights(coord)
            .iter()
            .filter_map(|&(p, w)| self.local_index(p).map(|i| (i, w)))
            .collect();
        let total: f64 = kept.iter().map(|(_, w)| w).sum();
        if kept.is_empty() || !(total > 0.0) {
            // past the edge of a cone: no interpolation neighbour is stored
            return if clip { self.nearest_stored(coord).map(|i| vec![(i, 1.0)]) } else { None };
        }
        Some(kept.into_iter().map(|(i, w)| (i, w / total)).collect())
    }

    fn pixel_scale(&self) -> f64 {
        HpxFootprint::pixel_scale(self)
    }

    fn center(&self) -> SkyCoord {
        self.region().map(|r| r.center).unwrap_or(SkyCoord::new(0.0, 0.0))
    }

    fn frame(&self) -> Frame {
        HpxFootprint::frame(self)
    }
}

/// Spatial footprint of a [`Geometry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Footprint {
    /// Projected-plane grid.
    Wcs(WcsFootprint),
    /// HEALPix pixelization.
    Hpx(HpxFootprint),
}

impl Footprint {
    fn grid(&self) -> &dyn SpatialGrid {
        match self {
            Footprint::Wcs(w) => w,
            Footprint::Hpx(h) => h,
        }
    }

    /// WCS footprint, if this is one.
    pub fn as_wcs(&self) -> Option<&WcsFootprint> {
        match self {
            Footprint::Wcs(w) => Some(w),
            Footprint::Hpx(_) => None,
        }
    }

    /// HEALPix footprint, if this is one.
    pub fn as_hpx(&self) -> Option<&HpxFootprint> {
        match self {
            Footprint::Hpx(h) => Some(h),
            Footprint::Wcs(_) => None,
        }
    }

    /// Structural equality.
    pub fn is_aligned(&self, other: &Footprint) -> bool {
        match (self, other) {
            (Footprint::Wcs(a), Footprint::Wcs(b)) => a.is_aligned(b),
            (Footprint::Hpx(a), Footprint::Hpx(b)) => a.is_aligned(b),
            _ => false,
        }
    }

    fn hash_into<H: Hasher>(&self, h: &mut H) {
        match self {
            Footprint::Wcs(w) => w.hash_into(h),
            Footprint::Hpx(p) => p.hash_into(h),
        }
    }
}

impl SpatialGrid for Footprint {
    fn spatial_shape(&self) -> Vec<usize> {
        self.grid().spatial_shape()
    }
    fn coord_to_spatial_pix(&self, coord: &SkyCoord) -> Option<Vec<f64>> {
        self.grid().coord_to_spatial_pix(coord)
    }
    fn coord_to_spatial_idx(&self, coord: &SkyCoord) -> Option<usize> {
        self.grid().coord_to_spatial_idx(coord)
    }
    fn spatial_center(&self, idx: usize) -> SkyCoord {
        self.grid().spatial_center(idx)
    }
    fn spatial_solid_angle(&self, idx: usize) -> f64 {
        self.grid().spatial_solid_angle(idx)
    }
    fn interp_weights(&self, coord: &SkyCoord, clip: bool) -> Option<Vec<(usize, f64)>> {
        self.grid().interp_weights(coord, clip)
    }
    fn pixel_scale(&self) -> f64 {
        self.grid().pixel_scale()
    }
    fn center(&self) -> SkyCoord {
        self.grid().center()
    }
    fn frame(&self) -> Frame {
        self.grid().frame()
    }
}

/// A coordinate in a geometry: sky position plus one value per extra axis
/// (in axis order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapCoord {
    /// Sky position.
    pub sky: SkyCoord,
    /// Extra-axis coordinates.
    pub axes: Vec<f64>,
}

impl MapCoord {
    /// Coordinate from a sky position and extra-axis values.
    pub fn new(sky: SkyCoord, axes: Vec<f64>) -> Self {
        Self { sky, axes }
    }
}

/// Footprint plus extra axes. Immutable; share it through `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GeometryDef", into = "GeometryDef")]
pub struct Geometry {
    footprint: Footprint,
    axes: Vec<MapAxis>,
    fingerprint: u64,
}

#[derive(Serialize, Deserialize)]
struct GeometryDef {
    footprint: Footprint,
    axes: Vec<MapAxis>,
}

impl TryFrom<GeometryDef> for Geometry {
    type Error = Error;
    fn try_from(def: GeometryDef) -> Result<Self> {
        Geometry::new(def.footprint, def.axes)
    }
}

impl From<Geometry> for GeometryDef {
    fn from(g: Geometry) -> Self {
        GeometryDef { footprint: g.footprint, axes: g.axes }
    }
}

impl PartialEq for Geometry {
    fn eq(&self, other: &Self) -> bool {
        self.is_aligned(other)
    }
}

impl Geometry {
    /// Geometry from a footprint and extra axes (names must be unique).
    pub fn new(footprint: Footprint, axes: Vec<MapAxis>) -> Result<Self> {
        for (i, a) in axes.iter().enumerate() {
            if axes[..i].iter().any(|b| b.name() == a.name()) {
                return Err(Error::InvalidGeometry(format!("duplicate axis name '{}'", a.name())));
            }
        }
        let mut h = XxHash64::with_seed(0);
        footprint.hash_into(&mut h);
        for a in &axes {
            a.hash_into(&mut h);
        }
        let fingerprint = h.finish();
        Ok(Self { footprint, axes, fingerprint })
    }

    /// WCS geometry.
    pub fn wcs(footprint: WcsFootprint, axes: Vec<MapAxis>) -> Result<Self> {
        Self::new(Footprint::Wcs(footprint), axes)
    }

    /// HEALPix geometry.
    pub fn hpx(footprint: HpxFootprint, axes: Vec<MapAxis>) -> Result<Self> {
        Self::new(Footprint::Hpx(footprint), axes)
    }

    /// Wrap in an `Arc` for sharing between maps.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Spatial footprint.
    pub fn footprint(&self) -> &Footprint {
        &self.footprint
    }

    /// Extra axes.
    pub fn axes(&self) -> &[MapAxis] {
        &self.axes
    }

    /// Axis position by name.
    pub fn axis_index(&self, name: &str) -> Option<usize> {
        self.axes.iter().position(|a| a.name() == name)
    }

    /// Axis by name.
    pub fn axis(&self, name: &str) -> Result<&MapAxis> {
        self.axes
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| Error::Validation(format!("geometry has no axis named '{}'", name)))
    }

    /// Structural hash of footprint and axes.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Whether there are no extra axes.
    pub fn is_image(&self) -> bool {
        self.axes.is_empty()
    }

    /// Full data shape.
    pub fn data_shape(&self) -> Vec<usize> {
        let mut shape: Vec<usize> = self.axes.iter().map(|a| a.nbin()).collect();
        shape.extend(self.footprint.spatial_shape());
        shape
    }

    /// Number of spatial pixels.
    pub fn n_spatial(&self) -> usize {
        self.footprint.n_spatial()
    }

    /// Number of non-spatial bins (product over extra axes).
    pub fn n_axes_bins(&self) -> usize {
        self.axes.iter().map(|a| a.nbin()).product()
    }

    /// Total number of elements.
    pub fn npix(&self) -> usize {
        self.n_axes_bins() * self.n_spatial()
    }

    /// Flat element index from extra-axis indices and a flat spatial index.
    pub fn flat_index(&self, axis_idx: &[usize], spatial: usize) -> usize {
        let mut k = 0;
        for (a, &i) in self.axes.iter().zip(axis_idx) {
            k = k * a.nbin() + i;
        }
        k * self.n_spatial() + spatial
    }

    /// Inverse of [`flat_index`](Self::flat_index).
    pub fn unravel(&self, flat: usize) -> (Vec<usize>, usize) {
        let ns = self.n_spatial();
        let spatial = flat % ns;
        let mut rest = flat / ns;
        let mut idx = vec![0; self.axes.len()];
        for (k, a) in self.axes.iter().enumerate().rev() {
            idx[k] = rest % a.nbin();
            rest /= a.nbin();
        }
        (idx, spatial)
    }

    fn check_coord(&self, coord: &MapCoord) -> Option<()> {
        (coord.axes.len() == self.axes.len()).then_some(())
    }

    /// Fractional pixel coordinates in data order; `None` if the spatial
    /// projection is undefined or the coordinate has the wrong arity.
    pub fn coord_to_pix(&self, coord: &MapCoord) -> Option<Vec<f64>> {
        self.check_coord(coord)?;
        let mut pix: Vec<f64> = self.axes.iter().zip(&coord.axes).map(|(a, &c)| a.coord_to_pix(c)).collect();
        pix.extend(self.footprint.coord_to_spatial_pix(&coord.sky)?);
        Some(pix)
    }

    /// Coordinate of a (fractional) pixel in data order.
    pub fn pix_to_coord(&self, pix: &[f64]) -> Option<MapCoord> {
        let k = self.axes.len();
        if pix.len() != k + self.footprint.spatial_shape().len() {
            return None;
        }
        let axes = self.axes.iter().zip(pix).map(|(a, &p)| a.pix_to_coord(p)).collect();
        let sky = match &self.footprint {
            Footprint::Wcs(w) => w.pix_to_coord(pix[k + 1], pix[k])?,
            Footprint::Hpx(h) => {
                let i = (pix[k] + 0.5).floor();
                if !(i >= 0.0 && i < h.n_stored() as f64) {
                    return None;
                }
                h.spatial_center(i as usize)
            }
        };
        Some(MapCoord { sky, axes })
    }

    /// Integer pixel in data order, `None` outside the geometry.
    pub fn coord_to_idx(&self, coord: &MapCoord) -> Option<Vec<usize>> {
        let (axis_idx, spatial) = self.coord_to_split_idx(coord)?;
        let mut idx = axis_idx;
        match &self.footprint {
            Footprint::Wcs(w) => {
                idx.push(spatial / w.nx());
                idx.push(spatial % w.nx());
            }
            Footprint::Hpx(_) => idx.push(spatial),
        }
        Some(idx)
    }

    /// Extra-axis indices and flat spatial index, `None` outside.
    pub fn coord_to_split_idx(&self, coord: &MapCoord) -> Option<(Vec<usize>, usize)> {
        self.check_coord(coord)?;
        let axis_idx = self.axes.iter().zip(&coord.axes).map(|(a, &c)| a.coord_to_idx(c)).collect::<Option<Vec<_>>>()?;
        let spatial = self.footprint.coord_to_spatial_idx(&coord.sky)?;
        Some((axis_idx, spatial))
    }

    /// Flat element index of `coord`, `None` outside.
    pub fn coord_to_flat(&self, coord: &MapCoord) -> Option<usize> {
        self.coord_to_split_idx(coord).map(|(a, s)| self.flat_index(&a, s))
    }

    /// Whether `coord` falls inside the geometry.
    pub fn contains(&self, coord: &MapCoord) -> bool {
        self.coord_to_split_idx(coord).is_some()
    }

    /// Solid angle (sr) of every spatial pixel, flat order.
    pub fn solid_angle(&self) -> Vec<f64> {
        (0..self.n_spatial()).map(|i| self.footprint.spatial_solid_angle(i)).collect()
    }

    /// Center of every spatial pixel, flat order.
    pub fn spatial_coords(&self) -> Vec<SkyCoord> {
        (0..self.n_spatial()).map(|i| self.footprint.spatial_center(i)).collect()
    }

    /// Angular distance (deg) of every spatial pixel center to `position`.
    pub fn separation(&self, position: &SkyCoord) -> Vec<f64> {
        self.spatial_coords().iter().map(|c| c.separation(position)).collect()
    }

    /// Footprint center.
    pub fn center(&self) -> SkyCoord {
        self.footprint.center()
    }

    /// Typical pixel size in degrees.
    pub fn pixel_scale(&self) -> f64 {
        self.footprint.pixel_scale()
    }

    /// Whether footprints, axis edges and axis order all match.
    pub fn is_aligned(&self, other: &Geometry) -> bool {
        self.fingerprint == other.fingerprint
            || (self.footprint.is_aligned(&other.footprint)
                && self.axes.len() == other.axes.len()
                && self.axes.iter().zip(&other.axes).all(|(a, b)| a.is_aligned(b)))
    }

    /// Whether the extra axes of both geometries match.
    pub fn axes_aligned(&self, other: &Geometry) -> bool {
        self.axes.len() == other.axes.len() && self.axes.iter().zip(&other.axes).all(|(a, b)| a.is_aligned(b))
    }

    /// Fail with [`Error::GeometryMismatch`] unless aligned.
    pub fn require_aligned(&self, other: &Geometry, op: &str) -> Result<()> {
        if self.is_aligned(other) {
            Ok(())
        } else {
            Err(Error::GeometryMismatch(format!("{}: geometries are not aligned", op)))
        }
    }

    /// Same footprint without extra axes.
    pub fn to_image(&self) -> Geometry {
        self.with_axes(Vec::new())
    }

    /// Same footprint with `axes` replacing the extra axes.
    pub fn to_cube(&self, axes: Vec<MapAxis>) -> Result<Geometry> {
        Geometry::new(self.footprint.clone(), axes)
    }

    fn with_axes(&self, axes: Vec<MapAxis>) -> Geometry {
        let mut h = XxHash64::with_seed(0);
        self.footprint.hash_into(&mut h);
        for a in &axes {
            a.hash_into(&mut h);
        }
        Geometry { footprint: self.footprint.clone(), axes, fingerprint: h.finish() }
    }

    /// Replace the axis with the same name as `axis`.
    pub fn replace_axis(&self, axis: MapAxis) -> Result<Geometry> {
        let i = self
            .axis_index(axis.name())
            .ok_or_else(|| Error::Validation(format!("geometry has no axis named '{}'", axis.name())))?;
        let mut axes = self.axes.clone();
        axes[i] = axis;
        Ok(self.with_axes(axes))
    }

    /// Collapse axis `name` into a single bin.
    pub fn squash(&self, name: &str) -> Result<Geometry> {
        let squashed = self.axis(name)?.squash();
        self.replace_axis(squashed)
    }

    /// Remove axis `name`.
    pub fn drop_axis(&self, name: &str) -> Result<Geometry> {
        let i = self.axis_index(name).ok_or_else(|| Error::Validation(format!("geometry has no axis named '{}'", name)))?;
        let mut axes = self.axes.clone();
        axes.remove(i);
        Ok(self.with_axes(axes))
    }

    fn require_wcs(&self, op: &str) -> Result<&WcsFootprint> {
        self.footprint
            .as_wcs()
            .ok_or_else(|| Error::Validation(format!("{} is only supported for WCS geometries", op)))
    }

    /// Spatially finer geometry (WCS).
    pub fn upsample(&self, factor: usize) -> Result<Geometry> {
        let w = self.require_wcs("upsample")?.upsample(factor)?;
        Geometry::new(Footprint::Wcs(w), self.axes.clone())
    }

    /// Spatially coarser geometry (WCS).
    pub fn downsample(&self, factor: usize) -> Result<Geometry> {
        let w = self.require_wcs("downsample")?.downsample(factor)?;
        Geometry::new(Footprint::Wcs(w), self.axes.clone())
    }

    /// Spatial cutout (WCS) and its pixel offset `(x0, y0)` in `self`.
    pub fn cutout(&self, position: &SkyCoord, width: (f64, f64)) -> Result<(Geometry, (usize, usize))> {
        let (w, off) = self.require_wcs("cutout")?.cutout(position, width)?;
        Ok((Geometry::new(Footprint::Wcs(w), self.axes.clone())?, off))
    }
}

#[cfg(test)]
mod tests {
    use super::hpx::HpxScheme;
    use super::wcs::Projection;
    use super::*;
    use approx::assert_relative_eq;

    fn cube() -> Geometry {
        let w = WcsFootprint::new(SkyCoord::new(0.0, 0.0), 0.1, (10, 8), Projection::Car, Frame::Galactic).unwrap();
        let e = MapAxis::from_energy_bounds(1.0, 10.0, 3, "TeV", "energy").unwrap();
        Geometry::wcs(w, vec![e]).unwrap()
    }

    #[test]
    fn test_data_shape_and_flat_index() {
        let g = cube();
        assert_eq!(g.data_shape(), vec![3, 8, 10]);
        assert_eq!(g.npix(), 240);
        let k = g.flat_index(&[2], 17);
        assert_eq!(k, 2 * 80 + 17);
        assert_eq!(g.unravel(k), (vec![2], 17));
    }

    #[test]
    fn test_coord_idx_and_contains() {
        let g = cube();
        let c = MapCoord::new(SkyCoord::new(0.0, 0.0), vec![2.0]);
        let idx = g.coord_to_idx(&c).unwrap();
        assert_eq!(idx[0], 0);
        assert!(g.contains(&c));
        assert!(!g.contains(&MapCoord::new(SkyCoord::new(0.0, 0.0), vec![20.0])));
        assert!(!g.contains(&MapCoord::new(SkyCoord::new(5.0, 0.0), vec![2.0])));
        assert!(!g.contains(&MapCoord::new(SkyCoord::new(0.0, 0.0), vec![])));
    }

    #[test]
    fn test_pix_coord_roundtrip() {
        let g = cube();
        let pix = vec![1.0, 3.0, 4.0];
        let c = g.pix_to_coord(&pix).unwrap();
        let back = g.coord_to_pix(&c).unwrap();
        for (a, b) in pix.iter().zip(&back) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_alignment_and_fingerprint() {
        let a = cube();
        let b = cube();
        assert!(a.is_aligned(&b));
        assert_eq!(a.fingerprint(), b.fingerprint());
        let img = a.to_image();
        assert!(!a.is_aligned(&img));
        assert_ne!(a.fingerprint(), img.fingerprint());
        assert!(matches!(a.require_aligned(&img, "add"), Err(Error::GeometryMismatch(_))));
    }

    #[test]
    fn test_duplicate_axis_names_rejected() {
        let w = WcsFootprint::new(SkyCoord::new(0.0, 0.0), 0.1, (4, 4), Projection::Tan, Frame::Icrs).unwrap();
        let e = MapAxis::from_energy_bounds(1.0, 10.0, 3, "TeV", "energy").unwrap();
        assert!(Geometry::wcs(w, vec![e.clone(), e]).is_err());
    }

    #[test]
    fn test_hpx_geometry_solid_angle_sums_to_sphere() {
        let h = HpxFootprint::allsky(2, HpxScheme::Ring, Frame::Icrs).unwrap();
        let g = Geometry::hpx(h, vec![]).unwrap();
        let total: f64 = g.solid_angle().iter().sum();
        assert_relative_eq!(total, 4.0 * std::f64::consts::PI, epsilon = 1e-12);
    }

    #[test]
    fn test_squash_and_replace() {
        let g = cube();
        let s = g.squash("energy").unwrap();
        assert_eq!(s.data_shape(), vec![1, 8, 10]);
        assert!(g.squash("time").is_err());
        let d = g.drop_axis("energy").unwrap();
        assert!(d.is_image());
    }

    #[test]
    fn test_serde_roundtrip_restores_fingerprint() {
        let g = cube();
        let json = serde_json::to_string(&g).unwrap();
        let back: Geometry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fingerprint(), g.fingerprint());
    }
}
