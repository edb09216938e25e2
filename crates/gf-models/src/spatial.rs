//! Spatial models: sky densities normalized to unit integral (sr^-1).

use std::f64::consts::PI;

use gf_core::{Error, Result};
use gf_maps::{Extrapolation, Footprint, Frame, Geometry, Map, MapCoord, SkyCoord, SpatialGrid};

use crate::parameter::Parameter;
use crate::parameters::Parameters;

/// Gaussian densities are cut at this many sigma when integrating on a grid.
const GAUSS_EXTENT: f64 = 5.0;

fn position_params(lon: f64, lat: f64) -> Result<(Parameter, Parameter)> {
    let lon_0 = Parameter::new("lon_0", lon).with_unit("deg");
    let lat_0 = Parameter::bounded("lat_0", lat, -90.0, 90.0)?.with_unit("deg");
    Ok((lon_0, lat_0))
}

/// Point source.
#[derive(Debug, Clone)]
pub struct PointSpatial {
    /// Longitude (deg).
    pub lon_0: Parameter,
    /// Latitude (deg).
    pub lat_0: Parameter,
    /// Frame of the position.
    pub frame: Frame,
}

impl PointSpatial {
    /// Point source at `(lon, lat)` degrees in `frame`.
    pub fn new(lon: f64, lat: f64, frame: Frame) -> Result<Self> {
        let (lon_0, lat_0) = position_params(lon, lat)?;
        Ok(Self { lon_0, lat_0, frame })
    }
}

/// Radially symmetric Gaussian.
#[derive(Debug, Clone)]
pub struct GaussianSpatial {
    /// Longitude (deg).
    pub lon_0: Parameter,
    /// Latitude (deg).
    pub lat_0: Parameter,
    /// Width (deg).
    pub sigma: Parameter,
    /// Frame of the position.
    pub frame: Frame,
}

impl GaussianSpatial {
    /// Gaussian of width `sigma` degrees.
    pub fn new(lon: f64, lat: f64, sigma: f64, frame: Frame) -> Result<Self> {
        let (lon_0, lat_0) = position_params(lon, lat)?;
        let sigma = Parameter::bounded("sigma", sigma, 0.0, 180.0)?.with_unit("deg");
        Ok(Self { lon_0, lat_0, sigma, frame })
    }
}

/// Uniform disk.
#[derive(Debug, Clone)]
pub struct DiskSpatial {
    /// Longitude (deg).
    pub lon_0: Parameter,
    /// Latitude (deg).
    pub lat_0: Parameter,
    /// Radius (deg).
    pub r_0: Parameter,
    /// Frame of the position.
    pub frame: Frame,
}

impl DiskSpatial {
    /// Disk of radius `r_0` degrees.
    pub fn new(lon: f64, lat: f64, r_0: f64, frame: Frame) -> Result<Self> {
        let (lon_0, lat_0) = position_params(lon, lat)?;
        let r_0 = Parameter::bounded("r_0", r_0, 0.0, 180.0)?.with_unit("deg");
        Ok(Self { lon_0, lat_0, r_0, frame })
    }
}

/// Map-based template, renormalized to unit integral over its pixels.
#[derive(Debug, Clone)]
pub struct TemplateSpatial {
    map: Map,
}

impl TemplateSpatial {
    /// Template from a non-negative image (no extra axes).
    pub fn new(map: Map) -> Result<Self> {
        if !map.geom().is_image() {
            return Err(Error::Validation("spatial template must be an image without extra axes".into()));
        }
        if map.values().iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(Error::Validation("spatial template values must be finite and non-negative".into()));
        }
        let omega = map.geom().solid_angle();
        let total: f64 = map.values().iter().zip(&omega).map(|(v, o)| v * o).sum();
        if !(total > 0.0) {
            return Err(Error::Validation("spatial template integrates to zero".into()));
        }
        let mut map = map.mul_scalar(1.0 / total);
        map.set_unit("sr-1");
        Ok(Self { map })
    }

    /// Normalized density map.
    pub fn map(&self) -> &Map {
        &self.map
    }
}

/// Any spatial model.
#[derive(Debug, Clone)]
pub enum SpatialModel {
    /// Point source.
    Point(PointSpatial),
    /// Gaussian.
    Gaussian(GaussianSpatial),
    /// Uniform disk.
    Disk(DiskSpatial),
    /// Map template.
    Template(TemplateSpatial),
}

impl SpatialModel {
    /// Model type tag.
    pub fn tag(&self) -> &'static str {
        match self {
            SpatialModel::Point(_) => "PointSpatialModel",
            SpatialModel::Gaussian(_) => "GaussianSpatialModel",
            SpatialModel::Disk(_) => "DiskSpatialModel",
            SpatialModel::Template(_) => "TemplateSpatialModel",
        }
    }

    /// Parameters (`lon_0`, `lat_0`, then the shape parameter).
    pub fn parameters(&self) -> Parameters {
        match self {
            SpatialModel::Point(m) => Parameters::new([m.lon_0.clone(), m.lat_0.clone()]),
            SpatialModel::Gaussian(m) => Parameters::new([m.lon_0.clone(), m.lat_0.clone(), m.sigma.clone()]),
            SpatialModel::Disk(m) => Parameters::new([m.lon_0.clone(), m.lat_0.clone(), m.r_0.clone()]),
            SpatialModel::Template(_) => Parameters::default(),
        }
    }

    /// Frame of the model position.
    pub fn frame(&self) -> Frame {
        match self {
            SpatialModel::Point(m) => m.frame,
            SpatialModel::Gaussian(m) => m.frame,
            SpatialModel::Disk(m) => m.frame,
            SpatialModel::Template(m) => m.map.geom().footprint().frame(),
        }
    }

    /// Model center in its own frame.
    pub fn position(&self) -> SkyCoord {
        match self {
            SpatialModel::Point(m) => SkyCoord::new(m.lon_0.value(), m.lat_0.value()),
            SpatialModel::Gaussian(m) => SkyCoord::new(m.lon_0.value(), m.lat_0.value()),
            SpatialModel::Disk(m) => SkyCoord::new(m.lon_0.value(), m.lat_0.value()),
            SpatialModel::Template(m) => m.map.geom().center(),
        }
    }

    /// Radius (deg) outside which the density is zero or negligible.
    pub fn evaluation_radius(&self) -> Option<f64> {
        match self {
            SpatialModel::Point(_) => Some(0.0),
            SpatialModel::Gaussian(m) => Some(GAUSS_EXTENT * m.sigma.value()),
            SpatialModel::Disk(m) => Some(m.r_0.value()),
            SpatialModel::Template(_) => None,
        }
    }

    fn check_domain(&self) -> Result<()> {
        let (name, v) = match self {
            SpatialModel::Gaussian(m) => ("sigma", m.sigma.value()),
            SpatialModel::Disk(m) => ("r_0", m.r_0.value()),
            _ => return Ok(()),
        };
        if !(v > 0.0) {
            return Err(Error::ParameterDomain(format!("{} must be > 0, got {}", name, v)));
        }
        Ok(())
    }

    /// Density (sr^-1) at `coord` given in the model frame. Point sources
    /// have no finite density and evaluate to zero.
    pub fn evaluate(&self, coord: &SkyCoord) -> Result<f64> {
        self.check_domain()?;
        Ok(self.density(coord, &self.position()))
    }

    fn density(&self, coord: &SkyCoord, center: &SkyCoord) -> f64 {
        match self {
            SpatialModel::Point(_) => 0.0,
            SpatialModel::Gaussian(m) => {
                let s = m.sigma.value().to_radians();
                let t = coord.separation(center).to_radians();
                (-0.5 * (t / s).powi(2)).exp() / gauss_norm(s)
            }
            SpatialModel::Disk(m) => {
                let r = m.r_0.value();
                if coord.separation(center) <= r { 1.0 / (2.0 * PI * (1.0 - r.to_radians().cos())) } else { 0.0 }
            }
            SpatialModel::Template(m) => {
                let v = m.map.interp_by_coord(&[MapCoord::new(*coord, Vec::new())], Extrapolation::Nan)[0];
                if v.is_finite() { v } else { 0.0 }
            }
        }
    }

    /// Fraction of the model flux in every spatial pixel of `geom`.
    ///
    /// Point sources are distributed with the grid's interpolation weights
    /// (bilinear on WCS, four-neighbour on HEALPix). Extended models average
    /// the density over `oversample x oversample` sub-pixels (WCS) or
    /// `ceil(log2(oversample))` deeper HEALPix orders and multiply by the
    /// pixel solid angle.
    pub fn integrate_geom(&self, geom: &Geometry, oversample: usize) -> Result<Vec<f64>> {
        self.check_domain()?;
        let ns = geom.n_spatial();
        let geom_frame = geom.footprint().frame();
        let center = self.position().transform(self.frame(), geom_frame);
        let mut out = vec![0.0; ns];

        if let SpatialModel::Point(_) = self {
            if let Some(weights) = geom.footprint().interp_weights(&center, false) {
                for (i, w) in weights {
                    out[i] += w;
                }
            }
            return Ok(out);
        }

        let model_frame = self.frame();
        let density = |c: &SkyCoord| self.density(&c.transform(geom_frame, model_frame), &self.position());
        let reach = self.evaluation_radius().map(|r| r + 2.0 * geom.pixel_scale());
        let omega = geom.solid_angle();
        let k = oversample.max(1);

        for (i, c) in geom.spatial_coords().iter().enumerate() {
            if let Some(r) = reach {
                if c.separation(&center) > r {
                    continue;
                }
            }
            let mean = match geom.footprint() {
                Footprint::Wcs(w) if k > 1 => {
                    let (ix, iy) = ((i % w.nx()) as f64, (i / w.nx()) as f64);
                    let mut acc = 0.0;
                    for sy in 0..k {
                        for sx in 0..k {
                            let x = ix - 0.5 + (sx as f64 + 0.5) / k as f64;
                            let y = iy - 0.5 + (sy as f64 + 0.5) / k as f64;
                            if let Some(sc) = w.pix_to_coord(x, y) {
                                acc += density(&sc);
                            }
                        }
                    }
                    acc / (k * k) as f64
                }
                Footprint::Hpx(h) if k > 1 => {
                    let levels = (k as f64).log2().ceil() as u8;
                    let (child, pixels) = h.children(h.global_index(i), levels)?;
                    pixels.iter().map(|&p| density(&child.pix2ang(p))).sum::<f64>() / pixels.len() as f64
                }
                _ => density(c),
            };
            out[i] = mean * omega[i];
        }
        Ok(out)
    }
}

/// Normalization of `exp(-theta^2 / 2 s^2)` over the sphere (`s` in rad).
fn gauss_norm(s: f64) -> f64 {
    let upper = (12.0 * s).min(PI);
    let n = 512;
    let h = upper / n as f64;
    let f = |t: f64| 2.0 * PI * t.sin() * (-0.5 * (t / s).powi(2)).exp();
    let mut acc = f(0.0) + f(upper);
    for i in 1..n {
        acc += if i % 2 == 1 { 4.0 } else { 2.0 } * f(h * i as f64);
    }
    acc * h / 3.0
}

impl From<PointSpatial> for SpatialModel {
    fn from(m: PointSpatial) -> Self {
        SpatialModel::Point(m)
    }
}

impl From<GaussianSpatial> for SpatialModel {
    fn from(m: GaussianSpatial) -> Self {
        SpatialModel::Gaussian(m)
    }
}

impl From<DiskSpatial> for SpatialModel {
    fn from(m: DiskSpatial) -> Self {
        SpatialModel::Disk(m)
    }
}

impl From<TemplateSpatial> for SpatialModel {
    fn from(m: TemplateSpatial) -> Self {
        SpatialModel::Template(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use gf_maps::{HpxFootprint, HpxScheme, Projection, WcsFootprint};
    use std::sync::Arc;

    fn wcs(binsz: f64, n: usize) -> Geometry {
        let w = WcsFootprint::new(SkyCoord::new(10.0, 20.0), binsz, (n, n), Projection::Tan, Frame::Icrs).unwrap();
        Geometry::wcs(w, Vec::new()).unwrap()
    }

    #[test]
    fn test_point_at_pixel_center_fills_one_pixel() {
        let g = wcs(0.1, 11);
        let c = g.spatial_coords()[5 * 11 + 5];
        let m = SpatialModel::from(PointSpatial::new(c.lon, c.lat, Frame::Icrs).unwrap());
        let f = m.integrate_geom(&g, 1).unwrap();
        assert_relative_eq!(f[5 * 11 + 5], 1.0, epsilon = 1e-9);
        assert_relative_eq!(f.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_point_outside_contributes_nothing() {
        let g = wcs(0.1, 11);
        let m = SpatialModel::from(PointSpatial::new(50.0, 20.0, Frame::Icrs).unwrap());
        assert_eq!(m.integrate_geom(&g, 1).unwrap().iter().sum::<f64>(), 0.0);
    }

    #[test]
    fn test_gaussian_integrates_to_one() {
        let g = wcs(0.02, 101);
        let m = SpatialModel::from(GaussianSpatial::new(10.0, 20.0, 0.1, Frame::Icrs).unwrap());
        let f = m.integrate_geom(&g, 3).unwrap();
        assert_relative_eq!(f.iter().sum::<f64>(), 1.0, max_relative = 1e-3);
    }

    #[test]
    fn test_disk_density_and_integral() {
        let m = SpatialModel::from(DiskSpatial::new(10.0, 20.0, 0.5, Frame::Icrs).unwrap());
        let d = m.evaluate(&SkyCoord::new(10.0, 20.2)).unwrap();
        assert_relative_eq!(d, 1.0 / (2.0 * PI * (1.0 - 0.5_f64.to_radians().cos())), max_relative = 1e-12);
        assert_eq!(m.evaluate(&SkyCoord::new(10.0, 21.0)).unwrap(), 0.0);
        let f = m.integrate_geom(&wcs(0.05, 41), 4).unwrap();
        assert_relative_eq!(f.iter().sum::<f64>(), 1.0, max_relative = 2e-2);
    }

    #[test]
    fn test_zero_width_is_domain_error() {
        let g = GaussianSpatial::new(0.0, 0.0, 0.1, Frame::Galactic).unwrap();
        g.sigma.set_value(0.0).unwrap();
        let m = SpatialModel::from(g);
        assert!(matches!(m.evaluate(&SkyCoord::new(0.0, 0.0)), Err(Error::ParameterDomain(_))));
    }

    #[test]
    fn test_frame_conversion() {
        // the galactic center seen on an ICRS grid
        let w = WcsFootprint::new(SkyCoord::new(266.405, -28.936), 0.1, (11, 11), Projection::Tan, Frame::Icrs).unwrap();
        let g = Geometry::wcs(w, Vec::new()).unwrap();
        let m = SpatialModel::from(GaussianSpatial::new(0.0, 0.0, 0.2, Frame::Galactic).unwrap());
        let f = m.integrate_geom(&g, 2).unwrap();
        let imax = f.iter().enumerate().fold(0, |b, (i, v)| if *v > f[b] { i } else { b });
        assert_eq!(imax, 5 * 11 + 5);
    }

    #[test]
    fn test_hpx_gaussian_and_template() {
        let h = HpxFootprint::cone(8, HpxScheme::Nested, Frame::Galactic, SkyCoord::new(0.0, 0.0), 2.0).unwrap();
        let g = Arc::new(Geometry::hpx(h, Vec::new()).unwrap());
        let m = SpatialModel::from(GaussianSpatial::new(0.0, 0.0, 0.3, Frame::Galactic).unwrap());
        let f = m.integrate_geom(&g, 2).unwrap();
        assert_relative_eq!(f.iter().sum::<f64>(), 1.0, max_relative = 5e-3);

        let tmpl = TemplateSpatial::new(Map::full(g.clone(), 3.0, "")).unwrap();
        let t = SpatialModel::from(tmpl);
        let ft = t.integrate_geom(&g, 1).unwrap();
        assert_relative_eq!(ft.iter().sum::<f64>(), 1.0, max_relative = 1e-6);
    }
}
