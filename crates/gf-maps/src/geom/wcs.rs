//! Projected-plane (WCS) footprints.
//!
//! Pixel `(x, y)` has its center at integer coordinates and covers
//! `[x - 0.5, x + 0.5) x [y - 0.5, y + 0.5)`. Longitude increases towards
//! decreasing `x` (east to the left), latitude towards increasing `y`.
//!
//! Two projections are supported:
//! - `TAN` (gnomonic): `(xi, eta) = binsz * (-(x - crpix_x), y - crpix_y)` on
//!   the plane tangent at `crval`
//! - `CAR` (plate carree): longitude and latitude are linear in `x` and `y`

use std::hash::Hasher;

use gf_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::coord::{Frame, SkyCoord, wrap_180};

/// Sky projection of a [`WcsFootprint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Projection {
    /// Gnomonic.
    #[default]
    Tan,
    /// Plate carree.
    Car,
}

/// A regular pixel grid on a sky projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WcsFootprint {
    projection: Projection,
    frame: Frame,
    crval: SkyCoord,
    crpix: (f64, f64),
    binsz: f64,
    nx: usize,
    ny: usize,
}

impl WcsFootprint {
    /// Grid of `npix = (nx, ny)` pixels of `binsz` degrees centered on `center`.
    pub fn new(center: SkyCoord, binsz: f64, npix: (usize, usize), projection: Projection, frame: Frame) -> Result<Self> {
        let (nx, ny) = npix;
        let crpix = ((nx as f64 - 1.0) / 2.0, (ny as f64 - 1.0) / 2.0);
        Self::from_parts(projection, frame, center, crpix, binsz, nx, ny)
    }

    fn from_parts(
        projection: Projection,
        frame: Frame,
        crval: SkyCoord,
        crpix: (f64, f64),
        binsz: f64,
        nx: usize,
        ny: usize,
    ) -> Result<Self> {
        if !(binsz > 0.0) || !binsz.is_finite() {
            return Err(Error::InvalidGeometry(format!("pixel size must be positive, got {}", binsz)));
        }
        if nx == 0 || ny == 0 {
            return Err(Error::InvalidGeometry(format!("pixel counts must be non-zero, got {}x{}", nx, ny)));
        }
        if !(-90.0..=90.0).contains(&crval.lat) {
            return Err(Error::InvalidGeometry(format!("reference latitude {} out of range", crval.lat)));
        }
        if projection == Projection::Tan && binsz * (nx.max(ny) as f64) >= 180.0 {
            return Err(Error::InvalidGeometry("TAN projection cannot span a hemisphere".into()));
        }
        Ok(Self { projection, frame, crval, crpix, binsz, nx, ny })
    }

    /// Projection.
    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Frame label.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Reference sky position.
    pub fn crval(&self) -> SkyCoord {
        self.crval
    }

    /// Reference pixel (0-based).
    pub fn crpix(&self) -> (f64, f64) {
        self.crpix
    }

    /// Pixel size in degrees.
    pub fn binsz(&self) -> f64 {
        self.binsz
    }

    /// Number of pixels along x.
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Number of pixels along y.
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Sky position of fractional pixel `(x, y)`; `None` past the poles of a
    /// CAR grid.
    pub fn pix_to_coord(&self, x: f64, y: f64) -> Option<SkyCoord> {
        let xi = -(x - self.crpix.0) * self.binsz;
        let eta = (y - self.crpix.1) * self.binsz;
        match self.projection {
            Projection::Car => {
                let lat = self.crval.lat + eta;
                if !(-90.0..=90.0).contains(&lat) {
                    return None;
                }
                Some(SkyCoord::new(self.crval.lon + xi, lat))
            }
            Projection::Tan => {
                let (xi, eta) = (xi.to_radians(), eta.to_radians());
                let lon0 = self.crval.lon.to_radians();
                let (sin_b0, cos_b0) = self.crval.lat.to_radians().sin_cos();
                let denom = cos_b0 - eta * sin_b0;
                let lon = lon0 + xi.atan2(denom);
                let lat = (sin_b0 + eta * cos_b0).atan2((xi * xi + denom * denom).sqrt());
                Some(SkyCoord::new(lon.to_degrees(), lat.to_degrees()))
            }
        }
    }

    /// Fractional pixel of `coord`; `None` if the projection is undefined there
    /// (the far hemisphere of a TAN grid).
    pub fn coord_to_pix(&self, coord: &SkyCoord) -> Option<(f64, f64)> {
        let (xi, eta) = match self.projection {
            Projection::Car => (wrap_180(coord.lon - self.crval.lon), coord.lat - self.crval.lat),
            Projection::Tan => {
                let (sin_b, cos_b) = coord.lat.to_radians().sin_cos();
                let (sin_b0, cos_b0) = self.crval.lat.to_radians().sin_cos();
                let (sin_dl, cos_dl) = (coord.lon - self.crval.lon).to_radians().sin_cos();
                let d = sin_b * sin_b0 + cos_b * cos_b0 * cos_dl;
                if d <= 0.0 {
                    return None;
                }
                let xi = cos_b * sin_dl / d;
                let eta = (sin_b * cos_b0 - cos_b * sin_b0 * cos_dl) / d;
                (xi.to_degrees(), eta.to_degrees())
            }
        };
        Some((self.crpix.0 - xi / self.binsz, self.crpix.1 + eta / self.binsz))
    }

    /// Integer pixel containing fractional pixel `(x, y)` (round half up).
    pub fn pix_to_idx(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let ix = (x + 0.5).floor();
        let iy = (y + 0.5).floor();
        if ix >= 0.0 && iy >= 0.0 && ix < self.nx as f64 && iy < self.ny as f64 {
            Some((ix as usize, iy as usize))
        } else {
            None
        }
    }

    /// Solid angle (sr) of pixel `(ix, iy)`.
    pub fn solid_angle(&self, ix: usize, iy: usize) -> f64 {
        let (x, y) = (ix as f64, iy as f64);
        match self.projection {
            Projection::Car => {
                let dlon = self.binsz.to_radians();
                let lat_lo = (self.crval.lat + (y - 0.5 - self.crpix.1) * self.binsz).clamp(-90.0, 90.0);
                let lat_hi = (self.crval.lat + (y + 0.5 - self.crpix.1) * self.binsz).clamp(-90.0, 90.0);
                dlon * (lat_hi.to_radians().sin() - lat_lo.to_radians().sin())
            }
            Projection::Tan => {
                let corner = |dx: f64, dy: f64| {
                    // corners always project: the grid never spans a hemisphere
                    self.pix_to_coord(x + dx, y + dy).map(|c| c.to_vec3()).unwrap_or([0.0, 0.0, 1.0])
                };
                let a = corner(-0.5, -0.5);
                let b = corner(0.5, -0.5);
                let c = corner(0.5, 0.5);
                let d = corner(-0.5, 0.5);
                triangle_solid_angle(a, b, c) + triangle_solid_angle(a, c, d)
            }
        }
    }

    /// Same sky area with pixels `factor` times smaller.
    pub fn upsample(&self, factor: usize) -> Result<Self> {
        if factor == 0 {
            return Err(Error::Validation("upsample factor must be >= 1".into()));
        }
        let f = factor as f64;
        let crpix = ((self.crpix.0 + 0.5) * f - 0.5, (self.crpix.1 + 0.5) * f - 0.5);
        Self::from_parts(
            self.projection,
            self.frame,
            self.crval,
            crpix,
            self.binsz / f,
            self.nx * factor,
            self.ny * factor,
        )
    }

    /// Same sky area with pixels `factor` times larger; both pixel counts must
    /// be divisible by `factor`.
    pub fn downsample(&self, factor: usize) -> Result<Self> {
        if factor == 0 || self.nx % factor != 0 || self.ny % factor != 0 {
            return Err(Error::Validation(format!(
                "{}x{} grid cannot be downsampled by {}",
                self.nx, self.ny, factor
            )));
        }
        let f = factor as f64;
        let crpix = ((self.crpix.0 + 0.5) / f - 0.5, (self.crpix.1 + 0.5) / f - 0.5);
        Self::from_parts(
            self.projection,
            self.frame,
            self.crval,
            crpix,
            self.binsz * f,
            self.nx / factor,
            self.ny / factor,
        )
    }

    /// Sub-grid of about `width` degrees around `position`, clipped to the
    /// parent. Returns the cutout and its pixel offset `(x0, y0)` in the parent.
    pub fn cutout(&self, position: &SkyCoord, width: (f64, f64)) -> Result<(Self, (usize, usize))> {
        let (x, y) = self
            .coord_to_pix(position)
            .ok_or_else(|| Error::Validation("cutout position cannot be projected".into()))?;
        let range = |center: f64, w: f64, n: usize| -> Option<(usize, usize)> {
            let npix = ((w / self.binsz).ceil() as i64).max(1);
            let c = (center + 0.5).floor() as i64;
            let lo = (c - npix / 2).max(0);
            let hi = (c - npix / 2 + npix).min(n as i64);
            (hi > lo).then_some((lo as usize, hi as usize))
        };
        let ((x0, x1), (y0, y1)) = match (range(x, width.0, self.nx), range(y, width.1, self.ny)) {
            (Some(rx), Some(ry)) => (rx, ry),
            _ => return Err(Error::Validation("cutout does not overlap the grid".into())),
        };
        let crpix = (self.crpix.0 - x0 as f64, self.crpix.1 - y0 as f64);
        let cut = Self::from_parts(self.projection, self.frame, self.crval, crpix, self.binsz, x1 - x0, y1 - y0)?;
        Ok((cut, (x0, y0)))
    }

    /// Pixel offset of `self` inside `parent` if `self` is an integer-shifted
    /// sub-grid of the same projection.
    pub fn offset_in(&self, parent: &WcsFootprint) -> Option<(usize, usize)> {
        let same = self.projection == parent.projection
            && self.frame == parent.frame
            && close(self.binsz, parent.binsz)
            && close(self.crval.lon, parent.crval.lon)
            && close(self.crval.lat, parent.crval.lat);
        if !same {
            return None;
        }
        let dx = parent.crpix.0 - self.crpix.0;
        let dy = parent.crpix.1 - self.crpix.1;
        let (rx, ry) = (dx.round(), dy.round());
        if (dx - rx).abs() > 1e-6 || (dy - ry).abs() > 1e-6 || rx < 0.0 || ry < 0.0 {
            return None;
        }
        let (x0, y0) = (rx as usize, ry as usize);
        (x0 + self.nx <= parent.nx && y0 + self.ny <= parent.ny).then_some((x0, y0))
    }

    /// Exact structural equality up to float noise.
    pub fn is_aligned(&self, other: &WcsFootprint) -> bool {
        self.nx == other.nx && self.ny == other.ny && self.offset_in(other) == Some((0, 0))
    }

    pub(crate) fn hash_into<H: Hasher>(&self, h: &mut H) {
        h.write_u8(0);
        h.write_u8(self.projection as u8);
        h.write_u8(self.frame as u8);
        for v in [self.crval.lon, self.crval.lat, self.crpix.0, self.crpix.1, self.binsz] {
            h.write_u64(v.to_bits());
        }
        h.write_usize(self.nx);
        h.write_usize(self.ny);
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

/// Solid angle of the spherical triangle spanned by unit vectors `a, b, c`.
fn triangle_solid_angle(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> f64 {
    let dot = |u: [f64; 3], v: [f64; 3]| u[0] * v[0] + u[1] * v[1] + u[2] * v[2];
    let cross = [b[1] * c[2] - b[2] * c[1], b[2] * c[0] - b[0] * c[2], b[0] * c[1] - b[1] * c[0]];
    let triple = dot(a, cross).abs();
    2.0 * triple.atan2(1.0 + dot(a, b) + dot(b, c) + dot(c, a))
}
