//! Sky coordinates on the unit sphere (degrees).

use serde::{Deserialize, Serialize};

/// Celestial reference frame.
///
/// Geometries in different frames are never aligned. Positions convert
/// between frames with [`SkyCoord::transform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frame {
    /// Equatorial (RA/Dec).
    #[default]
    Icrs,
    /// Galactic (l/b).
    Galactic,
}

/// Rotation from equatorial (J2000) to galactic unit vectors.
const ICRS_TO_GALACTIC: [[f64; 3]; 3] = [
    [-0.054_875_560_416_215_4, -0.873_437_090_234_885_0, -0.483_835_015_548_713_2],
    [0.494_109_427_875_583_7, -0.444_829_629_960_011_2, 0.746_982_244_497_218_9],
    [-0.867_666_149_019_004_7, -0.198_076_373_431_201_5, 0.455_983_776_175_066_9],
];

/// A position on the sky, longitude and latitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCoord {
    /// Longitude in degrees, `[0, 360)` after normalization.
    pub lon: f64,
    /// Latitude in degrees, `[-90, 90]`.
    pub lat: f64,
}

impl SkyCoord {
    /// New coordinate; longitude is wrapped into `[0, 360)`.
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon: wrap_360(lon), lat }
    }

    /// Unit vector `(x, y, z)`.
    pub fn to_vec3(&self) -> [f64; 3] {
        let (sl, cl) = self.lon.to_radians().sin_cos();
        let (sb, cb) = self.lat.to_radians().sin_cos();
        [cb * cl, cb * sl, sb]
    }

    /// Coordinate of a (not necessarily normalized) direction vector.
    pub fn from_vec3(v: [f64; 3]) -> Self {
        let lon = v[1].atan2(v[0]).to_degrees();
        let lat = v[2].atan2((v[0] * v[0] + v[1] * v[1]).sqrt()).to_degrees();
        Self::new(lon, lat)
    }

    /// Great-circle separation in degrees (Vincenty formula, stable at all
    /// angles).
    pub fn separation(&self, other: &SkyCoord) -> f64 {
        let (l1, b1) = (self.lon.to_radians(), self.lat.to_radians());
        let (l2, b2) = (other.lon.to_radians(), other.lat.to_radians());
        let (sdl, cdl) = (l2 - l1).sin_cos();
        let (s1, c1) = b1.sin_cos();
        let (s2, c2) = b2.sin_cos();
        let num1 = c2 * sdl;
        let num2 = c1 * s2 - s1 * c2 * cdl;
        let denom = s1 * s2 + c1 * c2 * cdl;
        (num1 * num1 + num2 * num2).sqrt().atan2(denom).to_degrees()
    }

    /// The same direction expressed in frame `to` (given in frame `from`).
    pub fn transform(&self, from: Frame, to: Frame) -> SkyCoord {
        let v = self.to_vec3();
        let m = &ICRS_TO_GALACTIC;
        let r = match (from, to) {
            (Frame::Icrs, Frame::Galactic) => [
                m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
                m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
                m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
            ],
            (Frame::Galactic, Frame::Icrs) => [
                m[0][0] * v[0] + m[1][0] * v[1] + m[2][0] * v[2],
                m[0][1] * v[0] + m[1][1] * v[1] + m[2][1] * v[2],
                m[0][2] * v[0] + m[1][2] * v[1] + m[2][2] * v[2],
            ],
            _ => return *self,
        };
        SkyCoord::from_vec3(r)
    }

    /// Polar coordinates `(theta, phi)` in radians as used by HEALPix.
    pub fn to_theta_phi(&self) -> (f64, f64) {
        ((90.0 - self.lat).to_radians(), self.lon.to_radians())
    }

    /// Inverse of [`to_theta_phi`](Self::to_theta_phi).
    pub fn from_theta_phi(theta: f64, phi: f64) -> Self {
        Self::new(phi.to_degrees(), 90.0 - theta.to_degrees())
    }
}

/// Wrap a longitude into `[0, 360)`.
pub fn wrap_360(lon: f64) -> f64 {
    let w = lon.rem_euclid(360.0);
    if w >= 360.0 { 0.0 } else { w }
}

/// Wrap a longitude difference into `[-180, 180)`.
pub fn wrap_180(dlon: f64) -> f64 {
    (dlon + 180.0).rem_euclid(360.0) - 180.0
}
