//! HEALPix all-sky pixelization footprints.
//!
//! `nside = 2^order`, `npix = 12 nside^2`, every pixel covers `4 pi / npix` sr.
//! Pixel containment is exact: a direction is assigned to the pixel whose
//! face coordinates `(ix, iy)` are the integer parts of its continuous face
//! coordinates, so a point on a pixel boundary belongs to the pixel on the
//! increasing-coordinate side.
//!
//! An optional cone region restricts the stored pixels; maps on such a
//! footprint hold one value per stored pixel, in increasing pixel order.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::hash::Hasher;

use gf_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::coord::{Frame, SkyCoord};

const JRLL: [i64; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
const JPLL: [i64; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];
const MAX_ORDER: u8 = 29;

/// Pixel numbering scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HpxScheme {
    /// Nested (hierarchical) numbering.
    #[default]
    Nested,
    /// Ring numbering.
    Ring,
}

/// Cone restricting the stored pixels of a footprint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HpxRegion {
    /// Cone center.
    pub center: SkyCoord,
    /// Cone radius in degrees.
    pub radius: f64,
}

/// HEALPix footprint: all-sky or a cone-shaped partial sky.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpxFootprint {
    order: u8,
    scheme: HpxScheme,
    frame: Frame,
    region: Option<HpxRegion>,
    /// Sorted stored pixels; empty for all-sky.
    pixels: Vec<u64>,
}

impl HpxFootprint {
    /// All-sky footprint.
    pub fn allsky(order: u8, scheme: HpxScheme, frame: Frame) -> Result<Self> {
        check_order(order)?;
        Ok(Self { order, scheme, frame, region: None, pixels: Vec::new() })
    }

    /// Footprint restricted to pixels whose centers lie within `radius`
    /// degrees of `center`.
    pub fn cone(order: u8, scheme: HpxScheme, frame: Frame, center: SkyCoord, radius: f64) -> Result<Self> {
        check_order(order)?;
        if !(radius > 0.0) {
            return Err(Error::InvalidGeometry(format!("cone radius must be positive, got {}", radius)));
        }
        let base = HpxFootprint { order, scheme, frame, region: None, pixels: Vec::new() };
        let pixels = base.query_disc(&center, radius);
        if pixels.is_empty() {
            return Err(Error::InvalidGeometry(format!(
                "cone of radius {} deg contains no pixel at order {}",
                radius, order
            )));
        }
        Ok(Self { order, scheme, frame, region: Some(HpxRegion { center, radius }), pixels })
    }

    /// Resolution order.
    pub fn order(&self) -> u8 {
        self.order
    }

    /// `2^order`.
    pub fn nside(&self) -> u64 {
        1u64 << self.order
    }

    /// Numbering scheme.
    pub fn scheme(&self) -> HpxScheme {
        self.scheme
    }

    /// Frame label.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Cone region, if any.
    pub fn region(&self) -> Option<&HpxRegion> {
        self.region.as_ref()
    }

    /// Number of pixels on the full sphere.
    pub fn npix_sky(&self) -> u64 {
        12 * self.nside() * self.nside()
    }

    /// Number of stored pixels.
    pub fn n_stored(&self) -> usize {
        if self.region.is_some() { self.pixels.len() } else { self.npix_sky() as usize }
    }

    /// Global pixel index of stored pixel `local`.
    pub fn global_index(&self, local: usize) -> u64 {
        if self.region.is_some() { self.pixels[local] } else { local as u64 }
    }

    /// Stored position of global pixel `ipix`, `None` if not stored.
    pub fn local_index(&self, ipix: u64) -> Option<usize> {
        if self.region.is_some() {
            self.pixels.binary_search(&ipix).ok()
        } else {
            (ipix < self.npix_sky()).then_some(ipix as usize)
        }
    }

    /// Stored pixel whose center is closest to `coord`, `None` if nothing is
    /// stored.
    pub fn nearest_stored(&self, coord: &SkyCoord) -> Option<usize> {
        if let Some(local) = self.local_index(self.ang2pix(coord)) {
            return Some(local);
        }
        (0..self.n_stored())
            .map(|i| (i, self.pix2ang(self.global_index(i)).separation(coord)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Solid angle of every pixel (sr).
    pub fn pixel_solid_angle(&self) -> f64 {
        4.0 * PI / self.npix_sky() as f64
    }

    /// Approximate pixel size in degrees (`sqrt` of the pixel area).
    pub fn pixel_scale(&self) -> f64 {
        self.pixel_solid_angle().sqrt().to_degrees()
    }

    /// Global pixels whose centers lie within `radius` degrees of `center`,
    /// sorted. Ignores the stored region.
    ///
    /// Only the rings and longitude windows that can reach the disc are
    /// visited, padded by one pixel; each candidate is checked against the
    /// exact separation.
    pub fn query_disc(&self, center: &SkyCoord, radius: f64) -> Vec<u64> {
        if !(radius >= 0.0) {
            return Vec::new();
        }
        let last_ring = 4 * self.nside() as i64 - 1;
        let r = radius.to_radians();
        let (theta0, phi0) = center.to_theta_phi();
        let (sin0, cos0) = theta0.sin_cos();
        let cos_r = r.cos();
        let ring_lo = if theta0 - r <= 0.0 { 1 } else { self.ring_above((theta0 - r).cos()).max(1) };
        let ring_hi = if theta0 + r >= PI { last_ring } else { (self.ring_above((theta0 + r).cos()) + 1).min(last_ring) };

        let mut out = Vec::new();
        for ring in ring_lo..=ring_hi {
            let (sp, nr, theta, shifted) = self.ring_info(ring);
            let (sin_t, cos_t) = theta.sin_cos();
            let denom = sin_t * sin0;
            // cos of the half-width in longitude, <= -1 when the whole ring qualifies
            let x = if denom > 0.0 { (cos_r - cos_t * cos0) / denom } else { -1.0 };
            let dp = TAU / nr as f64;
            let shift = if shifted { 0.5 } else { 0.0 };
            let (lo, hi) = if x <= -1.0 {
                (0, nr - 1)
            } else {
                let dphi = x.min(1.0).acos();
                let lo = ((phi0 - dphi) / dp - shift).floor() as i64;
                let hi = ((phi0 + dphi) / dp - shift).ceil() as i64;
                if hi - lo + 1 >= nr { (0, nr - 1) } else { (lo, hi) }
            };
            for k in lo..=hi {
                let pix = sp + k.rem_euclid(nr);
                let (t, p) = self.ring_pix2ang(pix);
                if center.separation(&SkyCoord::from_theta_phi(t, p)) <= radius {
                    out.push(match self.scheme {
                        HpxScheme::Nested => self.ring2nest(pix as u64),
                        HpxScheme::Ring => pix as u64,
                    });
                }
            }
        }
        out.sort_unstable();
        out
    }

    fn ncap(&self) -> i64 {
        let n = self.nside() as i64;
        2 * n * (n - 1)
    }

    fn fact2(&self) -> f64 {
        4.0 / self.npix_sky() as f64
    }

    fn fact1(&self) -> f64 {
        2.0 * self.nside() as f64 * self.fact2()
    }

    /// Global pixel containing `coord`.
    pub fn ang2pix(&self, coord: &SkyCoord) -> u64 {
        let (theta, phi) = coord.to_theta_phi();
        let (ix, iy, face) = self.loc2xyf(theta.cos(), phi);
        match self.scheme {
            HpxScheme::Nested => self.xyf2nest(ix, iy, face),
            HpxScheme::Ring => self.xyf2ring(ix, iy, face),
        }
    }

    /// Center of global pixel `ipix`.
    pub fn pix2ang(&self, ipix: u64) -> SkyCoord {
        let ring = match self.scheme {
            HpxScheme::Nested => self.nest2ring(ipix),
            HpxScheme::Ring => ipix,
        };
        let (theta, phi) = self.ring_pix2ang(ring as i64);
        SkyCoord::from_theta_phi(theta, phi)
    }

    fn loc2xyf(&self, z: f64, phi: f64) -> (i64, i64, usize) {
        let nside = self.nside() as i64;
        let ns = nside as f64;
        let za = z.abs();
        let tt = (phi / FRAC_PI_2).rem_euclid(4.0);
        if za <= 2.0 / 3.0 {
            let temp1 = ns * (0.5 + tt);
            let temp2 = ns * z * 0.75;
            let jp = (temp1 - temp2) as i64;
            let jm = (temp1 + temp2) as i64;
            let ifp = jp / nside;
            let ifm = jm / nside;
            let face = if ifp == ifm {
                (ifp | 4) as usize
            } else if ifp < ifm {
                ifp as usize
            } else {
                (ifm + 8) as usize
            };
            let ix = jm & (nside - 1);
            let iy = nside - (jp & (nside - 1)) - 1;
            (ix, iy, face)
        } else {
            let ntt = (tt as i64).min(3);
            let tp = tt - ntt as f64;
            let tmp = ns * (3.0 * (1.0 - za)).sqrt();
            let jp = ((tp * tmp) as i64).min(nside - 1);
            let jm = (((1.0 - tp) * tmp) as i64).min(nside - 1);
            if z >= 0.0 {
                (nside - jm - 1, nside - jp - 1, ntt as usize)
            } else {
                (jp, jm, (ntt + 8) as usize)
            }
        }
    }

    fn xyf2nest(&self, ix: i64, iy: i64, face: usize) -> u64 {
        (face as u64) * self.nside() * self.nside() + spread_bits(ix as u64) + (spread_bits(iy as u64) << 1)
    }

    fn nest2xyf(&self, pix: u64) -> (i64, i64, usize) {
        let npface = self.nside() * self.nside();
        let face = (pix / npface) as usize;
        let p = pix % npface;
        (compress_bits(p) as i64, compress_bits(p >> 1) as i64, face)
    }

    fn xyf2ring(&self, ix: i64, iy: i64, face: usize) -> u64 {
        let nside = self.nside() as i64;
        let nl4 = 4 * nside;
        let jr = JRLL[face] * nside - ix - iy - 1;
        let (nr, n_before, kshift) = if jr < nside {
            (jr, 2 * jr * (jr - 1), 0)
        } else if jr > 3 * nside {
            let nr = nl4 - jr;
            (nr, self.npix_sky() as i64 - 2 * (nr + 1) * nr, 0)
        } else {
            (nside, self.ncap() + (jr - nside) * nl4, (jr - nside) & 1)
        };
        let mut jp = (JPLL[face] * nr + ix - iy + 1 + kshift) / 2;
        if jp > nl4 {
            jp -= nl4;
        } else if jp < 1 {
            jp += nl4;
        }
        (n_before + jp - 1) as u64
    }

    fn ring2xyf(&self, pix: i64) -> (i64, i64, usize) {
        let nside = self.nside() as i64;
        let nl2 = 2 * nside;
        let npix = self.npix_sky() as i64;
        let ncap = self.ncap();
        let (iring, iphi, kshift, nr, face);
        if pix < ncap {
            let ir = (1 + isqrt(1 + 2 * pix)) >> 1;
            iphi = (pix + 1) - 2 * ir * (ir - 1);
            kshift = 0;
            nr = ir;
            iring = ir;
            face = ((iphi - 1) / nr) as usize;
        } else if pix < npix - ncap {
            let ip = pix - ncap;
            let tmp = ip / (4 * nside);
            iring = tmp + nside;
            iphi = ip - tmp * 4 * nside + 1;
            kshift = (iring + nside) & 1;
            nr = nside;
            let ire = tmp + 1;
            let irm = nl2 + 1 - tmp;
            let ifm = (iphi - (ire >> 1) + nside - 1) / nside;
            let ifp = (iphi - (irm >> 1) + nside - 1) / nside;
            face = if ifp == ifm {
                (ifp | 4) as usize
            } else if ifp < ifm {
                ifp as usize
            } else {
                (ifm + 8) as usize
            };
        } else {
            let ip = npix - pix;
            let ir = (1 + isqrt(2 * ip - 1)) >> 1;
            iphi = 4 * ir + 1 - (ip - 2 * ir * (ir - 1));
            kshift = 0;
            nr = ir;
            iring = 2 * nl2 - ir;
            face = ((iphi - 1) / nr + 8) as usize;
        }
        let irt = iring - JRLL[face] * nside + 1;
        let mut ipt = 2 * iphi - JPLL[face] * nr - kshift - 1;
        if ipt >= nl2 {
            ipt -= 8 * nside;
        }
        ((ipt - irt) >> 1, (-ipt - irt) >> 1, face)
    }

    /// Convert a nested index to ring numbering.
    pub fn nest2ring(&self, pix: u64) -> u64 {
        let (ix, iy, face) = self.nest2xyf(pix);
        self.xyf2ring(ix, iy, face)
    }

    /// Convert a ring index to nested numbering.
    pub fn ring2nest(&self, pix: u64) -> u64 {
        let (ix, iy, face) = self.ring2xyf(pix as i64);
        self.xyf2nest(ix, iy, face)
    }

    fn ring_pix2ang(&self, pix: i64) -> (f64, f64) {
        let nside = self.nside() as i64;
        let npix = self.npix_sky() as i64;
        let ncap = self.ncap();
        if pix < ncap {
            let iring = (1 + isqrt(1 + 2 * pix)) >> 1;
            let iphi = (pix + 1) - 2 * iring * (iring - 1);
            let z = 1.0 - (iring * iring) as f64 * self.fact2();
            (z.acos(), (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64)
        } else if pix < npix - ncap {
            let nl4 = 4 * nside;
            let ip = pix - ncap;
            let tmp = ip / nl4;
            let iring = tmp + nside;
            let iphi = ip - nl4 * tmp + 1;
            let fodd = if (iring + nside) & 1 == 1 { 1.0 } else { 0.5 };
            let z = (2 * nside - iring) as f64 * self.fact1();
            (z.acos(), (iphi as f64 - fodd) * PI * 0.75 * self.fact1())
        } else {
            let ip = npix - pix;
            let iring = (1 + isqrt(2 * ip - 1)) >> 1;
            let iphi = 4 * iring + 1 - (ip - 2 * iring * (iring - 1));
            let z = (iring * iring) as f64 * self.fact2() - 1.0;
            (z.acos(), (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64)
        }
    }

    fn ring_above(&self, z: f64) -> i64 {
        let ns = self.nside() as f64;
        let az = z.abs();
        if az <= 2.0 / 3.0 {
            return (ns * (2.0 - 1.5 * z)) as i64;
        }
        let iring = (ns * (3.0 * (1.0 - az)).sqrt()) as i64;
        if z > 0.0 { iring } else { 4 * self.nside() as i64 - iring - 1 }
    }

    /// `(start pixel, pixels in ring, theta, shifted)` for ring number `ring`.
    fn ring_info(&self, ring: i64) -> (i64, i64, f64, bool) {
        let nside = self.nside() as i64;
        let northring = if ring > 2 * nside { 4 * nside - ring } else { ring };
        let (mut startpix, ringpix, mut theta, shifted);
        if northring < nside {
            let tmp = (northring * northring) as f64 * self.fact2();
            theta = (tmp * (2.0 - tmp)).sqrt().atan2(1.0 - tmp);
            ringpix = 4 * northring;
            shifted = true;
            startpix = 2 * northring * (northring - 1);
        } else {
            theta = ((2 * nside - northring) as f64 * self.fact1()).acos();
            ringpix = 4 * nside;
            shifted = (northring - nside) & 1 == 0;
            startpix = self.ncap() + (northring - nside) * ringpix;
        }
        if northring != ring {
            theta = PI - theta;
            startpix = self.npix_sky() as i64 - startpix - ringpix;
        }
        (startpix, ringpix, theta, shifted)
    }

    fn ring_neighbours(&self, ring: i64, phi: f64) -> ([i64; 2], [f64; 2], f64) {
        let (sp, nr, theta, shifted) = self.ring_info(ring);
        let dphi = TAU / nr as f64;
        let shift = if shifted { 0.5 } else { 0.0 };
        let tmp = phi / dphi - shift;
        let mut i1 = tmp.floor() as i64;
        let w1 = (phi - (i1 as f64 + shift) * dphi) / dphi;
        let mut i2 = i1 + 1;
        if i1 < 0 {
            i1 += nr;
        }
        if i2 >= nr {
            i2 -= nr;
        }
        ([sp + i1, sp + i2], [1.0 - w1, w1], theta)
    }

    /// Four global pixels and bilinear weights interpolating at `coord`.
    ///
    /// Weights follow the ring layout: linear in `phi` along the rings above
    /// and below `coord`, then linear in `theta` between them.
    pub fn interpolation_weights(&self, coord: &SkyCoord) -> [(u64, f64); 4] {
        let (theta, phi) = coord.to_theta_phi();
        let phi = phi.rem_euclid(TAU);
        let nl4 = 4 * self.nside() as i64;
        let ir1 = self.ring_above(theta.cos());
        let ir2 = ir1 + 1;
        let mut pix = [0i64; 4];
        let mut wgt = [0.0f64; 4];
        let (mut theta1, mut theta2) = (0.0, PI);
        if ir1 > 0 {
            let (p, w, t) = self.ring_neighbours(ir1, phi);
            pix[0..2].copy_from_slice(&p);
            wgt[0..2].copy_from_slice(&w);
            theta1 = t;
        }
        if ir2 < nl4 {
            let (p, w, t) = self.ring_neighbours(ir2, phi);
            pix[2..4].copy_from_slice(&p);
            wgt[2..4].copy_from_slice(&w);
            theta2 = t;
        }
        if ir1 == 0 {
            let wtheta = theta / theta2;
            wgt[2] *= wtheta;
            wgt[3] *= wtheta;
            let fac = (1.0 - wtheta) * 0.25;
            wgt[0] = fac;
            wgt[1] = fac;
            wgt[2] += fac;
            wgt[3] += fac;
            pix[0] = (pix[2] + 2) & 3;
            pix[1] = (pix[3] + 2) & 3;
        } else if ir2 == nl4 {
            let wtheta = (theta - theta1) / (PI - theta1);
            wgt[0] *= 1.0 - wtheta;
            wgt[1] *= 1.0 - wtheta;
            let fac = wtheta * 0.25;
            wgt[0] += fac;
            wgt[1] += fac;
            wgt[2] = fac;
            wgt[3] = fac;
            let npix = self.npix_sky() as i64;
            pix[2] = ((pix[0] + 2) & 3) + npix - 4;
            pix[3] = ((pix[1] + 2) & 3) + npix - 4;
        } else {
            let wtheta = (theta - theta1) / (theta2 - theta1);
            wgt[0] *= 1.0 - wtheta;
            wgt[1] *= 1.0 - wtheta;
            wgt[2] *= wtheta;
            wgt[3] *= wtheta;
        }
        let mut out = [(0u64, 0.0f64); 4];
        for k in 0..4 {
            let ring = pix[k] as u64;
            let p = match self.scheme {
                HpxScheme::Nested => self.ring2nest(ring),
                HpxScheme::Ring => ring,
            };
            out[k] = (p, wgt[k]);
        }
        out
    }

    /// Global nested indices of the children of global pixel `ipix` at
    /// `levels` orders deeper, and the child footprint they belong to.
    pub fn children(&self, ipix: u64, levels: u8) -> Result<(HpxFootprint, Vec<u64>)> {
        let order = self.order + levels;
        check_order(order)?;
        let child = HpxFootprint { order, scheme: HpxScheme::Nested, frame: self.frame, region: None, pixels: Vec::new() };
        let nest = match self.scheme {
            HpxScheme::Nested => ipix,
            HpxScheme::Ring => self.ring2nest(ipix),
        };
        let n = 1u64 << (2 * levels as u32);
        Ok((child, (nest * n..(nest + 1) * n).collect()))
    }

    /// Structural equality.
    pub fn is_aligned(&self, other: &HpxFootprint) -> bool {
        self.order == other.order
            && self.scheme == other.scheme
            && self.frame == other.frame
            && self.region.is_some() == other.region.is_some()
            && self.pixels == other.pixels
    }

    pub(crate) fn hash_into<H: Hasher>(&self, h: &mut H) {
        h.write_u8(1);
        h.write_u8(self.order);
        h.write_u8(self.scheme as u8);
        h.write_u8(self.frame as u8);
        h.write_u8(self.region.is_some() as u8);
        for p in &self.pixels {
            h.write_u64(*p);
        }
    }
}

fn check_order(order: u8) -> Result<()> {
    if order > MAX_ORDER {
        return Err(Error::InvalidGeometry(format!("HEALPix order {} exceeds {}", order, MAX_ORDER)));
    }
    Ok(())
}

fn isqrt(v: i64) -> i64 {
    let mut r = (v as f64).sqrt() as i64;
    while r * r > v {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= v {
        r += 1;
    }
    r
}

fn spread_bits(v: u64) -> u64 {
    (0..32).fold(0, |acc, i| acc | (((v >> i) & 1) << (2 * i)))
}

fn compress_bits(v: u64) -> u64 {
    (0..32).fold(0, |acc, i| acc | (((v >> (2 * i)) & 1) << i))
}
