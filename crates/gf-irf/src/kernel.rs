//! PSF convolution kernels.
//!
//! A [`PsfKernel`] holds one normalized 2D kernel per true-energy bin,
//! sampled on an odd-sized patch with the pixel size of the target WCS
//! geometry. The PSF is truncated at `max_radius`; the mass lost by the
//! truncation is recorded per energy in [`PsfKernel::truncation_loss`] and
//! the kernel is renormalized to unit sum. Each coarse kernel pixel is the
//! block sum of `oversample x oversample` finer samples, so the result
//! approaches the pixel-integrated PSF as `oversample` grows.

use std::sync::{Arc, Mutex};

use gf_core::{Error, Result};
use gf_maps::{Geometry, Interp, Map, MapAxis};
use ndarray::Array2;
use rayon::prelude::*;

use crate::psf::PsfTable;
use crate::ENERGY_TRUE;

/// Relative tolerance when matching kernel and map pixel sizes.
const BINSZ_RTOL: f64 = 1e-6;

/// Per source pixel: (target local pixel, separation deg, solid angle sr).
type NeighbourTable = Vec<Vec<(usize, f64, f64)>>;

/// Per true-energy-bin PSF kernels.
#[derive(Debug, Clone)]
pub struct PsfKernel {
    energy_true: MapAxis,
    table: PsfTable,
    offset: f64,
    binsz: f64,
    max_radius: f64,
    oversample: usize,
    kernels: Vec<Array2<f64>>,
    truncation_loss: Vec<f64>,
    /// HEALPix neighbour table keyed on the geometry fingerprint.
    neighbours: Arc<Mutex<Option<(u64, Arc<NeighbourTable>)>>>,
}

impl PsfKernel {
    /// Build kernels for the bins of `energy_true` at `offset` (deg).
    ///
    /// `binsz` and `max_radius` are in degrees; `oversample >= 1`.
    pub fn new(
        table: &PsfTable,
        energy_true: &MapAxis,
        offset: f64,
        binsz: f64,
        max_radius: f64,
        oversample: usize,
    ) -> Result<Self> {
        if !(binsz > 0.0) || !(max_radius > 0.0) || oversample == 0 {
            return Err(Error::Validation(format!(
                "invalid psf kernel setup: binsz={}, max_radius={}, oversample={}",
                binsz, max_radius, oversample
            )));
        }
        let half = (max_radius / binsz).ceil() as usize;
        let size = 2 * half + 1;
        let f = oversample as f64;
        let fine = binsz / f;
        let omega = fine.to_radians().powi(2);

        let mut kernels = Vec::with_capacity(energy_true.nbin());
        let mut truncation_loss = Vec::with_capacity(energy_true.nbin());
        for e in energy_true.centers() {
            let mut k = Array2::<f64>::zeros((size, size));
            for row in 0..size {
                for col in 0..size {
                    let (cy, cx) = (row as f64 - half as f64, col as f64 - half as f64);
                    let mut acc = 0.0;
                    for sy in 0..oversample {
                        let y = (cy - 0.5 + (sy as f64 + 0.5) / f) * binsz;
                        for sx in 0..oversample {
                            let x = (cx - 0.5 + (sx as f64 + 0.5) / f) * binsz;
                            let r = x.hypot(y);
                            if r <= max_radius {
                                acc += table.evaluate(e, offset, r) * omega;
                            }
                        }
                    }
                    k[[row, col]] = acc;
                }
            }
            let total = k.sum();
            if !(total > 0.0) {
                return Err(Error::Computation(format!(
                    "psf kernel at {} is empty; max_radius {} deg may be smaller than the pixel size",
                    e, max_radius
                )));
            }
            k.mapv_inplace(|v| v / total);
            let loss = (1.0 - table.containment(e, offset, max_radius)).max(0.0);
            log::debug!(
                "psf kernel: energy={:.4e}, size={}x{}, oversample={}, truncation_loss={:.3e}",
                e,
                size,
                size,
                oversample,
                loss
            );
            kernels.push(k);
            truncation_loss.push(loss);
        }
        Ok(Self {
            energy_true: energy_true.clone(),
            table: table.clone(),
            offset,
            binsz,
            max_radius,
            oversample,
            kernels,
            truncation_loss,
            neighbours: Arc::new(Mutex::new(None)),
        })
    }

    /// Kernels matching the pixel size and `energy_true` axis of a WCS `geom`.
    pub fn for_geom(table: &PsfTable, geom: &Geometry, offset: f64, max_radius: f64, oversample: usize) -> Result<Self> {
        let axis = geom.axis(ENERGY_TRUE)?;
        let binsz = match geom.footprint().as_wcs() {
            Some(w) => w.binsz(),
            None => geom.pixel_scale(),
        };
        Self::new(table, axis, offset, binsz, max_radius, oversample)
    }

    /// Gaussian kernels with width `sigmas[i]` (deg) per true-energy bin.
    pub fn from_gauss(
        energy_true: &MapAxis,
        sigmas: &[f64],
        binsz: f64,
        max_radius: f64,
        oversample: usize,
    ) -> Result<Self> {
        let smax = sigmas.iter().cloned().fold(0.0, f64::max);
        let rmax = (6.0 * smax).max(max_radius);
        let n = 1000;
        let nodes: Vec<f64> = (0..=n).map(|i| rmax * i as f64 / n as f64).collect();
        let rad = MapAxis::from_nodes(nodes, "rad", "deg", Interp::Lin)?;
        let table = PsfTable::from_gauss(energy_true.clone(), rad, sigmas)?;
        Self::new(&table, energy_true, 0.0, binsz, max_radius, oversample)
    }

    /// True-energy axis of the kernels.
    pub fn energy_axis(&self) -> &MapAxis {
        &self.energy_true
    }

    /// Kernel pixel size (deg).
    pub fn binsz(&self) -> f64 {
        self.binsz
    }

    /// Truncation radius (deg).
    pub fn max_radius(&self) -> f64 {
        self.max_radius
    }

    /// Sub-pixel sampling factor.
    pub fn oversample(&self) -> usize {
        self.oversample
    }

    /// Side length of each kernel patch in pixels (always odd).
    pub fn size(&self) -> usize {
        self.kernels.first().map(|k| k.nrows()).unwrap_or(1)
    }

    /// Normalized kernels, one per true-energy bin.
    pub fn kernels(&self) -> &[Array2<f64>] {
        &self.kernels
    }

    /// PSF mass outside `max_radius`, one value per true-energy bin.
    pub fn truncation_loss(&self) -> &[f64] {
        &self.truncation_loss
    }

    fn check_axes(&self, geom: &Geometry) -> Result<()> {
        if geom.axes().len() != 1 {
            return Err(Error::GeometryMismatch(format!(
                "psf convolution expects a single energy axis, found {}",
                geom.axes().len()
            )));
        }
        if !geom.axes()[0].is_aligned(&self.energy_true) {
            return Err(Error::GeometryMismatch("psf kernel and map energy axes are not aligned".into()));
        }
        Ok(())
    }

    /// Convolve every energy slice of `map` with the matching kernel.
    ///
    /// WCS maps use a zero-padded "same" convolution and must share the
    /// kernel pixel size. HEALPix maps are convolved by direct summation
    /// over pixels within `max_radius`, with the weights of each source
    /// pixel normalized to the stored footprint; `oversample` does not apply.
    pub fn convolve(&self, map: &Map) -> Result<Map> {
        let geom = map.geom();
        self.check_axes(geom)?;
        let ns = geom.n_spatial();
        let slices: Vec<Vec<f64>> = match geom.footprint().as_wcs() {
            Some(w) => {
                if ((w.binsz() - self.binsz) / self.binsz).abs() > BINSZ_RTOL {
                    return Err(Error::GeometryMismatch(format!(
                        "psf kernel pixel size {} deg does not match map pixel size {} deg",
                        self.binsz,
                        w.binsz()
                    )));
                }
                let (ny, nx) = (w.ny(), w.nx());
                map.values()
                    .par_chunks(ns)
                    .zip(self.kernels.par_iter())
                    .map(|(image, kernel)| convolve_same(image, ny, nx, kernel))
                    .collect()
            }
            None => {
                let neighbours = self.neighbours(geom)?;
                map.values()
                    .par_chunks(ns)
                    .zip(self.energy_true.centers().into_par_iter())
                    .map(|(image, e)| self.convolve_sphere(image, &neighbours, e))
                    .collect()
            }
        };
        Map::from_vec(Arc::clone(geom), slices.concat(), map.unit())
    }

    /// Neighbour table of a HEALPix `geom`, built from a disc query of
    /// radius `max_radius` around each stored pixel and cached until a
    /// geometry with another fingerprint is convolved.
    fn neighbours(&self, geom: &Geometry) -> Result<Arc<NeighbourTable>> {
        let key = geom.fingerprint();
        {
            let cached = self.neighbours.lock().expect("psf neighbour cache mutex poisoned");
            if let Some((k, table)) = cached.as_ref() {
                if *k == key {
                    return Ok(Arc::clone(table));
                }
            }
        }
        let hpx = geom
            .footprint()
            .as_hpx()
            .ok_or_else(|| Error::GeometryMismatch("spherical psf convolution needs a HEALPix geometry".into()))?;
        let coords = geom.spatial_coords();
        let omega = geom.solid_angle();
        let table: NeighbourTable = coords
            .par_iter()
            .map(|c| {
                hpx.query_disc(c, self.max_radius)
                    .into_iter()
                    .filter_map(|ipix| hpx.local_index(ipix))
                    .map(|t| (t, c.separation(&coords[t]), omega[t]))
                    .collect()
            })
            .collect();
        let links: usize = table.iter().map(Vec::len).sum();
        log::debug!(
            "psf neighbour table: {} pixels, {} links within {:.3} deg",
            coords.len(),
            links,
            self.max_radius
        );
        let table = Arc::new(table);
        *self.neighbours.lock().expect("psf neighbour cache mutex poisoned") = Some((key, Arc::clone(&table)));
        Ok(table)
    }

    fn convolve_sphere(&self, image: &[f64], neighbours: &[Vec<(usize, f64, f64)>], energy: f64) -> Vec<f64> {
        let mut out = vec![0.0; image.len()];
        for (s, &v) in image.iter().enumerate() {
            if v == 0.0 {
                continue;
            }
            let weights: Vec<f64> =
                neighbours[s].iter().map(|&(_, sep, omega)| self.table.evaluate(energy, self.offset, sep) * omega).collect();
            let total: f64 = weights.iter().sum();
            if !(total > 0.0) {
                out[s] += v;
                continue;
            }
            for (&(t, _, _), w) in neighbours[s].iter().zip(&weights) {
                out[t] += v * w / total;
            }
        }
        out
    }
}

/// Zero-padded "same" convolution of a row-major `ny x nx` image, written in
/// scatter form so empty pixels are skipped.
fn convolve_same(image: &[f64], ny: usize, nx: usize, kernel: &Array2<f64>) -> Vec<f64> {
    let (kr, kc) = kernel.dim();
    let (pr, pc) = ((kr / 2) as isize, (kc / 2) as isize);
    let mut out = vec![0.0; ny * nx];
    for iy in 0..ny {
        for ix in 0..nx {
            let v = image[iy * nx + ix];
            if v == 0.0 {
                continue;
            }
            for ki in 0..kr {
                let oy = iy as isize + ki as isize - pr;
                if oy < 0 || oy >= ny as isize {
                    continue;
                }
                for kj in 0..kc {
                    let ox = ix as isize + kj as isize - pc;
                    if ox < 0 || ox >= nx as isize {
                        continue;
                    }
                    out[oy as usize * nx + ox as usize] += v * kernel[[ki, kj]];
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use gf_maps::{Frame, HpxFootprint, HpxScheme, Projection, SkyCoord, WcsFootprint};

    fn energy() -> MapAxis {
        MapAxis::from_energy_bounds(1.0, 10.0, 2, "TeV", ENERGY_TRUE).unwrap()
    }

    #[test]
    fn test_kernel_normalized_and_odd() {
        let k = PsfKernel::from_gauss(&energy(), &[0.1, 0.05], 0.02, 0.31, 2).unwrap();
        assert_eq!(k.size(), 33);
        for kern in k.kernels() {
            assert_relative_eq!(kern.sum(), 1.0, max_relative = 1e-12);
        }
        // roughly 3 and 6 sigma truncation
        assert!(k.truncation_loss()[0] > 1e-3);
        assert!(k.truncation_loss()[1] < 1e-3);
    }

    #[test]
    fn test_convolve_conserves_interior_flux() {
        let w = WcsFootprint::new(SkyCoord::new(0.0, 0.0), 0.02, (41, 41), Projection::Car, Frame::Galactic).unwrap();
        let g = Arc::new(Geometry::wcs(w, vec![energy()]).unwrap());
        let mut m = Map::new(g, "");
        let ns = 41 * 41;
        m.values_mut()[20 * 41 + 20] = 10.0;
        m.values_mut()[ns + 20 * 41 + 20] = 4.0;
        let k = PsfKernel::from_gauss(&energy(), &[0.05, 0.05], 0.02, 0.2, 1).unwrap();
        let out = k.convolve(&m).unwrap();
        assert_relative_eq!(out.values()[..ns].iter().sum::<f64>(), 10.0, max_relative = 1e-12);
        assert_relative_eq!(out.values()[ns..].iter().sum::<f64>(), 4.0, max_relative = 1e-12);
        assert!(out.values()[20 * 41 + 20] < 10.0);
    }

    #[test]
    fn test_binsz_mismatch() {
        let w = WcsFootprint::new(SkyCoord::new(0.0, 0.0), 0.05, (11, 11), Projection::Car, Frame::Galactic).unwrap();
        let g = Arc::new(Geometry::wcs(w, vec![energy()]).unwrap());
        let k = PsfKernel::from_gauss(&energy(), &[0.05, 0.05], 0.02, 0.2, 1).unwrap();
        assert!(matches!(k.convolve(&Map::new(g, "")), Err(Error::GeometryMismatch(_))));
    }

    #[test]
    fn test_hpx_neighbours_match_full_scan() {
        let h = HpxFootprint::cone(6, HpxScheme::Nested, Frame::Galactic, SkyCoord::new(10.0, 5.0), 4.0).unwrap();
        let g = Arc::new(Geometry::hpx(h, vec![energy()]).unwrap());
        let k = PsfKernel::from_gauss(&energy(), &[0.5, 0.5], g.pixel_scale(), 1.2, 1).unwrap();
        let table = k.neighbours(&g).unwrap();

        let coords = g.spatial_coords();
        assert_eq!(table.len(), coords.len());
        for (s, c) in coords.iter().enumerate() {
            let mut got: Vec<usize> = table[s].iter().map(|&(t, _, _)| t).collect();
            got.sort_unstable();
            let expected: Vec<usize> =
                (0..coords.len()).filter(|&t| c.separation(&coords[t]) <= k.max_radius()).collect();
            assert_eq!(got, expected, "pixel {}", s);
            for &(t, sep, _) in &table[s] {
                assert_relative_eq!(sep, c.separation(&coords[t]));
            }
        }
    }

    #[test]
    fn test_hpx_neighbours_cached_per_geometry() {
        let cone = |radius| {
            let h = HpxFootprint::cone(5, HpxScheme::Ring, Frame::Galactic, SkyCoord::new(0.0, 0.0), radius).unwrap();
            Arc::new(Geometry::hpx(h, vec![energy()]).unwrap())
        };
        let (small, large) = (cone(3.0), cone(4.0));
        let k = PsfKernel::from_gauss(&energy(), &[0.5, 0.5], small.pixel_scale(), 1.5, 1).unwrap();
        let first = k.neighbours(&small).unwrap();
        assert!(Arc::ptr_eq(&first, &k.neighbours(&small).unwrap()));
        assert!(Arc::ptr_eq(&first, &k.clone().neighbours(&small).unwrap()));
        let other = k.neighbours(&large).unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(other.len(), large.n_spatial());
    }

    #[test]
    fn test_hpx_convolution_conserves_flux() {
        let h = HpxFootprint::cone(7, HpxScheme::Ring, Frame::Galactic, SkyCoord::new(0.0, 0.0), 3.0).unwrap();
        let g = Arc::new(Geometry::hpx(h, vec![energy()]).unwrap());
        let mut m = Map::new(g.clone(), "");
        let center = g.footprint().as_hpx().unwrap().ang2pix(&SkyCoord::new(0.0, 0.0));
        let local = g.footprint().as_hpx().unwrap().local_index(center).unwrap();
        m.values_mut()[local] = 1.0;
        let k = PsfKernel::from_gauss(&energy(), &[0.5, 0.5], g.pixel_scale(), 1.5, 1).unwrap();
        let out = k.convolve(&m).unwrap();
        assert_relative_eq!(out.sum(), 1.0, max_relative = 1e-9);
        assert!(out.values()[local] < 0.5);
    }
}
