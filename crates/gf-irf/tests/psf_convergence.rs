//! Convergence of truncated, oversampled PSF kernels towards the exact
//! pixel-integrated point-source image.

use std::sync::Arc;

use gf_irf::{PsfKernel, ENERGY_TRUE};
use gf_maps::{Frame, Geometry, Map, MapAxis, Projection, SkyCoord, WcsFootprint};
use statrs::function::erf::erf;

const SIGMA: f64 = 0.1;
const BINSZ: f64 = 0.05;
const NPIX: usize = 25;

fn point_source_map() -> Map {
    let w = WcsFootprint::new(SkyCoord::new(83.6, 22.0), BINSZ, (NPIX, NPIX), Projection::Tan, Frame::Icrs).unwrap();
    let e = MapAxis::from_energy_bounds(1.0, 10.0, 1, "TeV", ENERGY_TRUE).unwrap();
    let mut m = Map::new(Arc::new(Geometry::wcs(w, vec![e]).unwrap()), "");
    let c = NPIX / 2;
    m.values_mut()[c * NPIX + c] = 1.0;
    m
}

/// Gaussian mass in every pixel of the image, small-angle limit.
fn exact_image() -> Vec<f64> {
    let c = (NPIX / 2) as f64;
    let s = SIGMA * std::f64::consts::SQRT_2;
    let band = |i: usize| {
        let d = (i as f64 - c) * BINSZ;
        0.5 * (erf((d + 0.5 * BINSZ) / s) - erf((d - 0.5 * BINSZ) / s))
    };
    let mut out = Vec::with_capacity(NPIX * NPIX);
    for iy in 0..NPIX {
        for ix in 0..NPIX {
            out.push(band(iy) * band(ix));
        }
    }
    out
}

fn residual(max_radius: f64, oversample: usize) -> f64 {
    let m = point_source_map();
    let axis = m.geom().axes()[0].clone();
    let kernel = PsfKernel::from_gauss(&axis, &[SIGMA], BINSZ, max_radius, oversample).unwrap();
    let out = kernel.convolve(&m).unwrap();
    out.values().iter().zip(exact_image()).map(|(a, b)| (a - b).abs()).sum()
}

#[test]
fn residual_is_non_increasing_with_radius_and_oversampling() {
    let steps = [(1.0, 1), (2.0, 2), (3.0, 4), (4.0, 8)];
    let residuals: Vec<f64> = steps.iter().map(|&(r, f)| residual(r * SIGMA, f)).collect();
    for w in residuals.windows(2) {
        assert!(w[1] <= w[0], "residuals not monotone: {:?}", residuals);
    }
    assert!(residuals[3] < 2e-3, "final residual {}", residuals[3]);
}

#[test]
fn truncation_loss_matches_gaussian_tail() {
    let m = point_source_map();
    let axis = m.geom().axes()[0].clone();
    for k in [1.0, 2.0, 3.0] {
        let kernel = PsfKernel::from_gauss(&axis, &[SIGMA], BINSZ, k * SIGMA, 1).unwrap();
        let expected = (-0.5 * k * k).exp();
        assert!((kernel.truncation_loss()[0] - expected).abs() < 1e-3, "k={} loss={}", k, kernel.truncation_loss()[0]);
    }
}
