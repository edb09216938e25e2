//! Cross-module properties of geometries and maps.

use std::sync::Arc;

use approx::assert_relative_eq;
use gf_maps::{
    Extrapolation, Frame, Geometry, HpxFootprint, HpxScheme, Map, MapAxis, MapCoord, Projection, ResampleMode,
    SkyCoord, SpatialGrid, WcsFootprint,
};

fn energy(nbin: usize) -> MapAxis {
    MapAxis::from_energy_bounds(0.1, 100.0, nbin, "TeV", "energy").unwrap()
}

fn wcs_geom(binsz: f64, npix: usize, proj: Projection) -> Arc<Geometry> {
    let w = WcsFootprint::new(SkyCoord::new(266.4, -28.9), binsz, (npix, npix), proj, Frame::Icrs).unwrap();
    Arc::new(Geometry::wcs(w, vec![energy(3)]).unwrap())
}

fn hpx_geom(order: u8, scheme: HpxScheme) -> Arc<Geometry> {
    let h = HpxFootprint::allsky(order, scheme, Frame::Galactic).unwrap();
    Arc::new(Geometry::hpx(h, vec![energy(3)]).unwrap())
}

fn pseudo_random(n: usize, seed: u64) -> Vec<f64> {
    let mut s = seed;
    (0..n)
        .map(|_| {
            s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((s >> 11) as f64) / ((1u64 << 53) as f64) * 10.0
        })
        .collect()
}

#[test]
fn additive_roundtrip_recovers_original() {
    for g in [wcs_geom(0.05, 12, Projection::Tan), hpx_geom(2, HpxScheme::Ring)] {
        let a = Map::from_vec(g.clone(), pseudo_random(g.npix(), 1), "").unwrap();
        let b = Map::from_vec(g.clone(), pseudo_random(g.npix(), 2), "").unwrap();
        let back = a.add(&b).unwrap().sub(&b).unwrap();
        for (x, y) in a.values().iter().zip(back.values()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
    }
}

#[test]
fn coordinate_roundtrip_within_one_pixel_wcs() {
    for proj in [Projection::Tan, Projection::Car] {
        let g = wcs_geom(0.1, 30, proj);
        for (k, c) in g.spatial_coords().iter().enumerate().step_by(37) {
            let pix = g.coord_to_pix(&MapCoord::new(*c, vec![1.0])).unwrap();
            let back = g.pix_to_coord(&pix).unwrap();
            assert!(back.sky.separation(c) < g.pixel_scale(), "pixel {} drifted", k);
            assert_relative_eq!(back.axes[0], 1.0, max_relative = 1e-9);
        }
    }
}

#[test]
fn coordinate_roundtrip_within_one_pixel_hpx() {
    let g = hpx_geom(4, HpxScheme::Nested);
    for lat in [-60.0, -33.3, 0.0, 12.5, 45.0, 60.0] {
        for lon in [0.0, 71.2, 180.0, 299.9] {
            let c = SkyCoord::new(lon, lat);
            let pix = g.coord_to_pix(&MapCoord::new(c, vec![3.0])).unwrap();
            let back = g.pix_to_coord(&pix).unwrap();
            assert!(back.sky.separation(&c) < g.pixel_scale(), "({}, {}) drifted", lon, lat);
        }
    }
}

#[test]
fn sum_resample_to_finer_geometry_conserves_total() {
    let coarse = wcs_geom(0.2, 6, Projection::Tan);
    let fine = Arc::new(coarse.upsample(3).unwrap());
    let m = Map::from_vec(coarse.clone(), pseudo_random(coarse.npix(), 7), "").unwrap();
    let r = m.resample(fine, ResampleMode::Sum).unwrap();
    assert_relative_eq!(r.sum(), m.sum(), max_relative = 1e-6);
}

#[test]
fn sum_resample_hpx_to_covering_wcs_conserves_total() {
    let h = HpxFootprint::cone(5, HpxScheme::Nested, Frame::Icrs, SkyCoord::new(10.0, 5.0), 2.0).unwrap();
    let src = Arc::new(Geometry::hpx(h, vec![energy(3)]).unwrap());
    let w = WcsFootprint::new(SkyCoord::new(10.0, 5.0), 0.25, (40, 40), Projection::Car, Frame::Icrs).unwrap();
    let dst = Arc::new(Geometry::wcs(w, vec![energy(3)]).unwrap());
    let m = Map::from_vec(src.clone(), pseudo_random(src.npix(), 3), "").unwrap();
    let r = m.resample(dst, ResampleMode::Sum).unwrap();
    assert_relative_eq!(r.sum(), m.sum(), max_relative = 1e-6);
}

#[test]
fn mean_resample_reproduces_point_samples() {
    let coarse = wcs_geom(0.1, 10, Projection::Car);
    let ns = coarse.n_spatial();
    // density linear in x and y: bilinear interpolation is exact inside
    let values: Vec<f64> = (0..coarse.npix())
        .map(|k| {
            let s = k % ns;
            (s % 10) as f64 * 2.0 + (s / 10) as f64 + 1.0
        })
        .collect();
    let m = Map::from_vec(coarse.clone(), values, "").unwrap();
    let w = WcsFootprint::new(coarse.center(), 0.05, (8, 8), Projection::Car, Frame::Icrs).unwrap();
    let fine = Arc::new(Geometry::wcs(w, vec![energy(3)]).unwrap());
    let r = m.resample(fine.clone(), ResampleMode::Mean).unwrap();
    let e = coarse.axes()[0].center(0);
    for (t, c) in fine.spatial_coords().iter().enumerate() {
        let expected = m.interp_by_coord(&[MapCoord::new(*c, vec![e])], Extrapolation::Nan)[0];
        assert_relative_eq!(r.values()[t], expected, max_relative = 1e-9);
    }
    // the mean of a density stays a density: no rescaling by area
    assert!(r.sum() < m.sum());
}

#[test]
fn boundary_rule_matches_across_variants() {
    // a coordinate exactly on the boundary between two WCS pixels goes to the
    // upper pixel, mirroring floor() on HEALPix face coordinates
    let g = wcs_geom(0.1, 4, Projection::Car);
    let w = g.footprint().as_wcs().unwrap();
    let on_edge = w.pix_to_coord(1.5, 0.0).unwrap();
    let (x, _) = w.coord_to_pix(&on_edge).unwrap();
    let idx = g.footprint().coord_to_spatial_idx(&on_edge).unwrap();
    assert_eq!(idx % 4, (x + 0.5).floor() as usize);
}
