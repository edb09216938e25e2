use std::sync::Arc;

use approx::assert_relative_eq;
use gf_core::Error;
use gf_datasets::{Datasets, MapDataset};
use gf_inference::{Backend, CancelToken, Fit, FitConfig, OptimizerConfig};
use gf_irf::{ENERGY, ENERGY_TRUE, IrfResponse};
use gf_maps::{Frame, Geometry, Interp, Map, MapAxis, Projection, SkyCoord, WcsFootprint};
use gf_models::{FoVBackgroundModel, GaussianSpatial, Models, Parameter, PointSpatial, PowerLaw, SkyModel};

const TRUE_AMPLITUDE: f64 = 1e-11;

fn footprint() -> WcsFootprint {
    WcsFootprint::new(SkyCoord::new(0.0, 0.0), 0.1, (10, 10), Projection::Car, Frame::Galactic).unwrap()
}

fn geom(axis_name: &str) -> Arc<Geometry> {
    let e = MapAxis::from_energy_bounds(1.0, 10.0, 3, "TeV", axis_name).unwrap();
    Arc::new(Geometry::wcs(footprint(), vec![e]).unwrap())
}

fn models() -> Models {
    let src = SkyModel::new(
        "src",
        PowerLaw::new(2.0, TRUE_AMPLITUDE, 1.0),
        GaussianSpatial::new(0.0, 0.0, 0.2, Frame::Galactic).unwrap(),
    );
    let m = Models::new().with(src).unwrap().with_background(FoVBackgroundModel::new("obs")).unwrap();
    for name in ["index", "lon_0", "lat_0", "sigma"] {
        m.parameter("src", name).unwrap().freeze();
    }
    m
}

/// Counts set to the prediction of `models()`: the best fit is the truth.
fn asimov_datasets(m: &Models) -> Datasets {
    let response = IrfResponse::new(Map::full(geom(ENERGY_TRUE), 1e12, "cm2 s"), None, None).unwrap();
    let mut ds = MapDataset::new("obs", Map::full(geom(ENERGY), 0.0, ""), response)
        .unwrap()
        .with_background(Map::full(geom(ENERGY), 2.0, ""))
        .unwrap()
        .with_models(m);
    ds.asimov().unwrap();
    Datasets::new(vec![ds]).unwrap()
}

fn amplitude(m: &Models) -> Parameter {
    m.parameter("src", "amplitude").unwrap()
}

fn norm(m: &Models) -> Parameter {
    m.parameter("obs-bkg", "norm").unwrap()
}

#[test]
fn point_source_fit_absorbs_excess() {
    // Equal E^-2 flux in each bin: 1/E steps of 0.25.
    let edges = vec![1.0, 4.0 / 3.0, 2.0, 4.0];
    let cube = |name: &str| {
        let e = MapAxis::from_edges(edges.clone(), name, "TeV", Interp::Log).unwrap();
        Arc::new(Geometry::wcs(footprint(), vec![e]).unwrap())
    };
    let response = IrfResponse::new(Map::full(cube(ENERGY_TRUE), 1e12, "cm2 s"), None, None).unwrap();
    let center = footprint().pix_to_coord(5.0, 5.0).unwrap();
    let src = SkyModel::new(
        "src",
        PowerLaw::new(2.0, 1e-12, 1.0),
        PointSpatial::new(center.lon, center.lat, Frame::Galactic).unwrap(),
    );
    let m = Models::new().with(src).unwrap();
    for name in ["index", "lon_0", "lat_0"] {
        m.parameter("src", name).unwrap().freeze();
    }
    let ds = MapDataset::new("obs", Map::full(cube(ENERGY), 5.0, ""), response)
        .unwrap()
        .with_background(Map::full(cube(ENERGY), 2.0, ""))
        .unwrap()
        .with_models(&m);
    let ds = Datasets::new(vec![ds]).unwrap();

    let result = Fit::default().run(&ds).unwrap();
    assert!(result.converged, "{}", result.message);
    assert_eq!(result.free_names, vec!["src.amplitude".to_string()]);
    // 3 counts per bin = A * 0.25 TeV^-1 * 1e12 cm2 s
    assert_relative_eq!(amplitude(&m).value(), 1.2e-11, max_relative = 1e-4);

    let signal = ds.get("obs").unwrap().npred_signal().unwrap();
    assert_relative_eq!(signal.sum(), 9.0, max_relative = 1e-4);
    let peak = signal.values().iter().fold(0.0_f64, |a, &b| a.max(b));
    assert_relative_eq!(peak, 3.0, max_relative = 1e-4);
}

#[test]
fn fit_recovers_asimov_truth() {
    let m = models();
    let ds = asimov_datasets(&m);
    let expected = ds.get("obs").unwrap().npred_signal().unwrap();
    amplitude(&m).set_value(3e-12).unwrap();
    norm(&m).set_value(1.2).unwrap();

    let result = Fit::default().run(&ds).unwrap();
    assert!(result.converged, "{}", result.message);
    assert_eq!(result.free_names, vec!["src.amplitude".to_string(), "obs-bkg.norm".to_string()]);
    assert_relative_eq!(amplitude(&m).value(), TRUE_AMPLITUDE, max_relative = 1e-3);
    assert_relative_eq!(norm(&m).value(), 1.0, max_relative = 1e-4);

    let npred = ds.get("obs").unwrap().npred_signal().unwrap();
    for (a, b) in npred.values().iter().zip(expected.values()) {
        assert_relative_eq!(*a, *b, max_relative = 1e-3, epsilon = 1e-9);
    }

    assert!(result.errors_defined);
    assert_eq!(result.covariance.as_ref().unwrap().len(), 4);
    let err = result.parameter("src.amplitude").unwrap().error.unwrap();
    assert!(err > 0.0 && err < TRUE_AMPLITUDE);
    assert_eq!(amplitude(&m).error(), Some(err));
    let rho = result.correlation(0, 1).unwrap();
    assert!(rho.abs() < 1.0);
    assert!(result.parameter("src.index").unwrap().frozen);
}

#[test]
fn nelder_mead_backend_recovers_truth() {
    let m = models();
    let ds = asimov_datasets(&m);
    amplitude(&m).set_value(5e-12).unwrap();

    let config = FitConfig {
        optimizer: OptimizerConfig { backend: Backend::NelderMead, tol: 1e-10, ..OptimizerConfig::default() },
        covariance: false,
        ..FitConfig::default()
    };
    let result = Fit::new(config).run(&ds).unwrap();
    assert!(result.converged, "{}", result.message);
    assert!(!result.errors_defined);
    assert_relative_eq!(amplitude(&m).value(), TRUE_AMPLITUDE, max_relative = 2e-2);
}

#[test]
fn iteration_limit_reports_non_convergence() {
    let m = models();
    let ds = asimov_datasets(&m);
    amplitude(&m).set_value(3e-12).unwrap();
    norm(&m).set_value(1.2).unwrap();

    let config = FitConfig {
        optimizer: OptimizerConfig { max_iter: 1, ..OptimizerConfig::default() },
        covariance: false,
        ..FitConfig::default()
    };
    let result = Fit::new(config).run(&ds).unwrap();
    assert!(!result.converged);
    assert!(result.n_iter <= 1);
    assert!((amplitude(&m).value() - 3e-12).abs() > 1e-15);
}

#[test]
fn fit_without_free_parameters_evaluates_once() {
    let m = models();
    let ds = asimov_datasets(&m);
    amplitude(&m).freeze();
    norm(&m).freeze();

    let result = Fit::default().run(&ds).unwrap();
    assert!(result.converged);
    assert!(result.free_names.is_empty());
    assert_relative_eq!(result.total_stat, ds.stat_sum().unwrap());
}

#[test]
fn profile_minimum_is_at_best_fit() {
    let m = models();
    let ds = asimov_datasets(&m);
    let fit = Fit::default();
    let best = fit.optimize(&ds).unwrap();
    let a = amplitude(&m);
    let a_best = a.value();

    let values: Vec<f64> = [0.6, 0.8, 1.0, 1.2, 1.4].iter().map(|f| f * a_best).collect();
    let scan = fit.stat_profile(&ds, &a, &values).unwrap();
    assert!(!scan.cancelled);
    assert_eq!(scan.stat.len(), 5);
    assert!(scan.converged.iter().all(|c| *c));
    let imin = (0..5).min_by(|&i, &j| scan.stat[i].total_cmp(&scan.stat[j])).unwrap();
    assert_eq!(imin, 2);
    assert_relative_eq!(scan.stat[2], best.total_stat, max_relative = 1e-6);
    assert!(scan.stat[0] > scan.stat[1] && scan.stat[4] > scan.stat[3]);

    // restored
    assert_eq!(a.value(), a_best);
    assert!(!a.is_frozen());
}

#[test]
fn surface_minimum_is_at_truth() {
    let m = models();
    let ds = asimov_datasets(&m);
    let a = amplitude(&m);
    let index = m.parameter("src", "index").unwrap();

    let xs = [0.7 * TRUE_AMPLITUDE, TRUE_AMPLITUDE, 1.3 * TRUE_AMPLITUDE];
    let ys = [1.8, 2.0, 2.2];
    let scan = Fit::default().stat_surface(&ds, &a, &xs, &index, &ys).unwrap();
    assert_eq!(scan.stat.len(), 9);
    let imin = (0..9).min_by(|&i, &j| scan.stat[i].total_cmp(&scan.stat[j])).unwrap();
    assert_eq!(imin, 4);
    assert!(index.is_frozen());
    assert_eq!(index.value(), 2.0);

    assert!(matches!(Fit::default().stat_surface(&ds, &a, &xs, &a, &xs), Err(Error::Validation(_))));
}

#[test]
fn confidence_interval_brackets_covariance_error() {
    let m = models();
    let ds = asimov_datasets(&m);
    let fit = Fit::default();
    let result = fit.run(&ds).unwrap();
    let a = amplitude(&m);
    let err = result.parameter("src.amplitude").unwrap().error.unwrap();
    let a_best = a.value();

    let ci = fit.confidence(&ds, &a, 1.0).unwrap();
    assert_eq!(ci.value, a_best);
    let (errp, errn) = (ci.errp.unwrap(), ci.errn.unwrap());
    assert!(errp > 0.5 * err && errp < 2.0 * err, "errp {} vs {}", errp, err);
    assert!(errn > 0.5 * err && errn < 2.0 * err, "errn {} vs {}", errn, err);
    assert_relative_eq!(a.value(), a_best);

    let stranger = Parameter::new("x", 1.0);
    assert!(matches!(fit.confidence(&ds, &stranger, 1.0), Err(Error::Validation(_))));
}

#[test]
fn cancelled_token_stops_fits_and_scans() {
    let m = models();
    let ds = asimov_datasets(&m);
    amplitude(&m).set_value(3e-12).unwrap();
    let token = CancelToken::new();
    let fit = Fit::default().with_cancel_token(token.clone());
    token.cancel();

    let result = fit.run(&ds).unwrap();
    assert!(!result.converged);
    assert_eq!(result.message, "cancelled");
    assert!(!result.errors_defined);

    let scan = fit.stat_profile(&ds, &amplitude(&m), &[1e-11, 2e-11]).unwrap();
    assert!(scan.cancelled);
    assert!(scan.stat.is_empty());
    assert!(matches!(fit.confidence(&ds, &amplitude(&m), 1.0), Err(Error::Cancelled)));

    token.reset();
    assert!(fit.run(&ds).unwrap().converged);
}
