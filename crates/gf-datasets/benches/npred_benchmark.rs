use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use gf_datasets::{EvaluationConfig, MapDataset};
use gf_irf::{ENERGY, ENERGY_TRUE, IrfResponse, PsfKernel};
use gf_maps::{Frame, Geometry, Map, MapAxis, Projection, SkyCoord, WcsFootprint};
use gf_models::{FoVBackgroundModel, GaussianSpatial, Models, PowerLaw, SkyModel};
use std::hint::black_box;
use std::sync::Arc;

fn geom(npix: usize, axis_name: &str) -> Arc<Geometry> {
    let w = WcsFootprint::new(SkyCoord::new(0.0, 0.0), 0.02, (npix, npix), Projection::Car, Frame::Galactic).unwrap();
    let e = MapAxis::from_energy_bounds(1.0, 100.0, 8, "TeV", axis_name).unwrap();
    Arc::new(Geometry::wcs(w, vec![e]).unwrap())
}

fn build_dataset(npix: usize, use_cache: bool) -> (MapDataset, Models) {
    let true_geom = geom(npix, ENERGY_TRUE);
    let exposure = Map::full(true_geom.clone(), 1e11, "cm2 s");
    let axis = true_geom.axis(ENERGY_TRUE).unwrap();
    let psf = PsfKernel::from_gauss(axis, &[0.05; 8], 0.02, 0.2, 2).unwrap();
    let response = IrfResponse::new(exposure, Some(psf), None).unwrap();

    let config = EvaluationConfig { use_cache, ..Default::default() };
    let dataset = MapDataset::new("bench", Map::full(geom(npix, ENERGY), 3.0, ""), response)
        .unwrap()
        .with_background(Map::full(geom(npix, ENERGY), 1.0, ""))
        .unwrap()
        .with_config(config);

    let src = SkyModel::new(
        "src",
        PowerLaw::new(2.3, 1e-12, 1.0),
        GaussianSpatial::new(0.0, 0.0, 0.1, Frame::Galactic).unwrap(),
    );
    let models = Models::new().with(src).unwrap().with_background(FoVBackgroundModel::new("bench")).unwrap();
    (dataset.with_models(&models), models)
}

fn bench_npred(c: &mut Criterion) {
    let mut group = c.benchmark_group("npred");

    for npix in [50usize, 100, 200] {
        let (cold, models) = build_dataset(npix, false);
        let amplitude = models.parameter("src", "amplitude").unwrap();
        group.bench_with_input(BenchmarkId::new("spectral_change", npix), &npix, |b, _| {
            let mut k = 0u64;
            b.iter(|| {
                k += 1;
                amplitude.set_value(1e-12 * (1.0 + (k % 7) as f64 * 0.01)).unwrap();
                black_box(cold.stat_sum().unwrap())
            })
        });

        let (warm, _) = build_dataset(npix, true);
        group.bench_with_input(BenchmarkId::new("cached", npix), &npix, |b, _| {
            b.iter(|| black_box(warm.stat_sum().unwrap()))
        });
    }

    group.finish();
}

fn bench_gradient(c: &mut Criterion) {
    let (dataset, _) = build_dataset(100, true);
    let params = dataset.parameters().free();

    let mut group = c.benchmark_group("stat_gradient");
    group.sample_size(20);
    group.bench_function("mixed_100", |b| b.iter(|| black_box(dataset.stat_gradient(black_box(&params)).unwrap())));
    group.bench_function("numeric_100", |b| {
        b.iter(|| black_box(dataset.stat_gradient_numeric(black_box(&params)).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_npred, bench_gradient);
criterion_main!(benches);
