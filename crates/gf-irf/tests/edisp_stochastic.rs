//! Every energy-dispersion matrix is row sub-stochastic.

use gf_irf::{EDispKernel, EDispTable, ENERGY, ENERGY_TRUE};
use gf_maps::{Interp, MapAxis};

fn check(k: &EDispKernel) {
    for (i, row) in k.matrix().outer_iter().enumerate() {
        assert!(row.iter().all(|v| *v >= 0.0), "negative entry in row {}", i);
        let s: f64 = row.sum();
        assert!(s <= 1.0 + 1e-9, "row {} sums to {}", i, s);
    }
}

#[test]
fn gaussian_kernels_are_sub_stochastic() {
    let et = MapAxis::from_energy_bounds(0.05, 200.0, 24, "TeV", ENERGY_TRUE).unwrap();
    let er = MapAxis::from_energy_bounds(0.1, 100.0, 12, "TeV", ENERGY).unwrap();
    for bias in [-0.2, 0.0, 0.1] {
        for sigma in [0.02, 0.1, 0.3] {
            check(&EDispKernel::from_gauss(&et, &er, bias, sigma).unwrap());
        }
    }
    check(&EDispKernel::from_diagonal_response(&et, &er).unwrap());
}

#[test]
fn migration_tables_are_sub_stochastic() {
    let et = MapAxis::from_energy_bounds(0.05, 200.0, 24, "TeV", ENERGY_TRUE).unwrap();
    let er = MapAxis::from_energy_bounds(0.1, 100.0, 12, "TeV", ENERGY).unwrap();
    let edges: Vec<f64> = (0..=60).map(|i| 0.2 + i as f64 * 0.05).collect();
    let migra = MapAxis::from_edges(edges, "migra", "", Interp::Lin).unwrap();
    for sigma in [0.05, 0.2, 0.5] {
        let table = EDispTable::from_gauss(et.clone(), migra.clone(), 0.0, sigma).unwrap();
        check(&table.to_kernel(&er).unwrap());
    }
}
