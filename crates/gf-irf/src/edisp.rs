//! Energy dispersion: migration tables and true -> reconstructed matrices.

use std::f64::consts::SQRT_2;
use std::ops::Range;
use std::sync::Arc;

use gf_core::{Error, Result};
use gf_maps::{Map, MapAxis};
use ndarray::{Array2, s};
use statrs::function::erf::erf;

use crate::{ENERGY, ENERGY_TRUE};

/// Slack allowed on row sums before a matrix is rejected.
const ROW_SUM_TOL: f64 = 1e-6;

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / SQRT_2))
}

/// Redistribution matrix from true-energy bins (rows) to reconstructed
/// energy bins (columns).
///
/// Every entry is non-negative and every row sums to at most one; the
/// missing mass is the fraction of events not reconstructed inside the
/// reconstructed-energy range.
#[derive(Debug, Clone)]
pub struct EDispKernel {
    energy_true: MapAxis,
    energy: MapAxis,
    matrix: Array2<f64>,
}

impl EDispKernel {
    /// Kernel from axes and a row-major `n_true x n_reco` matrix.
    pub fn new(energy_true: MapAxis, energy: MapAxis, data: Vec<f64>) -> Result<Self> {
        let matrix = Array2::from_shape_vec((energy_true.nbin(), energy.nbin()), data)
            .map_err(|e| Error::Validation(format!("edisp matrix shape: {}", e)))?;
        Self::from_matrix(energy_true, energy, matrix)
    }

    fn from_matrix(energy_true: MapAxis, energy: MapAxis, matrix: Array2<f64>) -> Result<Self> {
        if matrix.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(Error::Validation("edisp entries must be finite and non-negative".into()));
        }
        for (i, row) in matrix.outer_iter().enumerate() {
            let s = row.sum();
            if s > 1.0 + ROW_SUM_TOL {
                return Err(Error::Validation(format!("edisp row {} sums to {} > 1", i, s)));
            }
        }
        let energy_true = energy_true.renamed(ENERGY_TRUE);
        let energy = energy.renamed(ENERGY);
        Ok(Self { energy_true, energy, matrix })
    }

    /// Gaussian migration `E_reco / E_true ~ N(1 + bias, sigma)`.
    pub fn from_gauss(energy_true: &MapAxis, energy: &MapAxis, bias: f64, sigma: f64) -> Result<Self> {
        if !(sigma > 0.0) {
            return Err(Error::Validation(format!("edisp sigma must be > 0, got {}", sigma)));
        }
        let edges = energy.edges();
        let mut matrix = Array2::zeros((energy_true.nbin(), energy.nbin()));
        for (i, et) in energy_true.centers().into_iter().enumerate() {
            let cdf: Vec<f64> = edges.iter().map(|e| normal_cdf((e / et - 1.0 - bias) / sigma)).collect();
            for j in 0..energy.nbin() {
                matrix[[i, j]] = (cdf[j + 1] - cdf[j]).max(0.0);
            }
        }
        Self::from_matrix(energy_true.clone(), energy.clone(), matrix)
    }

    /// Perfect energy reconstruction: each true bin is split over the
    /// reconstructed bins by log-space overlap.
    pub fn from_diagonal_response(energy_true: &MapAxis, energy: &MapAxis) -> Result<Self> {
        let te = energy_true.edges();
        let re = energy.edges();
        if te[0] <= 0.0 || re[0] <= 0.0 {
            return Err(Error::Validation("diagonal edisp requires positive energies".into()));
        }
        let mut matrix = Array2::zeros((energy_true.nbin(), energy.nbin()));
        for i in 0..energy_true.nbin() {
            let (a, b) = (te[i].ln(), te[i + 1].ln());
            for j in 0..energy.nbin() {
                let (c, d) = (re[j].ln(), re[j + 1].ln());
                let overlap = (b.min(d) - a.max(c)).max(0.0);
                matrix[[i, j]] = overlap / (b - a);
            }
        }
        Self::from_matrix(energy_true.clone(), energy.clone(), matrix)
    }

    /// True-energy axis (rows).
    pub fn energy_true_axis(&self) -> &MapAxis {
        &self.energy_true
    }

    /// Reconstructed-energy axis (columns).
    pub fn energy_axis(&self) -> &MapAxis {
        &self.energy
    }

    /// The redistribution matrix.
    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Fraction of each true bin that lands inside the reconstructed range.
    pub fn row_sums(&self) -> Vec<f64> {
        self.matrix.outer_iter().map(|r| r.sum()).collect()
    }

    /// Merge reconstructed bins so the columns follow `energy`, whose edges
    /// must be a subset of the current ones.
    pub fn resample_energy_axis(&self, energy: &MapAxis) -> Result<Self> {
        let energy = energy.renamed(ENERGY);
        let idx = self.energy.edge_indices_of(&energy)?;
        let mut matrix = Array2::zeros((self.energy_true.nbin(), energy.nbin()));
        for (i, row) in self.matrix.outer_iter().enumerate() {
            for (j, w) in idx.windows(2).enumerate() {
                matrix[[i, j]] = row.slice(s![w[0]..w[1]]).sum();
            }
        }
        Self::from_matrix(self.energy_true.clone(), energy, matrix)
    }

    /// Keep reconstructed bins `range`.
    pub fn slice_energy(&self, range: Range<usize>) -> Result<Self> {
        let energy = self.energy.slice(range.clone())?;
        let matrix = self.matrix.slice(s![.., range]).to_owned();
        Self::from_matrix(self.energy_true.clone(), energy, matrix)
    }

    /// Row-wise weighted mean of two kernels on the same axes, with one
    /// weight per true-energy bin for each (typically summed exposure).
    pub fn stack(&self, other: &EDispKernel, weights: &[f64], other_weights: &[f64]) -> Result<Self> {
        if !self.energy_true.is_aligned(&other.energy_true) || !self.energy.is_aligned(&other.energy) {
            return Err(Error::GeometryMismatch("stacked edisp kernels have different axes".into()));
        }
        let n = self.energy_true.nbin();
        if weights.len() != n || other_weights.len() != n {
            return Err(Error::Validation(format!("edisp stacking needs {} weights per kernel", n)));
        }
        let mut matrix = self.matrix.clone();
        for i in 0..n {
            let total = weights[i] + other_weights[i];
            if total > 0.0 {
                let mut row = matrix.row_mut(i);
                row.zip_mut_with(&other.matrix.row(i), |a, &b| {
                    *a = (*a * weights[i] + b * other_weights[i]) / total;
                });
            }
        }
        Self::from_matrix(self.energy_true.clone(), self.energy.clone(), matrix)
    }

    /// Redistribute a true-energy cube into reconstructed energy.
    ///
    /// `map` must have a single `energy_true` axis aligned with the kernel;
    /// the result carries the reconstructed axis.
    pub fn apply(&self, map: &Map) -> Result<Map> {
        let geom = map.geom();
        if geom.axes().len() != 1 || !geom.axes()[0].is_aligned(&self.energy_true) {
            return Err(Error::GeometryMismatch("edisp kernel and map true-energy axes are not aligned".into()));
        }
        let ns = geom.n_spatial();
        let out_geom = Arc::new(geom.to_cube(vec![self.energy.clone()])?);
        let mut out = vec![0.0; self.energy.nbin() * ns];
        let values = map.values();
        for (i, row) in self.matrix.outer_iter().enumerate() {
            let src = &values[i * ns..(i + 1) * ns];
            for (j, &w) in row.iter().enumerate() {
                if w == 0.0 {
                    continue;
                }
                let dst = &mut out[j * ns..(j + 1) * ns];
                for (d, s) in dst.iter_mut().zip(src) {
                    *d += w * s;
                }
            }
        }
        Map::from_vec(out_geom, out, map.unit())
    }
}

/// Migration probability density `p(mu | E_true)` with `mu = E_reco / E_true`.
#[derive(Debug, Clone)]
pub struct EDispTable {
    energy_true: MapAxis,
    migra: MapAxis,
    pdf: Array2<f64>,
}

impl EDispTable {
    /// Table from axes and row-major densities `pdf[energy_true][migra]`.
    ///
    /// `migra` must be an edge axis; densities are per unit migration.
    pub fn new(energy_true: MapAxis, migra: MapAxis, pdf: Vec<f64>) -> Result<Self> {
        if pdf.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(Error::Validation("migration densities must be finite and non-negative".into()));
        }
        if migra.edges()[0] < 0.0 {
            return Err(Error::Validation("migration axis must be non-negative".into()));
        }
        let pdf = Array2::from_shape_vec((energy_true.nbin(), migra.nbin()), pdf)
            .map_err(|e| Error::Validation(format!("migration table shape: {}", e)))?;
        Ok(Self { energy_true, migra, pdf })
    }

    /// Gaussian migration density `N(1 + bias, sigma)` on the bins of `migra`.
    pub fn from_gauss(energy_true: MapAxis, migra: MapAxis, bias: f64, sigma: f64) -> Result<Self> {
        if !(sigma > 0.0) {
            return Err(Error::Validation(format!("migration sigma must be > 0, got {}", sigma)));
        }
        let edges = migra.edges();
        let row: Vec<f64> = edges
            .windows(2)
            .map(|w| {
                let p = normal_cdf((w[1] - 1.0 - bias) / sigma) - normal_cdf((w[0] - 1.0 - bias) / sigma);
                p / (w[1] - w[0])
            })
            .collect();
        let pdf = (0..energy_true.nbin()).flat_map(|_| row.iter().copied()).collect();
        Self::new(energy_true, migra, pdf)
    }

    /// True-energy axis.
    pub fn energy_axis(&self) -> &MapAxis {
        &self.energy_true
    }

    /// Migration axis.
    pub fn migra_axis(&self) -> &MapAxis {
        &self.migra
    }

    /// Cumulative migration probability at the migra edges for row `i`,
    /// normalized by `max(total, 1)`.
    fn cumulative(&self, i: usize) -> Vec<f64> {
        let widths = self.migra.bin_width();
        let mut cdf = Vec::with_capacity(widths.len() + 1);
        cdf.push(0.0);
        let mut acc = 0.0;
        for (p, w) in self.pdf.row(i).iter().zip(&widths) {
            acc += p * w;
            cdf.push(acc);
        }
        let norm = acc.max(1.0);
        cdf.iter_mut().for_each(|c| *c /= norm);
        cdf
    }

    /// Integrate the migration densities into a kernel for the reconstructed
    /// axis `energy`, using the true-energy bins of the table.
    pub fn to_kernel(&self, energy: &MapAxis) -> Result<EDispKernel> {
        let medges = self.migra.edges();
        let eedges = energy.edges();
        let mut matrix = Array2::zeros((self.energy_true.nbin(), energy.nbin()));
        for (i, et) in self.energy_true.centers().into_iter().enumerate() {
            let cdf = self.cumulative(i);
            let at = |m: f64| interp_clamped(&medges, &cdf, m);
            for j in 0..energy.nbin() {
                matrix[[i, j]] = (at(eedges[j + 1] / et) - at(eedges[j] / et)).max(0.0);
            }
        }
        EDispKernel::from_matrix(self.energy_true.clone(), energy.clone(), matrix)
    }
}

/// Piecewise-linear interpolation of `ys` over increasing `xs`, held
/// constant outside.
fn interp_clamped(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if x <= xs[0] {
        return ys[0];
    }
    let n = xs.len();
    if x >= xs[n - 1] {
        return ys[n - 1];
    }
    let k = xs.partition_point(|&v| v <= x).max(1) - 1;
    let t = (x - xs[k]) / (xs[k + 1] - xs[k]);
    ys[k] + t * (ys[k + 1] - ys[k])
}
