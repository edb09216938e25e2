//! Non-spatial map axes (energy, time, offset, ...).
//!
//! A [`MapAxis`] is defined either by bin edges ([`NodeType::Edges`]) or by
//! node centers ([`NodeType::Center`]). Fractional pixel coordinates are
//! piecewise linear in the axis [`Interp`] scale, with integer pixel values at
//! bin centers (edges sit at half-integers).

use std::hash::Hasher;
use std::ops::Range;

use gf_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Relative tolerance used when comparing axis nodes for alignment.
const ALIGN_RTOL: f64 = 1e-9;

/// Interpolation scale of an axis (or of tabulated values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interp {
    /// Linear.
    #[default]
    Lin,
    /// Natural logarithm.
    Log,
    /// Square root.
    Sqrt,
}

impl Interp {
    /// Map a coordinate into the scaled space.
    #[inline]
    pub fn forward(self, x: f64) -> f64 {
        match self {
            Interp::Lin => x,
            Interp::Log => x.ln(),
            Interp::Sqrt => x.sqrt(),
        }
    }

    /// Map a scaled value back to a coordinate.
    #[inline]
    pub fn inverse(self, y: f64) -> f64 {
        match self {
            Interp::Lin => y,
            Interp::Log => y.exp(),
            Interp::Sqrt => y * y,
        }
    }

    fn tag(self) -> u8 {
        match self {
            Interp::Lin => 0,
            Interp::Log => 1,
            Interp::Sqrt => 2,
        }
    }
}

/// How the nodes of a [`MapAxis`] are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Nodes are bin edges (`nbin + 1` values).
    Edges,
    /// Nodes are bin centers (`nbin` values).
    Center,
}

/// A named, strictly increasing, non-spatial axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapAxis {
    name: String,
    nodes: Vec<f64>,
    node_type: NodeType,
    interp: Interp,
    unit: String,
}

impl MapAxis {
    /// Axis from bin edges.
    pub fn from_edges(edges: Vec<f64>, name: &str, unit: &str, interp: Interp) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::InvalidGeometry(format!(
                "axis '{}' needs at least two edges, got {}",
                name,
                edges.len()
            )));
        }
        Self::build(edges, NodeType::Edges, name, unit, interp)
    }

    /// Axis from node centers.
    pub fn from_nodes(nodes: Vec<f64>, name: &str, unit: &str, interp: Interp) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::InvalidGeometry(format!("axis '{}' has no nodes", name)));
        }
        Self::build(nodes, NodeType::Center, name, unit, interp)
    }

    /// Log-spaced energy axis with `nbin` bins between `emin` and `emax`.
    pub fn from_energy_bounds(emin: f64, emax: f64, nbin: usize, unit: &str, name: &str) -> Result<Self> {
        if nbin == 0 || !(emin > 0.0) || !(emax > emin) {
            return Err(Error::InvalidGeometry(format!(
                "invalid energy bounds [{}, {}] with {} bins",
                emin, emax, nbin
            )));
        }
        let (l0, l1) = (emin.ln(), emax.ln());
        let step = (l1 - l0) / nbin as f64;
        let mut edges: Vec<f64> = (0..=nbin).map(|i| (l0 + step * i as f64).exp()).collect();
        // pin the end points exactly
        edges[0] = emin;
        edges[nbin] = emax;
        Self::from_edges(edges, name, unit, Interp::Log)
    }

    fn build(nodes: Vec<f64>, node_type: NodeType, name: &str, unit: &str, interp: Interp) -> Result<Self> {
        if nodes.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidGeometry(format!("axis '{}' has non-finite nodes", name)));
        }
        if nodes.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::InvalidGeometry(format!(
                "axis '{}' nodes must be strictly increasing",
                name
            )));
        }
        match interp {
            Interp::Log if nodes[0] <= 0.0 => {
                return Err(Error::InvalidGeometry(format!(
                    "log-scaled axis '{}' requires positive nodes",
                    name
                )));
            }
            Interp::Sqrt if nodes[0] < 0.0 => {
                return Err(Error::InvalidGeometry(format!(
                    "sqrt-scaled axis '{}' requires non-negative nodes",
                    name
                )));
            }
            _ => {}
        }
        Ok(Self { name: name.to_string(), nodes, node_type, interp, unit: unit.to_string() })
    }

    /// Axis name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unit string.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Interpolation scale.
    pub fn interp(&self) -> Interp {
        self.interp
    }

    /// Node type.
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Raw nodes (edges or centers depending on [`NodeType`]).
    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    /// Copy with a new name.
    pub fn renamed(&self, name: &str) -> Self {
        Self { name: name.to_string(), ..self.clone() }
    }

    /// Number of bins.
    pub fn nbin(&self) -> usize {
        match self.node_type {
            NodeType::Edges => self.nodes.len() - 1,
            NodeType::Center => self.nodes.len(),
        }
    }

    /// Bin edges. For center axes these are the scaled midpoints between
    /// nodes, extrapolated by half a bin at both ends.
    pub fn edges(&self) -> Vec<f64> {
        match self.node_type {
            NodeType::Edges => self.nodes.clone(),
            NodeType::Center => {
                if self.nodes.len() == 1 {
                    return vec![self.nodes[0], self.nodes[0]];
                }
                (0..=self.nbin()).map(|i| self.pix_to_coord(i as f64 - 0.5)).collect()
            }
        }
    }

    /// Lower and upper bound of the axis.
    pub fn bounds(&self) -> (f64, f64) {
        let e = self.edges();
        (e[0], e[e.len() - 1])
    }

    /// Center of bin `i` (in the axis scale).
    pub fn center(&self, i: usize) -> f64 {
        match self.node_type {
            NodeType::Edges => {
                let s = self.interp;
                s.inverse(0.5 * (s.forward(self.nodes[i]) + s.forward(self.nodes[i + 1])))
            }
            NodeType::Center => self.nodes[i],
        }
    }

    /// All bin centers.
    pub fn centers(&self) -> Vec<f64> {
        (0..self.nbin()).map(|i| self.center(i)).collect()
    }

    /// Bin widths.
    pub fn bin_width(&self) -> Vec<f64> {
        self.edges().windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Pixel value of `nodes[0]`: `-0.5` for edges, `0` for centers.
    fn pix_offset(&self) -> f64 {
        match self.node_type {
            NodeType::Edges => -0.5,
            NodeType::Center => 0.0,
        }
    }

    /// Fractional pixel coordinate of `coord`, linearly extrapolated outside
    /// the axis range. NaN if `coord` is outside the scale's domain.
    pub fn coord_to_pix(&self, coord: f64) -> f64 {
        let n = self.nodes.len();
        if n == 1 {
            return 0.0;
        }
        let s = self.interp;
        let x = s.forward(coord);
        let i = self.nodes.partition_point(|&v| s.forward(v) <= x).saturating_sub(1).min(n - 2);
        let (a, b) = (s.forward(self.nodes[i]), s.forward(self.nodes[i + 1]));
        i as f64 + (x - a) / (b - a) + self.pix_offset()
    }

    /// Inverse of [`coord_to_pix`](Self::coord_to_pix).
    pub fn pix_to_coord(&self, pix: f64) -> f64 {
        let n = self.nodes.len();
        if n == 1 {
            return self.nodes[0];
        }
        let s = self.interp;
        let p = pix - self.pix_offset();
        let i = (p.floor().max(0.0) as usize).min(n - 2);
        let (a, b) = (s.forward(self.nodes[i]), s.forward(self.nodes[i + 1]));
        s.inverse(a + (p - i as f64) * (b - a))
    }

    /// Bin index containing `coord`, `None` outside the axis.
    ///
    /// Bins are half-open `[lo, hi)`: a coordinate exactly on an interior edge
    /// belongs to the upper bin.
    pub fn coord_to_idx(&self, coord: f64) -> Option<usize> {
        match self.node_type {
            NodeType::Edges => {
                let count = self.nodes.partition_point(|&e| e <= coord);
                if count >= 1 && count <= self.nbin() { Some(count - 1) } else { None }
            }
            NodeType::Center => {
                if self.nodes.len() == 1 {
                    return Some(0);
                }
                let pix = self.coord_to_pix(coord);
                let idx = (pix + 0.5).floor();
                if idx >= 0.0 && idx < self.nbin() as f64 { Some(idx as usize) } else { None }
            }
        }
    }

    /// Whether `coord` falls inside the axis.
    pub fn contains(&self, coord: f64) -> bool {
        self.coord_to_idx(coord).is_some()
    }

    /// Sub-axis covering bins `range`.
    pub fn slice(&self, range: Range<usize>) -> Result<Self> {
        if range.start >= range.end || range.end > self.nbin() {
            return Err(Error::Validation(format!(
                "slice {:?} out of range for axis '{}' with {} bins",
                range,
                self.name,
                self.nbin()
            )));
        }
        let nodes = match self.node_type {
            NodeType::Edges => self.nodes[range.start..=range.end].to_vec(),
            NodeType::Center => self.nodes[range].to_vec(),
        };
        Ok(Self { nodes, ..self.clone() })
    }

    /// Single-bin axis spanning the full range.
    pub fn squash(&self) -> Self {
        let (lo, hi) = self.bounds();
        Self { nodes: vec![lo, hi], node_type: NodeType::Edges, ..self.clone() }
    }

    /// Split every bin into `factor` bins (edge axes only).
    pub fn upsample(&self, factor: usize) -> Result<Self> {
        self.require_edges("upsample")?;
        if factor == 0 {
            return Err(Error::Validation("upsample factor must be >= 1".into()));
        }
        let s = self.interp;
        let mut nodes = Vec::with_capacity(self.nbin() * factor + 1);
        for w in self.nodes.windows(2) {
            let (a, b) = (s.forward(w[0]), s.forward(w[1]));
            for k in 0..factor {
                nodes.push(s.inverse(a + (b - a) * k as f64 / factor as f64));
            }
        }
        nodes.push(self.nodes[self.nodes.len() - 1]);
        Ok(Self { nodes, ..self.clone() })
    }

    /// Merge groups of `factor` bins (edge axes only; `nbin % factor == 0`).
    pub fn downsample(&self, factor: usize) -> Result<Self> {
        self.require_edges("downsample")?;
        if factor == 0 || self.nbin() % factor != 0 {
            return Err(Error::Validation(format!(
                "axis '{}' with {} bins cannot be downsampled by {}",
                self.name,
                self.nbin(),
                factor
            )));
        }
        let nodes = self.nodes.iter().step_by(factor).copied().collect();
        Ok(Self { nodes, ..self.clone() })
    }

    fn require_edges(&self, op: &str) -> Result<()> {
        if self.node_type != NodeType::Edges {
            return Err(Error::Validation(format!("{} requires an edge axis, '{}' has centers", op, self.name)));
        }
        Ok(())
    }

    /// For every edge of `coarse`, the index of the identical edge in `self`.
    ///
    /// Fails unless `coarse` edges are a subset of `self` edges; used to sum
    /// groups of bins when resampling a map along this axis.
    pub fn edge_indices_of(&self, coarse: &MapAxis) -> Result<Vec<usize>> {
        let fine = self.edges();
        coarse
            .edges()
            .iter()
            .map(|&e| {
                fine.iter().position(|&f| close(f, e)).ok_or_else(|| {
                    Error::GeometryMismatch(format!(
                        "edge {} of axis '{}' is not an edge of '{}'",
                        e, coarse.name, self.name
                    ))
                })
            })
            .collect()
    }

    /// Whether two axes have the same name, node type, and nodes.
    pub fn is_aligned(&self, other: &MapAxis) -> bool {
        self.name == other.name
            && self.node_type == other.node_type
            && self.nodes.len() == other.nodes.len()
            && self.nodes.iter().zip(&other.nodes).all(|(&a, &b)| close(a, b))
    }

    /// Feed the structural identity of the axis into a hasher.
    pub fn hash_into<H: Hasher>(&self, h: &mut H) {
        h.write(self.name.as_bytes());
        h.write_u8(matches!(self.node_type, NodeType::Edges) as u8);
        h.write_u8(self.interp.tag());
        for v in &self.nodes {
            h.write_u64(v.to_bits());
        }
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= ALIGN_RTOL * a.abs().max(b.abs()).max(f64::MIN_POSITIVE)
}
