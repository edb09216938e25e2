//! Joint likelihood over several datasets.

use gf_core::{Error, Result};
use gf_models::{Models, Parameter, Parameters};
use rayon::prelude::*;

use crate::fd;
use crate::map_dataset::{DatasetInfo, MapDataset};

/// Datasets with unique names whose statistics add up.
#[derive(Debug, Default)]
pub struct Datasets {
    items: Vec<MapDataset>,
    parallel: bool,
}

impl Datasets {
    /// Collection from `datasets`; names must be unique.
    pub fn new(datasets: Vec<MapDataset>) -> Result<Self> {
        let mut out = Self::default();
        for d in datasets {
            out.push(d)?;
        }
        Ok(out)
    }

    /// Add a dataset.
    pub fn push(&mut self, dataset: MapDataset) -> Result<()> {
        if self.items.iter().any(|d| d.name() == dataset.name()) {
            return Err(Error::Validation(format!("duplicate dataset name '{}'", dataset.name())));
        }
        self.items.push(dataset);
        Ok(())
    }

    /// Builder: evaluate datasets on the rayon pool.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Toggle parallel evaluation.
    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    /// Whether datasets are evaluated in parallel.
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Number of datasets.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|d| d.name()).collect()
    }

    /// Dataset called `name`.
    pub fn get(&self, name: &str) -> Option<&MapDataset> {
        self.items.iter().find(|d| d.name() == name)
    }

    /// Iterate.
    pub fn iter(&self) -> std::slice::Iter<'_, MapDataset> {
        self.items.iter()
    }

    /// Bind `models` to every dataset.
    pub fn set_models(&mut self, models: &Models) {
        for d in &mut self.items {
            d.set_models(models);
        }
    }

    /// Parameters of every dataset, once.
    pub fn parameters(&self) -> Parameters {
        let mut out = Parameters::default();
        for d in &self.items {
            out.extend(d.parameters().iter().cloned());
        }
        out
    }

    /// Parameters of every dataset, once, with `<model>.<parameter>` names.
    pub fn named_parameters(&self) -> Vec<(String, Parameter)> {
        let mut out: Vec<(String, Parameter)> = Vec::new();
        for d in &self.items {
            for (name, p) in d.named_parameters() {
                if !out.iter().any(|(_, q)| q.ptr_eq(&p)) {
                    out.push((name, p));
                }
            }
        }
        out
    }

    /// Sum of the per-dataset statistics.
    pub fn stat_sum(&self) -> Result<f64> {
        self.stat_sum_with(self.parallel)
    }

    /// [`Datasets::stat_sum`] with an explicit parallelism choice.
    pub fn stat_sum_with(&self, parallel: bool) -> Result<f64> {
        if parallel {
            self.items.par_iter().map(|d| d.stat_sum()).try_reduce(|| 0.0, |a, b| Ok(a + b))
        } else {
            self.items.iter().map(|d| d.stat_sum()).sum()
        }
    }

    /// Gradient of [`Datasets::stat_sum`] with respect to `params`.
    ///
    /// Analytic contributions are summed per dataset. Parameters that need
    /// finite differences in any dataset are differentiated on the joint
    /// statistic, one after the other, since each step writes the shared
    /// parameter value.
    pub fn stat_gradient(&self, params: &Parameters) -> Result<Vec<f64>> {
        self.stat_gradient_with(params, self.parallel)
    }

    /// [`Datasets::stat_gradient`] with an explicit parallelism choice.
    pub fn stat_gradient_with(&self, params: &Parameters, parallel: bool) -> Result<Vec<f64>> {
        let numeric: Vec<bool> = params.iter().map(|p| self.items.iter().any(|d| d.requires_numeric(p))).collect();
        let analytic: Vec<_> = params.iter().zip(&numeric).filter(|(_, n)| !**n).map(|(p, _)| p.clone()).collect();

        let per_dataset = |d: &MapDataset| d.stat_gradient_analytic(&analytic);
        let partials: Vec<Vec<f64>> = if parallel {
            self.items.par_iter().map(per_dataset).collect::<Result<_>>()?
        } else {
            self.items.iter().map(per_dataset).collect::<Result<_>>()?
        };
        let mut analytic_grad = (0..analytic.len()).map(|i| partials.iter().map(|g| g[i]).sum::<f64>());

        params
            .iter()
            .zip(&numeric)
            .map(|(p, &n)| {
                if n {
                    fd::derivative(p, || self.stat_sum_with(parallel))
                } else {
                    Ok(analytic_grad.next().unwrap_or(0.0))
                }
            })
            .collect()
    }

    /// Per-dataset summaries.
    pub fn info(&self) -> Result<Vec<DatasetInfo>> {
        self.items.iter().map(|d| d.info()).collect()
    }

    /// Stack every dataset into a copy of the first one, renamed `name`.
    /// Stacking unbinds the models, see [`MapDataset::stack`].
    pub fn stack_reduce(&self, name: &str) -> Result<MapDataset> {
        let (first, rest) =
            self.items.split_first().ok_or_else(|| Error::Validation("cannot stack an empty collection".into()))?;
        let mut stacked = first.copy(first.name())?;
        for d in rest {
            stacked.stack(d)?;
        }
        log::info!("stacked {} datasets into '{}'", self.items.len(), name);
        Ok(stacked.renamed(name))
    }
}

impl<'a> IntoIterator for &'a Datasets {
    type Item = &'a MapDataset;
    type IntoIter = std::slice::Iter<'a, MapDataset>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
