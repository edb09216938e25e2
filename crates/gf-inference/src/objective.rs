//! The joint Cash statistic as a function of the free parameter factors.

use gf_core::Result;
use gf_core::traits::LikelihoodModel;
use gf_datasets::Datasets;
use gf_models::{Parameter, Parameters};

use crate::optimizer::ObjectiveFunction;

/// Summed statistic of `datasets` over the free parameters, in factor space
/// (`value / scale`).
///
/// Evaluating writes the factors into the shared parameters: this is the
/// only write path to parameter values during a fit.
pub struct DatasetsObjective<'a> {
    datasets: &'a Datasets,
    names: Vec<String>,
    params: Parameters,
    parallel: bool,
}

impl<'a> DatasetsObjective<'a> {
    /// Objective over the free parameters of `datasets`.
    pub fn new(datasets: &'a Datasets, parallel: bool) -> Self {
        let (names, params): (Vec<String>, Vec<Parameter>) =
            datasets.named_parameters().into_iter().filter(|(_, p)| p.is_free()).unzip();
        Self { datasets, names, params: Parameters::new(params), parallel }
    }

    /// The free parameters, in vector order.
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// The datasets.
    pub fn datasets(&self) -> &Datasets {
        self.datasets
    }
}

impl LikelihoodModel for DatasetsObjective<'_> {
    fn dim(&self) -> usize {
        self.params.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.params.bounds_factor()
    }

    fn parameter_init(&self) -> Vec<f64> {
        self.params.factors()
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        self.params.set_factors(params)?;
        self.datasets.stat_sum_with(self.parallel)
    }

    /// Chain rule `d C / d factor = scale * d C / d value`.
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.params.set_factors(params)?;
        let grad = self.datasets.stat_gradient_with(&self.params, self.parallel)?;
        Ok(grad.iter().zip(self.params.scales()).map(|(g, s)| g * s).collect())
    }
}

/// Any [`LikelihoodModel`] as an optimizer objective.
pub(crate) struct NllObjective<'a, M: LikelihoodModel>(pub(crate) &'a M);

impl<M: LikelihoodModel> ObjectiveFunction for NllObjective<'_, M> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.0.nll(params)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.0.grad_nll(params)
    }
}
