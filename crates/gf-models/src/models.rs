//! Named model collections.

use gf_core::{Error, Result};

use crate::parameter::Parameter;
use crate::parameters::Parameters;
use crate::sky_model::{FoVBackgroundModel, SkyModel};

/// Sky models and background models with unique names.
#[derive(Debug, Clone, Default)]
pub struct Models {
    sky_models: Vec<SkyModel>,
    background_models: Vec<FoVBackgroundModel>,
}

impl Models {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if self.names().iter().any(|n| n == name) {
            return Err(Error::Validation(format!("duplicate model name '{}'", name)));
        }
        Ok(())
    }

    /// Add a source model.
    pub fn push(&mut self, model: SkyModel) -> Result<()> {
        self.check_name(model.name())?;
        self.sky_models.push(model);
        Ok(())
    }

    /// Add a background model.
    pub fn push_background(&mut self, model: FoVBackgroundModel) -> Result<()> {
        self.check_name(&model.name())?;
        self.background_models.push(model);
        Ok(())
    }

    /// Builder form of [`Models::push`].
    pub fn with(mut self, model: SkyModel) -> Result<Self> {
        self.push(model)?;
        Ok(self)
    }

    /// Builder form of [`Models::push_background`].
    pub fn with_background(mut self, model: FoVBackgroundModel) -> Result<Self> {
        self.push_background(model)?;
        Ok(self)
    }

    /// All model names, sources first.
    pub fn names(&self) -> Vec<String> {
        self.sky_models
            .iter()
            .map(|m| m.name().to_string())
            .chain(self.background_models.iter().map(|m| m.name()))
            .collect()
    }

    /// Number of models of both kinds.
    pub fn len(&self) -> usize {
        self.sky_models.len() + self.background_models.len()
    }

    /// Whether empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Source models.
    pub fn sky_models(&self) -> &[SkyModel] {
        &self.sky_models
    }

    /// Background models.
    pub fn background_models(&self) -> &[FoVBackgroundModel] {
        &self.background_models
    }

    /// Source model called `name`.
    pub fn get(&self, name: &str) -> Option<&SkyModel> {
        self.sky_models.iter().find(|m| m.name() == name)
    }

    /// Parameters of the model called `name` (source or background).
    pub fn model_parameters(&self, name: &str) -> Result<Parameters> {
        if let Some(m) = self.get(name) {
            return Ok(m.parameters());
        }
        self.background_models
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.parameters())
            .ok_or_else(|| Error::Validation(format!("no model named '{}'", name)))
    }

    /// Parameter `param` of model `model`.
    pub fn parameter(&self, model: &str, param: &str) -> Result<Parameter> {
        self.model_parameters(model)?
            .get(param)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("model '{}' has no parameter '{}'", model, param)))
    }

    /// Every parameter once, in model order.
    pub fn parameters(&self) -> Parameters {
        let mut out = Parameters::default();
        for m in &self.sky_models {
            out.extend(m.parameters().iter().cloned());
        }
        for m in &self.background_models {
            out.extend(m.parameters().iter().cloned());
        }
        out
    }

    /// Tie `model_a.param_a` to `model_b.param_b`: from now on the former
    /// mirrors the latter and drops out of the free parameters.
    pub fn link(&self, model_a: &str, param_a: &str, model_b: &str, param_b: &str) -> Result<()> {
        let a = self.parameter(model_a, param_a)?;
        let b = self.parameter(model_b, param_b)?;
        a.link_to(&b)?;
        log::debug!("linked {}.{} -> {}.{}", model_a, param_a, model_b, param_b);
        Ok(())
    }

    /// Source models that contribute to `dataset`.
    pub fn select_for<'a>(&'a self, dataset: &'a str) -> impl Iterator<Item = &'a SkyModel> + 'a {
        self.sky_models.iter().filter(move |m| m.applies_to(dataset))
    }

    /// Background model of `dataset`, if any.
    pub fn background_for(&self, dataset: &str) -> Option<&FoVBackgroundModel> {
        self.background_models.iter().find(|m| m.dataset_name() == dataset)
    }
}
