//! Evaluation settings shared by every prediction of a dataset.

use std::hash::Hasher;

use gf_core::Result;
use gf_models::DEFAULT_INTEGRAL_STEPS;
use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

/// How model predictions are computed on a dataset geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Sub-pixels per axis (WCS) or `2^k` children (HEALPix) when
    /// integrating extended spatial models.
    pub oversample: usize,
    /// PSF kernel truncation radius in degrees.
    pub psf_max_radius: f64,
    /// Sub-sampling factor used to build PSF kernels.
    pub psf_oversample: usize,
    /// Log-Simpson steps per true-energy bin.
    pub integral_steps: usize,
    /// Reuse predictions while parameters are unchanged.
    pub use_cache: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            oversample: 2,
            psf_max_radius: 0.5,
            psf_oversample: 4,
            integral_steps: DEFAULT_INTEGRAL_STEPS,
            use_cache: true,
        }
    }
}

impl EvaluationConfig {
    /// Parse from JSON; missing keys take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Hash of every setting that changes a prediction.
    pub fn fingerprint(&self) -> u64 {
        let mut h = XxHash64::with_seed(0);
        h.write_usize(self.oversample);
        h.write_u64(self.psf_max_radius.to_bits());
        h.write_usize(self.psf_oversample);
        h.write_usize(self.integral_steps);
        h.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let c = EvaluationConfig::from_json_str(r#"{"oversample": 4}"#).unwrap();
        assert_eq!(c.oversample, 4);
        assert_eq!(c.integral_steps, DEFAULT_INTEGRAL_STEPS);
        assert!(c.use_cache);
        assert_ne!(c.fingerprint(), EvaluationConfig::default().fingerprint());
    }
}
