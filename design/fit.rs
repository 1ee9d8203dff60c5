//! Boundary to the external model-fitting engine. The engine itself (MCMC
//! sampling, posterior handling) lives outside this crate and plugs in
//! through [`ModelFitter`].

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use crate::formula::AssembledFormula;

/// Sampler settings handed to the fitting engine. Parallelism is an explicit
/// per-run parameter here, never process-global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitterConfig {
    /// Worker processes or threads the engine may use for parallel chains.
    pub cores: usize,
    pub chains: usize,
    pub iterations: usize,
    /// Seed for reproducible sampling; `None` lets the engine choose.
    pub seed: Option<u64>,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            cores: 1,
            chains: 4,
            iterations: 2000,
            seed: None,
        }
    }
}

/// The regression engine consumes exactly what the pipeline produces: the
/// joined covariate frame and the assembled formula.
pub trait ModelFitter {
    type Fit;
    type Error: std::error::Error;

    fn fit(
        &mut self,
        frame: &DataFrame,
        formula: &AssembledFormula,
        config: &FitterConfig,
    ) -> Result<Self::Fit, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitter_config_defaults_to_a_single_core() {
        let config = FitterConfig::default();
        assert_eq!(config.cores, 1);
        assert_eq!(config.chains, 4);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn fitter_config_deserializes_with_partial_fields() {
        let config: FitterConfig = toml::from_str("cores = 8").unwrap();
        assert_eq!(config.cores, 8);
        assert_eq!(config.iterations, 2000);
    }
}
