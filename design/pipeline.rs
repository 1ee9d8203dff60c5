//! # Analysis Pipeline
//!
//! One-shot orchestration of the three shaping stages: pivot the event
//! table into a biomarker matrix, join it with the clinical covariates, and
//! assemble the model formula from the clinical template. The output pair is
//! exactly what a [`crate::fit::ModelFitter`] consumes. Every stage is a
//! pure transformation; a failed run leaves nothing behind.

use polars::prelude::{DataFrame, PolarsError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

use crate::data::{EventError, MutationEvent};
use crate::fit::FitterConfig;
use crate::formula::{
    AssembledFormula, DEFAULT_PLACEHOLDER, EmptyTermPolicy, FormulaError, FormulaTemplate,
    IdentifierQuoting,
};
use crate::join::{JoinError, JoinMode, join_covariates};
use crate::matrix::{Aggregator, MatrixError, build_matrix};

/// The complete configuration of one analysis run: aggregation policy, join
/// policy, formula-assembly policies, and the settings forwarded to the
/// external fitting engine. Serializable so a run can be reproduced from a
/// TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSpec {
    pub aggregator: Aggregator,
    pub join_mode: JoinMode,
    pub empty_terms: EmptyTermPolicy,
    pub quoting: IdentifierQuoting,
    /// Shared sample-identifier column name in both tables.
    pub sample_key: String,
    /// Token marking where biomarker terms are spliced into the template.
    pub placeholder: String,
    pub fitter: FitterConfig,
}

impl Default for AnalysisSpec {
    fn default() -> Self {
        Self {
            aggregator: Aggregator::Count,
            join_mode: JoinMode::Inner,
            empty_terms: EmptyTermPolicy::Fail,
            quoting: IdentifierQuoting::Backtick,
            sample_key: "sample_id".to_string(),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            fitter: FitterConfig::default(),
        }
    }
}

impl AnalysisSpec {
    /// Saves the spec to a human-readable TOML file.
    pub fn save(&self, path: &Path) -> Result<(), PrepareError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a spec from a TOML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, PrepareError> {
        let toml_string = fs::read_to_string(path)?;
        let spec = toml::from_str(&toml_string)?;
        Ok(spec)
    }
}

/// Everything the external fitting engine needs for one invocation.
#[derive(Debug, Clone)]
pub struct PreparedModel {
    pub frame: DataFrame,
    pub formula: AssembledFormula,
}

/// Umbrella error for a pipeline run; each stage's error converts into it.
#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("Event table error: {0}")]
    Event(#[from] EventError),
    #[error("Biomarker matrix error: {0}")]
    Matrix(#[from] MatrixError),
    #[error("Covariate join error: {0}")]
    Join(#[from] JoinError),
    #[error("Formula assembly error: {0}")]
    Formula(#[from] FormulaError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("Failed to read or write the analysis configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse the TOML analysis configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize the analysis configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Runs Builder → Joiner → Assembler and returns the `(frame, formula)`
/// pair for the fitting engine.
///
/// `template` is the clinical formula text containing the configured
/// placeholder token; `sample_universe` optionally forces rows for samples
/// without events (e.g. every sequenced sample in the cohort, mutated or
/// not).
pub fn prepare(
    events: &[MutationEvent],
    clinical: &DataFrame,
    template: &str,
    spec: &AnalysisSpec,
    sample_universe: Option<&[String]>,
) -> Result<PreparedModel, PrepareError> {
    log::info!("Building biomarker matrix from {} events", events.len());
    let matrix = build_matrix(events, spec.aggregator, sample_universe)?;
    log::info!(
        "Biomarker matrix: {} samples x {} biomarkers",
        matrix.n_samples(),
        matrix.n_biomarkers()
    );

    let biomarker_frame = matrix.to_data_frame(&spec.sample_key)?;
    let frame = join_covariates(
        &biomarker_frame,
        clinical,
        &spec.sample_key,
        spec.join_mode,
        spec.aggregator.fill_value(),
    )?;
    log::info!("Joined frame: {} rows x {} columns", frame.height(), frame.width());

    let parsed = FormulaTemplate::parse(template, &spec.placeholder)?;
    let formula = parsed.assemble(matrix.biomarker_names(), spec.empty_terms)?;
    log::info!("Assembled formula: {}", formula.render(spec.quoting));

    Ok(PreparedModel { frame, formula })
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::Column;

    fn clinical() -> DataFrame {
        DataFrame::new(vec![
            Column::new("sample_id".into(), vec!["s1", "s2"]),
            Column::new("age".into(), vec![61.0, 48.0]),
        ])
        .unwrap()
    }

    #[test]
    fn prepare_produces_frame_and_formula() {
        let events = vec![
            MutationEvent::new("s1", "TP53"),
            MutationEvent::new("s1", "TP53"),
            MutationEvent::new("s2", "KRAS"),
        ];
        let spec = AnalysisSpec::default();
        let prepared = prepare(
            &events,
            &clinical(),
            "relapse ~ age + __BIOMARKERS__",
            &spec,
            None,
        )
        .unwrap();
        assert_eq!(prepared.frame.height(), 2);
        assert_eq!(
            prepared.formula.to_string(),
            "relapse ~ age + TP53 + KRAS"
        );
    }

    #[test]
    fn prepare_surfaces_formula_misconfiguration_before_fitting() {
        let events = vec![MutationEvent::new("s1", "TP53")];
        let spec = AnalysisSpec::default();
        let err = prepare(&events, &clinical(), "relapse ~ age", &spec, None).unwrap_err();
        assert!(matches!(
            err,
            PrepareError::Formula(FormulaError::PlaceholderNotFound(1))
        ));
    }

    #[test]
    fn analysis_spec_defaults_are_explicit() {
        let spec = AnalysisSpec::default();
        assert_eq!(spec.sample_key, "sample_id");
        assert_eq!(spec.placeholder, DEFAULT_PLACEHOLDER);
        assert_eq!(spec.aggregator, Aggregator::Count);
        assert_eq!(spec.empty_terms, EmptyTermPolicy::Fail);
    }
}
