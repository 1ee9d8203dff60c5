//! # Covariate Joiner
//!
//! Merges the biomarker frame produced by the matrix builder with an
//! externally supplied clinical covariate frame on a shared sample key. Both
//! key columns are validated up front (present, no repeated sample ids) so
//! that an ambiguous join is refused before any downstream model-fitting
//! work is attempted.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Which sample ids survive the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinMode {
    /// Only sample ids present in both tables.
    Inner,
    /// Every clinical-table sample id; absent biomarker cells are filled
    /// with the aggregator's fill value.
    Left,
}

#[derive(Error, Debug)]
pub enum JoinError {
    #[error(
        "The join key column '{key}' was not found in the {table} table. Please check spelling and case."
    )]
    MissingKey { key: String, table: &'static str },
    #[error(
        "The {table} table repeats sample ids: {rows} rows but only {distinct} distinct keys. Deduplicate it before joining, the merge would be ambiguous."
    )]
    DuplicateKey {
        table: &'static str,
        rows: usize,
        distinct: usize,
    },
    #[error(
        "The column '{0}' appears in both tables. Rename one side before joining so no covariate is silently shadowed."
    )]
    ColumnCollision(String),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
}

/// Joins the biomarker frame with the clinical frame on `key`.
///
/// Returns a new frame; neither input is touched. `fill` is written into
/// biomarker cells of clinical samples that have no biomarker row (left
/// joins only — an inner join introduces no missing cells).
pub fn join_covariates(
    biomarkers: &DataFrame,
    clinical: &DataFrame,
    key: &str,
    mode: JoinMode,
    fill: f64,
) -> Result<DataFrame, JoinError> {
    check_key(biomarkers, key, "biomarker")?;
    check_key(clinical, key, "clinical")?;

    let clinical_columns: HashSet<String> = clinical
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    let biomarker_columns: Vec<String> = biomarkers
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .filter(|name| name != key)
        .collect();
    for name in &biomarker_columns {
        if clinical_columns.contains(name) {
            return Err(JoinError::ColumnCollision(name.clone()));
        }
    }

    // The clinical table is the left side: a left join keeps all of its
    // sample ids, per the contract.
    let join_type = match mode {
        JoinMode::Inner => JoinType::Inner,
        JoinMode::Left => JoinType::Left,
    };
    let mut joined = clinical.clone().lazy().join(
        biomarkers.clone().lazy(),
        [col(key)],
        [col(key)],
        JoinArgs::new(join_type),
    );
    if mode == JoinMode::Left && !biomarker_columns.is_empty() {
        let fill_exprs: Vec<Expr> = biomarker_columns
            .iter()
            .map(|name| col(name.as_str()).fill_null(lit(fill)))
            .collect();
        joined = joined.with_columns(fill_exprs);
    }
    let frame = joined.collect()?;

    log::debug!(
        "Joined {} clinical rows with {} biomarker rows into {} rows ({mode:?} join)",
        clinical.height(),
        biomarkers.height(),
        frame.height()
    );
    Ok(frame)
}

fn check_key(frame: &DataFrame, key: &str, table: &'static str) -> Result<(), JoinError> {
    if !frame.get_column_names().iter().any(|name| name.as_str() == key) {
        return Err(JoinError::MissingKey {
            key: key.to_string(),
            table,
        });
    }
    let distinct = frame.column(key)?.as_materialized_series().n_unique()?;
    if distinct < frame.height() {
        return Err(JoinError::DuplicateKey {
            table,
            rows: frame.height(),
            distinct,
        });
    }
    Ok(())
}
