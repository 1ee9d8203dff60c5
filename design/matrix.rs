//! # Biomarker Matrix Builder
//!
//! Pivots long-format mutation events into a dense per-sample covariate
//! matrix: one row per sample, one column per distinct biomarker, each cell
//! the result of applying the configured [`Aggregator`] to the full multiset
//! of event values for that `(sample, biomarker)` pair.
//!
//! The builder guarantees that its output is independent of the order of the
//! input records: events are grouped by cell, each group's value multiset is
//! sorted under the IEEE total order, and only then reduced. Even
//! floating-point summation is therefore bit-identical under any permutation
//! of the event table.

use ahash::AHashMap;
use ndarray::{Array2, ArrayView2};
use polars::prelude::{Column, DataFrame, PolarsError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::MutationEvent;

/// Reduction policy applied to the multiset of event values in one cell.
///
/// Every variant is insensitive to the order of its inputs, and every
/// variant's fill value (the cell content for a pair with no events) is
/// `0.0`, meaning absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregator {
    /// Number of events for the pair.
    Count,
    /// Sum of event values.
    Sum,
    /// Largest event value.
    Max,
    /// `1.0` if any event exists for the pair.
    Presence,
    /// Number of distinct event values (e.g. distinct mutation-effect codes).
    DistinctCount,
}

impl Aggregator {
    /// Reduces one cell's value multiset. `values` must be sorted ascending;
    /// the builder sorts each group before calling this.
    pub fn reduce(&self, values: &[f64]) -> f64 {
        match self {
            Aggregator::Count => values.len() as f64,
            Aggregator::Sum => values.iter().sum(),
            Aggregator::Max => values.last().copied().unwrap_or_else(|| self.fill_value()),
            Aggregator::Presence => {
                if values.is_empty() {
                    self.fill_value()
                } else {
                    1.0
                }
            }
            Aggregator::DistinctCount => {
                let mut distinct = 0usize;
                let mut prev = None;
                for &v in values {
                    // Equal values are adjacent in the sorted multiset.
                    if prev != Some(v) {
                        distinct += 1;
                    }
                    prev = Some(v);
                }
                distinct as f64
            }
        }
    }

    /// Cell content for `(sample, biomarker)` pairs with no events.
    pub fn fill_value(&self) -> f64 {
        0.0
    }
}

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error(
        "Event at position {index} has an empty '{field}'. Every event needs a sample id and a biomarker id."
    )]
    MalformedEvent { index: usize, field: &'static str },
    #[error(
        "Event at position {index} carries a non-finite value (NaN or Infinity). This tool requires all event values to be finite."
    )]
    NonFiniteValue { index: usize },
}

/// The dense pivot of an event table.
///
/// Row order is the sample-universe order (when one was supplied) followed by
/// first appearance in the event table; column order is first appearance.
/// Both are deterministic given deterministic input order. Biomarker names
/// are preserved exactly as they appeared in the events, punctuation and all:
/// delimiting names for a model formula is the assembler's concern.
#[derive(Debug, Clone, PartialEq)]
pub struct BiomarkerMatrix {
    sample_ids: Vec<String>,
    biomarker_names: Vec<String>,
    values: Array2<f64>,
}

impl BiomarkerMatrix {
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn n_biomarkers(&self) -> usize {
        self.biomarker_names.len()
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Biomarker names in column order. This is the order the formula
    /// assembler must use for reproducible term lists.
    pub fn biomarker_names(&self) -> &[String] {
        &self.biomarker_names
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// Looks up one cell by sample and biomarker name.
    pub fn value(&self, sample_id: &str, biomarker_id: &str) -> Option<f64> {
        let row = self.sample_ids.iter().position(|s| s == sample_id)?;
        let col = self.biomarker_names.iter().position(|b| b == biomarker_id)?;
        Some(self.values[[row, col]])
    }

    /// Exports the matrix as a DataFrame for joining with clinical
    /// covariates: the sample-key column plus one `Float64` column per
    /// biomarker.
    pub fn to_data_frame(&self, key: &str) -> Result<DataFrame, PolarsError> {
        let mut columns = Vec::with_capacity(self.biomarker_names.len() + 1);
        columns.push(Column::new(key.into(), self.sample_ids.clone()));
        for (col, name) in self.biomarker_names.iter().enumerate() {
            columns.push(Column::new(name.as_str().into(), self.values.column(col).to_vec()));
        }
        DataFrame::new(columns)
    }
}

/// Pivots `events` into a [`BiomarkerMatrix`] under the given aggregation
/// policy.
///
/// `sample_universe` lists sample ids that must appear as rows even when
/// they have no events (their cells hold the aggregator's fill value).
/// Samples observed in `events` but absent from the universe are appended
/// after it rather than dropped.
pub fn build_matrix(
    events: &[MutationEvent],
    aggregator: Aggregator,
    sample_universe: Option<&[String]>,
) -> Result<BiomarkerMatrix, MatrixError> {
    let mut sample_ids: Vec<String> = Vec::new();
    let mut sample_index: AHashMap<String, usize> = AHashMap::new();
    if let Some(universe) = sample_universe {
        for id in universe {
            sample_index.entry(id.clone()).or_insert_with(|| {
                sample_ids.push(id.clone());
                sample_ids.len() - 1
            });
        }
    }

    let mut biomarker_names: Vec<String> = Vec::new();
    let mut biomarker_index: AHashMap<String, usize> = AHashMap::new();
    let mut groups: AHashMap<(usize, usize), Vec<f64>> = AHashMap::new();

    for (index, event) in events.iter().enumerate() {
        if event.sample_id.is_empty() {
            return Err(MatrixError::MalformedEvent {
                index,
                field: "sample_id",
            });
        }
        if event.biomarker_id.is_empty() {
            return Err(MatrixError::MalformedEvent {
                index,
                field: "biomarker_id",
            });
        }
        if !event.value.is_finite() {
            return Err(MatrixError::NonFiniteValue { index });
        }

        let row = *sample_index.entry(event.sample_id.clone()).or_insert_with(|| {
            sample_ids.push(event.sample_id.clone());
            sample_ids.len() - 1
        });
        let col = *biomarker_index
            .entry(event.biomarker_id.clone())
            .or_insert_with(|| {
                biomarker_names.push(event.biomarker_id.clone());
                biomarker_names.len() - 1
            });
        groups.entry((row, col)).or_default().push(event.value);
    }

    let mut values = Array2::from_elem(
        (sample_ids.len(), biomarker_names.len()),
        aggregator.fill_value(),
    );

    // Groups are disjoint cells, so the reduction order across groups is
    // irrelevant; within a group the sorted multiset makes the reduction
    // permutation-invariant.
    let reduced: Vec<(usize, usize, f64)> = groups
        .into_iter()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|((row, col), mut cell)| {
            cell.sort_by(f64::total_cmp);
            (row, col, aggregator.reduce(&cell))
        })
        .collect();
    for (row, col, value) in reduced {
        values[[row, col]] = value;
    }

    log::debug!(
        "Pivoted {} events into a {} x {} biomarker matrix",
        events.len(),
        sample_ids.len(),
        biomarker_names.len()
    );

    Ok(BiomarkerMatrix {
        sample_ids,
        biomarker_names,
        values,
    })
}
