//! # Event Table Loading and Validation Module
//!
//! This module is the entry point for externally supplied mutation event
//! data. Upstream loaders (remote repositories, files, databases) hand over a
//! long-format `polars` DataFrame with one row per observed event; this
//! module validates that frame and converts it into the clean
//! `MutationEvent` records consumed by the matrix builder.
//!
//! - Caller-chosen columns: unlike clinical covariates, event tables arrive
//!   in many shapes, so the sample, biomarker, and value column names are
//!   parameters rather than a fixed schema.
//! - User-centric errors: failures are assumed to be user-input errors. The
//!   `EventError` enum is designed to provide clear, actionable feedback.

use polars::prelude::*;
use thiserror::Error;

/// One long-format event record: a biomarker observed in a sample, with an
/// optional numeric payload. Presence-only records carry a value of `1.0`.
///
/// Several events may share the same `(sample_id, biomarker_id)` pair (for
/// example, multiple distinct mutations in one gene for one sample); the
/// matrix builder aggregates them, it never treats them as an error.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    pub sample_id: String,
    pub biomarker_id: String,
    pub value: f64,
}

impl MutationEvent {
    /// A presence-only event with the default value of `1.0`.
    pub fn new(sample_id: impl Into<String>, biomarker_id: impl Into<String>) -> Self {
        Self::with_value(sample_id, biomarker_id, 1.0)
    }

    pub fn with_value(
        sample_id: impl Into<String>,
        biomarker_id: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            sample_id: sample_id.into(),
            biomarker_id: biomarker_id.into(),
            value,
        }
    }
}

/// A comprehensive error type for event-table validation failures.
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error(
        "The required column '{0}' was not found in the event table. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Row {row} of the event table has a missing '{column}'. Every event needs a sample id and a biomarker id."
    )]
    MalformedEvent { row: usize, column: String },
}

/// Validates a long-format event frame and converts it into `MutationEvent`
/// records.
///
/// `value_col` is optional: when absent, every event is treated as a
/// presence flag with value `1.0`. A null in the value column also falls
/// back to `1.0`; nulls in the sample or biomarker column are rejected as
/// malformed events.
pub fn events_from_frame(
    frame: &DataFrame,
    sample_col: &str,
    biomarker_col: &str,
    value_col: Option<&str>,
) -> Result<Vec<MutationEvent>, EventError> {
    let samples = extract_string_column(frame, sample_col)?;
    let biomarkers = extract_string_column(frame, biomarker_col)?;
    let values = match value_col {
        Some(name) => Some(extract_optional_numeric_column(frame, name)?),
        None => None,
    };

    let mut events = Vec::with_capacity(frame.height());
    for row in 0..frame.height() {
        let sample_id = samples[row].clone().ok_or_else(|| EventError::MalformedEvent {
            row,
            column: sample_col.to_string(),
        })?;
        let biomarker_id = biomarkers[row]
            .clone()
            .ok_or_else(|| EventError::MalformedEvent {
                row,
                column: biomarker_col.to_string(),
            })?;
        let value = values.as_ref().and_then(|v| v[row]).unwrap_or(1.0);
        events.push(MutationEvent {
            sample_id,
            biomarker_id,
            value,
        });
    }

    log::debug!(
        "Validated {} events from the long-format table ({} columns)",
        events.len(),
        frame.width()
    );
    Ok(events)
}

fn extract_string_column(frame: &DataFrame, name: &str) -> Result<Vec<Option<String>>, EventError> {
    let column = frame
        .column(name)
        .map_err(|_| EventError::ColumnNotFound(name.to_string()))?;
    let casted = column.cast(&DataType::String).map_err(|_| EventError::ColumnWrongType {
        column_name: name.to_string(),
        expected_type: "string",
        found_type: format!("{:?}", column.dtype()),
    })?;
    let chunked = casted.str()?.rechunk();
    let mut out = Vec::with_capacity(chunked.len());
    for entry in chunked.into_iter() {
        // An empty string is as useless as a null for identifying a sample.
        out.push(entry.filter(|s| !s.is_empty()).map(str::to_string));
    }
    Ok(out)
}

fn extract_optional_numeric_column(
    frame: &DataFrame,
    name: &str,
) -> Result<Vec<Option<f64>>, EventError> {
    let column = frame
        .column(name)
        .map_err(|_| EventError::ColumnNotFound(name.to_string()))?;
    let casted = match column.cast(&DataType::Float64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(EventError::ColumnWrongType {
                column_name: name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", column.dtype()),
            });
        }
    };
    // A non-strict cast turns unparsable entries into nulls; any null the
    // original column did not already have means non-numeric data.
    if casted.null_count() > column.null_count() {
        return Err(EventError::ColumnWrongType {
            column_name: name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", column.dtype()),
        });
    }
    let chunked = casted.f64()?.rechunk();
    Ok(chunked.into_iter().collect())
}
