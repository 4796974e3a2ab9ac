//! Hard gate between staging and publishing: a staged artifact whose
//! columns deviate from the expected contract must never reach downstream
//! consumers.

use std::fs::File;
use std::path::Path;

use polars::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to open staged artifact {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to read staged artifact {path}: {source}")]
    Read { path: String, source: PolarsError },
    #[error("column contract mismatch: expected [{expected}], found [{found}]")]
    Mismatch { expected: String, found: String },
}

/// Asserts exact column-set-and-order equality between the frame and the
/// expected contract. Any permutation, omission or extra column fails.
pub fn validate_columns(df: &DataFrame, expected: &[&str]) -> Result<(), SchemaError> {
    let found: Vec<&str> = df
        .get_column_names()
        .iter()
        .map(|name| name.as_str())
        .collect();
    if found == expected {
        Ok(())
    } else {
        Err(SchemaError::Mismatch {
            expected: expected.join(", "),
            found: found.join(", "),
        })
    }
}

/// Reads the artifact back from disk and validates its column contract.
/// Reading the persisted bytes, rather than the in-memory frame that
/// produced them, is what makes this a real gate on the artifact itself.
pub fn validate_artifact(path: &Path, expected: &[&str]) -> Result<(), SchemaError> {
    let file = File::open(path).map_err(|source| SchemaError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|source| SchemaError::Read {
            path: path.display().to_string(),
            source,
        })?;
    validate_columns(&df, expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CANONICAL_COLUMNS;

    fn frame(columns: &[&str]) -> DataFrame {
        let cols: Vec<Column> = columns
            .iter()
            .map(|name| Series::new((*name).into(), vec!["x"]).into())
            .collect();
        DataFrame::new(cols).expect("build frame")
    }

    #[test]
    fn exact_contract_passes() {
        let df = frame(&CANONICAL_COLUMNS);
        assert!(validate_columns(&df, &CANONICAL_COLUMNS).is_ok());
    }

    #[test]
    fn permutation_is_rejected() {
        let mut permuted = CANONICAL_COLUMNS;
        permuted.swap(0, 2);
        let df = frame(&permuted);
        assert!(matches!(
            validate_columns(&df, &CANONICAL_COLUMNS),
            Err(SchemaError::Mismatch { .. })
        ));
    }

    #[test]
    fn omission_is_rejected() {
        let df = frame(&CANONICAL_COLUMNS[..7]);
        assert!(matches!(
            validate_columns(&df, &CANONICAL_COLUMNS),
            Err(SchemaError::Mismatch { .. })
        ));
    }

    #[test]
    fn extra_column_is_rejected() {
        let mut with_extra: Vec<&str> = CANONICAL_COLUMNS.to_vec();
        with_extra.push("debug_flag");
        let df = frame(&with_extra);
        assert!(matches!(
            validate_columns(&df, &CANONICAL_COLUMNS),
            Err(SchemaError::Mismatch { .. })
        ));
    }

    #[test]
    fn missing_artifact_is_an_open_error() {
        let err = validate_artifact(Path::new("no/such/artifact.parquet"), &CANONICAL_COLUMNS)
            .expect_err("should fail");
        assert!(matches!(err, SchemaError::Open { .. }));
    }
}
