use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the normalization pipeline.
///
/// Every variant except `InvalidGeometry` aborts the run. `InvalidGeometry`
/// describes a single record that the reconciler drops and counts.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required input or intermediate file is absent.
    #[error("Required artifact not found: {}", .path.display())]
    MissingArtifact { path: PathBuf },

    /// None of the candidate column names for a required field exist.
    #[error(
        "No column found for {field}: tried [{}], dataset has [{}]",
        .candidates.join(", "),
        .available.join(", ")
    )]
    SchemaMismatch {
        field: String,
        candidates: Vec<String>,
        available: Vec<String>,
    },

    /// The regional filter kept nothing.
    #[error(
        "Regional filter kept no {dataset}: allowed prefixes [{}], sample of codes seen [{}]",
        .allowed.join(", "),
        .sample.join(", ")
    )]
    EmptyFilterResult {
        dataset: String,
        allowed: Vec<String>,
        sample: Vec<String>,
    },

    /// A record has missing or non-finite coordinates.
    #[error("Invalid geometry for record {index}: {reason}")]
    InvalidGeometry { index: usize, reason: String },

    /// PROJ could not build or apply the transformation.
    #[error("Cannot reproject from EPSG:{from} to EPSG:{to}: {reason}")]
    ReprojectionFailure { from: i32, to: i32, reason: String },

    /// The file extension is not one the loaders understand.
    #[error("Unsupported dataset format: {}", .path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// `false` only for errors handled by excluding a record.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::InvalidGeometry { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mismatch_message_lists_candidates_and_columns() {
        let err = PipelineError::SchemaMismatch {
            field: "zone code".to_string(),
            candidates: vec!["code_iris".to_string(), "CODE_IRIS".to_string()],
            available: vec!["foo".to_string(), "bar".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("code_iris, CODE_IRIS"));
        assert!(message.contains("foo, bar"));
    }

    #[test]
    fn test_only_invalid_geometry_is_recoverable() {
        let invalid = PipelineError::InvalidGeometry {
            index: 3,
            reason: "missing x".to_string(),
        };
        assert!(!invalid.is_fatal());

        let missing = PipelineError::MissingArtifact {
            path: PathBuf::from("data/bpe.parquet"),
        };
        assert!(missing.is_fatal());
        assert!(missing.to_string().contains("data/bpe.parquet"));
    }
}
