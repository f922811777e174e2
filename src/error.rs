//! Error types for ONNX export and verification

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for export operations
pub type Result<T> = std::result::Result<T, ExportError>;

/// Pipeline stage that detected a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Argument and configuration checks before any work
    Validation,
    /// Lowering the model into an ONNX graph
    Conversion,
    /// Persisting the artifact
    Write,
    /// Reading and decoding the artifact
    Load,
    /// Header and metadata checks
    Schema,
    /// Building an executable session
    Session,
    /// Running the sample batch
    Inference,
}

/// Main error type for the exporter
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Empty feature set: at least one feature name is required")]
    EmptyFeatureSet,

    #[error("Feature count mismatch: expected {expected}, got {actual}")]
    FeatureCountMismatch { expected: usize, actual: usize },

    #[error("Conversion unsupported: {0}")]
    ConversionUnsupported(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Failed to write artifact to {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load artifact from {path}: {reason}")]
    LoadFailure { path: PathBuf, reason: String },

    #[error("Invalid ONNX model: {0}")]
    SchemaInvalid(String),

    #[error("Session error: {0}")]
    SessionFailure(String),

    #[error("Inference error: {0}")]
    InferenceFailure(String),

    #[error("Parity check failed: max abs diff {max_abs_diff} exceeds tolerance {tolerance}")]
    ParityMismatch { max_abs_diff: f64, tolerance: f64 },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ExportError {
    /// Stage of the export-then-verify pipeline this error belongs to
    pub fn stage(&self) -> Stage {
        match self {
            ExportError::EmptyFeatureSet
            | ExportError::FeatureCountMismatch { .. }
            | ExportError::ConfigError(_)
            | ExportError::IoError(_)
            | ExportError::SerializationError(_) => Stage::Validation,
            ExportError::ConversionUnsupported(_) | ExportError::InvalidModel(_) => {
                Stage::Conversion
            }
            ExportError::WriteFailure { .. } => Stage::Write,
            ExportError::LoadFailure { .. } => Stage::Load,
            ExportError::SchemaInvalid(_) => Stage::Schema,
            ExportError::SessionFailure(_) => Stage::Session,
            ExportError::InferenceFailure(_) | ExportError::ParityMismatch { .. } => {
                Stage::Inference
            }
        }
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for ExportError {
    fn from(err: ndarray::ShapeError) -> Self {
        ExportError::InferenceFailure(format!("shape error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExportError::FeatureCountMismatch { expected: 16, actual: 15 };
        assert_eq!(err.to_string(), "Feature count mismatch: expected 16, got 15");
    }

    #[test]
    fn test_schema_error_reads_as_invalid_model() {
        let err = ExportError::SchemaInvalid("graph is missing".to_string());
        assert!(err.to_string().starts_with("Invalid ONNX model"));
        assert_eq!(err.stage(), Stage::Schema);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ExportError = io_err.into();
        assert!(matches!(err, ExportError::IoError(_)));
    }
}
