//! Error types for the trial feature pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, FeatureError>;

/// Main error type for the feature pipeline
#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Column not found: {0}")]
    FeatureNotFound(String),

    #[error("Field `{field}` used by stage `{stage}` is not declared in the schema")]
    UnknownField { stage: String, field: String },

    #[error("Missing mandatory fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Duplicate output column: {0}")]
    DuplicateColumn(String),

    #[error("Branch `{branch}` changed row count: expected {expected}, got {actual}")]
    RowCountMismatch {
        branch: String,
        expected: usize,
        actual: usize,
    },

    #[error("Branch `{branch}` produced columns that differ from its declared outputs")]
    UndeclaredOutput { branch: String },

    #[error("Stage `{0}` is not fitted")]
    NotFitted(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("No fallback statistic available for `{metric}` in stage `{stage}`")]
    FallbackUnavailable { stage: String, metric: String },

    #[error("Column `{0}` is not numeric")]
    NonNumericColumn(String),

    #[error("Row-altering stage `{0}` is not allowed inside a union")]
    RowAlteringInUnion(String),
}

impl FeatureError {
    /// Errors caused by the caller's input rather than the pipeline itself.
    pub fn is_client_error(&self) -> bool {
        matches!(self, FeatureError::MissingFields(_))
    }
}

impl From<polars::error::PolarsError> for FeatureError {
    fn from(err: polars::error::PolarsError) -> Self {
        FeatureError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for FeatureError {
    fn from(err: serde_json::Error) -> Self {
        FeatureError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for FeatureError {
    fn from(err: ndarray::ShapeError) -> Self {
        FeatureError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FeatureError::DataError("test error".to_string());
        assert_eq!(err.to_string(), "Data error: test error");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FeatureError = io_err.into();
        assert!(matches!(err, FeatureError::IoError(_)));
    }

    #[test]
    fn test_missing_fields_is_client_error() {
        let err = FeatureError::MissingFields(vec!["Phase".into(), "Condition".into()]);
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "Missing mandatory fields: Phase, Condition");
        assert!(!FeatureError::NotFitted("encoder".into()).is_client_error());
    }
}
