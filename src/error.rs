//! Typed failures raised by the feature, sampling and training stages.
//!
//! Data sparsity is not an error: an empty stratum/length/dataset
//! partition is reported as an empty result, never as an error.

use thiserror::Error;

/// Errors that abort a row, a dataset or a whole training run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A fixed-shape input had the wrong shape (Kozak window, parallel arrays,
    /// fragment indices outside the parent sequence).
    #[error("Input shape error: {0}")]
    InputShape(String),

    /// A training stage cannot start with the given data or settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A stratum name that is not part of the fixed enumeration.
    #[error("Unknown stratum: {0}")]
    UnknownStratum(String),

    /// A table field that could not be parsed.
    #[error("Parse error in column '{column}': {message}")]
    Parse { column: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn input_shape(message: impl Into<String>) -> Self {
        PipelineError::InputShape(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    pub fn parse(column: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Parse {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Whether the failure only invalidates the current row.
    ///
    /// Row-level failures are logged and the row is dropped; everything else
    /// halts the stage.
    pub fn is_row_level(&self) -> bool {
        matches!(self, PipelineError::InputShape(_) | PipelineError::Parse { .. })
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_level_classification() {
        assert!(PipelineError::input_shape("window of 22 nt").is_row_level());
        assert!(PipelineError::parse("sr1_Index", "not an integer").is_row_level());
        assert!(!PipelineError::configuration("fold 3 has no positives").is_row_level());
    }

    #[test]
    fn test_display() {
        let err = PipelineError::parse("label", "expected 0 or 1");
        assert_eq!(err.to_string(), "Parse error in column 'label': expected 0 or 1");
    }
}
