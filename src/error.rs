//! Error types for the pitch error analysis

use thiserror::Error;

/// Error type for evaluation runs. Every variant is fatal for the run.
#[derive(Debug, Error)]
pub enum EvalError {
    /// E001: An expected input file does not exist
    #[error("E001: Missing input file - {0}")]
    MissingInput(String),
    /// E002: An input file exists but could not be parsed
    #[error("E002: Malformed input - {0}")]
    MalformedInput(String),
    /// E003: Array or table dimensions disagree
    #[error("E003: Shape mismatch - {0}")]
    ShapeMismatch(String),
    /// E004: Join keys between tables do not line up
    #[error("E004: Join key mismatch - {0}")]
    JoinKeyMismatch(String),
    /// E005: A MIDI number outside 0..=127 under the `error` policy
    #[error("E005: MIDI number {midi_number} of sample '{sample_id}' is outside 0..=127")]
    PitchOutOfRange { sample_id: String, midi_number: i64 },
    /// E006: Model artifacts could not be loaded
    #[error("E006: Model load error - {0}")]
    ModelLoad(String),
    /// E007: Inference failed
    #[error("E007: Inference error - {0}")]
    Inference(String),
    /// E008: Configuration validation failed
    #[error("E008: Configuration validation failed - {0}")]
    ConfigValidation(String),
    /// E009: Writing a result table failed
    #[error("E009: Export error - {0}")]
    Export(String),
    /// E010: Chart rendering failed
    #[error("E010: Chart rendering error - {0}")]
    Chart(String),
    /// E011: File I/O error
    #[error("E011: File I/O error - {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::MalformedInput(format!("JSON error: {}", err))
    }
}

impl From<csv::Error> for EvalError {
    fn from(err: csv::Error) -> Self {
        EvalError::MalformedInput(format!("CSV error: {}", err))
    }
}

// Note: plotters errors carry backend type parameters and are mapped by hand in chart.rs

/// Result type alias for evaluation operations
pub type Result<T> = std::result::Result<T, EvalError>;
