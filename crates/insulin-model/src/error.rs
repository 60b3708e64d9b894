use thiserror::Error;

use crate::events::StreamKind;

/// Raised by the grid builder when asked to span zero events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot build a grid from an empty event series")]
pub struct EmptySeriesError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    /// Required column missing or of the wrong type. Rejects the whole input.
    #[error("schema error in {stream} input: column '{column}' {reason}")]
    Schema {
        stream: StreamKind,
        column: String,
        reason: String,
    },

    /// Patient has no events in any core stream.
    #[error("no events for patient {patient_id}")]
    EmptySeries { patient_id: String },

    /// A single value could not be interpreted.
    #[error("malformed {column} value '{value}' for patient {patient_id}")]
    MalformedValue {
        patient_id: String,
        column: String,
        value: String,
    },

    /// Output failed a structural check (mass conservation, grid contiguity).
    #[error("integrity violation for patient {patient_id}: {reason}")]
    Integrity { patient_id: String, reason: String },

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

impl NormalizeError {
    pub fn schema(stream: StreamKind, column: &str, reason: impl Into<String>) -> Self {
        Self::Schema {
            stream,
            column: column.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed(patient_id: &str, column: &str, value: impl Into<String>) -> Self {
        Self::MalformedValue {
            patient_id: patient_id.to_string(),
            column: column.to_string(),
            value: value.into(),
        }
    }

    /// Short category label used in reports.
    pub fn category(&self) -> &'static str {
        match self {
            NormalizeError::Schema { .. } => "schema",
            NormalizeError::EmptySeries { .. } => "empty_series",
            NormalizeError::MalformedValue { .. } => "malformed_value",
            NormalizeError::Integrity { .. } => "integrity",
            NormalizeError::InvalidOptions(_) => "invalid_options",
        }
    }
}

pub type Result<T> = std::result::Result<T, NormalizeError>;
