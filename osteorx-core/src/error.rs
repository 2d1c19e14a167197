//! Error types for the osteorx core library.
//!
//! Uses `thiserror` for the encoding-time contract violations and for
//! configuration failures.

/// A patient record or feature vector diverges from the feature schema a
/// classifier was fit on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaMismatchError {
    #[error("value '{value}' is not in the domain of categorical field '{field}' (expected one of: {expected})")]
    UnknownCategory {
        field: String,
        value: String,
        expected: String,
    },

    #[error("field '{field}' is required by schema '{schema}' but missing from the record")]
    MissingField { field: String, schema: String },

    #[error("feature vector has {actual} columns but schema '{schema}' expects {expected}")]
    WidthMismatch {
        schema: String,
        expected: usize,
        actual: usize,
    },

    #[error("feature vector was encoded with schema {actual} but the model expects {expected}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("column '{column}' holds a non-finite value")]
    NonFiniteValue { column: String },
}

/// Errors from loading or writing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl SchemaMismatchError {
    pub fn missing(field: impl Into<String>, schema: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            schema: schema.into(),
        }
    }
}
