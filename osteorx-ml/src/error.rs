//! Error types for the osteorx-ml crate.

use osteorx_core::SchemaMismatchError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for training, inference and attribution.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(#[from] SchemaMismatchError),

    #[error("Insufficient training data: {distinct_classes} distinct class(es) in {rows} usable row(s); at least 2 classes are required")]
    InsufficientData { distinct_classes: usize, rows: usize },

    #[error("Failed to load model from {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("Attribution shape error: {0}")]
    AttributionShape(String),

    #[error("Unknown class label: {0}")]
    UnknownLabel(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl MlError {
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn model_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn attribution_shape(msg: impl Into<String>) -> Self {
        Self::AttributionShape(msg.into())
    }
}
