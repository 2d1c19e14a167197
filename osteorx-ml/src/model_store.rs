//! Saving and loading fitted models.
//!
//! A model file is a JSON envelope around the [`ClassifierModel`]:
//!
//! ```json
//! { "format_version": 1, "model_id": "…", "saved_at": "…",
//!   "schema_fingerprint": "…", "model": { … } }
//! ```

use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use osteorx_core::FeatureSchema;
use osteorx_core::persistence::{atomic_write_json, load_json};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::classifier::ClassifierModel;
use crate::error::MlError;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEnvelope {
    pub format_version: u32,
    pub model_id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub schema_fingerprint: String,
    pub model: ClassifierModel,
}

/// Write `model` to `path` atomically. Returns the new model id.
pub fn save_model(model: &ClassifierModel, path: &Path) -> Result<Uuid, MlError> {
    let envelope = ModelEnvelope {
        format_version: FORMAT_VERSION,
        model_id: Uuid::new_v4(),
        saved_at: Utc::now(),
        schema_fingerprint: model.schema().fingerprint(),
        model: model.clone(),
    };
    atomic_write_json(path, &envelope)?;
    info!(
        path = %path.display(),
        model_id = %envelope.model_id,
        classes = model.labels().len(),
        "Model saved"
    );
    Ok(envelope.model_id)
}

/// Read the envelope at `path` without checking it against a schema.
pub fn read_envelope(path: &Path) -> Result<ModelEnvelope, MlError> {
    let value: serde_json::Value = match load_json(path) {
        Ok(Some(value)) => value,
        Ok(None) => return Err(MlError::model_load(path, "file not found")),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Err(MlError::model_load(path, format!("not valid JSON: {e}")));
        }
        Err(e) => return Err(MlError::model_load(path, format!("unreadable: {e}"))),
    };

    let version = value.get("format_version").and_then(serde_json::Value::as_u64);
    if version != Some(u64::from(FORMAT_VERSION)) {
        let found = version.map_or_else(|| "none".to_string(), |v| v.to_string());
        return Err(MlError::model_load(
            path,
            format!("unsupported format version {found} (expected {FORMAT_VERSION})"),
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| MlError::model_load(path, format!("malformed model: {e}")))
}

/// Load a model and check that it was fit on `expected_schema`.
pub fn load_model(
    path: &Path,
    expected_schema: &FeatureSchema,
) -> Result<ClassifierModel, MlError> {
    let envelope = read_envelope(path)?;
    let model = envelope.model;

    let embedded = model.schema().fingerprint();
    if envelope.schema_fingerprint != embedded {
        return Err(MlError::model_load(
            path,
            format!(
                "stored schema fingerprint {} does not match the embedded schema ({embedded})",
                envelope.schema_fingerprint
            ),
        ));
    }
    let expected = expected_schema.fingerprint();
    if embedded != expected {
        return Err(MlError::model_load(
            path,
            format!(
                "model was fit on schema '{}' ({embedded}) but the encoder uses '{}' ({expected})",
                model.schema().name,
                expected_schema.name
            ),
        ));
    }
    model
        .validate()
        .map_err(|reason| MlError::model_load(path, reason))?;

    info!(
        path = %path.display(),
        model_id = %envelope.model_id,
        saved_at = %envelope.saved_at,
        classes = model.labels().len(),
        "Model loaded"
    );
    Ok(model)
}
