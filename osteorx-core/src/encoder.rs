//! Feature encoder: maps a [`PatientRecord`] onto a schema's column order.

use crate::error::SchemaMismatchError;
use crate::patient::PatientRecord;
use crate::schema::FeatureSchema;
use serde::{Deserialize, Serialize};

/// Marker stored in a column whose source value was missing.
pub const MISSING: f64 = f64::NAN;

/// Encoded features in schema column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    schema_fingerprint: String,
    values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingPolicy {
    Reject,
    Mark,
}

impl FeatureVector {
    /// Wrap already-encoded values. The caller vouches that `values` follow
    /// the column order of the schema identified by `schema_fingerprint`.
    pub fn from_values(schema_fingerprint: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            schema_fingerprint: schema_fingerprint.into(),
            values,
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn schema_fingerprint(&self) -> &str {
        &self.schema_fingerprint
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether any column holds the missing marker.
    pub fn has_missing(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }

    /// Check that this vector was produced for `schema`.
    pub fn ensure_matches(&self, schema: &FeatureSchema) -> Result<(), SchemaMismatchError> {
        let expected = schema.fingerprint();
        if self.schema_fingerprint != expected {
            return Err(SchemaMismatchError::FingerprintMismatch {
                expected,
                actual: self.schema_fingerprint.clone(),
            });
        }
        if self.values.len() != schema.width() {
            return Err(SchemaMismatchError::WidthMismatch {
                schema: schema.name.clone(),
                expected: schema.width(),
                actual: self.values.len(),
            });
        }
        Ok(())
    }
}

/// Encode a record for inference. Every schema field must be present.
pub fn encode(
    record: &PatientRecord,
    schema: &FeatureSchema,
) -> Result<FeatureVector, SchemaMismatchError> {
    encode_with(record, schema, MissingPolicy::Reject)
}

/// Encode a training record, writing [`MISSING`] for absent values so the
/// classifier's cleaning step can drop the row. Out-of-domain categorical
/// values are still rejected.
pub fn encode_lenient(
    record: &PatientRecord,
    schema: &FeatureSchema,
) -> Result<FeatureVector, SchemaMismatchError> {
    encode_with(record, schema, MissingPolicy::Mark)
}

fn encode_with(
    record: &PatientRecord,
    schema: &FeatureSchema,
    policy: MissingPolicy,
) -> Result<FeatureVector, SchemaMismatchError> {
    let mut values = Vec::with_capacity(schema.width());

    for field in &schema.numeric {
        match record.numeric(&field.name).filter(|v| v.is_finite()) {
            Some(v) => values.push(v),
            None if policy == MissingPolicy::Mark => values.push(MISSING),
            None => return Err(SchemaMismatchError::missing(&field.name, &schema.name)),
        }
    }

    for field in &schema.categorical {
        let raw = record
            .category(&field.name)
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let code = match raw {
            Some(value) => Some(field.resolve(value).ok_or_else(|| {
                SchemaMismatchError::UnknownCategory {
                    field: field.name.clone(),
                    value: value.to_string(),
                    expected: field.domain_description(),
                }
            })?),
            None if policy == MissingPolicy::Mark => None,
            None => return Err(SchemaMismatchError::missing(&field.name, &schema.name)),
        };

        for level in field.indicator_levels() {
            values.push(match code {
                Some(code) if code == level.code => 1.0,
                Some(_) => 0.0,
                None => MISSING,
            });
        }
    }

    Ok(FeatureVector {
        schema_fingerprint: schema.fingerprint(),
        values,
    })
}
