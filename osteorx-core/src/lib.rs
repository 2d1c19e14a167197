//! # osteorx-core
//!
//! Shared foundation for the osteorx decision-support tool: layered
//! configuration, the error taxonomy for encoding-time contract violations,
//! patient records, feature schemas and the schema-driven feature encoder.

pub mod config;
pub mod encoder;
pub mod error;
pub mod patient;
pub mod persistence;
pub mod schema;

pub use config::{CsvEncoding, OsteoConfig, config_exists, load_config};
pub use encoder::{FeatureVector, MISSING, encode, encode_lenient};
pub use error::{ConfigError, SchemaMismatchError};
pub use patient::{DiabetesHistory, PatientRecord, Presence, Sex};
pub use schema::{CategoricalField, CategoryLevel, FeatureSchema, NumericField, SchemaPreset};
