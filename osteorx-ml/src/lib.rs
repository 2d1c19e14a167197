//! # osteorx-ml
//!
//! Medication classifier and its explanations: a random forest of CART trees
//! fit on encoded patient features, exact TreeSHAP attribution, CSV training
//! data ingestion, model files and the end-to-end recommendation pipeline.

pub mod classifier;
pub mod dataset;
pub mod error;
pub mod explainer;
pub mod forest;
pub mod model_store;
pub mod pipeline;

pub use classifier::{
    ClassProbability, ClassifierModel, CleaningReport, LabeledSample, ProbabilityDistribution,
    TrainingSummary, clean_samples,
};
pub use dataset::{load_csv, read_samples};
pub use error::MlError;
pub use explainer::{AttributionResult, FeatureContribution, RawAttribution, TreeExplainer, explain};
pub use forest::{ForestParams, OutputShape, RandomForest};
pub use model_store::{FORMAT_VERSION, ModelEnvelope, load_model, read_envelope, save_model};
pub use pipeline::{Recommendation, RecommendOptions, recommend};
