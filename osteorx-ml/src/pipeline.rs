//! Encode → predict → pick the top class → explain it.

use osteorx_core::config::ExplainConfig;
use osteorx_core::{PatientRecord, encode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classifier::{ClassifierModel, ProbabilityDistribution};
use crate::error::MlError;
use crate::explainer::{AttributionResult, FeatureContribution, TreeExplainer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecommendOptions {
    /// Compute the attribution of the recommended class.
    pub explain: bool,
    /// How many contributions go into [`Recommendation::top_contributions`].
    pub top_features: usize,
}

impl Default for RecommendOptions {
    fn default() -> Self {
        Self {
            explain: true,
            top_features: 10,
        }
    }
}

impl From<&ExplainConfig> for RecommendOptions {
    fn from(config: &ExplainConfig) -> Self {
        Self {
            explain: config.enabled,
            top_features: config.top_features,
        }
    }
}

/// Result of one recommendation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub schema: String,
    pub top_class: String,
    pub top_probability: f64,
    pub distribution: ProbabilityDistribution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<AttributionResult>,
    /// Largest-magnitude contributions of the attribution, strongest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_contributions: Vec<FeatureContribution>,
}

/// Recommend a medication for `record`.
pub fn recommend(
    model: &ClassifierModel,
    record: &PatientRecord,
    options: RecommendOptions,
) -> Result<Recommendation, MlError> {
    let features = encode(record, model.schema())?;
    let distribution = model.predict(&features)?;
    let top = distribution
        .top()
        .ok_or_else(|| MlError::attribution_shape("model produced no class probabilities"))?;
    let (top_class, top_probability) = (top.label.clone(), top.probability);

    let attribution = if options.explain {
        Some(TreeExplainer::new(model).explain(&features, &top_class)?)
    } else {
        None
    };
    let top_contributions = attribution
        .as_ref()
        .map(|a| a.top(options.top_features).into_iter().cloned().collect())
        .unwrap_or_default();

    info!(
        top_class = %top_class,
        probability = top_probability,
        explained = attribution.is_some(),
        "Recommendation computed"
    );

    Ok(Recommendation {
        schema: model.schema().name.clone(),
        top_class,
        top_probability,
        distribution,
        attribution,
        top_contributions,
    })
}
