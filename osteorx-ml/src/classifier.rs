//! Drug recommendation classifier.
//!
//! [`ClassifierModel`] wraps a [`RandomForest`] together with the schema it
//! was fit on and its sorted label set. Created by [`ClassifierModel::fit`]
//! or by loading a saved model; immutable afterwards.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use osteorx_core::{FeatureSchema, FeatureVector, SchemaMismatchError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::MlError;
use crate::forest::{ForestParams, OutputShape, RandomForest, TrainingMatrix};

/// One training example. A `None` or blank label marks the row as unusable.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub features: FeatureVector,
    pub label: Option<String>,
}

impl LabeledSample {
    pub fn new(features: FeatureVector, label: impl Into<String>) -> Self {
        Self {
            features,
            label: Some(label.into()),
        }
    }

    pub fn unlabeled(features: FeatureVector) -> Self {
        Self {
            features,
            label: None,
        }
    }
}

/// Outcome of [`clean_samples`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub rows_total: usize,
    pub rows_used: usize,
    pub dropped_missing_features: usize,
    pub dropped_missing_label: usize,
}

impl CleaningReport {
    pub fn rows_dropped(&self) -> usize {
        self.dropped_missing_features + self.dropped_missing_label
    }
}

/// Drop samples with a missing feature value or a missing/blank label.
///
/// Dropping is silent towards the caller; the report says how many went.
pub fn clean_samples(samples: Vec<LabeledSample>) -> (Vec<(Vec<f64>, String)>, CleaningReport) {
    let mut report = CleaningReport {
        rows_total: samples.len(),
        ..CleaningReport::default()
    };
    let mut kept = Vec::with_capacity(samples.len());

    for sample in samples {
        let label = sample
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        if sample.features.values().iter().any(|v| !v.is_finite()) {
            report.dropped_missing_features += 1;
            continue;
        }
        let Some(label) = label else {
            report.dropped_missing_label += 1;
            continue;
        };
        kept.push((sample.features.values().to_vec(), label));
    }

    report.rows_used = kept.len();
    if report.rows_dropped() > 0 {
        warn!(
            dropped = report.rows_dropped(),
            missing_features = report.dropped_missing_features,
            missing_label = report.dropped_missing_label,
            "Dropped incomplete training rows"
        );
    }
    debug!(?report, "Training data cleaned");
    (kept, report)
}

/// What the model was fit on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub rows_total: usize,
    pub rows_used: usize,
    pub rows_dropped: usize,
    pub class_counts: BTreeMap<String, usize>,
    pub trained_at: DateTime<Utc>,
}

/// A fitted classifier: schema, sorted labels and the forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierModel {
    schema: FeatureSchema,
    labels: Vec<String>,
    forest: RandomForest,
    summary: TrainingSummary,
}

impl ClassifierModel {
    /// Clean `samples`, derive the sorted label set and fit the forest.
    pub fn fit(
        schema: &FeatureSchema,
        samples: Vec<LabeledSample>,
        params: &ForestParams,
    ) -> Result<Self, MlError> {
        for sample in &samples {
            sample.features.ensure_matches(schema)?;
        }

        let (rows, report) = clean_samples(samples);
        let labels: Vec<String> = rows
            .iter()
            .map(|(_, l)| l.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if labels.len() < 2 {
            return Err(MlError::InsufficientData {
                distinct_classes: labels.len(),
                rows: rows.len(),
            });
        }

        let index: BTreeMap<&str, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i))
            .collect();
        let mut class_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut targets = Vec::with_capacity(rows.len());
        let mut matrix = Vec::with_capacity(rows.len());
        for (values, label) in rows {
            targets.push(index[label.as_str()]);
            *class_counts.entry(label).or_default() += 1;
            matrix.push(values);
        }

        let data = TrainingMatrix::new(matrix, targets, labels.len());
        let forest = RandomForest::fit(&data, params);

        let summary = TrainingSummary {
            rows_total: report.rows_total,
            rows_used: report.rows_used,
            rows_dropped: report.rows_dropped(),
            class_counts,
            trained_at: Utc::now(),
        };
        info!(
            schema = %schema.name,
            classes = labels.len(),
            rows = summary.rows_used,
            trees = forest.trees().len(),
            "Classifier trained"
        );

        Ok(Self {
            schema: schema.clone(),
            labels,
            forest,
            summary,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Class labels in model order (lexicographic).
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn forest(&self) -> &RandomForest {
        &self.forest
    }

    pub fn summary(&self) -> &TrainingSummary {
        &self.summary
    }

    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Reject vectors produced for another schema or holding non-finite values.
    pub fn check_features(&self, features: &FeatureVector) -> Result<(), SchemaMismatchError> {
        features.ensure_matches(&self.schema)?;
        let columns = self.schema.columns();
        if let Some(i) = features.values().iter().position(|v| !v.is_finite()) {
            return Err(SchemaMismatchError::NonFiniteValue {
                column: columns[i].clone(),
            });
        }
        Ok(())
    }

    /// Probability of every class, in label order.
    pub fn predict(&self, features: &FeatureVector) -> Result<ProbabilityDistribution, MlError> {
        self.check_features(features)?;
        let raw = self.forest.predict_raw(features.values());
        let probabilities = match self.forest.shape() {
            OutputShape::PositiveClass => {
                let p = raw.first().copied().unwrap_or(0.0).clamp(0.0, 1.0);
                vec![1.0 - p, p]
            }
            OutputShape::ClassFractions => raw,
        };
        Ok(ProbabilityDistribution::new(
            self.labels
                .iter()
                .cloned()
                .zip(probabilities)
                .map(|(label, probability)| ClassProbability { label, probability })
                .collect(),
        ))
    }

    /// Consistency check for models read from disk.
    pub fn validate(&self) -> Result<(), String> {
        if self.labels.len() < 2 {
            return Err(format!("model has {} class label(s)", self.labels.len()));
        }
        if self.labels.windows(2).any(|w| w[0] >= w[1]) {
            return Err("class labels are not sorted and unique".to_string());
        }
        if self.forest.n_classes() != self.labels.len() {
            return Err(format!(
                "forest was fit on {} classes but the model lists {} labels",
                self.forest.n_classes(),
                self.labels.len()
            ));
        }
        if self.forest.n_features() != self.schema.width() {
            return Err(format!(
                "forest expects {} features but schema '{}' has {} columns",
                self.forest.n_features(),
                self.schema.name,
                self.schema.width()
            ));
        }
        self.forest.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProbability {
    pub label: String,
    pub probability: f64,
}

/// One probability per class label, in model label order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbabilityDistribution {
    classes: Vec<ClassProbability>,
}

impl ProbabilityDistribution {
    pub fn new(classes: Vec<ClassProbability>) -> Self {
        Self { classes }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassProbability> {
        self.classes.iter()
    }

    pub fn probability(&self, label: &str) -> Option<f64> {
        self.classes
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.probability)
    }

    pub fn sum(&self) -> f64 {
        self.classes.iter().map(|c| c.probability).sum()
    }

    /// Most probable class; ties go to the earliest label.
    pub fn top(&self) -> Option<&ClassProbability> {
        self.classes.iter().reduce(|best, c| {
            if c.probability > best.probability {
                c
            } else {
                best
            }
        })
    }

    /// Classes by descending probability; ties keep label order.
    pub fn ranked(&self) -> Vec<&ClassProbability> {
        let mut ranked: Vec<&ClassProbability> = self.classes.iter().collect();
        ranked.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        ranked
    }
}
