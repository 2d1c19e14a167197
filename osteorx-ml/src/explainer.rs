//! Additive feature attribution for forest predictions.
//!
//! Contributions come from exact path-dependent TreeSHAP run over every tree
//! and averaged across the forest, so for any input
//! `baseline + Σ contributions == predicted probability` up to rounding.
//!
//! The raw attribution follows the forest's output shape: one contribution set
//! per class for multi-class models, a single set for the positive class of a
//! binary model. [`normalize`] folds both into one [`AttributionResult`] for
//! the requested class; nothing past this module sees the raw shapes.

use osteorx_core::FeatureVector;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::ClassifierModel;
use crate::error::MlError;
use crate::forest::{DecisionTree, RandomForest};

/// Attribution as the forest produces it, before class selection.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAttribution {
    /// `baselines[c]` and `contributions[c][feature]` for every class `c`.
    PerClass {
        baselines: Vec<f64>,
        contributions: Vec<Vec<f64>>,
    },
    /// Baseline and contributions of the positive class (`labels[1]`).
    SingleOutput {
        baseline: f64,
        contributions: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    /// Encoded input value of the feature.
    pub value: f64,
    pub contribution: f64,
}

/// Per-feature decomposition of one class probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    pub target_class: String,
    pub baseline: f64,
    pub prediction: f64,
    /// In schema column order.
    pub contributions: Vec<FeatureContribution>,
}

impl AttributionResult {
    pub fn sum(&self) -> f64 {
        self.contributions.iter().map(|c| c.contribution).sum()
    }

    /// `|baseline + Σ contributions - prediction|`
    pub fn reconstruction_error(&self) -> f64 {
        (self.baseline + self.sum() - self.prediction).abs()
    }

    /// The `n` contributions with the largest magnitude. Ties keep column order.
    pub fn top(&self, n: usize) -> Vec<&FeatureContribution> {
        let mut ranked: Vec<&FeatureContribution> = self.contributions.iter().collect();
        ranked.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
        ranked.truncate(n);
        ranked
    }
}

/// Explains predictions of one model.
#[derive(Debug, Clone, Copy)]
pub struct TreeExplainer<'a> {
    model: &'a ClassifierModel,
}

impl<'a> TreeExplainer<'a> {
    pub fn new(model: &'a ClassifierModel) -> Self {
        Self { model }
    }

    /// Raw TreeSHAP output for `features`, shaped like the forest output.
    pub fn raw(&self, features: &FeatureVector) -> Result<RawAttribution, MlError> {
        self.model.check_features(features)?;
        Ok(forest_attribution(self.model.forest(), features.values()))
    }

    /// Attribution of `target_class`'s probability.
    pub fn explain(
        &self,
        features: &FeatureVector,
        target_class: &str,
    ) -> Result<AttributionResult, MlError> {
        let raw = self.raw(features)?;
        let labels = self.model.labels();
        let (baseline, contributions) =
            normalize(raw, labels, self.model.schema().width(), target_class)?;

        let prediction = self
            .model
            .predict(features)?
            .probability(target_class)
            .ok_or_else(|| MlError::UnknownLabel(target_class.to_string()))?;

        let contributions = self
            .model
            .schema()
            .columns()
            .into_iter()
            .zip(features.values())
            .zip(contributions)
            .map(|((feature, &value), contribution)| FeatureContribution {
                feature,
                value,
                contribution,
            })
            .collect();

        let result = AttributionResult {
            target_class: target_class.to_string(),
            baseline,
            prediction,
            contributions,
        };
        debug!(
            target = target_class,
            baseline,
            prediction,
            error = result.reconstruction_error(),
            "Attribution computed"
        );
        Ok(result)
    }
}

/// Attribution of `target_class` for `features` under `model`.
pub fn explain(
    model: &ClassifierModel,
    features: &FeatureVector,
    target_class: &str,
) -> Result<AttributionResult, MlError> {
    TreeExplainer::new(model).explain(features, target_class)
}

/// Select the contribution set of `target_class` from a raw attribution.
///
/// Returns `(baseline, contributions)`. A single-output attribution belongs to
/// `labels[1]`; for `labels[0]` it is mirrored (negated contributions,
/// `1 - baseline`).
pub fn normalize(
    raw: RawAttribution,
    labels: &[String],
    n_features: usize,
    target_class: &str,
) -> Result<(f64, Vec<f64>), MlError> {
    let target = labels
        .iter()
        .position(|l| l == target_class)
        .ok_or_else(|| MlError::UnknownLabel(target_class.to_string()))?;

    match raw {
        RawAttribution::PerClass {
            mut baselines,
            mut contributions,
        } => {
            if baselines.len() != labels.len() || contributions.len() != labels.len() {
                return Err(MlError::attribution_shape(format!(
                    "{} baseline(s) and {} contribution set(s) for {} labels",
                    baselines.len(),
                    contributions.len(),
                    labels.len()
                )));
            }
            let set = contributions.swap_remove(target);
            check_width(&set, n_features)?;
            Ok((baselines.swap_remove(target), set))
        }
        RawAttribution::SingleOutput {
            baseline,
            contributions,
        } => {
            check_width(&contributions, n_features)?;
            match (labels.len(), target) {
                (1, 0) | (2, 1) => Ok((baseline, contributions)),
                (2, 0) => Ok((1.0 - baseline, contributions.iter().map(|c| -c).collect())),
                (n, _) => Err(MlError::attribution_shape(format!(
                    "single-output attribution for a model with {n} labels"
                ))),
            }
        }
    }
}

fn check_width(contributions: &[f64], n_features: usize) -> Result<(), MlError> {
    if contributions.len() != n_features {
        return Err(MlError::attribution_shape(format!(
            "{} contributions for {n_features} features",
            contributions.len()
        )));
    }
    Ok(())
}

fn forest_attribution(forest: &RandomForest, x: &[f64]) -> RawAttribution {
    let n_outputs = forest.n_outputs();
    let mut phi = vec![vec![0.0; n_outputs]; forest.n_features()];
    for tree in forest.trees() {
        tree_shap(tree, x, &mut phi);
    }
    let n_trees = forest.trees().len() as f64;
    let baselines = forest.expected_raw();

    let mut per_output: Vec<Vec<f64>> = (0..n_outputs)
        .map(|o| phi.iter().map(|row| row[o] / n_trees).collect())
        .collect();

    if n_outputs == 1 {
        RawAttribution::SingleOutput {
            baseline: baselines[0],
            contributions: per_output.swap_remove(0),
        }
    } else {
        RawAttribution::PerClass {
            baselines,
            contributions: per_output,
        }
    }
}

// --- TreeSHAP (Lundberg et al., path-dependent) ---

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

/// Add one tree's SHAP values for `x` into `phi[feature][output]`.
fn tree_shap(tree: &DecisionTree, x: &[f64], phi: &mut [Vec<f64>]) {
    recurse(tree, x, phi, 0, &[], 1.0, 1.0, None);
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &DecisionTree,
    x: &[f64],
    phi: &mut [Vec<f64>],
    node_idx: usize,
    parent_path: &[PathElement],
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let mut path = parent_path.to_vec();
    extend(&mut path, zero_fraction, one_fraction, feature);
    let node = &tree.nodes()[node_idx];

    let Some(split) = node.split else {
        for i in 1..path.len() {
            let weight = unwound_sum(&path, i);
            let el = path[i];
            let Some(f) = el.feature else { continue };
            let scale = weight * (el.one_fraction - el.zero_fraction);
            for (acc, v) in phi[f].iter_mut().zip(&node.value) {
                *acc += scale * v;
            }
        }
        return;
    };

    let (hot, cold) = if x[split.feature] <= split.threshold {
        (split.left, split.right)
    } else {
        (split.right, split.left)
    };
    let nodes = tree.nodes();
    let hot_zero = nodes[hot].cover / node.cover;
    let cold_zero = nodes[cold].cover / node.cover;

    let mut incoming_zero = 1.0;
    let mut incoming_one = 1.0;
    if let Some(k) = (1..path.len()).find(|&k| path[k].feature == Some(split.feature)) {
        incoming_zero = path[k].zero_fraction;
        incoming_one = path[k].one_fraction;
        unwind(&mut path, k);
    }

    recurse(
        tree,
        x,
        phi,
        hot,
        &path,
        hot_zero * incoming_zero,
        incoming_one,
        Some(split.feature),
    );
    recurse(
        tree,
        x,
        phi,
        cold,
        &path,
        cold_zero * incoming_zero,
        0.0,
        Some(split.feature),
    );
}

fn extend(
    path: &mut Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / denom;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / denom;
    }
}

fn unwind(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * denom / ((i + 1) as f64 * one);
            next_one_portion = tmp - path[i].pweight * zero * (depth - i) as f64 / denom;
        } else {
            path[i].pweight = path[i].pweight * denom / (zero * (depth - i) as f64);
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Total permutation weight of the path with element `index` removed.
fn unwound_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = next_one_portion * denom / ((i + 1) as f64 * one);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero * ((depth - i) as f64 / denom);
        } else if zero != 0.0 {
            total += (path[i].pweight / zero) / ((depth - i) as f64 / denom);
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::{OutputShape, Split, TreeNode};
    use pretty_assertions::assert_eq;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn leaf(cover: f64, value: Vec<f64>) -> TreeNode {
        TreeNode {
            split: None,
            cover,
            value,
        }
    }

    fn node(
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
        value: Vec<f64>,
    ) -> TreeNode {
        TreeNode {
            split: Some(Split {
                feature,
                threshold,
                left,
                right,
            }),
            cover,
            value,
        }
    }

    /// Two-level tree on two features with a repeated split on feature 0.
    fn toy_tree() -> DecisionTree {
        DecisionTree::from_nodes(vec![
            node(0, 5.0, 1, 4, 10.0, vec![0.4]),
            node(1, 2.0, 2, 3, 6.0, vec![0.5]),
            leaf(2.0, vec![0.0]),
            leaf(4.0, vec![0.75]),
            node(0, 8.0, 5, 6, 4.0, vec![0.25]),
            leaf(1.0, vec![1.0]),
            leaf(3.0, vec![0.0]),
        ])
    }

    #[test]
    fn test_tree_shap_is_additive_on_toy_tree() {
        let tree = toy_tree();
        for x in [[1.0, 1.0], [1.0, 3.0], [6.0, 0.0], [9.0, 9.0]] {
            let mut phi = vec![vec![0.0]; 2];
            tree_shap(&tree, &x, &mut phi);
            let total: f64 = phi.iter().map(|p| p[0]).sum();
            let expected = tree.root().value[0];
            assert!(
                (expected + total - tree.predict(&x)[0]).abs() < 1e-12,
                "x = {x:?}"
            );
        }
    }

    #[test]
    fn test_tree_shap_single_split_matches_closed_form() {
        // One split: phi = f(x) - E[f].
        let tree = DecisionTree::from_nodes(vec![
            node(0, 0.5, 1, 2, 4.0, vec![0.25]),
            leaf(3.0, vec![0.0]),
            leaf(1.0, vec![1.0]),
        ]);
        let mut phi = vec![vec![0.0]];
        tree_shap(&tree, &[1.0], &mut phi);
        assert!((phi[0][0] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_leaf_only_tree_has_no_contributions() {
        let tree = DecisionTree::from_nodes(vec![leaf(5.0, vec![0.2, 0.8])]);
        let mut phi = vec![vec![0.0; 2]; 3];
        tree_shap(&tree, &[0.0, 1.0, 2.0], &mut phi);
        assert!(phi.iter().flatten().all(|v| *v == 0.0));
    }

    #[test]
    fn test_forest_attribution_shape_follows_outputs() {
        let forest =
            RandomForest::from_parts(OutputShape::PositiveClass, 2, 2, vec![toy_tree()]);
        match forest_attribution(&forest, &[1.0, 3.0]) {
            RawAttribution::SingleOutput {
                baseline,
                contributions,
            } => {
                assert!((baseline - 0.4).abs() < 1e-12);
                assert_eq!(contributions.len(), 2);
            }
            other => panic!("expected single output, got {other:?}"),
        }
    }

    #[test]
    fn test_normalize_per_class_selects_target() {
        let raw = RawAttribution::PerClass {
            baselines: vec![0.2, 0.3, 0.5],
            contributions: vec![vec![0.1, 0.0], vec![0.2, -0.1], vec![-0.3, 0.1]],
        };
        let (baseline, set) = normalize(raw, &labels(&["A", "B", "C"]), 2, "B").unwrap();
        assert_eq!(baseline, 0.3);
        assert_eq!(set, vec![0.2, -0.1]);
    }

    #[test]
    fn test_normalize_single_output_mirrors_negative_class() {
        let raw = RawAttribution::SingleOutput {
            baseline: 0.3,
            contributions: vec![0.25, -0.05],
        };
        let two = labels(&["no", "yes"]);

        let (b_pos, pos) = normalize(raw.clone(), &two, 2, "yes").unwrap();
        assert_eq!((b_pos, pos.clone()), (0.3, vec![0.25, -0.05]));

        let (b_neg, neg) = normalize(raw, &two, 2, "no").unwrap();
        assert!((b_neg - 0.7).abs() < 1e-12);
        assert_eq!(neg, vec![-0.25, 0.05]);
    }

    #[test]
    fn test_normalize_rejects_inconsistent_shapes() {
        let single = RawAttribution::SingleOutput {
            baseline: 0.5,
            contributions: vec![0.1],
        };
        assert!(matches!(
            normalize(single.clone(), &labels(&["A", "B", "C"]), 1, "A"),
            Err(MlError::AttributionShape(_))
        ));
        assert!(matches!(
            normalize(single, &labels(&["A", "B"]), 3, "A"),
            Err(MlError::AttributionShape(_))
        ));

        let per_class = RawAttribution::PerClass {
            baselines: vec![0.5, 0.5],
            contributions: vec![vec![0.0], vec![0.0]],
        };
        assert!(matches!(
            normalize(per_class, &labels(&["A", "B", "C"]), 1, "A"),
            Err(MlError::AttributionShape(_))
        ));
    }

    #[test]
    fn test_normalize_unknown_label() {
        let raw = RawAttribution::SingleOutput {
            baseline: 0.5,
            contributions: vec![0.1],
        };
        assert!(matches!(
            normalize(raw, &labels(&["A", "B"]), 1, "Z"),
            Err(MlError::UnknownLabel(ref l)) if l == "Z"
        ));
    }

    fn contribution(feature: &str, contribution: f64) -> FeatureContribution {
        FeatureContribution {
            feature: feature.into(),
            value: 1.0,
            contribution,
        }
    }

    #[test]
    fn test_top_ranks_by_magnitude_and_keeps_ties_in_order() {
        let result = AttributionResult {
            target_class: "A".into(),
            baseline: 0.5,
            prediction: 0.6,
            contributions: vec![
                contribution("a", 0.05),
                contribution("b", -0.1),
                contribution("c", 0.05),
                contribution("d", 0.1),
            ],
        };
        let names: Vec<&str> = result.top(3).iter().map(|c| c.feature.as_str()).collect();
        assert_eq!(names, vec!["b", "d", "a"]);
        assert!(result.reconstruction_error() < 1e-12);
    }
}
