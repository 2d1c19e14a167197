//! Random forest of CART trees with bootstrap sampling.
//!
//! A forest keeps the raw per-node outputs TreeSHAP needs (cover and value at
//! every node); turning outputs into class probabilities is the classifier's
//! job.

pub mod tree;

pub use tree::{DecisionTree, Split, TreeNode};

use osteorx_core::config::{ForestConfig, MaxFeatures};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tree::TreeParams;

/// What each node's output vector holds.
///
/// Binary models store a single output per node (the positive-class
/// fraction); models over three or more classes store one fraction per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputShape {
    ClassFractions,
    PositiveClass,
}

impl OutputShape {
    pub fn for_classes(n_classes: usize) -> Self {
        if n_classes == 2 {
            Self::PositiveClass
        } else {
            Self::ClassFractions
        }
    }

    pub fn n_outputs(&self, n_classes: usize) -> usize {
        match self {
            Self::ClassFractions => n_classes,
            Self::PositiveClass => 1,
        }
    }

    pub(crate) fn project(&self, fractions: &[f64]) -> Vec<f64> {
        match self {
            Self::ClassFractions => fractions.to_vec(),
            Self::PositiveClass => vec![fractions.get(1).copied().unwrap_or(0.0)],
        }
    }
}

/// Dense row-major training matrix with integer class targets.
#[derive(Debug, Clone)]
pub struct TrainingMatrix {
    rows: Vec<Vec<f64>>,
    targets: Vec<usize>,
    n_classes: usize,
}

impl TrainingMatrix {
    pub fn new(rows: Vec<Vec<f64>>, targets: Vec<usize>, n_classes: usize) -> Self {
        debug_assert_eq!(rows.len(), targets.len());
        Self {
            rows,
            targets,
            n_classes,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn value(&self, row: usize, feature: usize) -> f64 {
        self.rows[row][feature]
    }

    pub fn target(&self, row: usize) -> usize {
        self.targets[row]
    }
}

/// Forest hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub random_state: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self::from(&ForestConfig::default())
    }
}

impl From<&ForestConfig> for ForestParams {
    fn from(config: &ForestConfig) -> Self {
        Self {
            n_estimators: config.n_estimators,
            max_depth: config.max_depth,
            min_samples_split: config.min_samples_split,
            min_samples_leaf: config.min_samples_leaf,
            max_features: config.max_features,
            bootstrap: config.bootstrap,
            random_state: config.random_state,
        }
    }
}

/// A fitted forest. Its output is the mean of its trees' leaf outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    shape: OutputShape,
    n_features: usize,
    n_classes: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit `params.n_estimators` trees. Deterministic for a fixed seed.
    pub fn fit(data: &TrainingMatrix, params: &ForestParams) -> Self {
        let shape = OutputShape::for_classes(data.n_classes());
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split.max(2),
            min_samples_leaf: params.min_samples_leaf.max(1),
            max_features: params.max_features.resolve(data.n_features()),
        };

        let mut rng = StdRng::seed_from_u64(params.random_state);
        let trees: Vec<DecisionTree> = (0..params.n_estimators.max(1))
            .map(|_| {
                let mut tree_rng = StdRng::seed_from_u64(rng.next_u64());
                let weights = if params.bootstrap {
                    bootstrap_weights(data.n_rows(), &mut tree_rng)
                } else {
                    vec![1.0; data.n_rows()]
                };
                DecisionTree::grow(data, &weights, &tree_params, shape, &mut tree_rng)
            })
            .collect();

        let mean_leaves =
            trees.iter().map(DecisionTree::n_leaves).sum::<usize>() as f64 / trees.len() as f64;
        tracing::debug!(
            trees = trees.len(),
            max_features = tree_params.max_features,
            mean_leaves,
            "random forest grown"
        );

        Self {
            shape,
            n_features: data.n_features(),
            n_classes: data.n_classes(),
            trees,
        }
    }

    pub fn from_parts(
        shape: OutputShape,
        n_features: usize,
        n_classes: usize,
        trees: Vec<DecisionTree>,
    ) -> Self {
        Self {
            shape,
            n_features,
            n_classes,
            trees,
        }
    }

    pub fn shape(&self) -> OutputShape {
        self.shape
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_outputs(&self) -> usize {
        self.shape.n_outputs(self.n_classes)
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Mean leaf output over all trees.
    pub fn predict_raw(&self, x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.n_outputs()];
        for tree in &self.trees {
            for (acc, v) in out.iter_mut().zip(tree.predict(x)) {
                *acc += v;
            }
        }
        let n = self.trees.len() as f64;
        out.iter_mut().for_each(|v| *v /= n);
        out
    }

    /// Mean root output over all trees: the forest's expected output.
    pub fn expected_raw(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.n_outputs()];
        for tree in &self.trees {
            for (acc, v) in out.iter_mut().zip(&tree.root().value) {
                *acc += v;
            }
        }
        let n = self.trees.len() as f64;
        out.iter_mut().for_each(|v| *v /= n);
        out
    }

    /// Consistency check used when a forest is read from disk.
    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        if self.shape != OutputShape::for_classes(self.n_classes) {
            return Err(format!(
                "output shape {:?} does not fit {} classes",
                self.shape, self.n_classes
            ));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features, self.n_outputs())
                .map_err(|e| format!("tree {i}: {e}"))?;
        }
        Ok(())
    }
}

/// Per-row draw counts of a bootstrap sample of size `n`.
fn bootstrap_weights<R: Rng>(n: usize, rng: &mut R) -> Vec<f64> {
    let mut weights = vec![0.0; n];
    for _ in 0..n {
        weights[rng.gen_range(0..n)] += 1.0;
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_class_matrix() -> TrainingMatrix {
        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for class in 0..3 {
            for i in 0..10 {
                rows.push(vec![class as f64 * 10.0 + i as f64 * 0.5, (i % 4) as f64]);
                targets.push(class);
            }
        }
        TrainingMatrix::new(rows, targets, 3)
    }

    #[test]
    fn test_output_shape_for_classes() {
        assert_eq!(OutputShape::for_classes(2), OutputShape::PositiveClass);
        assert_eq!(OutputShape::for_classes(3), OutputShape::ClassFractions);
        assert_eq!(OutputShape::PositiveClass.n_outputs(2), 1);
        assert_eq!(OutputShape::PositiveClass.project(&[0.25, 0.75]), vec![0.75]);
    }

    #[test]
    fn test_bootstrap_weights_sum_to_n() {
        let mut rng = StdRng::seed_from_u64(42);
        let weights = bootstrap_weights(30, &mut rng);
        assert_eq!(weights.iter().sum::<f64>(), 30.0);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let data = three_class_matrix();
        let params = ForestParams {
            n_estimators: 10,
            ..ForestParams::default()
        };
        let a = RandomForest::fit(&data, &params);
        let b = RandomForest::fit(&data, &params);
        assert_eq!(a, b);
    }

    #[test]
    fn test_predict_raw_is_distribution() {
        let data = three_class_matrix();
        let forest = RandomForest::fit(&data, &ForestParams::default());
        assert_eq!(forest.trees().len(), 100);
        assert!(forest.validate().is_ok());

        let out = forest.predict_raw(&[12.0, 1.0]);
        assert_eq!(out.len(), 3);
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(out[1] > out[0] && out[1] > out[2]);

        let expected = forest.expected_raw();
        assert!((expected.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_binary_forest_has_single_output() {
        let rows: Vec<Vec<f64>> = (0..12).map(|i| vec![i as f64]).collect();
        let targets: Vec<usize> = (0..12).map(|i| usize::from(i >= 6)).collect();
        let forest = RandomForest::fit(
            &TrainingMatrix::new(rows, targets, 2),
            &ForestParams::default(),
        );
        assert_eq!(forest.shape(), OutputShape::PositiveClass);
        assert_eq!(forest.n_outputs(), 1);
        assert!(forest.predict_raw(&[11.0])[0] > 0.5);
        assert!(forest.predict_raw(&[0.0])[0] < 0.5);
    }

    #[test]
    fn test_validate_rejects_shape_mismatch() {
        let data = three_class_matrix();
        let forest = RandomForest::fit(
            &data,
            &ForestParams {
                n_estimators: 2,
                ..ForestParams::default()
            },
        );
        let broken = RandomForest::from_parts(
            OutputShape::PositiveClass,
            forest.n_features(),
            3,
            forest.trees().to_vec(),
        );
        assert!(broken.validate().is_err());
    }
}
