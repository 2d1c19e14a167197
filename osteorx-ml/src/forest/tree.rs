//! CART classification trees grown on bootstrap-weighted rows.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::{OutputShape, TrainingMatrix};

/// Internal-node test: rows with `x[feature] <= threshold` go left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub feature: usize,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
}

/// A tree node. Every node, leaf or not, stores its cover (weighted number of
/// training rows reaching it) and its output value, so the root value is the
/// tree's expected output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<Split>,
    pub cover: f64,
    pub value: Vec<f64>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }
}

/// A fitted decision tree stored as a flat node array, root at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: usize,
}

impl DecisionTree {
    pub fn from_nodes(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[0]
    }

    /// Index of the leaf reached by `x`.
    pub fn leaf_index(&self, x: &[f64]) -> usize {
        let mut idx = 0;
        while let Some(split) = &self.nodes[idx].split {
            idx = if x[split.feature] <= split.threshold {
                split.left
            } else {
                split.right
            };
        }
        idx
    }

    pub fn predict(&self, x: &[f64]) -> &[f64] {
        &self.nodes[self.leaf_index(x)].value
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match &nodes[idx].split {
                Some(s) => 1 + walk(nodes, s.left).max(walk(nodes, s.right)),
                None => 0,
            }
        }
        walk(&self.nodes, 0)
    }

    /// Structural check for trees read back from disk: child indices point
    /// forward inside the array, split features exist, output widths agree
    /// and covers are positive.
    pub fn validate(&self, n_features: usize, n_outputs: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.value.len() != n_outputs {
                return Err(format!(
                    "node {idx} has {} outputs, expected {n_outputs}",
                    node.value.len()
                ));
            }
            if node.cover.is_nan() || node.cover <= 0.0 {
                return Err(format!("node {idx} has non-positive cover"));
            }
            if let Some(split) = &node.split {
                if split.feature >= n_features {
                    return Err(format!(
                        "node {idx} splits on feature {} of {n_features}",
                        split.feature
                    ));
                }
                for child in [split.left, split.right] {
                    if child <= idx || child >= self.nodes.len() {
                        return Err(format!("node {idx} has invalid child index {child}"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Grow a tree on the rows with positive weight.
    pub(crate) fn grow<R: Rng>(
        data: &TrainingMatrix,
        weights: &[f64],
        params: &TreeParams,
        shape: OutputShape,
        rng: &mut R,
    ) -> Self {
        let rows: Vec<usize> = (0..data.n_rows()).filter(|&r| weights[r] > 0.0).collect();
        let mut builder = TreeBuilder {
            data,
            weights,
            params,
            shape,
            rng,
            nodes: Vec::new(),
        };
        builder.build(rows, 0);
        Self {
            nodes: builder.nodes,
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    /// Weighted Gini impurity of the two children; lower is better.
    impurity: f64,
}

struct TreeBuilder<'a, R: Rng> {
    data: &'a TrainingMatrix,
    weights: &'a [f64],
    params: &'a TreeParams,
    shape: OutputShape,
    rng: &'a mut R,
    nodes: Vec<TreeNode>,
}

impl<R: Rng> TreeBuilder<'_, R> {
    fn build(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let totals = self.class_weights(&rows);
        let cover: f64 = totals.iter().sum();
        let fractions: Vec<f64> = totals.iter().map(|w| w / cover).collect();

        let idx = self.nodes.len();
        self.nodes.push(TreeNode {
            split: None,
            cover,
            value: self.shape.project(&fractions),
        });

        if self.is_terminal(&rows, &totals, depth) {
            return idx;
        }
        let Some(candidate) = self.best_split(&rows, &totals) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.data.value(r, candidate.feature) <= candidate.threshold);

        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[idx].split = Some(Split {
            feature: candidate.feature,
            threshold: candidate.threshold,
            left,
            right,
        });
        idx
    }

    fn class_weights(&self, rows: &[usize]) -> Vec<f64> {
        let mut totals = vec![0.0; self.data.n_classes()];
        for &r in rows {
            totals[self.data.target(r)] += self.weights[r];
        }
        totals
    }

    fn is_terminal(&self, rows: &[usize], totals: &[f64], depth: usize) -> bool {
        let pure = totals.iter().filter(|&&w| w > 0.0).count() <= 1;
        pure || self.params.max_depth.is_some_and(|max| depth >= max)
            || rows.len() < self.params.min_samples_split
            || rows.len() < 2 * self.params.min_samples_leaf
    }

    /// Visit features in random order. At least `max_features` are examined,
    /// and the search keeps going past that until one valid split is found.
    fn best_split(&mut self, rows: &[usize], totals: &[f64]) -> Option<SplitCandidate> {
        let mut features: Vec<usize> = (0..self.data.n_features()).collect();
        features.shuffle(&mut *self.rng);

        let mut best: Option<SplitCandidate> = None;
        for (visited, &feature) in features.iter().enumerate() {
            if visited >= self.params.max_features && best.is_some() {
                break;
            }
            if let Some(candidate) = self.best_split_on(feature, rows, totals) {
                if best.as_ref().is_none_or(|b| candidate.impurity < b.impurity) {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    fn best_split_on(
        &self,
        feature: usize,
        rows: &[usize],
        totals: &[f64],
    ) -> Option<SplitCandidate> {
        let mut sorted: Vec<(f64, usize)> = rows
            .iter()
            .map(|&r| (self.data.value(r, feature), r))
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let (first, last) = (sorted.first()?.0, sorted.last()?.0);
        if first >= last {
            return None;
        }

        let total_weight: f64 = totals.iter().sum();
        let min_leaf = self.params.min_samples_leaf;
        let mut left = vec![0.0; totals.len()];
        let mut left_weight = 0.0;
        let mut best: Option<SplitCandidate> = None;

        for i in 0..sorted.len() - 1 {
            let (value, row) = sorted[i];
            let w = self.weights[row];
            left[self.data.target(row)] += w;
            left_weight += w;

            let next = sorted[i + 1].0;
            if next <= value {
                continue;
            }
            let n_left = i + 1;
            if n_left < min_leaf || sorted.len() - n_left < min_leaf {
                continue;
            }

            let right_weight = total_weight - left_weight;
            let right: Vec<f64> = totals.iter().zip(&left).map(|(t, l)| t - l).collect();
            let impurity =
                left_weight * gini(&left, left_weight) + right_weight * gini(&right, right_weight);

            if best.as_ref().is_none_or(|b| impurity < b.impurity) {
                let mut threshold = value + (next - value) / 2.0;
                if threshold >= next {
                    threshold = value;
                }
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    impurity,
                });
            }
        }
        best
    }
}

fn gini(class_weights: &[f64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - class_weights
        .iter()
        .map(|w| (w / total).powi(2))
        .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: 2,
        }
    }

    fn separable() -> TrainingMatrix {
        // Class follows the first column; the second column is constant.
        let rows = vec![
            vec![1.0, 5.0],
            vec![2.0, 5.0],
            vec![3.0, 5.0],
            vec![10.0, 5.0],
            vec![11.0, 5.0],
            vec![12.0, 5.0],
        ];
        TrainingMatrix::new(rows, vec![0, 0, 0, 1, 1, 1], 2)
    }

    #[test]
    fn test_gini() {
        assert_eq!(gini(&[2.0, 0.0], 2.0), 0.0);
        assert!((gini(&[1.0, 1.0], 2.0) - 0.5).abs() < 1e-12);
        assert_eq!(gini(&[0.0, 0.0], 0.0), 0.0);
    }

    #[test]
    fn test_grow_splits_on_informative_feature_midpoint() {
        let data = separable();
        let weights = vec![1.0; data.n_rows()];
        let mut rng = StdRng::seed_from_u64(7);
        let tree = DecisionTree::grow(
            &data,
            &weights,
            &params(),
            OutputShape::ClassFractions,
            &mut rng,
        );

        let root = tree.root();
        let split = root.split.expect("root should split");
        assert_eq!(split.feature, 0);
        assert!((split.threshold - 6.5).abs() < 1e-12);
        assert_eq!(root.cover, 6.0);
        assert_eq!(root.value, vec![0.5, 0.5]);
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.depth(), 1);

        assert_eq!(tree.predict(&[2.5, 5.0]), &[1.0, 0.0]);
        assert_eq!(tree.predict(&[9.0, 5.0]), &[0.0, 1.0]);
        assert!(tree.validate(2, 2).is_ok());
    }

    #[test]
    fn test_weights_shape_cover_and_values() {
        let data = separable();
        // Row 0 drawn three times, rows 4 and 5 absent from the sample.
        let weights = vec![3.0, 1.0, 1.0, 1.0, 0.0, 0.0];
        let mut rng = StdRng::seed_from_u64(1);
        let tree = DecisionTree::grow(
            &data,
            &weights,
            &params(),
            OutputShape::PositiveClass,
            &mut rng,
        );

        let root = tree.root();
        assert_eq!(root.cover, 6.0);
        assert_eq!(root.value.len(), 1);
        assert!((root.value[0] - 1.0 / 6.0).abs() < 1e-12);
        assert!(tree.validate(2, 1).is_ok());
    }

    #[test]
    fn test_pure_node_is_leaf() {
        let data = TrainingMatrix::new(vec![vec![1.0], vec![2.0]], vec![1, 1], 2);
        let mut rng = StdRng::seed_from_u64(3);
        let tree = DecisionTree::grow(
            &data,
            &[1.0, 1.0],
            &params(),
            OutputShape::ClassFractions,
            &mut rng,
        );
        assert_eq!(tree.nodes().len(), 1);
        assert!(tree.root().is_leaf());
    }

    #[test]
    fn test_max_depth_limits_growth() {
        let rows: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64]).collect();
        let targets = vec![0, 1, 0, 1, 0, 1, 0, 1];
        let data = TrainingMatrix::new(rows, targets, 2);
        let limited = TreeParams {
            max_depth: Some(2),
            ..params()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let tree = DecisionTree::grow(
            &data,
            &[1.0; 8],
            &limited,
            OutputShape::ClassFractions,
            &mut rng,
        );
        assert!(tree.depth() <= 2);
    }

    #[test]
    fn test_cover_is_conserved_at_every_split() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![(i % 7) as f64, (i % 3) as f64]).collect();
        let targets: Vec<usize> = (0..20).map(|i| i % 3).collect();
        let data = TrainingMatrix::new(rows, targets, 3);
        let mut rng = StdRng::seed_from_u64(5);
        let tree = DecisionTree::grow(
            &data,
            &[1.0; 20],
            &params(),
            OutputShape::ClassFractions,
            &mut rng,
        );
        for node in tree.nodes() {
            if let Some(split) = node.split {
                let children = tree.nodes()[split.left].cover + tree.nodes()[split.right].cover;
                assert!((node.cover - children).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_validate_rejects_bad_child_index() {
        let tree = DecisionTree::from_nodes(vec![TreeNode {
            split: Some(Split {
                feature: 0,
                threshold: 1.0,
                left: 1,
                right: 2,
            }),
            cover: 2.0,
            value: vec![0.5, 0.5],
        }]);
        assert!(tree.validate(1, 2).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_and_nan_cover() {
        for cover in [0.0, -1.0, f64::NAN] {
            let tree = DecisionTree::from_nodes(vec![TreeNode {
                split: None,
                cover,
                value: vec![0.5, 0.5],
            }]);
            assert!(tree.validate(1, 2).is_err(), "cover {cover} accepted");
        }
    }
}
