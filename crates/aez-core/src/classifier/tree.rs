//! CART decision tree with Gini splits, grown on a bootstrap sample.

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::FeatureMatrix;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Node {
    /// Class frequencies of the training rows that reached the leaf.
    Leaf { distribution: Vec<f32> },
    /// Rows with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DecisionTree {
    nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f32,
    /// Rows going left once `indices` is sorted by `feature`.
    n_left: usize,
    /// Weighted Gini impurity of the two children (in row units).
    impurity: f64,
}

struct Builder<'a, R: Rng> {
    x: &'a FeatureMatrix,
    y: &'a [usize],
    n_classes: usize,
    params: TreeParams,
    rng: &'a mut R,
    importances: &'a mut [f64],
    nodes: Vec<Node>,
}

fn class_counts(y: &[usize], indices: &[usize], n_classes: usize) -> Vec<usize> {
    let mut counts = vec![0usize; n_classes];
    for &i in indices {
        counts[y[i]] += 1;
    }
    counts
}

/// Σc² / n: the part of `n · gini` that varies between candidate splits.
fn purity(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    counts.iter().map(|&c| (c * c) as f64).sum::<f64>() / n as f64
}

impl<'a, R: Rng> Builder<'a, R> {
    fn leaf(&mut self, counts: &[usize], n: usize) -> usize {
        let distribution = counts.iter().map(|&c| c as f32 / n as f32).collect();
        self.nodes.push(Node::Leaf { distribution });
        self.nodes.len() - 1
    }

    fn build(&mut self, indices: &mut [usize], depth: usize) -> usize {
        let n = indices.len();
        let counts = class_counts(self.y, indices, self.n_classes);
        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let too_deep = self.params.max_depth.is_some_and(|d| depth >= d);

        if pure || too_deep || n < self.params.min_samples_split.max(2) {
            return self.leaf(&counts, n);
        }

        let Some(split) = self.best_split(indices, &counts) else {
            return self.leaf(&counts, n);
        };

        let parent_impurity = n as f64 - purity(&counts, n);
        self.importances[split.feature] += parent_impurity - split.impurity;

        let feature = split.feature;
        let x = self.x;
        indices.sort_by(|&a, &b| x.get(a, feature).total_cmp(&x.get(b, feature)));
        let (left_idx, right_idx) = indices.split_at_mut(split.n_left);

        // Reserve the slot so children are pushed after their parent.
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf {
            distribution: Vec::new(),
        });
        let left = self.build(left_idx, depth + 1);
        let right = self.build(right_idx, depth + 1);
        self.nodes[slot] = Node::Split {
            feature,
            threshold: split.threshold,
            left,
            right,
        };
        slot
    }

    /// Scan at least `max_features` random features, continuing past that
    /// only until some feature yields a valid split.
    fn best_split(&mut self, indices: &mut [usize], counts: &[usize]) -> Option<Split> {
        let n_features = self.x.n_features();
        let order = index::sample(&mut *self.rng, n_features, n_features);
        let mut best: Option<Split> = None;

        for (visited, feature) in order.iter().enumerate() {
            if visited >= self.params.max_features && best.is_some() {
                break;
            }
            if let Some(s) = self.split_on(feature, indices, counts) {
                if best.as_ref().map_or(true, |b| s.impurity < b.impurity) {
                    best = Some(s);
                }
            }
        }
        best
    }

    fn split_on(&self, feature: usize, indices: &mut [usize], counts: &[usize]) -> Option<Split> {
        let x = self.x;
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        indices.sort_by(|&a, &b| x.get(a, feature).total_cmp(&x.get(b, feature)));

        let mut left = vec![0usize; self.n_classes];
        let mut right = counts.to_vec();
        let mut best: Option<Split> = None;

        for pos in 0..n - 1 {
            let c = self.y[indices[pos]];
            left[c] += 1;
            right[c] -= 1;

            let n_left = pos + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }
            let lo = x.get(indices[pos], feature);
            let hi = x.get(indices[pos + 1], feature);
            if lo >= hi {
                continue;
            }

            let impurity = n as f64 - purity(&left, n_left) - purity(&right, n_right);
            if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                let mid = lo + (hi - lo) / 2.0;
                let threshold = if mid < hi { mid } else { lo };
                best = Some(Split {
                    feature,
                    threshold,
                    n_left,
                    impurity,
                });
            }
        }
        best
    }
}

impl DecisionTree {
    /// Grow a tree on `indices` (which may repeat) of `x`, with `y` holding
    /// class indices. Impurity decreases are added to `importances`.
    pub(crate) fn fit<R: Rng>(
        x: &FeatureMatrix,
        y: &[usize],
        n_classes: usize,
        indices: &mut [usize],
        params: TreeParams,
        rng: &mut R,
        importances: &mut [f64],
    ) -> Self {
        let mut builder = Builder {
            x,
            y,
            n_classes,
            params,
            rng,
            importances,
            nodes: Vec::new(),
        };
        builder.build(indices, 0);
        Self {
            nodes: builder.nodes,
        }
    }

    pub(crate) fn leaf_distribution(&self, row: &[f32]) -> &[f32] {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    i = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub(crate) fn depth(&self) -> usize {
        fn walk(nodes: &[Node], i: usize) -> usize {
            match &nodes[i] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params(max_features: usize) -> TreeParams {
        TreeParams {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features,
        }
    }

    #[test]
    fn single_threshold_separates_two_classes() {
        let x = FeatureMatrix::from_rows(1, vec![1.0, 2.0, 3.0, 10.0, 11.0, 12.0]).unwrap();
        let y = [0, 0, 0, 1, 1, 1];
        let mut idx: Vec<usize> = (0..6).collect();
        let mut imp = vec![0.0; 1];
        let mut rng = StdRng::seed_from_u64(1);
        let tree = DecisionTree::fit(&x, &y, 2, &mut idx, params(1), &mut rng, &mut imp);

        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.leaf_distribution(&[2.5]), &[1.0, 0.0]);
        assert_eq!(tree.leaf_distribution(&[6.6]), &[0.0, 1.0]);
        assert!(imp[0] > 0.0);
    }

    #[test]
    fn uninformative_feature_gets_no_importance() {
        // Feature 0 is constant; feature 1 carries the class.
        let x = FeatureMatrix::from_rows(2, vec![5.0, 0.0, 5.0, 1.0, 5.0, 8.0, 5.0, 9.0]).unwrap();
        let y = [0, 0, 1, 1];
        let mut idx: Vec<usize> = (0..4).collect();
        let mut imp = vec![0.0; 2];
        let mut rng = StdRng::seed_from_u64(3);
        // max_features = 1 still finds the split via the fallback scan.
        let tree = DecisionTree::fit(&x, &y, 2, &mut idx, params(1), &mut rng, &mut imp);

        assert_eq!(imp[0], 0.0);
        assert!(imp[1] > 0.0);
        assert_eq!(tree.leaf_distribution(&[5.0, 0.5]), &[1.0, 0.0]);
    }

    #[test]
    fn depth_limit_yields_mixed_leaf() {
        let x = FeatureMatrix::from_rows(1, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let y = [0, 1, 0, 1];
        let mut idx: Vec<usize> = (0..4).collect();
        let mut imp = vec![0.0; 1];
        let mut rng = StdRng::seed_from_u64(0);
        let p = TreeParams {
            max_depth: Some(0),
            ..params(1)
        };
        let tree = DecisionTree::fit(&x, &y, 2, &mut idx, p, &mut rng, &mut imp);
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.leaf_distribution(&[1.0]), &[0.5, 0.5]);
    }
}
