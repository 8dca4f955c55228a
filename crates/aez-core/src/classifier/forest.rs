//! Random forest: bootstrap-aggregated CART trees.
//!
//! Tree `i` draws its bootstrap sample and its split features from its own
//! RNG, seeded from the forest seed and `i`, so a fit is reproducible whether
//! the trees are grown sequentially or in parallel.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[cfg(feature = "threading")]
use rayon::prelude::*;

use super::tree::{DecisionTree, TreeParams};
use super::{Classifier, FeatureMatrix, TrainingData};
use crate::error::{AezError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Candidate features per split; `None` means `sqrt(n_features)`.
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 10,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    classes: Vec<i32>,
    n_features: usize,
    trees: Vec<DecisionTree>,
    importances: Vec<f64>,
}

fn tree_seed(seed: u64, i: usize) -> u64 {
    seed ^ (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn normalize(v: &mut [f64]) {
    let sum: f64 = v.iter().sum();
    if sum > 0.0 {
        v.iter_mut().for_each(|x| *x /= sum);
    }
}

impl RandomForest {
    pub fn fit(data: &TrainingData, params: &ForestParams) -> Result<Self> {
        if data.is_empty() {
            return Err(AezError::EmptyTrainingSet);
        }
        if params.n_trees == 0 {
            return Err(AezError::InvalidConfig("n_trees must be positive".into()));
        }

        let classes = data.classes();
        let n_features = data.n_features();
        let n = data.len();
        let y: Vec<usize> = data
            .labels
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or_default())
            .collect();

        let max_features = params
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().round() as usize)
            .clamp(1, n_features.max(1));
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features,
        };

        info!(
            "Training random forest: {} trees, {} samples, {} features, {} classes",
            params.n_trees,
            n,
            n_features,
            classes.len()
        );

        let grow = |i: usize| -> (DecisionTree, Vec<f64>) {
            let mut rng = StdRng::seed_from_u64(tree_seed(params.seed, i));
            let mut bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut importances = vec![0.0; n_features];
            let tree = DecisionTree::fit(
                &data.features,
                &y,
                classes.len(),
                &mut bootstrap,
                tree_params,
                &mut rng,
                &mut importances,
            );
            normalize(&mut importances);
            (tree, importances)
        };

        #[cfg(feature = "threading")]
        let grown: Vec<(DecisionTree, Vec<f64>)> = (0..params.n_trees).into_par_iter().map(grow).collect();
        #[cfg(not(feature = "threading"))]
        let grown: Vec<(DecisionTree, Vec<f64>)> = (0..params.n_trees).map(grow).collect();

        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(grown.len());
        for (tree, imp) in grown {
            debug!("Tree {}: depth {}", trees.len(), tree.depth());
            for (acc, v) in importances.iter_mut().zip(&imp) {
                *acc += v;
            }
            trees.push(tree);
        }
        normalize(&mut importances);

        Ok(Self {
            params: params.clone(),
            classes,
            n_features,
            trees,
            importances,
        })
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn classes(&self) -> &[i32] {
        &self.classes
    }

    fn predict_proba(&self, x: &FeatureMatrix) -> Vec<f32> {
        let n_classes = self.classes.len();
        let scale = 1.0 / self.trees.len().max(1) as f32;
        let mut out = vec![0.0f32; x.n_rows() * n_classes];
        for (row, probs) in x.rows().zip(out.chunks_exact_mut(n_classes.max(1))) {
            for tree in &self.trees {
                for (p, d) in probs.iter_mut().zip(tree.leaf_distribution(row)) {
                    *p += d;
                }
            }
            probs.iter_mut().for_each(|p| *p *= scale);
        }
        out
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        Some(self.importances.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Class 11 below 0 on feature 1, class 22 above; feature 0 is noise.
    fn separable(n: usize) -> TrainingData {
        let mut rng = StdRng::seed_from_u64(99);
        let mut d = TrainingData::new(2);
        for i in 0..n {
            let noise: f32 = rng.gen_range(-1.0..1.0);
            let signal: f32 = rng.gen_range(0.5..3.0);
            if i % 2 == 0 {
                d.push(&[noise, -signal], 11);
            } else {
                d.push(&[noise, signal], 22);
            }
        }
        d
    }

    #[test]
    fn probabilities_are_distributions() {
        let data = separable(60);
        let rf = RandomForest::fit(&data, &ForestParams::default()).unwrap();
        let p = rf.predict_proba(&data.features);
        assert_eq!(p.len(), 60 * 2);
        for row in p.chunks_exact(2) {
            assert_abs_diff_eq!(row[0] + row[1], 1.0, epsilon = 1e-5);
            assert!(row.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn learns_separable_problem() {
        let data = separable(80);
        let rf = RandomForest::fit(&data, &ForestParams::default()).unwrap();
        let x = FeatureMatrix::from_rows(2, vec![0.3, -2.0, -0.7, 2.5]).unwrap();
        assert_eq!(rf.predict(&x), vec![11, 22]);

        let imp = rf.feature_importances().unwrap();
        assert_abs_diff_eq!(imp.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert!(imp[1] > imp[0], "signal feature should dominate: {imp:?}");
    }

    #[test]
    fn same_seed_same_forest() {
        let data = separable(40);
        let params = ForestParams {
            seed: 7,
            ..Default::default()
        };
        let a = RandomForest::fit(&data, &params).unwrap();
        let b = RandomForest::fit(&data, &params).unwrap();
        assert_eq!(a.params().seed, 7);
        assert_eq!(a.predict_proba(&data.features), b.predict_proba(&data.features));
        assert_eq!(a.feature_importances(), b.feature_importances());
    }

    #[test]
    fn json_round_trip_predicts_identically() {
        let data = separable(30);
        let rf = RandomForest::fit(&data, &ForestParams::default()).unwrap();
        let json = serde_json::to_string(&rf).unwrap();
        let back: RandomForest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.classes(), rf.classes());
        assert_eq!(back.params(), rf.params());
        assert_eq!(back.n_trees(), 10);
        assert_eq!(back.predict_proba(&data.features), rf.predict_proba(&data.features));
    }

    #[test]
    fn empty_training_set_rejected() {
        assert!(matches!(
            RandomForest::fit(&TrainingData::new(3), &ForestParams::default()),
            Err(AezError::EmptyTrainingSet)
        ));
    }
}
