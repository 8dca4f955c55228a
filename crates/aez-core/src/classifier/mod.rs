//! Classifier seam: feature matrices, training data and the trait the
//! imputation engine predicts through.

pub mod forest;
mod tree;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AezError, Result};

pub use forest::{ForestParams, RandomForest};

/// Row-major matrix of feature vectors, one row per pixel or sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    data: Vec<f32>,
    n_features: usize,
}

impl FeatureMatrix {
    pub fn new(n_features: usize) -> Self {
        Self {
            data: Vec::new(),
            n_features,
        }
    }

    pub fn with_capacity(n_features: usize, n_rows: usize) -> Self {
        Self {
            data: Vec::with_capacity(n_rows * n_features),
            n_features,
        }
    }

    /// Wrap a row-major buffer whose length is a multiple of `n_features`.
    pub fn from_rows(n_features: usize, data: Vec<f32>) -> Result<Self> {
        if n_features == 0 || data.len() % n_features != 0 {
            return Err(AezError::BufferSize {
                expected: data.len().next_multiple_of(n_features.max(1)),
                found: data.len(),
            });
        }
        Ok(Self { data, n_features })
    }

    pub fn push(&mut self, row: &[f32]) {
        debug_assert_eq!(row.len(), self.n_features);
        self.data.extend_from_slice(row);
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.n_features..(i + 1) * self.n_features]
    }

    #[inline]
    pub fn get(&self, i: usize, feature: usize) -> f32 {
        self.data[i * self.n_features + feature]
    }

    pub fn n_rows(&self) -> usize {
        if self.n_features == 0 {
            0
        } else {
            self.data.len() / self.n_features
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> + '_ {
        self.data.chunks_exact(self.n_features.max(1))
    }
}

/// Labelled feature vectors gathered at the sample pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingData {
    pub features: FeatureMatrix,
    pub labels: Vec<i32>,
}

impl TrainingData {
    pub fn new(n_features: usize) -> Self {
        Self {
            features: FeatureMatrix::new(n_features),
            labels: Vec::new(),
        }
    }

    pub fn push(&mut self, row: &[f32], label: i32) {
        self.features.push(row);
        self.labels.push(label);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.n_features()
    }

    pub fn class_counts(&self) -> BTreeMap<i32, usize> {
        let mut counts = BTreeMap::new();
        for &label in &self.labels {
            *counts.entry(label).or_insert(0) += 1;
        }
        counts
    }

    /// Distinct labels in ascending order.
    pub fn classes(&self) -> Vec<i32> {
        self.class_counts().into_keys().collect()
    }

    /// Rows at `indices`, in that order.
    pub fn subset(&self, indices: &[usize]) -> TrainingData {
        let mut out = TrainingData {
            features: FeatureMatrix::with_capacity(self.n_features(), indices.len()),
            labels: Vec::with_capacity(indices.len()),
        };
        for &i in indices {
            out.push(self.features.row(i), self.labels[i]);
        }
        out
    }
}

/// A trained model mapping feature vectors to class codes.
pub trait Classifier {
    /// Number of features each input row must carry.
    fn n_features(&self) -> usize;

    /// Class codes in the order of the probability columns.
    fn classes(&self) -> &[i32];

    /// Class probabilities, row-major `n_rows × classes().len()`.
    fn predict_proba(&self, x: &FeatureMatrix) -> Vec<f32>;

    /// Most probable class per row. Ties resolve to the earlier class.
    fn predict(&self, x: &FeatureMatrix) -> Vec<i32> {
        let classes = self.classes();
        let n_classes = classes.len();
        if n_classes == 0 {
            return Vec::new();
        }
        self.predict_proba(x)
            .chunks_exact(n_classes)
            .map(|p| classes[argmax(p)])
            .collect()
    }

    /// Relative importance of each feature, summing to 1, if the model has them.
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn n_features(&self) -> usize {
        (**self).n_features()
    }

    fn classes(&self) -> &[i32] {
        (**self).classes()
    }

    fn predict_proba(&self, x: &FeatureMatrix) -> Vec<f32> {
        (**self).predict_proba(x)
    }

    fn predict(&self, x: &FeatureMatrix) -> Vec<i32> {
        (**self).predict(x)
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        (**self).feature_importances()
    }
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl Classifier for Fixed {
        fn n_features(&self) -> usize {
            1
        }
        fn classes(&self) -> &[i32] {
            &[4, 9]
        }
        fn predict_proba(&self, x: &FeatureMatrix) -> Vec<f32> {
            x.rows().flat_map(|r| [r[0], 1.0 - r[0]]).collect()
        }
    }

    #[test]
    fn default_predict_is_argmax_with_first_on_tie() {
        let x = FeatureMatrix::from_rows(1, vec![0.9, 0.2, 0.5]).unwrap();
        assert_eq!(Fixed.predict(&x), vec![4, 9, 4]);
    }

    #[test]
    fn feature_matrix_rejects_ragged_buffer() {
        assert!(FeatureMatrix::from_rows(3, vec![0.0; 7]).is_err());
        let m = FeatureMatrix::from_rows(3, vec![0.0; 6]).unwrap();
        assert_eq!(m.n_rows(), 2);
    }

    #[test]
    fn training_data_counts_and_subsets() {
        let mut d = TrainingData::new(2);
        d.push(&[1.0, 2.0], 7);
        d.push(&[3.0, 4.0], 3);
        d.push(&[5.0, 6.0], 7);
        assert_eq!(d.classes(), vec![3, 7]);
        assert_eq!(d.class_counts()[&7], 2);
        let s = d.subset(&[2, 0]);
        assert_eq!(s.labels, vec![7, 7]);
        assert_eq!(s.features.row(0), &[5.0, 6.0]);
    }
}
