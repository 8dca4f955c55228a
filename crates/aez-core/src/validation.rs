//! Stratified k-fold cross-validation and feature-importance ranking.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::classifier::{Classifier, ForestParams, RandomForest, TrainingData};
use crate::error::{AezError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvSummary {
    pub folds: usize,
    pub scores: Vec<f64>,
    pub mean: f64,
    /// Population standard deviation of the fold scores.
    pub std: f64,
}

impl CvSummary {
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let n = scores.len().max(1) as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Self {
            folds: scores.len(),
            scores,
            mean,
            std: var.sqrt(),
        }
    }
}

impl fmt::Display for CvSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-fold Cross Validation Accuracy: {:.2} (+/- {:.2})",
            self.folds,
            self.mean * 100.0,
            self.std * 200.0
        )
    }
}

/// Fold index per sample. Samples are shuffled, grouped by label, and dealt
/// round-robin so every fold sees each class in proportion.
pub fn fold_assignment(labels: &[i32], folds: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut by_class: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for i in order {
        by_class.entry(labels[i]).or_default().push(i);
    }

    let mut assignment = vec![0usize; labels.len()];
    let mut next = 0usize;
    for members in by_class.values() {
        for &i in members {
            assignment[i] = next % folds;
            next += 1;
        }
    }
    assignment
}

/// Accuracy of forests trained on `folds - 1` folds and scored on the rest.
pub fn cross_validate(
    params: &ForestParams,
    data: &TrainingData,
    folds: usize,
    seed: u64,
) -> Result<CvSummary> {
    if folds < 2 {
        return Err(AezError::InvalidConfig(format!(
            "cross-validation needs at least 2 folds, got {folds}"
        )));
    }
    if data.len() < folds {
        return Err(AezError::InvalidConfig(format!(
            "{} samples cannot be split into {} folds",
            data.len(),
            folds
        )));
    }

    let assignment = fold_assignment(&data.labels, folds, seed);
    let mut scores = Vec::with_capacity(folds);
    for fold in 0..folds {
        let (test, train): (Vec<usize>, Vec<usize>) =
            (0..data.len()).partition(|&i| assignment[i] == fold);
        let model = RandomForest::fit(&data.subset(&train), params)?;
        let held_out = data.subset(&test);
        let predicted = model.predict(&held_out.features);
        let correct = predicted
            .iter()
            .zip(&held_out.labels)
            .filter(|(p, l)| p == l)
            .count();
        let score = correct as f64 / test.len() as f64;
        debug!("Fold {}: {}/{} correct", fold, correct, test.len());
        scores.push(score);
    }

    let summary = CvSummary::from_scores(scores);
    info!("{}", summary);
    Ok(summary)
}

/// Feature names with importance percentages (one decimal), most important first.
pub fn ranked_importances<S: AsRef<str>>(names: &[S], importances: &[f64]) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = names
        .iter()
        .zip(importances)
        .map(|(n, &v)| (n.as_ref().to_string(), (v * 1000.0).round() / 10.0))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}
