//! Stratified pixel sampling of the response raster and extraction of the
//! training feature vectors at the sampled pixels.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::classifier::TrainingData;
use crate::error::{AezError, Result};
use crate::grid::Grid;
use crate::raster::{NodataPolicy, RasterSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PixelCoord {
    pub row: usize,
    pub col: usize,
}

impl PixelCoord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Pixel coordinates selected for training, sorted in raster order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    pub coords: Vec<PixelCoord>,
}

impl SampleSet {
    pub fn new(mut coords: Vec<PixelCoord>) -> Self {
        coords.sort_unstable();
        coords.dedup();
        Self { coords }
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Pixels drawn from each class that has at least this many.
    pub target_sample_size: usize,
    /// Fraction drawn from classes smaller than the target.
    pub min_sample_proportion: f64,
    pub seed: u64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            target_sample_size: 20,
            min_sample_proportion: 0.5,
            seed: 0,
        }
    }
}

impl SamplingParams {
    /// Number of pixels to draw from a class with `count` valid pixels.
    pub fn quota(&self, count: usize) -> usize {
        if count >= self.target_sample_size {
            self.target_sample_size
        } else {
            let share = (count as f64 * self.min_sample_proportion).ceil() as usize;
            share.max(1).min(count)
        }
    }
}

/// Draw a stratified sample: every distinct valid response value is a class
/// and contributes `params.quota(count)` pixels chosen uniformly at random.
pub fn stratified_sample(
    response: &Grid<f32>,
    response_nodata: Option<f64>,
    policy: &NodataPolicy,
    params: &SamplingParams,
) -> Result<SampleSet> {
    let mut by_class: BTreeMap<i32, Vec<PixelCoord>> = BTreeMap::new();
    for row in 0..response.height {
        for (col, &v) in response.rows(row, 1).iter().enumerate() {
            if policy.is_nodata(v, response_nodata) {
                continue;
            }
            by_class
                .entry(v.round() as i32)
                .or_default()
                .push(PixelCoord::new(row, col));
        }
    }

    if by_class.is_empty() {
        return Err(AezError::NoValidClasses);
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut coords = Vec::new();
    for (class, pixels) in &by_class {
        let take = params.quota(pixels.len());
        debug!("Class {}: {} pixels, sampling {}", class, pixels.len(), take);
        if take >= pixels.len() {
            coords.extend_from_slice(pixels);
        } else {
            coords.extend(index::sample(&mut rng, pixels.len(), take).iter().map(|i| pixels[i]));
        }
    }

    let samples = SampleSet::new(coords);
    info!(
        "Selected {} sample pixels across {} classes",
        samples.len(),
        by_class.len()
    );
    Ok(samples)
}

/// Feature vectors and labels at `samples`. Each needed row is read once per
/// layer. A sample on a nodata response pixel is an error; samples with a
/// nodata feature are dropped.
pub fn gather_training<S: RasterSource>(
    response: &Grid<f32>,
    response_nodata: Option<f64>,
    layers: &mut [S],
    samples: &SampleSet,
    policy: &NodataPolicy,
) -> Result<TrainingData> {
    let n_features = layers.len();
    if let Some(first) = layers.first() {
        let m = first.metadata();
        if m.width != response.width || m.height != response.height {
            return Err(AezError::GridMismatch {
                layer: "response".to_string(),
                expected: m.describe(),
                found: format!("{}x{}", response.width, response.height),
            });
        }
    }

    let mut rows: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (k, c) in samples.coords.iter().enumerate() {
        if c.row >= response.height || c.col >= response.width {
            return Err(AezError::InvalidSample {
                row: c.row,
                col: c.col,
                reason: format!("outside the {}x{} raster", response.width, response.height),
            });
        }
        rows.entry(c.row).or_default().push(k);
    }

    let mut features = vec![0.0f32; samples.len() * n_features];
    let mut nodata = vec![false; samples.len()];
    for (j, layer) in layers.iter_mut().enumerate() {
        let layer_nodata = layer.metadata().nodata;
        for (&row, members) in &rows {
            let values = layer.read_rows(row, 1)?;
            for &k in members {
                let v = values[samples.coords[k].col];
                features[k * n_features + j] = v;
                nodata[k] |= policy.is_nodata(v, layer_nodata);
            }
        }
    }

    let mut data = TrainingData::new(n_features);
    let mut dropped = 0usize;
    for (k, c) in samples.coords.iter().enumerate() {
        let label = response.get(c.row, c.col);
        if policy.is_nodata(label, response_nodata) {
            return Err(AezError::InvalidSample {
                row: c.row,
                col: c.col,
                reason: "response is nodata".to_string(),
            });
        }
        if nodata[k] {
            dropped += 1;
            continue;
        }
        data.push(&features[k * n_features..(k + 1) * n_features], label.round() as i32);
    }

    if dropped > 0 {
        warn!("Dropped {} samples with nodata explanatory values", dropped);
    }
    if data.is_empty() {
        return Err(AezError::EmptyTrainingSet);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{MemoryRaster, RasterMetadata};

    /// 10x10 response: class 1 on 90 pixels, class 2 on 6, class 3 on 1,
    /// nodata on 3.
    fn response() -> Grid<f32> {
        let mut g = Grid::new(10, 10, 1.0f32);
        for col in 0..6 {
            g.set(9, col, 2.0);
        }
        g.set(0, 0, 3.0);
        for col in 7..10 {
            g.set(5, col, -9999.0);
        }
        g
    }

    #[test]
    fn quota_follows_target_and_proportion() {
        let p = SamplingParams::default();
        assert_eq!(p.quota(90), 20);
        assert_eq!(p.quota(20), 20);
        assert_eq!(p.quota(7), 4);
        assert_eq!(p.quota(1), 1);
    }

    #[test]
    fn per_class_counts_and_no_nodata_pixels() {
        let g = response();
        let s = stratified_sample(&g, None, &NodataPolicy::default(), &SamplingParams::default()).unwrap();
        let mut counts = BTreeMap::new();
        for c in &s.coords {
            *counts.entry(g.get(c.row, c.col) as i32).or_insert(0) += 1;
        }
        assert_eq!(counts.get(&1), Some(&20));
        assert_eq!(counts.get(&2), Some(&3));
        assert_eq!(counts.get(&3), Some(&1));
        assert!(!counts.contains_key(&-9999));
        assert!(s.coords.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let g = response();
        let policy = NodataPolicy::default();
        let p = SamplingParams {
            seed: 42,
            ..Default::default()
        };
        let a = stratified_sample(&g, None, &policy, &p).unwrap();
        let b = stratified_sample(&g, None, &policy, &p).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn all_nodata_response_has_no_classes() {
        let g = Grid::new(3, 3, f32::NAN);
        assert!(matches!(
            stratified_sample(&g, None, &NodataPolicy::default(), &SamplingParams::default()),
            Err(AezError::NoValidClasses)
        ));
    }

    #[test]
    fn gather_drops_nodata_features_and_keeps_order() {
        let resp = Grid::from_vec(2, 2, vec![5.0, 6.0, 5.0, 6.0]).unwrap();
        let f0 = Grid::from_vec(2, 2, vec![0.1, 0.2, 0.3, -9999.0]).unwrap();
        let f1 = Grid::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut layers = vec![
            MemoryRaster::new("f0", f0, RasterMetadata::new(2, 2)).unwrap(),
            MemoryRaster::new("f1", f1, RasterMetadata::new(2, 2)).unwrap(),
        ];
        let samples = SampleSet::new(vec![
            PixelCoord::new(1, 1),
            PixelCoord::new(0, 1),
            PixelCoord::new(1, 0),
        ]);
        let data = gather_training(&resp, None, &mut layers, &samples, &NodataPolicy::default()).unwrap();

        assert_eq!(data.labels, vec![6, 5]);
        assert_eq!(data.features.row(0), &[0.2, 2.0]);
        assert_eq!(data.features.row(1), &[0.3, 3.0]);
    }

    #[test]
    fn gather_rejects_sample_on_nodata_response() {
        let resp = Grid::from_vec(2, 1, vec![-9999.0, 4.0]).unwrap();
        let mut layers = vec![MemoryRaster::new("f", Grid::new(2, 1, 1.0), RasterMetadata::new(2, 1)).unwrap()];
        let samples = SampleSet::new(vec![PixelCoord::new(0, 0)]);
        assert!(matches!(
            gather_training(&resp, None, &mut layers, &samples, &NodataPolicy::default()),
            Err(AezError::InvalidSample { row: 0, col: 0, .. })
        ));
    }
}
