//! Training state shared by every scenario of a run: the sample set, the
//! training data gathered at it, the fitted model and its CV summary.
//!
//! Each piece is taken from the run cache when a usable copy exists and
//! recomputed otherwise. Drawing a new sample set invalidates the cached
//! model and CV summary.

use log::{info, warn};

use crate::cache::{RunCache, CV_KEY, MODEL_KEY, SAMPLES_KEY};
use crate::classifier::{Classifier, RandomForest, TrainingData};
use crate::config::PipelineConfig;
use crate::error::{AezError, Result};
use crate::explanatory::ExplanatorySet;
use crate::raster::geotiff::{read_full, GeoTiffReader};
use crate::raster::RasterSource;
use crate::sampling::{gather_training, stratified_sample, SampleSet};
use crate::validation::{cross_validate, ranked_importances};

pub struct RunContext {
    pub cache: RunCache,
    pub samples: SampleSet,
    pub training: TrainingData,
    pub model: RandomForest,
    /// Cross-validation summary line.
    pub cv: String,
}

fn persist(result: Result<()>, key: &str) {
    if let Err(e) = result {
        warn!("Could not cache {}: {}", key, e);
    }
}

impl RunContext {
    pub fn prepare(config: &PipelineConfig, cache: RunCache) -> Result<Self> {
        let policy = config.nodata_policy();
        let response_path = config.response_path();
        let (response, response_meta) = read_full(&response_path)?;

        let set = ExplanatorySet::from_dir(&config.training_dir(), &config.explanatory_fields);
        let mut layers: Vec<GeoTiffReader> = set.open()?;
        if let Some(first) = layers.first() {
            if !first.metadata().same_grid(&response_meta) {
                return Err(AezError::GridMismatch {
                    layer: config.response_raster.clone(),
                    expected: first.metadata().describe(),
                    found: response_meta.describe(),
                });
            }
        }

        let draw = || -> Result<SampleSet> {
            let samples = stratified_sample(&response, response_meta.nodata, &policy, &config.sampling)?;
            persist(cache.store(SAMPLES_KEY, &samples), SAMPLES_KEY);
            Ok(samples)
        };

        // Model and CV line are only reusable with the sample set they came from.
        let (samples, training, resampled) = match cache.load_cached::<SampleSet>(SAMPLES_KEY) {
            Some(cached) if !cached.is_empty() => {
                info!("Loaded {} cached samples", cached.len());
                match gather_training(&response, response_meta.nodata, &mut layers, &cached, &policy) {
                    Ok(training) => (cached, training, false),
                    Err(e @ (AezError::InvalidSample { .. } | AezError::EmptyTrainingSet)) => {
                        warn!("Cached samples are unusable ({e}); resampling");
                        let samples = draw()?;
                        let training =
                            gather_training(&response, response_meta.nodata, &mut layers, &samples, &policy)?;
                        (samples, training, true)
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => {
                info!("Random stratified sampling");
                let samples = draw()?;
                let training = gather_training(&response, response_meta.nodata, &mut layers, &samples, &policy)?;
                (samples, training, true)
            }
        };
        info!("{} samples, {} usable for training", samples.len(), training.len());

        let cached_model = if resampled {
            None
        } else {
            cache.load_cached::<RandomForest>(MODEL_KEY)
        };
        let model = match cached_model {
            Some(m) if m.n_features() == training.n_features() && m.classes() == training.classes().as_slice() => {
                info!("Using cached classifier @ {}", cache.path(MODEL_KEY).display());
                m
            }
            cached => {
                if let Some(m) = cached {
                    warn!(
                        "Cached classifier ({} features, classes {:?}) does not match the training data; retraining",
                        m.n_features(),
                        m.classes()
                    );
                }
                let model = RandomForest::fit(&training, &config.forest)?;
                persist(cache.store(MODEL_KEY, &model), MODEL_KEY);
                model
            }
        };

        let cached_cv = if resampled { None } else { cache.load_text(CV_KEY) };
        let cv = match cached_cv {
            Some(text) => text.trim().to_string(),
            None => {
                let summary = cross_validate(&config.forest, &training, config.cv_folds, config.cv_seed)?;
                let line = summary.to_string();
                persist(cache.store_text(CV_KEY, &line), CV_KEY);
                line
            }
        };

        Ok(Self {
            cache,
            samples,
            training,
            model,
            cv,
        })
    }

    /// Model feature importances by name, most important first.
    pub fn importances<S: AsRef<str>>(&self, names: &[S]) -> Vec<(String, f64)> {
        self.model
            .feature_importances()
            .map(|imp| ranked_importances(names, &imp))
            .unwrap_or_default()
    }
}
