//! Agro-ecological zone imputation.
//!
//! Samples a sparse response raster, fits a random forest on the explanatory
//! rasters at the sampled pixels, and imputes zone class, per-class
//! probability and certainty rasters for the current climate and for each
//! projected climate scenario, streaming every raster in row bands.

pub mod cache;
pub mod chunking;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod explanatory;
pub mod grid;
pub mod impute;
pub mod raster;
pub mod sampling;
pub mod scenario;
pub mod validation;

pub use cache::RunCache;
pub use classifier::{Classifier, FeatureMatrix, ForestParams, RandomForest, TrainingData};
pub use config::PipelineConfig;
pub use context::RunContext;
pub use error::{AezError, Result};
pub use explanatory::{ExplanatoryLayer, ExplanatorySet};
pub use grid::Grid;
pub use impute::{impute, impute_to_dir, ImputeOptions, ImputeReport, OutputPaths};
pub use raster::{NodataPolicy, RasterMetadata, RasterSink, RasterSource};
pub use sampling::{PixelCoord, SampleSet, SamplingParams};
pub use scenario::{run_scenarios, Scenario, ScenarioInputs, ScenarioRun};
pub use validation::CvSummary;
