//! Pipeline configuration. Every field has a default, so an empty JSON
//! object (or no file at all) describes the standard run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classifier::ForestParams;
use crate::error::{AezError, Result};
use crate::impute::{ImputeOptions, DEFAULT_CHUNK_HEIGHT};
use crate::raster::{NodataPolicy, DEFAULT_NODATA};
use crate::sampling::SamplingParams;
use crate::scenario::{projection_scenarios, Scenario, ScenarioInputs};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root holding `training/` and `<projection>/<period>/` raster directories.
    pub input_dir: PathBuf,
    pub training_subdir: String,
    /// Parent of the `out_aezs_*` directories.
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,

    /// Feature order for training and every scenario.
    pub explanatory_fields: Vec<String>,
    /// Fields swapped for projected rasters in projection scenarios.
    pub climate_fields: Vec<String>,
    /// Response raster file name inside the training directory.
    pub response_raster: String,

    pub projections: Vec<String>,
    pub periods: Vec<String>,
    pub include_current: bool,

    pub sampling: SamplingParams,
    pub forest: ForestParams,
    pub cv_folds: usize,
    pub cv_seed: u64,

    pub chunk_height: usize,
    pub nodata: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("inputs"),
            training_subdir: "training".to_string(),
            output_dir: PathBuf::from("."),
            cache_dir: PathBuf::from(".cache"),
            explanatory_fields: strings(&[
                "tmin12c",
                "tmax8c",
                "p_ph_c",
                "pmean_wntrc",
                "pmean_sumrc",
                "irr_lands",
                "gt_demc",
                "grwsnc",
                "d2u2c",
            ]),
            climate_fields: strings(&["grwsnc", "pmean_sumrc", "pmean_wntrc", "tmax8c", "tmin12c"]),
            response_raster: "iso_zns3-27.tif".to_string(),
            projections: strings(&["RCP85"]),
            periods: strings(&["2070s"]),
            include_current: true,
            sampling: SamplingParams::default(),
            forest: ForestParams::default(),
            cv_folds: 5,
            cv_seed: 0,
            chunk_height: DEFAULT_CHUNK_HEIGHT,
            nodata: DEFAULT_NODATA,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(AezError::InvalidConfig(msg));

        if self.explanatory_fields.is_empty() {
            return invalid("explanatory_fields is empty".into());
        }
        for (i, f) in self.explanatory_fields.iter().enumerate() {
            if self.explanatory_fields[..i].contains(f) {
                return invalid(format!("explanatory field '{f}' is listed twice"));
            }
        }
        if let Some(f) = self
            .climate_fields
            .iter()
            .find(|f| !self.explanatory_fields.contains(f))
        {
            return invalid(format!("climate field '{f}' is not an explanatory field"));
        }
        if self.chunk_height == 0 {
            return invalid("chunk_height must be positive".into());
        }
        if self.cv_folds < 2 {
            return invalid(format!("cv_folds must be at least 2, got {}", self.cv_folds));
        }
        if self.sampling.target_sample_size == 0 {
            return invalid("sampling.target_sample_size must be positive".into());
        }
        if !(self.sampling.min_sample_proportion > 0.0 && self.sampling.min_sample_proportion <= 1.0) {
            return invalid(format!(
                "sampling.min_sample_proportion must be in (0, 1], got {}",
                self.sampling.min_sample_proportion
            ));
        }
        if self.forest.n_trees == 0 {
            return invalid("forest.n_trees must be positive".into());
        }
        self.nodata_policy().sentinel_i16()?;
        Ok(())
    }

    pub fn training_dir(&self) -> PathBuf {
        self.input_dir.join(&self.training_subdir)
    }

    pub fn response_path(&self) -> PathBuf {
        self.training_dir().join(&self.response_raster)
    }

    pub fn nodata_policy(&self) -> NodataPolicy {
        NodataPolicy::new(self.nodata)
    }

    pub fn impute_options(&self) -> ImputeOptions {
        ImputeOptions {
            chunk_height: self.chunk_height,
            nodata: self.nodata_policy(),
        }
    }

    pub fn scenario_inputs(&self) -> ScenarioInputs {
        ScenarioInputs {
            training_dir: self.training_dir(),
            projections_root: self.input_dir.clone(),
            fields: self.explanatory_fields.clone(),
            climate_fields: self.climate_fields.clone(),
        }
    }

    /// `CURRENT` (unless disabled) followed by every projection × period.
    pub fn scenarios(&self) -> Vec<Scenario> {
        let mut out = Vec::new();
        if self.include_current {
            out.push(Scenario::Current);
        }
        out.extend(projection_scenarios(&self.projections, &self.periods));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_standard_run() {
        let c = PipelineConfig::default();
        c.validate().unwrap();
        assert_eq!(c.explanatory_fields.len(), 9);
        assert_eq!(c.response_path(), Path::new("inputs/training/iso_zns3-27.tif"));
        let labels: Vec<String> = c.scenarios().iter().map(Scenario::label).collect();
        assert_eq!(labels, ["CURRENT", "RCP85_2070s"]);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: PipelineConfig = serde_json::from_str(r#"{"chunk_height": 16, "sampling": {"seed": 9}}"#).unwrap();
        assert_eq!(c.chunk_height, 16);
        assert_eq!(c.sampling.seed, 9);
        assert_eq!(c.sampling.target_sample_size, 20);
        assert_eq!(c.forest.n_trees, 10);
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let unknown_climate = PipelineConfig {
            climate_fields: strings(&["rainfall"]),
            ..Default::default()
        };
        assert!(unknown_climate.validate().is_err());

        let no_chunks = PipelineConfig {
            chunk_height: 0,
            ..Default::default()
        };
        assert!(no_chunks.validate().is_err());

        let one_fold = PipelineConfig {
            cv_folds: 1,
            ..Default::default()
        };
        assert!(one_fold.validate().is_err());

        let dup = PipelineConfig {
            explanatory_fields: strings(&["a", "a"]),
            climate_fields: vec![],
            ..Default::default()
        };
        assert!(dup.validate().is_err());
    }

    #[test]
    fn load_reads_and_validates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aez.json");
        fs::write(&path, r#"{"cv_folds": 3, "projections": ["RCP45", "RCP85"]}"#).unwrap();
        let c = PipelineConfig::load(&path).unwrap();
        assert_eq!(c.cv_folds, 3);
        assert_eq!(c.scenarios().len(), 3);

        fs::write(&path, r#"{"cv_folds": 0}"#).unwrap();
        assert!(matches!(PipelineConfig::load(&path), Err(AezError::InvalidConfig(_))));
    }
}
