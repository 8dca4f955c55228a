//! Scenario driver: pick the explanatory layers for current or projected
//! climate and impute each scenario into its own output directory.

use std::fmt;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;
use crate::error::Result;
use crate::explanatory::{ExplanatoryLayer, ExplanatorySet};
use crate::impute::{impute_to_dir, ImputeOptions, ImputeReport};

/// Prefix of every per-scenario output directory.
pub const OUTPUT_DIR_PREFIX: &str = "out_aezs";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scenario {
    Current,
    Projection { projection: String, period: String },
}

impl Scenario {
    pub fn projection(projection: impl Into<String>, period: impl Into<String>) -> Self {
        Scenario::Projection {
            projection: projection.into(),
            period: period.into(),
        }
    }

    /// `CURRENT`, or `<projection>_<period>` such as `RCP85_2070s`.
    pub fn label(&self) -> String {
        match self {
            Scenario::Current => "CURRENT".to_string(),
            Scenario::Projection { projection, period } => format!("{projection}_{period}"),
        }
    }

    pub fn output_dir(&self, root: &Path) -> PathBuf {
        root.join(format!("{}_{}", OUTPUT_DIR_PREFIX, self.label()))
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Every projection × period pair, projection-major.
pub fn projection_scenarios<S: AsRef<str>>(projections: &[S], periods: &[S]) -> Vec<Scenario> {
    projections
        .iter()
        .flat_map(|p| periods.iter().map(move |y| Scenario::projection(p.as_ref(), y.as_ref())))
        .collect()
}

/// Where the layers of each scenario live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioInputs {
    /// Training-period rasters, `<training_dir>/<field>.tif`.
    pub training_dir: PathBuf,
    /// Projected rasters, `<projections_root>/<projection>/<period>/<field>.tif`.
    pub projections_root: PathBuf,
    /// Feature order shared by every scenario.
    pub fields: Vec<String>,
    /// Fields replaced by projected rasters in projection scenarios.
    pub climate_fields: Vec<String>,
}

impl ScenarioInputs {
    pub fn is_climate(&self, field: &str) -> bool {
        self.climate_fields.iter().any(|f| f == field)
    }

    pub fn projection_dir(&self, projection: &str, period: &str) -> PathBuf {
        self.projections_root.join(projection).join(period)
    }

    /// Layers for `scenario` in field order. Static layers always come from
    /// the training directory.
    pub fn explanatory_set(&self, scenario: &Scenario) -> ExplanatorySet {
        let layers = self
            .fields
            .iter()
            .map(|field| match scenario {
                Scenario::Projection { projection, period } if self.is_climate(field) => {
                    ExplanatoryLayer::in_dir(&self.projection_dir(projection, period), field)
                }
                _ => ExplanatoryLayer::in_dir(&self.training_dir, field),
            })
            .collect();
        ExplanatorySet::new(layers)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioRun {
    pub scenario: Scenario,
    pub output_dir: PathBuf,
    pub report: ImputeReport,
}

/// Impute each scenario in turn with the one shared model. The first
/// failure aborts the run.
pub fn run_scenarios<C: Classifier + ?Sized>(
    classifier: &C,
    inputs: &ScenarioInputs,
    scenarios: &[Scenario],
    output_root: &Path,
    options: &ImputeOptions,
) -> Result<Vec<ScenarioRun>> {
    let mut runs = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let output_dir = scenario.output_dir(output_root);
        info!("Scenario {} → {}", scenario, output_dir.display());
        let set = inputs.explanatory_set(scenario);
        let report = impute_to_dir(classifier, &set, &output_dir, options)?;
        runs.push(ScenarioRun {
            scenario: scenario.clone(),
            output_dir,
            report,
        });
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> ScenarioInputs {
        ScenarioInputs {
            training_dir: PathBuf::from("inputs/training"),
            projections_root: PathBuf::from("inputs"),
            fields: ["tmin12c", "irr_lands", "gt_demc", "grwsnc"].map(String::from).to_vec(),
            climate_fields: ["grwsnc", "tmin12c"].map(String::from).to_vec(),
        }
    }

    #[test]
    fn labels_and_output_dirs() {
        let root = Path::new("/data");
        assert_eq!(Scenario::Current.output_dir(root), Path::new("/data/out_aezs_CURRENT"));
        let s = Scenario::projection("RCP85", "2070s");
        assert_eq!(s.label(), "RCP85_2070s");
        assert_eq!(s.output_dir(root), Path::new("/data/out_aezs_RCP85_2070s"));
    }

    #[test]
    fn projection_grid_is_projection_major() {
        let s = projection_scenarios(&["RCP45", "RCP85"], &["2050s", "2070s"]);
        let labels: Vec<String> = s.iter().map(Scenario::label).collect();
        assert_eq!(labels, ["RCP45_2050s", "RCP45_2070s", "RCP85_2050s", "RCP85_2070s"]);
    }

    #[test]
    fn only_climate_fields_are_substituted() {
        let inputs = inputs();
        let current = inputs.explanatory_set(&Scenario::Current);
        let future = inputs.explanatory_set(&Scenario::projection("RCP85", "2070s"));

        assert_eq!(current.names(), future.names());
        for (c, f) in current.layers().iter().zip(future.layers()) {
            if inputs.is_climate(&c.name) {
                assert_eq!(f.path, Path::new("inputs/RCP85/2070s").join(format!("{}.tif", c.name)));
            } else {
                assert_eq!(c.path, f.path);
            }
        }
        assert!(current
            .layers()
            .iter()
            .all(|l| l.path.starts_with("inputs/training")));
    }
}
