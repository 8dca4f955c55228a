use std::path::Path;

use aez_core::impute::OutputPaths;
use aez_core::raster::geotiff::{read_full, write_geotiff};
use aez_core::{
    run_scenarios, Classifier, FeatureMatrix, ImputeOptions, RasterMetadata, RasterSource, Scenario,
    ScenarioInputs,
};

const FIELDS: [&str; 3] = ["tmin12c", "irr_lands", "grwsnc"];
const CLIMATE: [&str; 2] = ["tmin12c", "grwsnc"];

/// Predicts class 5 when the first feature is positive, else class 3.
struct SignOfFirst;

impl Classifier for SignOfFirst {
    fn n_features(&self) -> usize {
        FIELDS.len()
    }
    fn classes(&self) -> &[i32] {
        &[3, 5]
    }
    fn predict_proba(&self, x: &FeatureMatrix) -> Vec<f32> {
        x.rows()
            .flat_map(|r| if r[0] > 0.0 { [0.1, 0.9] } else { [0.9, 0.1] })
            .collect()
    }
}

fn write_const(dir: &Path, name: &str, value: f32) {
    std::fs::create_dir_all(dir).unwrap();
    let meta = RasterMetadata::new(3, 2);
    write_geotiff(dir.join(format!("{name}.tif")), &meta, 1, &[value; 6]).unwrap();
}

/// Training layers are all -1; projected climate layers are +1.
fn setup(root: &Path) -> ScenarioInputs {
    let training = root.join("inputs/training");
    let projected = root.join("inputs/RCP85/2070s");
    for f in FIELDS {
        write_const(&training, f, -1.0);
    }
    for f in CLIMATE {
        write_const(&projected, f, 1.0);
    }
    ScenarioInputs {
        training_dir: training,
        projections_root: root.join("inputs"),
        fields: FIELDS.map(String::from).to_vec(),
        climate_fields: CLIMATE.map(String::from).to_vec(),
    }
}

#[test]
fn static_layers_are_identical_across_scenarios() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = setup(tmp.path());

    let mut current = inputs.explanatory_set(&Scenario::Current).open().unwrap();
    let mut future = inputs
        .explanatory_set(&Scenario::projection("RCP85", "2070s"))
        .open()
        .unwrap();

    for (c, f) in current.iter_mut().zip(future.iter_mut()) {
        assert_eq!(c.name(), f.name());
        let (cv, fv) = (c.read_rows(0, 2).unwrap(), f.read_rows(0, 2).unwrap());
        if inputs.is_climate(c.name()) {
            assert_ne!(cv, fv, "{} should be substituted", c.name());
        } else {
            assert_eq!(cv, fv, "{} should be shared", c.name());
        }
    }
}

#[test]
fn each_scenario_gets_its_own_outputs() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = setup(tmp.path());
    let scenarios = [Scenario::Current, Scenario::projection("RCP85", "2070s")];

    let runs = run_scenarios(&SignOfFirst, &inputs, &scenarios, tmp.path(), &ImputeOptions::default()).unwrap();
    assert_eq!(runs.len(), 2);

    let current = OutputPaths::in_dir(&tmp.path().join("out_aezs_CURRENT"));
    let future = OutputPaths::in_dir(&tmp.path().join("out_aezs_RCP85_2070s"));
    assert_eq!(runs[1].output_dir, tmp.path().join("out_aezs_RCP85_2070s"));

    let (now, _) = read_full(&current.responses).unwrap();
    let (later, _) = read_full(&future.responses).unwrap();
    assert!(now.data.iter().all(|&v| v == 3.0));
    assert!(later.data.iter().all(|&v| v == 5.0));
}

#[test]
fn missing_projection_layer_aborts_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = setup(tmp.path());
    let scenarios = [Scenario::projection("RCP45", "2050s")];

    let err = run_scenarios(&SignOfFirst, &inputs, &scenarios, tmp.path(), &ImputeOptions::default());
    assert!(matches!(err, Err(aez_core::AezError::MissingLayer(..))));
}
