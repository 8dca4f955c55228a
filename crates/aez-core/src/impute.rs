//! Row-band imputation: stream the explanatory layers band by band, classify
//! the valid pixels of each band, and write class, per-class probability and
//! certainty rasters in lockstep.
//!
//! Only one band of every layer and every output is held in memory, so peak
//! memory is `chunk_height × width × (n_features + n_classes + 2)` values
//! regardless of raster height. A band never splits a row.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::chunking::RowBands;
use crate::classifier::{argmax, Classifier, FeatureMatrix};
use crate::error::{AezError, Result};
use crate::explanatory::ExplanatorySet;
use crate::raster::geotiff::{create_encoder, GeoTiffSink};
use crate::raster::{check_alignment, NodataPolicy, RasterSink, RasterSource};

pub const DEFAULT_CHUNK_HEIGHT: usize = 250;

pub const RESPONSES_FILE: &str = "responses.tif";
pub const PROBABILITIES_FILE: &str = "probabilities.tif";
pub const CERTAINTY_FILE: &str = "certainty.tif";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImputeOptions {
    /// Rows per band. Affects memory only, never the output values.
    pub chunk_height: usize,
    pub nodata: NodataPolicy,
}

impl Default for ImputeOptions {
    fn default() -> Self {
        Self {
            chunk_height: DEFAULT_CHUNK_HEIGHT,
            nodata: NodataPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImputeReport {
    pub rows: usize,
    pub bands_processed: usize,
    /// Bands with no valid pixel; the classifier was not called for them.
    pub all_nodata_bands: usize,
    pub valid_pixels: usize,
    pub nodata_pixels: usize,
    /// Class codes in probability-band order.
    pub classes: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub responses: PathBuf,
    pub probabilities: PathBuf,
    pub certainty: PathBuf,
}

impl OutputPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            responses: dir.join(RESPONSES_FILE),
            probabilities: dir.join(PROBABILITIES_FILE),
            certainty: dir.join(CERTAINTY_FILE),
        }
    }
}

fn to_class_code(code: i32) -> Result<i16> {
    i16::try_from(code).map_err(|_| AezError::ClassCodeRange(code))
}

/// Checks that need no I/O. Run before any output is created.
fn validate<C: Classifier + ?Sized>(classifier: &C, n_layers: usize, options: &ImputeOptions) -> Result<()> {
    if options.chunk_height == 0 {
        return Err(AezError::InvalidChunkHeight(options.chunk_height));
    }
    if classifier.n_features() != n_layers {
        return Err(AezError::FeatureCountMismatch {
            expected: classifier.n_features(),
            found: n_layers,
        });
    }
    for &code in classifier.classes() {
        to_class_code(code)?;
    }
    options.nodata.sentinel_i16()?;
    Ok(())
}

/// Impute every pixel of `layers` into the three sinks.
///
/// `proba_out` must have one band per class. Rows reach each sink strictly
/// in order, one band at a time.
pub fn impute<C, S, A, B, D>(
    classifier: &C,
    layers: &mut [S],
    class_out: &mut A,
    proba_out: &mut B,
    certainty_out: &mut D,
    options: &ImputeOptions,
) -> Result<ImputeReport>
where
    C: Classifier + ?Sized,
    S: RasterSource,
    A: RasterSink<i16>,
    B: RasterSink<f32>,
    D: RasterSink<f32>,
{
    validate(classifier, layers.len(), options)?;
    check_alignment(layers)?;

    let classes = classifier.classes().to_vec();
    let n_classes = classes.len();
    if proba_out.bands() != n_classes {
        return Err(AezError::InvalidConfig(format!(
            "probability output has {} bands but the classifier has {} classes",
            proba_out.bands(),
            n_classes
        )));
    }

    let Some(first) = layers.first() else {
        return Err(AezError::FeatureCountMismatch {
            expected: classifier.n_features(),
            found: 0,
        });
    };
    let (width, height) = (first.metadata().width, first.metadata().height);
    let layer_nodata: Vec<Option<f64>> = layers.iter().map(|l| l.metadata().nodata).collect();
    let n_features = layers.len();

    let class_fill = options.nodata.sentinel_i16()?;
    let float_fill = options.nodata.sentinel_f32();

    let bands = RowBands::new(height, options.chunk_height)?;
    info!(
        "Imputing {}x{} grid: {} features, {} classes, {} bands of {} rows",
        width,
        height,
        n_features,
        n_classes,
        bands.count,
        bands.rows_per_band()
    );

    let mut report = ImputeReport {
        rows: height,
        classes: classes.clone(),
        ..Default::default()
    };
    let mut pixel = vec![0.0f32; n_features];

    for band in bands.iter() {
        let n_px = band.n_rows * width;
        let values = layers
            .iter_mut()
            .map(|l| l.read_rows(band.row_start, band.n_rows))
            .collect::<Result<Vec<_>>>()?;

        let mut valid = Vec::with_capacity(n_px);
        let mut features = FeatureMatrix::with_capacity(n_features, n_px);
        'pixels: for px in 0..n_px {
            for (j, layer) in values.iter().enumerate() {
                let v = layer[px];
                if options.nodata.is_nodata(v, layer_nodata[j]) {
                    continue 'pixels;
                }
                pixel[j] = v;
            }
            features.push(&pixel);
            valid.push(px);
        }

        let mut class_buf = vec![class_fill; n_px];
        let mut proba_buf = vec![float_fill; n_px * n_classes];
        let mut certainty_buf = vec![float_fill; n_px];

        if valid.is_empty() {
            report.all_nodata_bands += 1;
            debug!("Band {} (rows {}..{}): all nodata", band.index, band.row_start, band.row_end());
        } else {
            let proba = classifier.predict_proba(&features);
            if proba.len() != valid.len() * n_classes {
                return Err(AezError::BufferSize {
                    expected: valid.len() * n_classes,
                    found: proba.len(),
                });
            }

            // Class, probabilities and certainty all come from the one proba row.
            for (k, &px) in valid.iter().enumerate() {
                let p = &proba[k * n_classes..(k + 1) * n_classes];
                class_buf[px] = to_class_code(classes[argmax(p)])?;
                proba_buf[px * n_classes..(px + 1) * n_classes].copy_from_slice(p);
                certainty_buf[px] = p.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            }
            debug!(
                "Band {} (rows {}..{}): {} of {} pixels classified",
                band.index,
                band.row_start,
                band.row_end(),
                valid.len(),
                n_px
            );
        }

        class_out.write_rows(band.row_start, band.n_rows, &class_buf)?;
        proba_out.write_rows(band.row_start, band.n_rows, &proba_buf)?;
        certainty_out.write_rows(band.row_start, band.n_rows, &certainty_buf)?;

        report.bands_processed += 1;
        report.valid_pixels += valid.len();
        report.nodata_pixels += n_px - valid.len();
    }

    info!(
        "Imputed {} pixels ({} nodata, {} empty bands)",
        report.valid_pixels, report.nodata_pixels, report.all_nodata_bands
    );
    Ok(report)
}

/// Open `set`, impute it, and write `responses.tif`, `probabilities.tif` and
/// `certainty.tif` into `out_dir`, which is created if missing. Outputs carry
/// the first layer's grid and CRS with the sentinel as their nodata value.
pub fn impute_to_dir<C: Classifier + ?Sized>(
    classifier: &C,
    set: &ExplanatorySet,
    out_dir: &Path,
    options: &ImputeOptions,
) -> Result<ImputeReport> {
    validate(classifier, set.len(), options)?;
    let mut layers = set.open()?;
    let Some(first) = layers.first() else {
        return Err(AezError::FeatureCountMismatch {
            expected: classifier.n_features(),
            found: 0,
        });
    };
    let out_meta = first.metadata().with_nodata(Some(options.nodata.sentinel));

    fs::create_dir_all(out_dir)?;
    let paths = OutputPaths::in_dir(out_dir);
    let n_classes = classifier.classes().len();
    let strip = options.chunk_height;

    let mut class_enc = create_encoder(&paths.responses)?;
    let mut proba_enc = create_encoder(&paths.probabilities)?;
    let mut certainty_enc = create_encoder(&paths.certainty)?;

    let mut class_sink = GeoTiffSink::<_, i16>::new(&mut class_enc, &paths.responses, out_meta.clone(), 1, strip)?;
    let mut proba_sink =
        GeoTiffSink::<_, f32>::new(&mut proba_enc, &paths.probabilities, out_meta.clone(), n_classes, strip)?;
    let mut certainty_sink = GeoTiffSink::<_, f32>::new(&mut certainty_enc, &paths.certainty, out_meta, 1, strip)?;

    let report = impute(
        classifier,
        &mut layers,
        &mut class_sink,
        &mut proba_sink,
        &mut certainty_sink,
        options,
    )?;

    class_sink.finish()?;
    proba_sink.finish()?;
    certainty_sink.finish()?;

    info!("Wrote outputs to {}", out_dir.display());
    Ok(report)
}
