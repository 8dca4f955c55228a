//! Ordered explanatory layers. Layer order is the feature-vector column order
//! both at training and at prediction time.

use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{AezError, Result};
use crate::raster::geotiff::GeoTiffReader;
use crate::raster::{check_alignment, RasterSource};

/// File extension of explanatory rasters on disk.
pub const RASTER_EXT: &str = "tif";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplanatoryLayer {
    pub name: String,
    pub path: PathBuf,
}

impl ExplanatoryLayer {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// `<dir>/<name>.tif`
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self::new(name, dir.join(format!("{name}.{RASTER_EXT}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplanatorySet {
    layers: Vec<ExplanatoryLayer>,
}

impl ExplanatorySet {
    pub fn new(layers: Vec<ExplanatoryLayer>) -> Self {
        Self { layers }
    }

    /// One layer per field, all under `dir`.
    pub fn from_dir<S: AsRef<str>>(dir: &Path, fields: &[S]) -> Self {
        Self::new(
            fields
                .iter()
                .map(|f| ExplanatoryLayer::in_dir(dir, f.as_ref()))
                .collect(),
        )
    }

    pub fn layers(&self) -> &[ExplanatoryLayer] {
        &self.layers
    }

    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Fails with [`AezError::MissingLayer`] for the first absent file.
    pub fn check_exists(&self) -> Result<()> {
        for layer in &self.layers {
            if !layer.path.is_file() {
                return Err(AezError::MissingLayer(layer.name.clone(), layer.path.clone()));
            }
        }
        Ok(())
    }

    /// Open every layer in order and verify they share one grid.
    pub fn open(&self) -> Result<Vec<GeoTiffReader>> {
        self.check_exists()?;
        let readers = self
            .layers
            .iter()
            .map(|l| GeoTiffReader::open_named(&l.name, &l.path))
            .collect::<Result<Vec<_>>>()?;
        check_alignment(&readers)?;

        if let Some(first) = readers.first() {
            debug!(
                "Opened {} explanatory layers on a {} grid",
                readers.len(),
                first.metadata().describe()
            );
        }
        Ok(readers)
    }
}
