use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AezError {
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Explanatory layer '{0}' not found at {1}")]
    MissingLayer(String, PathBuf),

    #[error("Raster has invalid dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),

    #[error("Unsupported raster layout in {path}: {reason}")]
    UnsupportedLayout { path: PathBuf, reason: String },

    #[error("Layer '{layer}' does not share the grid of the first layer: expected {expected}, found {found}")]
    GridMismatch {
        layer: String,
        expected: String,
        found: String,
    },

    #[error("Classifier expects {expected} features but {found} explanatory layers were supplied")]
    FeatureCountMismatch { expected: usize, found: usize },

    #[error("Invalid chunk height: {0} (must be positive)")]
    InvalidChunkHeight(usize),

    #[error("Row window {row_start}+{n_rows} is outside a raster of {height} rows")]
    RowsOutOfBounds {
        row_start: usize,
        n_rows: usize,
        height: usize,
    },

    #[error("Buffer holds {found} values, expected {expected}")]
    BufferSize { expected: usize, found: usize },

    #[error("Rows must be written in order: expected row {expected}, got {found}")]
    OutOfOrderWrite { expected: usize, found: usize },

    #[error("Sample at row {row}, col {col} is invalid: {reason}")]
    InvalidSample { row: usize, col: usize, reason: String },

    #[error("Class code {0} does not fit the 16-bit class raster")]
    ClassCodeRange(i32),

    #[error("Training set is empty")]
    EmptyTrainingSet,

    #[error("No valid classes found in response raster")]
    NoValidClasses,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, AezError>;
