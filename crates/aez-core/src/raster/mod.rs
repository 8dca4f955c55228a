//! Raster store: georeferencing metadata, row-window sources and sinks.
//!
//! Sources hand out whole rows as `f32`; sinks accept whole rows with the
//! samples of every band interleaved per pixel. The GeoTIFF backend lives in
//! [`geotiff`]; [`MemoryRaster`] and [`MemorySink`] cover small grids and tests.

pub mod geotiff;

use serde::{Deserialize, Serialize};

use crate::error::{AezError, Result};
use crate::grid::Grid;

/// Nodata sentinel used when nothing else is configured.
pub const DEFAULT_NODATA: f64 = -9999.0;

// ── Georeferencing ───────────────────────────────────────────────────────────

/// GDAL-ordered affine transform:
/// `x = t[0] + col·t[1] + row·t[2]`, `y = t[3] + col·t[4] + row·t[5]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// Build from GeoTIFF ModelPixelScale + ModelTiepoint (first tie point only).
    pub fn from_scale_tiepoint(scale: &[f64], tiepoint: &[f64]) -> Option<Self> {
        if scale.len() < 2 || tiepoint.len() < 6 {
            return None;
        }
        let (sx, sy) = (scale[0], scale[1]);
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        Some(Self([x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy]))
    }

    /// Build from a 4×4 row-major GeoTIFF ModelTransformation matrix.
    pub fn from_model_transformation(m: &[f64]) -> Option<Self> {
        if m.len() < 16 {
            return None;
        }
        Some(Self([m[3], m[0], m[1], m[7], m[4], m[5]]))
    }

    pub fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0
    }

    /// ModelPixelScale `[sx, sy, sz]` for north-up transforms.
    pub fn pixel_scale(&self) -> [f64; 3] {
        [self.0[1], -self.0[5], 0.0]
    }

    /// ModelTiepoint tying pixel (0, 0) to the transform origin.
    pub fn tiepoint(&self) -> [f64; 6] {
        [0.0, 0.0, 0.0, self.0[0], self.0[3], 0.0]
    }

    pub fn model_transformation(&self) -> [f64; 16] {
        let t = &self.0;
        [
            t[1], t[2], 0.0, t[0], //
            t[4], t[5], 0.0, t[3], //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ]
    }

    /// World coordinate of the upper-left corner of a pixel.
    pub fn pixel_to_world(&self, row: usize, col: usize) -> (f64, f64) {
        let (r, c) = (row as f64, col as f64);
        let t = &self.0;
        (t[0] + c * t[1] + r * t[2], t[3] + c * t[4] + r * t[5])
    }
}

/// GeoTIFF CRS description, kept verbatim so outputs carry exactly the input CRS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrsKeys {
    pub key_directory: Option<Vec<u16>>,
    pub double_params: Option<Vec<f64>>,
    pub ascii_params: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub transform: Option<GeoTransform>,
    pub crs: CrsKeys,
    pub nodata: Option<f64>,
}

impl RasterMetadata {
    /// Ungeoreferenced metadata for a bare grid.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            transform: None,
            crs: CrsKeys::default(),
            nodata: None,
        }
    }

    /// Same dimensions, transform and CRS. Nodata may differ per layer.
    pub fn same_grid(&self, other: &RasterMetadata) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.transform == other.transform
            && self.crs == other.crs
    }

    /// Copy of this metadata declaring a different nodata value.
    pub fn with_nodata(&self, nodata: Option<f64>) -> Self {
        Self {
            nodata,
            ..self.clone()
        }
    }

    pub fn describe(&self) -> String {
        match &self.transform {
            Some(t) => format!("{}x{} transform {:?}", self.width, self.height, t.0),
            None => format!("{}x{} (no transform)", self.width, self.height),
        }
    }

    pub(crate) fn check_rows(&self, row_start: usize, n_rows: usize) -> Result<()> {
        if row_start + n_rows > self.height {
            return Err(AezError::RowsOutOfBounds {
                row_start,
                n_rows,
                height: self.height,
            });
        }
        Ok(())
    }
}

// ── Nodata policy ────────────────────────────────────────────────────────────

/// A value is nodata when it is NaN, equals the layer's declared nodata, or
/// equals the configured sentinel. Outputs are always written with the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodataPolicy {
    pub sentinel: f64,
}

impl NodataPolicy {
    pub fn new(sentinel: f64) -> Self {
        Self { sentinel }
    }

    #[inline]
    pub fn is_nodata(&self, value: f32, layer_nodata: Option<f64>) -> bool {
        value.is_nan()
            || value == self.sentinel as f32
            || layer_nodata.is_some_and(|nd| value == nd as f32)
    }

    pub fn sentinel_f32(&self) -> f32 {
        self.sentinel as f32
    }

    /// Sentinel for 16-bit class rasters. Must be integral and in range.
    pub fn sentinel_i16(&self) -> Result<i16> {
        let s = self.sentinel;
        if s.fract() != 0.0 || s < i16::MIN as f64 || s > i16::MAX as f64 {
            return Err(AezError::InvalidConfig(format!(
                "nodata sentinel {s} cannot be stored in a 16-bit class raster"
            )));
        }
        Ok(s as i16)
    }
}

impl Default for NodataPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_NODATA)
    }
}

// ── Sources and sinks ────────────────────────────────────────────────────────

/// Row-window reader over a single-band raster.
pub trait RasterSource {
    fn name(&self) -> &str;

    fn metadata(&self) -> &RasterMetadata;

    /// Rows `row_start..row_start + n_rows`, row-major, `n_rows × width` values.
    fn read_rows(&mut self, row_start: usize, n_rows: usize) -> Result<Vec<f32>>;
}

/// Row-window writer. `data` holds `n_rows × width × bands` values with the
/// bands of each pixel adjacent.
pub trait RasterSink<T> {
    fn bands(&self) -> usize;

    fn write_rows(&mut self, row_start: usize, n_rows: usize, data: &[T]) -> Result<()>;
}

/// Fails with [`AezError::GridMismatch`] unless every layer shares the first
/// layer's grid.
pub fn check_alignment<S: RasterSource>(layers: &[S]) -> Result<()> {
    let Some(first) = layers.first() else {
        return Ok(());
    };
    let expected = first.metadata();
    for layer in &layers[1..] {
        if !layer.metadata().same_grid(expected) {
            return Err(AezError::GridMismatch {
                layer: layer.name().to_string(),
                expected: expected.describe(),
                found: layer.metadata().describe(),
            });
        }
    }
    Ok(())
}

/// In-memory single-band raster.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    pub name: String,
    pub grid: Grid<f32>,
    pub metadata: RasterMetadata,
}

impl MemoryRaster {
    pub fn new(name: impl Into<String>, grid: Grid<f32>, metadata: RasterMetadata) -> Result<Self> {
        if grid.width != metadata.width || grid.height != metadata.height {
            return Err(AezError::BufferSize {
                expected: metadata.width * metadata.height,
                found: grid.len(),
            });
        }
        Ok(Self {
            name: name.into(),
            grid,
            metadata,
        })
    }
}

impl RasterSource for MemoryRaster {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    fn read_rows(&mut self, row_start: usize, n_rows: usize) -> Result<Vec<f32>> {
        self.metadata.check_rows(row_start, n_rows)?;
        Ok(self.grid.rows(row_start, n_rows).to_vec())
    }
}

/// In-memory multi-band sink; rows may arrive in any order.
#[derive(Debug, Clone)]
pub struct MemorySink<T> {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    /// `height × width × bands`, band-interleaved per pixel.
    pub data: Vec<T>,
    pub rows_written: usize,
}

impl<T: Copy + Default> MemorySink<T> {
    pub fn new(width: usize, height: usize, bands: usize) -> Self {
        Self {
            width,
            height,
            bands,
            data: vec![T::default(); width * height * bands],
            rows_written: 0,
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize, band: usize) -> T {
        self.data[(row * self.width + col) * self.bands + band]
    }

    /// A single band as a grid.
    pub fn band(&self, band: usize) -> Grid<T> {
        Grid {
            data: self.data.iter().skip(band).step_by(self.bands).copied().collect(),
            width: self.width,
            height: self.height,
        }
    }
}

impl<T: Copy + Default> RasterSink<T> for MemorySink<T> {
    fn bands(&self) -> usize {
        self.bands
    }

    fn write_rows(&mut self, row_start: usize, n_rows: usize, data: &[T]) -> Result<()> {
        if row_start + n_rows > self.height {
            return Err(AezError::RowsOutOfBounds {
                row_start,
                n_rows,
                height: self.height,
            });
        }
        let stride = self.width * self.bands;
        if data.len() != n_rows * stride {
            return Err(AezError::BufferSize {
                expected: n_rows * stride,
                found: data.len(),
            });
        }
        self.data[row_start * stride..(row_start + n_rows) * stride].copy_from_slice(data);
        self.rows_written += n_rows;
        Ok(())
    }
}
