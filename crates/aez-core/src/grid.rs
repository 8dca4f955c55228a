use serde::{Deserialize, Serialize};

use crate::error::{AezError, Result};

/// A 2D grid of cell values, row-major. Row 0 is the first raster row
/// (northernmost for north-up rasters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid<T> {
    pub data: Vec<T>,
    pub width: usize,
    pub height: usize,
}

impl<T: Copy> Grid<T> {
    /// Create a new grid filled with the given value.
    pub fn new(width: usize, height: usize, fill: T) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
        }
    }

    /// Wrap an existing row-major buffer. The length must equal `width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != width * height {
            return Err(AezError::BufferSize {
                expected: width * height,
                found: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: T) {
        self.data[row * self.width + col] = val;
    }

    /// Cells of rows `row_start..row_start + n_rows`, row-major.
    pub fn rows(&self, row_start: usize, n_rows: usize) -> &[T] {
        &self.data[row_start * self.width..(row_start + n_rows) * self.width]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
