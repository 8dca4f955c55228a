//! Row-band partitioning of a raster grid.
//!
//! A band is a contiguous run of whole rows; only the last band may be
//! shorter than the requested chunk height.

use log::debug;

use crate::error::{AezError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBand {
    pub index: usize,
    pub row_start: usize,
    pub n_rows: usize,
}

impl RowBand {
    pub fn row_end(&self) -> usize {
        self.row_start + self.n_rows
    }
}

#[derive(Debug, Clone)]
pub struct RowBands {
    height: usize,
    chunk_height: usize,
    pub count: usize,
}

impl RowBands {
    pub fn new(height: usize, chunk_height: usize) -> Result<Self> {
        if chunk_height == 0 {
            return Err(AezError::InvalidChunkHeight(chunk_height));
        }
        let count = height.div_ceil(chunk_height);

        debug!(
            "RowBands: {} rows, chunk_height={} → {} bands",
            height, chunk_height, count
        );

        Ok(Self {
            height,
            chunk_height,
            count,
        })
    }

    /// Rows per band, clamped to the raster height.
    pub fn rows_per_band(&self) -> usize {
        self.chunk_height.min(self.height.max(1))
    }

    pub fn get(&self, index: usize) -> RowBand {
        let row_start = index * self.chunk_height;
        let row_end = (row_start + self.chunk_height).min(self.height);
        RowBand {
            index,
            row_start,
            n_rows: row_end - row_start,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = RowBand> + '_ {
        (0..self.count).map(move |i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_band_is_shorter() {
        let bands = RowBands::new(10, 4).unwrap();
        let all: Vec<_> = bands.iter().collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].n_rows, 4);
        assert_eq!(all[2].row_start, 8);
        assert_eq!(all[2].n_rows, 2);
    }

    #[test]
    fn bands_cover_every_row_once() {
        for chunk in 1..=12 {
            let bands = RowBands::new(11, chunk).unwrap();
            let mut covered = vec![0u32; 11];
            for b in bands.iter() {
                for r in b.row_start..b.row_end() {
                    covered[r] += 1;
                }
            }
            assert!(covered.iter().all(|&c| c == 1), "chunk={chunk}: {covered:?}");
        }
    }

    #[test]
    fn chunk_taller_than_raster_is_one_band() {
        let bands = RowBands::new(5, 250).unwrap();
        assert_eq!(bands.count, 1);
        assert_eq!(bands.rows_per_band(), 5);
        assert_eq!(bands.get(0).n_rows, 5);
    }

    #[test]
    fn zero_chunk_height_rejected() {
        assert!(matches!(
            RowBands::new(5, 0),
            Err(AezError::InvalidChunkHeight(0))
        ));
    }
}
