//! GeoTIFF raster store on the pure-Rust `tiff` crate.
//!
//! Reading decodes only the strips or tiles that cover the requested rows,
//! holding one chunk-row in memory at a time. Writing streams one strip per
//! call through the low-level `DirectoryEncoder`; samples of multi-band
//! outputs are pixel-interleaved (`PlanarConfiguration = 1`) so a strip is
//! always a complete row band for every band. The IFD and the georeferencing
//! tags copied from the input metadata are written by `finish()`.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use log::debug;
use tiff::decoder::{ChunkType, Decoder, DecodingResult};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKindStandard};
use tiff::tags::Tag;
use tiff::{ColorType, TiffResult};

use super::{CrsKeys, GeoTransform, RasterMetadata, RasterSink, RasterSource};
use crate::chunking::RowBands;
use crate::error::{AezError, Result};
use crate::grid::Grid;

// GeoTIFF / GDAL private tags (not all are named in the tiff crate)
const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_DOUBLE_PARAMS: u16 = 34736;
const GEO_ASCII_PARAMS: u16 = 34737;
const GDAL_NODATA: u16 = 42113;

// Baseline tag values
const COMPRESSION_NONE: u16 = 1;
const PHOTOMETRIC_MIN_IS_BLACK: u16 = 1;
const PLANAR_CHUNKY: u16 = 1;
const EXTRA_SAMPLE_UNSPECIFIED: u16 = 0;

/// Strip height used by [`write_geotiff`] for whole-raster writes.
pub const DEFAULT_ROWS_PER_STRIP: usize = 256;

fn geo_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

fn find_f64s<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> Result<Option<Vec<f64>>> {
    Ok(decoder
        .find_tag(geo_tag(code))?
        .map(|v| v.into_f64_vec())
        .transpose()?)
}

fn find_ascii<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> Result<Option<String>> {
    Ok(decoder
        .find_tag(geo_tag(code))?
        .map(|v| v.into_string())
        .transpose()?)
}

fn read_metadata<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    width: usize,
    height: usize,
) -> Result<RasterMetadata> {
    let transform = match find_f64s(decoder, MODEL_TRANSFORMATION)? {
        Some(m) => GeoTransform::from_model_transformation(&m),
        None => match (
            find_f64s(decoder, MODEL_PIXEL_SCALE)?,
            find_f64s(decoder, MODEL_TIEPOINT)?,
        ) {
            (Some(scale), Some(tie)) => GeoTransform::from_scale_tiepoint(&scale, &tie),
            _ => None,
        },
    };

    let crs = CrsKeys {
        key_directory: decoder
            .find_tag(geo_tag(GEO_KEY_DIRECTORY))?
            .map(|v| v.into_u16_vec())
            .transpose()?,
        double_params: find_f64s(decoder, GEO_DOUBLE_PARAMS)?,
        ascii_params: find_ascii(decoder, GEO_ASCII_PARAMS)?,
    };

    let nodata = find_ascii(decoder, GDAL_NODATA)?
        .and_then(|s| s.trim().trim_end_matches('\0').parse::<f64>().ok());

    Ok(RasterMetadata {
        width,
        height,
        transform,
        crs,
        nodata,
    })
}

fn decoded_to_f32(result: DecodingResult, path: &Path) -> Result<Vec<f32>> {
    Ok(match result {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(AezError::UnsupportedLayout {
                path: path.to_path_buf(),
                reason: "unsupported sample type".to_string(),
            })
        }
    })
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct GeoTiffReader {
    name: String,
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    metadata: RasterMetadata,
    chunk_type: ChunkType,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
    /// Decoded chunk-row: (chunk-row index, full-width rows).
    cached: Option<(usize, Vec<f32>)>,
}

impl GeoTiffReader {
    /// Open a single-band GeoTIFF, named after its file stem.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::open_named(name, path)
    }

    pub fn open_named(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?;

        let (w, h) = decoder.dimensions()?;
        let (width, height) = (w as usize, h as usize);
        if width == 0 || height == 0 {
            return Err(AezError::InvalidDimensions(width, height));
        }

        match decoder.colortype()? {
            ColorType::Gray(_) => {}
            other => {
                return Err(AezError::UnsupportedLayout {
                    path,
                    reason: format!("expected a single-band raster, found {other:?}"),
                })
            }
        }

        let metadata = read_metadata(&mut decoder, width, height)?;

        let chunk_type = decoder.get_chunk_type();
        let (cw, ch) = decoder.chunk_dimensions();
        let chunk_width = (cw as usize).clamp(1, width);
        let chunk_height = (ch as usize).clamp(1, height);
        let chunks_across = match chunk_type {
            ChunkType::Strip => 1,
            ChunkType::Tile => width.div_ceil(chunk_width),
        };

        debug!(
            "Opened {}: {}x{}, chunks {}x{}, nodata={:?}",
            path.display(),
            width,
            height,
            chunk_width,
            chunk_height,
            metadata.nodata
        );

        Ok(Self {
            name: name.into(),
            path,
            decoder,
            metadata,
            chunk_type,
            chunk_width,
            chunk_height,
            chunks_across,
            cached: None,
        })
    }

    /// Decode every chunk of chunk-row `k` into full-width rows.
    fn load_chunk_row(&mut self, k: usize) -> Result<Vec<f32>> {
        let width = self.metadata.width;
        let rows = self.chunk_height.min(self.metadata.height - k * self.chunk_height);

        match self.chunk_type {
            ChunkType::Strip => {
                let data = decoded_to_f32(self.decoder.read_chunk(k as u32)?, &self.path)?;
                if data.len() < rows * width {
                    return Err(AezError::BufferSize {
                        expected: rows * width,
                        found: data.len(),
                    });
                }
                Ok(data[..rows * width].to_vec())
            }
            ChunkType::Tile => {
                let mut out = vec![0.0f32; rows * width];
                for tc in 0..self.chunks_across {
                    let index = k * self.chunks_across + tc;
                    let data = decoded_to_f32(self.decoder.read_chunk(index as u32)?, &self.path)?;
                    let col0 = tc * self.chunk_width;
                    let data_width = self.chunk_width.min(width - col0);
                    // Edge tiles may come back clipped or padded to the full tile.
                    let stride = if data.len() == data_width * rows {
                        data_width
                    } else if data.len() == self.chunk_width * self.chunk_height {
                        self.chunk_width
                    } else {
                        return Err(AezError::BufferSize {
                            expected: data_width * rows,
                            found: data.len(),
                        });
                    };
                    for r in 0..rows {
                        out[r * width + col0..r * width + col0 + data_width]
                            .copy_from_slice(&data[r * stride..r * stride + data_width]);
                    }
                }
                Ok(out)
            }
        }
    }
}

impl RasterSource for GeoTiffReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    fn read_rows(&mut self, row_start: usize, n_rows: usize) -> Result<Vec<f32>> {
        self.metadata.check_rows(row_start, n_rows)?;
        let width = self.metadata.width;
        let mut out = Vec::with_capacity(n_rows * width);

        for row in row_start..row_start + n_rows {
            let k = row / self.chunk_height;
            if self.cached.as_ref().map(|(idx, _)| *idx) != Some(k) {
                let rows = self.load_chunk_row(k)?;
                self.cached = Some((k, rows));
            }
            if let Some((_, rows)) = &self.cached {
                let local = row - k * self.chunk_height;
                out.extend_from_slice(&rows[local * width..(local + 1) * width]);
            }
        }
        Ok(out)
    }
}

/// Read a whole single-band raster. Used for the sparse response raster.
pub fn read_full(path: impl AsRef<Path>) -> Result<(Grid<f32>, RasterMetadata)> {
    let mut reader = GeoTiffReader::open(path)?;
    let meta = reader.metadata().clone();
    let data = reader.read_rows(0, meta.height)?;
    Ok((Grid::from_vec(meta.width, meta.height, data)?, meta))
}

/// A whole pixel-interleaved multi-band float raster, e.g. `probabilities.tif`.
#[derive(Debug, Clone, PartialEq)]
pub struct BandStack {
    pub metadata: RasterMetadata,
    pub bands: usize,
    /// Row-major, bands interleaved per pixel.
    pub data: Vec<f32>,
}

impl BandStack {
    pub fn get(&self, row: usize, col: usize, band: usize) -> f32 {
        self.data[(row * self.metadata.width + col) * self.bands + band]
    }

    /// All band values of one pixel.
    pub fn pixel(&self, row: usize, col: usize) -> &[f32] {
        let start = (row * self.metadata.width + col) * self.bands;
        &self.data[start..start + self.bands]
    }
}

/// Read an uncompressed, stripped, pixel-interleaved 32-bit float raster with
/// any number of bands. The `tiff` decoder only hands out single-band gray
/// float images, so strips are read straight from the file using the offsets
/// in the IFD.
pub fn read_band_stack(path: impl AsRef<Path>) -> Result<BandStack> {
    let path = path.as_ref();
    let layout = |reason: &str| AezError::UnsupportedLayout {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut file = File::open(path)?;
    let mut order = [0u8; 2];
    file.read_exact(&mut order)?;
    let little_endian = match &order {
        b"II" => true,
        b"MM" => false,
        _ => return Err(layout("not a TIFF file")),
    };
    file.rewind()?;

    let mut decoder = Decoder::new(BufReader::new(file))?;
    let (w, h) = decoder.dimensions()?;
    let (width, height) = (w as usize, h as usize);
    if width == 0 || height == 0 {
        return Err(AezError::InvalidDimensions(width, height));
    }
    let metadata = read_metadata(&mut decoder, width, height)?;

    let bands = decoder
        .find_tag(Tag::SamplesPerPixel)?
        .map(|v| v.into_u16())
        .transpose()?
        .unwrap_or(1) as usize;
    let compression = decoder.find_tag(Tag::Compression)?.map(|v| v.into_u16()).transpose()?;
    if compression.unwrap_or(COMPRESSION_NONE) != COMPRESSION_NONE {
        return Err(layout("compressed multi-band rasters are not supported"));
    }
    let planar = decoder.find_tag(Tag::PlanarConfiguration)?.map(|v| v.into_u16()).transpose()?;
    if planar.unwrap_or(PLANAR_CHUNKY) != PLANAR_CHUNKY {
        return Err(layout("expected pixel-interleaved samples"));
    }
    let bits = decoder.get_tag_u32_vec(Tag::BitsPerSample)?;
    let formats = decoder
        .find_tag(Tag::SampleFormat)?
        .map(|v| v.into_u16_vec())
        .transpose()?
        .unwrap_or_default();
    if bits.iter().any(|&b| b != 32) || formats.is_empty() || formats.iter().any(|&f| f != f32::SAMPLE_FORMAT) {
        return Err(layout("expected 32-bit float samples"));
    }
    let offsets = decoder.get_tag_u64_vec(Tag::StripOffsets)?;
    let byte_counts = decoder.get_tag_u64_vec(Tag::StripByteCounts)?;
    if offsets.len() != byte_counts.len() {
        return Err(layout("strip offsets and byte counts disagree"));
    }
    drop(decoder);

    let expected = width * height * bands;
    let mut file = BufReader::new(File::open(path)?);
    let mut data = Vec::with_capacity(expected);
    let mut buf = Vec::new();
    for (&offset, &count) in offsets.iter().zip(&byte_counts) {
        buf.resize(count as usize, 0);
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        data.extend(buf.chunks_exact(4).map(|b| {
            let b = [b[0], b[1], b[2], b[3]];
            if little_endian {
                f32::from_le_bytes(b)
            } else {
                f32::from_be_bytes(b)
            }
        }));
    }
    if data.len() != expected {
        return Err(AezError::BufferSize {
            expected,
            found: data.len(),
        });
    }
    debug!("Read {} bands of {}x{} from {}", bands, width, height, path.display());

    Ok(BandStack {
        metadata,
        bands,
        data,
    })
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Pixel sample types the writer can store.
pub trait Sample: Copy + Default + 'static {
    const BITS_PER_SAMPLE: u16;
    /// TIFF SampleFormat: 1 = unsigned, 2 = signed, 3 = IEEE float.
    const SAMPLE_FORMAT: u16;

    fn write_strip<W: Write + Seek>(
        dir: &mut DirectoryEncoder<'_, W, TiffKindStandard>,
        data: &[Self],
    ) -> TiffResult<u64>;
}

impl Sample for f32 {
    const BITS_PER_SAMPLE: u16 = 32;
    const SAMPLE_FORMAT: u16 = 3;

    fn write_strip<W: Write + Seek>(
        dir: &mut DirectoryEncoder<'_, W, TiffKindStandard>,
        data: &[Self],
    ) -> TiffResult<u64> {
        dir.write_data(data)
    }
}

impl Sample for i16 {
    const BITS_PER_SAMPLE: u16 = 16;
    const SAMPLE_FORMAT: u16 = 2;

    fn write_strip<W: Write + Seek>(
        dir: &mut DirectoryEncoder<'_, W, TiffKindStandard>,
        data: &[Self],
    ) -> TiffResult<u64> {
        dir.write_data(data)
    }
}

/// Create the encoder a [`GeoTiffSink`] writes into. Overwrites `path`.
pub fn create_encoder(path: impl AsRef<Path>) -> Result<TiffEncoder<File>> {
    let file = File::create(path.as_ref())?;
    Ok(TiffEncoder::new(file)?)
}

/// Streaming GeoTIFF writer: one strip per `write_rows` call, rows in order.
pub struct GeoTiffSink<'a, W: Write + Seek, T: Sample> {
    dir: DirectoryEncoder<'a, W, TiffKindStandard>,
    path: PathBuf,
    metadata: RasterMetadata,
    bands: usize,
    rows_per_strip: usize,
    next_row: usize,
    strip_offsets: Vec<u32>,
    strip_byte_counts: Vec<u32>,
    _sample: PhantomData<T>,
}

impl<'a, W: Write + Seek, T: Sample> GeoTiffSink<'a, W, T> {
    /// `metadata` is written verbatim, including its nodata value.
    pub fn new(
        encoder: &'a mut TiffEncoder<W>,
        path: impl AsRef<Path>,
        metadata: RasterMetadata,
        bands: usize,
        rows_per_strip: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if metadata.width == 0 || metadata.height == 0 {
            return Err(AezError::InvalidDimensions(metadata.width, metadata.height));
        }
        if bands == 0 || bands > u16::MAX as usize {
            return Err(AezError::UnsupportedLayout {
                path,
                reason: format!("cannot write {bands} bands"),
            });
        }
        if rows_per_strip == 0 {
            return Err(AezError::InvalidChunkHeight(rows_per_strip));
        }
        let rows_per_strip = rows_per_strip.min(metadata.height);
        let n_strips = metadata.height.div_ceil(rows_per_strip);

        Ok(Self {
            dir: encoder.new_directory()?,
            path,
            metadata,
            bands,
            rows_per_strip,
            next_row: 0,
            strip_offsets: Vec::with_capacity(n_strips),
            strip_byte_counts: Vec::with_capacity(n_strips),
            _sample: PhantomData,
        })
    }

    fn layout_error(&self, reason: String) -> AezError {
        AezError::UnsupportedLayout {
            path: self.path.clone(),
            reason,
        }
    }

    /// Write the IFD. Every row must have been written.
    pub fn finish(self) -> Result<()> {
        if self.next_row != self.metadata.height {
            return Err(self.layout_error(format!(
                "only {} of {} rows written",
                self.next_row, self.metadata.height
            )));
        }

        let GeoTiffSink {
            mut dir,
            path,
            metadata,
            bands,
            rows_per_strip,
            strip_offsets,
            strip_byte_counts,
            ..
        } = self;

        dir.write_tag(Tag::ImageWidth, metadata.width as u32)?;
        dir.write_tag(Tag::ImageLength, metadata.height as u32)?;
        let bits_per_sample = vec![T::BITS_PER_SAMPLE; bands];
        dir.write_tag(Tag::BitsPerSample, bits_per_sample.as_slice())?;
        dir.write_tag(Tag::Compression, COMPRESSION_NONE)?;
        dir.write_tag(Tag::PhotometricInterpretation, PHOTOMETRIC_MIN_IS_BLACK)?;
        dir.write_tag(Tag::SamplesPerPixel, bands as u16)?;
        dir.write_tag(Tag::RowsPerStrip, rows_per_strip as u32)?;
        dir.write_tag(Tag::StripOffsets, strip_offsets.as_slice())?;
        dir.write_tag(Tag::StripByteCounts, strip_byte_counts.as_slice())?;
        dir.write_tag(Tag::PlanarConfiguration, PLANAR_CHUNKY)?;
        let sample_format = vec![T::SAMPLE_FORMAT; bands];
        dir.write_tag(Tag::SampleFormat, sample_format.as_slice())?;
        if bands > 1 {
            let extra = vec![EXTRA_SAMPLE_UNSPECIFIED; bands - 1];
            dir.write_tag(Tag::ExtraSamples, extra.as_slice())?;
        }

        if let Some(t) = metadata.transform {
            if t.is_north_up() {
                dir.write_tag(geo_tag(MODEL_PIXEL_SCALE), t.pixel_scale().as_slice())?;
                dir.write_tag(geo_tag(MODEL_TIEPOINT), t.tiepoint().as_slice())?;
            } else {
                dir.write_tag(geo_tag(MODEL_TRANSFORMATION), t.model_transformation().as_slice())?;
            }
        }
        if let Some(keys) = &metadata.crs.key_directory {
            dir.write_tag(geo_tag(GEO_KEY_DIRECTORY), keys.as_slice())?;
        }
        if let Some(doubles) = &metadata.crs.double_params {
            dir.write_tag(geo_tag(GEO_DOUBLE_PARAMS), doubles.as_slice())?;
        }
        if let Some(ascii) = &metadata.crs.ascii_params {
            dir.write_tag(geo_tag(GEO_ASCII_PARAMS), ascii.as_str())?;
        }
        if let Some(nd) = metadata.nodata {
            let text = format!("{nd}");
            dir.write_tag(geo_tag(GDAL_NODATA), text.as_str())?;
        }

        dir.finish()?;
        debug!("Finished {} ({} bands)", path.display(), bands);
        Ok(())
    }
}

impl<'a, W: Write + Seek, T: Sample> RasterSink<T> for GeoTiffSink<'a, W, T> {
    fn bands(&self) -> usize {
        self.bands
    }

    fn write_rows(&mut self, row_start: usize, n_rows: usize, data: &[T]) -> Result<()> {
        if row_start != self.next_row {
            return Err(AezError::OutOfOrderWrite {
                expected: self.next_row,
                found: row_start,
            });
        }
        self.metadata.check_rows(row_start, n_rows)?;

        let is_last = row_start + n_rows == self.metadata.height;
        if n_rows == 0
            || n_rows > self.rows_per_strip
            || (n_rows < self.rows_per_strip && !is_last)
        {
            return Err(self.layout_error(format!(
                "strip of {} rows does not match {} rows per strip",
                n_rows, self.rows_per_strip
            )));
        }

        let expected = n_rows * self.metadata.width * self.bands;
        if data.len() != expected {
            return Err(AezError::BufferSize {
                expected,
                found: data.len(),
            });
        }

        let offset = T::write_strip(&mut self.dir, data)?;
        let offset = u32::try_from(offset)
            .map_err(|_| self.layout_error("output exceeds the 4 GiB classic TIFF limit".into()))?;
        let byte_count = u32::try_from(std::mem::size_of_val(data))
            .map_err(|_| self.layout_error("strip exceeds 4 GiB".into()))?;

        self.strip_offsets.push(offset);
        self.strip_byte_counts.push(byte_count);
        self.next_row += n_rows;
        Ok(())
    }
}

/// Write a complete in-memory raster in strips of [`DEFAULT_ROWS_PER_STRIP`] rows.
pub fn write_geotiff<T: Sample>(
    path: impl AsRef<Path>,
    metadata: &RasterMetadata,
    bands: usize,
    data: &[T],
) -> Result<()> {
    let path = path.as_ref();
    let expected = metadata.width * metadata.height * bands;
    if data.len() != expected {
        return Err(AezError::BufferSize {
            expected,
            found: data.len(),
        });
    }

    let mut encoder = create_encoder(path)?;
    let mut sink = GeoTiffSink::<_, T>::new(
        &mut encoder,
        path,
        metadata.clone(),
        bands,
        DEFAULT_ROWS_PER_STRIP,
    )?;
    let stride = metadata.width * bands;
    for band in RowBands::new(metadata.height, DEFAULT_ROWS_PER_STRIP)?.iter() {
        let rows = &data[band.row_start * stride..band.row_end() * stride];
        sink.write_rows(band.row_start, band.n_rows, rows)?;
    }
    sink.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn georef(w: usize, h: usize) -> RasterMetadata {
        RasterMetadata {
            width: w,
            height: h,
            transform: Some(GeoTransform([-124.0, 0.5, 0.0, 49.0, 0.0, -0.5])),
            crs: CrsKeys {
                key_directory: Some(vec![1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326]),
                double_params: None,
                ascii_params: Some("WGS 84|".to_string()),
            },
            nodata: Some(-9999.0),
        }
    }

    #[test]
    fn f32_round_trip_preserves_values_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmin12c.tif");
        let meta = georef(5, 3);
        let data: Vec<f32> = (0..15).map(|i| i as f32 * 0.5).collect();

        write_geotiff(&path, &meta, 1, &data).unwrap();
        let (grid, back) = read_full(&path).unwrap();

        assert_eq!(grid.data, data);
        assert_eq!(back, meta);
    }

    #[test]
    fn read_rows_spans_strip_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("banded.tif");
        let meta = georef(4, 7);
        let data: Vec<f32> = (0..28).map(|i| i as f32).collect();

        // Strips of 3 rows: [0..3), [3..6), [6..7).
        let mut encoder = create_encoder(&path).unwrap();
        let mut sink = GeoTiffSink::<_, f32>::new(&mut encoder, &path, meta.clone(), 1, 3).unwrap();
        for band in RowBands::new(7, 3).unwrap().iter() {
            sink.write_rows(band.row_start, band.n_rows, &data[band.row_start * 4..band.row_end() * 4])
                .unwrap();
        }
        sink.finish().unwrap();
        drop(encoder);

        let mut reader = GeoTiffReader::open(&path).unwrap();
        assert_eq!(reader.read_rows(2, 4).unwrap(), data[8..24].to_vec());
        assert_eq!(reader.read_rows(6, 1).unwrap(), data[24..28].to_vec());
        assert_eq!(reader.read_rows(0, 1).unwrap(), data[0..4].to_vec());
    }

    #[test]
    fn i16_raster_reads_back_as_f32() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.tif");
        let meta = georef(2, 2);
        write_geotiff::<i16>(&path, &meta, 1, &[3, 27, -9999, 12]).unwrap();

        let (grid, back) = read_full(&path).unwrap();
        assert_eq!(grid.data, vec![3.0, 27.0, -9999.0, 12.0]);
        assert_eq!(back.nodata, Some(-9999.0));
    }

    #[test]
    fn band_stack_reads_interleaved_floats_across_strips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probabilities.tif");
        let meta = georef(3, 5);
        let data: Vec<f32> = (0..15).flat_map(|i| [i as f32 / 16.0, 1.0 - i as f32 / 16.0]).collect();

        let mut encoder = create_encoder(&path).unwrap();
        let mut sink = GeoTiffSink::<_, f32>::new(&mut encoder, &path, meta.clone(), 2, 2).unwrap();
        for band in RowBands::new(5, 2).unwrap().iter() {
            sink.write_rows(band.row_start, band.n_rows, &data[band.row_start * 6..band.row_end() * 6])
                .unwrap();
        }
        sink.finish().unwrap();
        drop(encoder);

        let stack = read_band_stack(&path).unwrap();
        assert_eq!(stack.bands, 2);
        assert_eq!(stack.metadata, meta);
        assert_eq!(stack.data, data);
        assert_eq!(stack.get(4, 2, 1), 1.0 - 14.0 / 16.0);
        assert_eq!(stack.pixel(0, 1), &[1.0 / 16.0, 15.0 / 16.0]);
    }

    #[test]
    fn band_stack_rejects_integer_rasters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.tif");
        write_geotiff::<i16>(&path, &georef(2, 2), 1, &[1, 2, 3, 4]).unwrap();
        assert!(matches!(
            read_band_stack(&path),
            Err(AezError::UnsupportedLayout { .. })
        ));
    }

    #[test]
    fn out_of_order_and_short_strips_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tif");
        let meta = georef(2, 4);
        let mut encoder = create_encoder(&path).unwrap();
        let mut sink = GeoTiffSink::<_, f32>::new(&mut encoder, &path, meta, 1, 2).unwrap();

        assert!(matches!(
            sink.write_rows(2, 2, &[0.0; 4]),
            Err(AezError::OutOfOrderWrite { expected: 0, found: 2 })
        ));
        assert!(sink.write_rows(0, 1, &[0.0; 2]).is_err());
        assert!(matches!(
            sink.write_rows(0, 2, &[0.0; 3]),
            Err(AezError::BufferSize { expected: 4, found: 3 })
        ));
        sink.write_rows(0, 2, &[0.0; 4]).unwrap();
        assert!(sink.finish().is_err(), "unfinished raster must not finalize cleanly");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            GeoTiffReader::open(dir.path().join("nope.tif")),
            Err(AezError::Io(_))
        ));
    }
}
