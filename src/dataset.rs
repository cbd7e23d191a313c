//! Multi-band datasets over shared raw files.
//!
//! A [`RawDataset`] groups bands that describe the same pixel grid, carries
//! a small metadata map, and dispatches multi-band window requests. For
//! pixel-interleaved files whose bands all qualify for direct I/O, the
//! request is served band by band against the file; everything else goes
//! through each band's scanline cache.

use ahash::AHashMap;
use tracing::debug;

use crate::band::{BandLayout, RawBand};
use crate::config::Config;
use crate::data_type::{ByteOrder, DataType};
use crate::error::{Error, Result};
use crate::file::RawFile;
use crate::window::{BufferLayout, IoOptions, Progress, Window};

/// Metadata key describing the band interleaving (`PIXEL`, `LINE`, `BAND`).
pub const MD_INTERLEAVE: &str = "INTERLEAVE";

/// Metadata key whose presence marks the file as possibly sparse, allowing
/// short reads on read-only bands to come back as zeros.
pub const MD_SPARSE_OK: &str = "ENVI";

/// Canonical multi-band layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interleaving {
    /// Band-interleaved by pixel: bands of one pixel are adjacent.
    Bip,
    /// Band-interleaved by line: each row holds every band in turn.
    Bil,
    /// Band-sequential: whole bands follow each other.
    Bsq,
    /// Regular strided layout that matches none of the canonical three.
    Unknown,
}

/// Arithmetic description of how the dataset's bands sit in the file.
#[derive(Debug, Clone, Copy)]
pub struct RawBinaryLayout {
    /// Element type shared by all bands.
    pub data_type: DataType,
    /// Whether the on-disk byte order is little-endian.
    pub little_endian: bool,
    /// Byte offset of band 0, row 0, pixel 0.
    pub image_offset: u64,
    /// Signed byte distance between adjacent pixels.
    pub pixel_stride: i64,
    /// Signed byte distance between adjacent lines.
    pub line_stride: i64,
    /// Signed byte distance between consecutive bands.
    pub band_stride: i64,
    /// Classified interleaving.
    pub interleaving: Interleaving,
}

/// Ordered collection of bands over one pixel grid.
pub struct RawDataset {
    bands: Vec<RawBand>,
    metadata: AHashMap<String, String>,
}

impl RawDataset {
    /// Builds a dataset from bands that all share the same dimensions.
    pub fn new(bands: Vec<RawBand>) -> Result<Self> {
        let Some(first) = bands.first() else {
            return Err(Error::Layout("dataset needs at least one band".to_string()));
        };
        let (width, height) = (first.width(), first.height());
        for band in &bands {
            if band.width() != width || band.height() != height {
                return Err(Error::Layout(format!(
                    "band of {}x{} in a {width}x{height} dataset",
                    band.width(),
                    band.height()
                )));
            }
        }
        Ok(Self {
            bands,
            metadata: AHashMap::new(),
        })
    }

    /// Number of bands.
    #[must_use]
    pub fn n_bands(&self) -> usize {
        self.bands.len()
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.bands[0].width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.bands[0].height()
    }

    /// Band `index` (zero-based).
    #[must_use]
    pub fn band(&self, index: usize) -> Option<&RawBand> {
        self.bands.get(index)
    }

    /// Mutable band `index` (zero-based).
    pub fn band_mut(&mut self, index: usize) -> Option<&mut RawBand> {
        self.bands.get_mut(index)
    }

    /// Metadata value for `key`.
    #[must_use]
    pub fn metadata_item(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Sets a metadata value. Declaring the sparse marker propagates the
    /// exemption to every band.
    pub fn set_metadata_item(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
        if key == MD_SPARSE_OK {
            for band in &mut self.bands {
                band.set_sparse_ok(true);
            }
        }
    }

    /// Reads `window` from every band into `buf`.
    ///
    /// Band `i` lands at byte offset `i * band_space`; within each band the
    /// buffer is shaped by `layout`. Pixel-interleaved datasets whose bands
    /// all qualify are read directly band by band, with `progress` scaled
    /// to span the whole request.
    pub fn read_window(
        &mut self,
        window: Window,
        buf: &mut [u8],
        layout: BufferLayout,
        band_space: usize,
        opts: &IoOptions,
        mut progress: Option<Progress<'_>>,
    ) -> Result<()> {
        self.check_band_buffer(buf.len(), &layout, band_space)?;

        if self.use_per_band_direct(&window, &layout, opts) {
            debug!("interleaved direct dispatch over {} bands", self.bands.len());
        }

        let n_bands = self.bands.len();
        for (i, band) in self.bands.iter_mut().enumerate() {
            let sub = &mut buf[i * band_space..];
            match progress.as_mut() {
                Some(cb) => {
                    let mut scaled = |f: f64| cb((i as f64 + f) / n_bands as f64);
                    band.read_window(window, sub, layout, opts, Some(&mut scaled))?;
                }
                None => band.read_window(window, sub, layout, opts, None)?,
            }
        }
        Ok(())
    }

    /// Writes `buf` into `window` of every band; the inverse of
    /// [`read_window`](Self::read_window).
    pub fn write_window(
        &mut self,
        window: Window,
        buf: &[u8],
        layout: BufferLayout,
        band_space: usize,
        opts: &IoOptions,
    ) -> Result<()> {
        self.check_band_buffer(buf.len(), &layout, band_space)?;
        for (i, band) in self.bands.iter_mut().enumerate() {
            band.write_window(window, &buf[i * band_space..], layout, opts)?;
        }
        Ok(())
    }

    /// Whether this request takes the per-band direct route: same-size
    /// window and buffer, several pixel-interleaved bands, and every band's
    /// gate open.
    fn use_per_band_direct(&self, window: &Window, layout: &BufferLayout, opts: &IoOptions) -> bool {
        window.width == layout.width
            && window.height == layout.height
            && self.bands.len() > 1
            && self.metadata_item(MD_INTERLEAVE) == Some("PIXEL")
            && self
                .bands
                .iter()
                .all(|band| band.can_use_direct_io(window, opts.resample))
    }

    fn check_band_buffer(
        &self,
        buf_len: usize,
        layout: &BufferLayout,
        band_space: usize,
    ) -> Result<()> {
        let needed = (self.bands.len() - 1) * band_space + layout.min_len();
        if needed > buf_len {
            return Err(Error::Window(format!(
                "buffer of {buf_len} bytes, {} bands need {needed}",
                self.bands.len()
            )));
        }
        Ok(())
    }

    /// Classifies the dataset's on-disk layout.
    ///
    /// Returns `None` when the bands disagree on strides, byte order or
    /// element type, or when their offsets are not an arithmetic
    /// progression. A single-band dataset reports a zero band stride and
    /// [`Interleaving::Unknown`].
    #[must_use]
    pub fn raw_binary_layout(&self) -> Option<RawBinaryLayout> {
        let first = self.bands.first()?;
        let pixel_stride = first.pixel_stride();
        let line_stride = first.line_stride();
        let byte_order = first.byte_order();
        let data_type = first.data_type();
        let image_offset = first.img_offset();

        let mut band_stride: i64 = 0;
        for (i, band) in self.bands.iter().enumerate().skip(1) {
            if band.pixel_stride() != pixel_stride
                || band.line_stride() != line_stride
                || band.byte_order() != byte_order
                || band.data_type() != data_type
            {
                return None;
            }
            let delta = band.img_offset() as i64 - image_offset as i64;
            if i == 1 {
                band_stride = delta;
            } else if delta != band_stride * i as i64 {
                return None;
            }
        }

        let n = self.bands.len() as i64;
        let dt_size = data_type.size_bytes() as i64;
        let width = self.width() as i64;
        let height = self.height() as i64;

        let interleaving = if self.bands.len() > 1 {
            if pixel_stride == n * dt_size
                && line_stride == pixel_stride * width
                && band_stride == dt_size
            {
                Interleaving::Bip
            } else if pixel_stride == dt_size
                && line_stride == dt_size * n * width
                && band_stride == dt_size * width
            {
                Interleaving::Bil
            } else if pixel_stride == dt_size
                && line_stride == dt_size * width
                && band_stride == line_stride * height
            {
                Interleaving::Bsq
            } else {
                Interleaving::Unknown
            }
        } else {
            Interleaving::Unknown
        };

        Some(RawBinaryLayout {
            data_type,
            little_endian: byte_order == ByteOrder::LittleEndian,
            image_offset,
            pixel_stride,
            line_stride,
            band_stride,
            interleaving,
        })
    }

    /// Flushes every band.
    pub fn flush(&mut self) -> Result<()> {
        for band in &mut self.bands {
            band.flush()?;
        }
        Ok(())
    }

    /// Flushes every band and reports the first error, consuming the
    /// dataset. Dropping without closing flushes best-effort instead.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

/// Pre-open sanity check for a proposed layout against the actual file.
///
/// Guards format openers against header combinations that describe far
/// more data than the file holds, or that would need outsized scanline
/// buffers. The size comparison allows a 50% shortfall, since sparse
/// formats legitimately truncate trailing zeros. Layouts with few bands
/// and short lines skip the size comparison unless configuration forces
/// it; a falsy configuration value disables the comparison entirely.
pub fn check_layout_size(
    file: &dyn RawFile,
    header_size: u64,
    n_bands: usize,
    width: usize,
    height: usize,
    layout: &BandLayout,
    band_stride: u64,
    config: &Config,
) -> Result<()> {
    if n_bands == 0 || width == 0 || height == 0 {
        return Err(Error::Layout(format!(
            "{n_bands} bands of {width}x{height} describe no data"
        )));
    }
    let dt_size = layout.data_type.size_bytes() as u64;

    let wants_check = n_bands > 10
        || layout.pixel_stride.unsigned_abs().saturating_mul(width as u64) > 20_000
        || config.check_file_size == Some(true);
    if wants_check && config.check_file_size != Some(false) {
        let expected = expected_file_size(header_size, n_bands, width, height, layout, band_stride)
            .ok_or_else(|| Error::Layout("expected image size overflows".to_string()))?;
        let actual = file.len().map_err(Error::Io)?;
        if actual < expected / 2 {
            return Err(Error::FileTooSmall { expected, actual });
        }
    }

    let line_size = layout
        .pixel_stride
        .unsigned_abs()
        .saturating_mul(width as u64 - 1)
        .saturating_add(dt_size);
    if line_size > (i32::MAX as u64) / 4 / n_bands as u64 {
        return Err(Error::MemoryLimit(format!(
            "{n_bands} scanline buffers of {line_size} bytes each"
        )));
    }

    Ok(())
}

fn expected_file_size(
    header_size: u64,
    n_bands: usize,
    width: usize,
    height: usize,
    layout: &BandLayout,
    band_stride: u64,
) -> Option<u64> {
    let mut expected = header_size.checked_add(band_stride.checked_mul(n_bands as u64 - 1)?)?;
    if layout.line_stride >= 0 {
        expected = expected.checked_add((layout.line_stride as u64).checked_mul(height as u64 - 1)?)?;
    }
    if layout.pixel_stride >= 0 {
        expected = expected.checked_add((layout.pixel_stride as u64).checked_mul(width as u64 - 1)?)?;
    }
    Some(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::{Access, BandOptions};
    use crate::file::MemoryFile;
    use std::sync::Arc;

    fn band_on(
        file: Arc<MemoryFile>,
        img_offset: u64,
        pixel_stride: i64,
        line_stride: i64,
        data_type: DataType,
        width: usize,
        height: usize,
        force_direct: Option<bool>,
    ) -> RawBand {
        let layout = BandLayout {
            img_offset,
            pixel_stride,
            line_stride,
            data_type,
            byte_order: ByteOrder::native(),
        };
        let options = BandOptions {
            config: Config {
                one_big_read: force_direct,
                check_file_size: None,
            },
            ..BandOptions::default()
        };
        RawBand::with_options(file, layout, width, height, Access::Update, options).unwrap()
    }

    /// Two-band pixel-interleaved file read through the dataset in one
    /// request, bands deinterleaved into consecutive buffer sections.
    #[test]
    fn test_bip_two_band_read() {
        // 60 bytes: even offsets belong to band 1, odd offsets to band 2.
        let data: Vec<u8> = (0..60)
            .map(|i| {
                if i % 2 == 0 {
                    (i / 2) as u8
                } else {
                    100 + (i / 2) as u8
                }
            })
            .collect();
        let file = Arc::new(MemoryFile::with_data(data));

        let bands = vec![
            band_on(file.clone(), 0, 2, 20, DataType::U8, 10, 3, Some(true)),
            band_on(file.clone(), 1, 2, 20, DataType::U8, 10, 3, Some(true)),
        ];
        let mut dataset = RawDataset::new(bands).unwrap();
        dataset.set_metadata_item(MD_INTERLEAVE, "PIXEL");

        let window = Window::full(10, 3);
        let layout = BufferLayout::packed(10, 3, DataType::U8);
        assert!(dataset.use_per_band_direct(&window, &layout, &IoOptions::default()));

        let mut out = vec![0u8; 60];
        let mut fractions = Vec::new();
        let mut cb = |f: f64| {
            fractions.push(f);
            true
        };
        dataset
            .read_window(window, &mut out, layout, 30, &IoOptions::default(), Some(&mut cb))
            .unwrap();

        let expected_band1: Vec<u8> = (0..30).collect();
        let expected_band2: Vec<u8> = (100..130).collect();
        assert_eq!(&out[..30], &expected_band1[..]);
        assert_eq!(&out[30..], &expected_band2[..]);

        // Progress spans the whole request, ending at 1.0.
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*fractions.last().unwrap(), 1.0);
        assert!(fractions.iter().all(|f| *f <= 1.0));
    }

    #[test]
    fn test_bip_round_trip_via_dataset() {
        let file = Arc::new(MemoryFile::with_data(vec![0u8; 60]));
        let bands = vec![
            band_on(file.clone(), 0, 2, 20, DataType::U8, 10, 3, Some(true)),
            band_on(file.clone(), 1, 2, 20, DataType::U8, 10, 3, Some(true)),
        ];
        let mut dataset = RawDataset::new(bands).unwrap();
        dataset.set_metadata_item(MD_INTERLEAVE, "PIXEL");

        let src: Vec<u8> = (0..60).map(|v| v as u8).collect();
        let layout = BufferLayout::packed(10, 3, DataType::U8);
        dataset
            .write_window(Window::full(10, 3), &src, layout, 30, &IoOptions::default())
            .unwrap();

        let mut out = vec![0u8; 60];
        dataset
            .read_window(
                Window::full(10, 3),
                &mut out,
                layout,
                30,
                &IoOptions::default(),
                None,
            )
            .unwrap();
        assert_eq!(out, src);

        // On disk the two bands interleave byte by byte.
        let bytes = file.contents();
        assert_eq!(bytes[0], src[0]);
        assert_eq!(bytes[1], src[30]);
    }

    /// Three-band BIL construction classifies as BIL.
    #[test]
    fn test_layout_inference_bil() {
        let file = Arc::new(MemoryFile::with_data(vec![0u8; 120]));
        let bands: Vec<RawBand> = [0u64, 10, 20]
            .iter()
            .map(|off| band_on(file.clone(), *off, 2, 30, DataType::I16, 5, 4, None))
            .collect();
        let dataset = RawDataset::new(bands).unwrap();

        let layout = dataset.raw_binary_layout().unwrap();
        assert_eq!(layout.interleaving, Interleaving::Bil);
        assert_eq!(layout.band_stride, 10);
        assert_eq!(layout.image_offset, 0);
        assert_eq!(
            layout.little_endian,
            ByteOrder::native() == ByteOrder::LittleEndian
        );
    }

    #[test]
    fn test_layout_inference_bip() {
        let file = Arc::new(MemoryFile::with_data(vec![0u8; 60]));
        let bands = vec![
            band_on(file.clone(), 0, 2, 20, DataType::U8, 10, 3, None),
            band_on(file.clone(), 1, 2, 20, DataType::U8, 10, 3, None),
        ];
        let dataset = RawDataset::new(bands).unwrap();
        assert_eq!(
            dataset.raw_binary_layout().unwrap().interleaving,
            Interleaving::Bip
        );
    }

    #[test]
    fn test_layout_inference_bsq() {
        let file = Arc::new(MemoryFile::with_data(vec![0u8; 200]));
        let bands = vec![
            band_on(file.clone(), 0, 1, 10, DataType::U8, 10, 10, None),
            band_on(file.clone(), 100, 1, 10, DataType::U8, 10, 10, None),
        ];
        let dataset = RawDataset::new(bands).unwrap();
        assert_eq!(
            dataset.raw_binary_layout().unwrap().interleaving,
            Interleaving::Bsq
        );
    }

    #[test]
    fn test_layout_inference_unknown_and_mismatch() {
        // Regular offsets but a stride pattern matching no canonical form.
        let file = Arc::new(MemoryFile::with_data(vec![0u8; 400]));
        let bands = vec![
            band_on(file.clone(), 0, 3, 40, DataType::U8, 10, 10, None),
            band_on(file.clone(), 1, 3, 40, DataType::U8, 10, 10, None),
        ];
        let dataset = RawDataset::new(bands).unwrap();
        assert_eq!(
            dataset.raw_binary_layout().unwrap().interleaving,
            Interleaving::Unknown
        );

        // Bands that disagree on the element type have no common layout.
        let file = Arc::new(MemoryFile::with_data(vec![0u8; 400]));
        let bands = vec![
            band_on(file.clone(), 0, 1, 10, DataType::U8, 10, 10, None),
            band_on(file.clone(), 100, 2, 20, DataType::I16, 10, 10, None),
        ];
        let dataset = RawDataset::new(bands).unwrap();
        assert!(dataset.raw_binary_layout().is_none());
    }

    #[test]
    fn test_single_band_layout() {
        let file = Arc::new(MemoryFile::with_data(vec![0u8; 100]));
        let bands = vec![band_on(file, 0, 1, 10, DataType::U8, 10, 10, None)];
        let dataset = RawDataset::new(bands).unwrap();
        let layout = dataset.raw_binary_layout().unwrap();
        assert_eq!(layout.band_stride, 0);
        assert_eq!(layout.interleaving, Interleaving::Unknown);
    }

    #[test]
    fn test_sparse_marker_propagates() {
        let file = Arc::new(MemoryFile::with_data(vec![1u8; 5]));
        let layout = BandLayout {
            img_offset: 0,
            pixel_stride: 1,
            line_stride: 10,
            data_type: DataType::U8,
            byte_order: ByteOrder::native(),
        };
        let band = RawBand::new(file, layout, 10, 2, Access::ReadOnly).unwrap();
        let mut dataset = RawDataset::new(vec![band]).unwrap();

        let mut out = vec![0u8; 10];
        assert!(dataset.band_mut(0).unwrap().read_block(1, &mut out).is_err());

        dataset.set_metadata_item(MD_SPARSE_OK, "1");
        dataset.band_mut(0).unwrap().read_block(1, &mut out).unwrap();
        assert_eq!(out, vec![0u8; 10]);
    }

    #[test]
    fn test_mismatched_band_sizes_rejected() {
        let file = Arc::new(MemoryFile::with_data(vec![0u8; 400]));
        let bands = vec![
            band_on(file.clone(), 0, 1, 10, DataType::U8, 10, 10, None),
            band_on(file.clone(), 0, 1, 5, DataType::U8, 5, 5, None),
        ];
        assert!(RawDataset::new(bands).is_err());
    }

    #[test]
    fn test_check_layout_size_accepts_plausible_file() {
        let file = MemoryFile::with_data(vec![0u8; 200]);
        let layout = BandLayout {
            img_offset: 0,
            pixel_stride: 1,
            line_stride: 10,
            data_type: DataType::U8,
            byte_order: ByteOrder::native(),
        };
        let config = Config {
            one_big_read: None,
            check_file_size: Some(true),
        };
        check_layout_size(&file, 0, 2, 10, 10, &layout, 100, &config).unwrap();
    }

    #[test]
    fn test_check_layout_size_rejects_short_file() {
        // 11 bands trigger the check without any configuration.
        let file = MemoryFile::with_data(vec![0u8; 64]);
        let layout = BandLayout {
            img_offset: 0,
            pixel_stride: 1,
            line_stride: 100,
            data_type: DataType::U8,
            byte_order: ByteOrder::native(),
        };
        let config = Config::default();
        let err = check_layout_size(&file, 0, 11, 100, 100, &layout, 10_000, &config).unwrap_err();
        assert!(matches!(err, Error::FileTooSmall { .. }));

        // A falsy override disables the comparison.
        let config = Config {
            one_big_read: None,
            check_file_size: Some(false),
        };
        check_layout_size(&file, 0, 11, 100, 100, &layout, 10_000, &config).unwrap();
    }

    #[test]
    fn test_check_layout_size_sparse_margin() {
        // Half the expected size is still acceptable.
        let file = MemoryFile::with_data(vec![0u8; 5_000]);
        let layout = BandLayout {
            img_offset: 0,
            pixel_stride: 1,
            line_stride: 100,
            data_type: DataType::U8,
            byte_order: ByteOrder::native(),
        };
        let config = Config {
            one_big_read: None,
            check_file_size: Some(true),
        };
        // Expected size just under 10_000; 5_000 on disk passes the margin.
        check_layout_size(&file, 0, 1, 100, 100, &layout, 0, &config).unwrap();
    }

    #[test]
    fn test_check_layout_size_memory_cap() {
        let file = MemoryFile::new();
        let layout = BandLayout {
            img_offset: 0,
            pixel_stride: 40_000,
            line_stride: 40_000 * 100_000,
            data_type: DataType::U8,
            byte_order: ByteOrder::native(),
        };
        let config = Config {
            one_big_read: None,
            check_file_size: Some(false),
        };
        let err = check_layout_size(&file, 0, 4, 100_000, 100, &layout, 0, &config).unwrap_err();
        assert!(matches!(err, Error::MemoryLimit(_)));
    }
}
