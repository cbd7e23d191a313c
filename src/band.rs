//! Single-band access to a raw strided pixel grid.
//!
//! A [`RawBand`] presents one rectangular grid of pixels stored in a file as
//! a regular arithmetic progression of bytes: a starting offset, a signed
//! byte stride between pixels, and a signed byte stride between lines.
//! Negative strides describe right-to-left or bottom-up layouts.
//!
//! Reads and writes go through one of two routes:
//!
//! - A **scanline cache**: [`read_block`](RawBand::read_block) and
//!   [`write_block`](RawBand::write_block) move whole decoded lines through
//!   a single line buffer, with an LRU block cache on top for windowed
//!   requests that revisit rows.
//! - A **direct path** that reads or writes the caller's buffer against the
//!   file in one pass, used for large windows when the layout allows it.
//!
//! # Example
//!
//! ```rust,ignore
//! use rawgrid::{Access, BandLayout, ByteOrder, DataType, RawBand, Window, BufferLayout, IoOptions};
//!
//! let layout = BandLayout {
//!     img_offset: 0,
//!     pixel_stride: 2,
//!     line_stride: 1024,
//!     data_type: DataType::I16,
//!     byte_order: ByteOrder::LittleEndian,
//! };
//! let mut band = RawBand::open("scene.bil", layout, 512, 512)?;
//! let mut pixels = vec![0u8; 64 * 64 * 2];
//! band.read_window(
//!     Window::new(0, 0, 64, 64),
//!     &mut pixels,
//!     BufferLayout::packed(64, 64, DataType::I16),
//!     &IoOptions::default(),
//!     None,
//! )?;
//! ```

use std::path::Path;
use std::sync::Arc;

use memmap2::{Mmap, MmapMut};
use tracing::{debug, warn};

use crate::block_cache::{BlockCache, CachedBlock};
use crate::config::Config;
use crate::convert::{copy_words, read_word, write_word};
use crate::data_type::{ByteOrder, DataType};
use crate::error::{Error, Result};
use crate::file::{LocalFile, RawFile};
use crate::swap::swap_pixel_words;
use crate::window::{bicubic_weight, BufferLayout, IoOptions, Progress, ResamplingMethod, Window};

/// Scanline length above which the direct path becomes interesting.
const DIRECT_IO_MIN_LINE_SIZE: usize = 50_000;

/// Default byte budget for the per-band scanline block cache.
const DEFAULT_CACHE_BYTES: usize = 32 * 1024 * 1024;

/// Access mode of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Reads only; sparse regions are I/O errors unless exempted.
    ReadOnly,
    /// Reads and writes; reads past the end of the file yield zeros.
    Update,
}

/// On-disk placement of one band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandLayout {
    /// Byte offset of row 0, pixel 0.
    pub img_offset: u64,
    /// Signed byte distance between horizontally adjacent pixels.
    pub pixel_stride: i64,
    /// Signed byte distance between vertically adjacent pixels.
    pub line_stride: i64,
    /// Element type.
    pub data_type: DataType,
    /// On-disk byte order of multi-byte elements.
    pub byte_order: ByteOrder,
}

/// Construction options for a [`RawBand`].
#[derive(Debug, Clone)]
pub struct BandOptions {
    /// Whether this band is responsible for the final flush of the file.
    /// When several bands share one handle, exactly one should own it.
    pub owns_file: bool,
    /// Treat short reads on a read-only band as sparse holes (zeros)
    /// instead of errors.
    pub sparse_ok: bool,
    /// Byte budget of the scanline block cache.
    pub cache_bytes: usize,
    /// Captured configuration options.
    pub config: Config,
}

impl Default for BandOptions {
    fn default() -> Self {
        Self {
            owns_file: false,
            sparse_ok: false,
            cache_bytes: DEFAULT_CACHE_BYTES,
            config: Config::from_env(),
        }
    }
}

/// One band of a raw raster.
impl std::fmt::Debug for RawBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBand")
            .field("owns_file", &self.owns_file)
            .field("layout", &self.layout)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("access", &self.access)
            .field("sparse_ok", &self.sparse_ok)
            .field("config", &self.config)
            .field("line_size", &self.line_size)
            .field("loaded_line", &self.loaded_line)
            .field("dirty", &self.dirty)
            .field("overviews", &self.overviews)
            .field("nodata", &self.nodata)
            .finish()
    }
}

pub struct RawBand {
    file: Arc<dyn RawFile>,
    owns_file: bool,
    layout: BandLayout,
    width: usize,
    height: usize,
    access: Access,
    sparse_ok: bool,
    config: Config,
    line_size: usize,
    line_buffer: Vec<u8>,
    loaded_line: Option<usize>,
    dirty: bool,
    blocks: BlockCache,
    overviews: Vec<RawBand>,
    nodata: Option<f64>,
}

impl RawBand {
    /// Creates a band over `file` with default options.
    pub fn new(
        file: Arc<dyn RawFile>,
        layout: BandLayout,
        width: usize,
        height: usize,
        access: Access,
    ) -> Result<Self> {
        Self::with_options(file, layout, width, height, access, BandOptions::default())
    }

    /// Creates a band over `file`.
    ///
    /// Fails with [`Error::Layout`] when the strides, offset and dimensions
    /// are inconsistent: a zero pixel stride, a negative stride that would
    /// address bytes before the start of the file, or products that
    /// overflow the offset range.
    pub fn with_options(
        file: Arc<dyn RawFile>,
        layout: BandLayout,
        width: usize,
        height: usize,
        access: Access,
        options: BandOptions,
    ) -> Result<Self> {
        let line_size = validate_layout(&layout, width, height)?;

        let mut line_buffer = Vec::new();
        line_buffer
            .try_reserve_exact(line_size)
            .map_err(|_| Error::Allocation(line_size))?;
        line_buffer.resize(line_size, 0);

        debug!(
            "band on {}: offset={} pixel_stride={} line_stride={} type={} size={}x{}",
            file.identifier(),
            layout.img_offset,
            layout.pixel_stride,
            layout.line_stride,
            layout.data_type,
            width,
            height
        );

        Ok(Self {
            file,
            owns_file: options.owns_file,
            layout,
            width,
            height,
            access,
            sparse_ok: options.sparse_ok,
            config: options.config,
            line_size,
            line_buffer,
            loaded_line: None,
            dirty: false,
            blocks: BlockCache::new(options.cache_bytes),
            overviews: Vec::new(),
            nodata: None,
        })
    }

    /// Opens a local file read-only and wraps it in a band that owns the
    /// handle.
    pub fn open(
        path: impl AsRef<Path>,
        layout: BandLayout,
        width: usize,
        height: usize,
    ) -> Result<Self> {
        let file = Arc::new(LocalFile::open(path)?);
        let options = BandOptions {
            owns_file: true,
            ..BandOptions::default()
        };
        Self::with_options(file, layout, width, height, Access::ReadOnly, options)
    }

    /// Opens a local file for update and wraps it in a band that owns the
    /// handle.
    pub fn open_update(
        path: impl AsRef<Path>,
        layout: BandLayout,
        width: usize,
        height: usize,
    ) -> Result<Self> {
        let file = Arc::new(LocalFile::update(path)?);
        let options = BandOptions {
            owns_file: true,
            ..BandOptions::default()
        };
        Self::with_options(file, layout, width, height, Access::Update, options)
    }

    /// Width in pixels.
    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    #[inline]
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Element type.
    #[inline]
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.layout.data_type
    }

    /// On-disk byte order.
    #[inline]
    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.layout.byte_order
    }

    /// Byte offset of row 0, pixel 0.
    #[inline]
    #[must_use]
    pub fn img_offset(&self) -> u64 {
        self.layout.img_offset
    }

    /// Signed byte distance between adjacent pixels.
    #[inline]
    #[must_use]
    pub fn pixel_stride(&self) -> i64 {
        self.layout.pixel_stride
    }

    /// Signed byte distance between adjacent lines.
    #[inline]
    #[must_use]
    pub fn line_stride(&self) -> i64 {
        self.layout.line_stride
    }

    /// Access mode.
    #[inline]
    #[must_use]
    pub fn access(&self) -> Access {
        self.access
    }

    /// Bytes one decoded scanline occupies on disk.
    #[inline]
    #[must_use]
    pub fn line_size(&self) -> usize {
        self.line_size
    }

    /// Nodata marker value, if one was declared.
    #[inline]
    #[must_use]
    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    /// Declares the nodata marker value. Carried as metadata only; I/O is
    /// unaffected.
    pub fn set_nodata(&mut self, value: Option<f64>) {
        self.nodata = value;
    }

    pub(crate) fn set_sparse_ok(&mut self, sparse_ok: bool) {
        self.sparse_ok = sparse_ok;
    }

    #[inline]
    fn native_order(&self) -> bool {
        self.layout.byte_order.is_native()
    }

    #[inline]
    fn swap_needed(&self) -> bool {
        !self.native_order() && self.layout.data_type.size_bytes() > 1
    }

    /// File byte offset of pixel `(x, y)`.
    ///
    /// Negative stride terms subtract from the image offset; construction
    /// guarantees the result stays within `[0, i64::MAX]` for in-bounds
    /// coordinates.
    #[must_use]
    pub fn byte_offset(&self, x: usize, y: usize) -> u64 {
        let mut off = self.layout.img_offset;
        if self.layout.line_stride >= 0 {
            off += self.layout.line_stride as u64 * y as u64;
        } else {
            off -= self.layout.line_stride.unsigned_abs() * y as u64;
        }
        if self.layout.pixel_stride >= 0 {
            off += self.layout.pixel_stride as u64 * x as u64;
        } else {
            off -= self.layout.pixel_stride.unsigned_abs() * x as u64;
        }
        off
    }

    /// Smallest byte offset touched by row `y`.
    fn line_read_offset(&self, y: usize) -> u64 {
        if self.layout.pixel_stride >= 0 {
            self.byte_offset(0, y)
        } else {
            self.byte_offset(self.width - 1, y)
        }
    }

    /// Registers a reduced-resolution companion band consulted by shrinking
    /// direct reads.
    pub fn add_overview(&mut self, band: RawBand) -> Result<()> {
        if band.width >= self.width || band.height >= self.height {
            return Err(Error::Layout(format!(
                "overview {}x{} is not smaller than the band {}x{}",
                band.width, band.height, self.width, self.height
            )));
        }
        self.overviews.push(band);
        Ok(())
    }

    /// Number of registered overviews.
    #[must_use]
    pub fn overview_count(&self) -> usize {
        self.overviews.len()
    }

    /// Ensures the line buffer holds row `y`.
    ///
    /// On a read-only band an unreadable row is an error, except that
    /// short reads are zero-filled when the band was marked sparse-capable.
    /// On an updatable band both cases zero-fill, since the file may simply
    /// not have grown that far yet.
    fn access_line(&mut self, y: usize) -> Result<()> {
        if self.loaded_line == Some(y) {
            return Ok(());
        }

        let read_start = self.line_read_offset(y);
        match self.file.read_at(read_start, &mut self.line_buffer) {
            Err(e) => {
                if self.access == Access::ReadOnly {
                    return Err(Error::Io(e));
                }
                self.line_buffer.fill(0);
                self.loaded_line = Some(y);
                return Ok(());
            }
            Ok(n) if n < self.line_size => {
                if self.access == Access::ReadOnly && !self.sparse_ok {
                    return Err(Error::TruncatedRead(y));
                }
                self.line_buffer[n..].fill(0);
            }
            Ok(_) => {}
        }

        if self.swap_needed() {
            let stride = self.layout.pixel_stride.unsigned_abs() as usize;
            swap_pixel_words(
                &mut self.line_buffer,
                self.layout.data_type,
                self.width,
                stride,
            );
        }

        self.loaded_line = Some(y);
        Ok(())
    }

    /// Reads row `y` into `dest` as packed, native-order elements.
    pub fn read_block(&mut self, y: usize, dest: &mut [u8]) -> Result<()> {
        let dt = self.layout.data_type;
        let needed = self.width * dt.size_bytes();
        if y >= self.height {
            return Err(Error::Window(format!(
                "row {y} outside raster of {} rows",
                self.height
            )));
        }
        if dest.len() < needed {
            return Err(Error::Window(format!(
                "block buffer of {} bytes, need {needed}",
                dest.len()
            )));
        }

        self.access_line(y)?;
        copy_words(
            &self.line_buffer,
            dt,
            self.layout.pixel_stride as isize,
            dest,
            dt,
            dt.size_bytes() as isize,
            self.width,
        );
        Ok(())
    }

    /// Writes row `y` from `src` (packed, native-order elements) through to
    /// the file.
    ///
    /// When pixels on disk are farther apart than one element, the row is
    /// read first so interleaved bytes belonging to other bands survive.
    pub fn write_block(&mut self, y: usize, src: &[u8]) -> Result<()> {
        let dt = self.layout.data_type;
        let dt_size = dt.size_bytes();
        let needed = self.width * dt_size;
        if self.access == Access::ReadOnly {
            return Err(Error::Unsupported("raster opened read-only".to_string()));
        }
        if y >= self.height {
            return Err(Error::Window(format!(
                "row {y} outside raster of {} rows",
                self.height
            )));
        }
        if src.len() < needed {
            return Err(Error::Window(format!(
                "block buffer of {} bytes, need {needed}",
                src.len()
            )));
        }

        if self.layout.pixel_stride.unsigned_abs() as usize > dt_size {
            self.access_line(y)?;
        }

        copy_words(
            src,
            dt,
            dt_size as isize,
            &mut self.line_buffer,
            dt,
            self.layout.pixel_stride as isize,
            self.width,
        );

        let stride = self.layout.pixel_stride.unsigned_abs() as usize;
        if self.swap_needed() {
            swap_pixel_words(&mut self.line_buffer, dt, self.width, stride);
        }

        let write_start = self.line_read_offset(y);
        let result = match self.file.write_at(write_start, &self.line_buffer) {
            Err(e) => Err(Error::Io(e)),
            Ok(n) if n < self.line_size => Err(Error::TruncatedWrite(y)),
            Ok(_) => Ok(()),
        };

        // Swap back so the cached line stays readable.
        if self.swap_needed() {
            swap_pixel_words(&mut self.line_buffer, dt, self.width, stride);
        }

        self.loaded_line = Some(y);
        self.dirty = true;
        result
    }

    /// Writes out dirty cached blocks, then flushes the file if any write
    /// reached it since the last flush.
    ///
    /// A failing block write clears the dirty flag before the error is
    /// returned, so one failure produces one report and no retry.
    pub fn flush(&mut self) -> Result<()> {
        if let Err(e) = self.flush_blocks() {
            self.dirty = false;
            return Err(e);
        }
        if self.dirty {
            self.dirty = false;
            self.file.flush().map_err(Error::Io)?;
        }
        Ok(())
    }

    fn flush_blocks(&mut self) -> Result<()> {
        for y in self.blocks.dirty_rows() {
            let data = self.blocks.get(y).map(|b| b.data.clone());
            if let Some(data) = data {
                self.write_block(y, &data)?;
                self.blocks.mark_clean(y);
            }
        }
        Ok(())
    }

    /// Flushes and, for the owning band, pushes the file down to storage.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        if self.owns_file {
            self.file.flush().map_err(Error::Io)?;
        }
        Ok(())
    }

    /// Whether a window of this shape bypasses the scanline cache.
    ///
    /// Negative pixel strides and interpolating resampling always take the
    /// cached path. Otherwise a configured override wins; without one the
    /// direct path is only worth it for long scanlines when the request
    /// covers less than 40% of each line and few of the rows are already
    /// cached.
    pub(crate) fn can_use_direct_io(&self, window: &Window, resample: ResamplingMethod) -> bool {
        if self.layout.pixel_stride < 0 || resample != ResamplingMethod::Nearest {
            return false;
        }
        match self.config.one_big_read {
            Some(forced) => forced,
            None => {
                let pixel_stride = self.layout.pixel_stride as usize;
                if self.line_size < DIRECT_IO_MIN_LINE_SIZE {
                    return false;
                }
                if window.width > self.line_size / pixel_stride / 5 * 2 {
                    return false;
                }
                if self.blocks.loaded_count(window.y_off, window.height) > window.height / 20 {
                    return false;
                }
                true
            }
        }
    }

    /// Reads `window` into `buf` shaped by `layout`, resampling when the
    /// sizes differ and converting the element type when it differs.
    ///
    /// `progress` is consulted once per output row on the direct path;
    /// returning `false` cancels the request.
    pub fn read_window(
        &mut self,
        window: Window,
        buf: &mut [u8],
        layout: BufferLayout,
        opts: &IoOptions,
        mut progress: Option<Progress<'_>>,
    ) -> Result<()> {
        self.check_request(&window, buf.len(), &layout)?;
        if window.is_empty() || layout.width == 0 || layout.height == 0 {
            return Ok(());
        }

        if !self.can_use_direct_io(&window, opts.resample) {
            return self.read_window_cached(window, buf, layout, opts);
        }

        debug!("direct read on {}", self.file.identifier());

        // A shrinking read may be answerable from an overview.
        if (layout.width < window.width || layout.height < window.height)
            && !self.overviews.is_empty()
        {
            if let Some(idx) = self.pick_overview(&window, &layout) {
                let scaled = self.overview_window(&window, idx);
                let reborrowed: Option<&mut dyn FnMut(f64) -> bool> = match progress {
                    Some(ref mut p) => Some(&mut **p),
                    None => None,
                };
                if self.overviews[idx]
                    .read_window(scaled, buf, layout, opts, reborrowed)
                    .is_ok()
                {
                    return Ok(());
                }
            }
        }

        let dt = self.layout.data_type;
        let dt_size = dt.size_bytes();

        // Contiguous full-width request straight into the caller's buffer.
        if window.width == self.width
            && window.width == layout.width
            && window.height == layout.height
            && layout.data_type == dt
            && self.layout.pixel_stride == dt_size as i64
            && layout.pixel_space == dt_size
            && layout.line_space == layout.pixel_space * window.width
        {
            let offset = self.byte_offset(0, window.y_off);
            let nbytes = window.width * window.height * dt_size;
            self.access_block(offset, &mut buf[..nbytes])?;
            return Ok(());
        }

        // One staged row at a time, subsampling and converting as needed.
        let pixel_stride = self.layout.pixel_stride as usize;
        let row_bytes = pixel_stride * window.width;
        let mut stage = Vec::new();
        stage
            .try_reserve_exact(row_bytes)
            .map_err(|_| Error::Allocation(row_bytes))?;
        stage.resize(row_bytes, 0);

        for i_line in 0..layout.height {
            let src_y = window.y_off + i_line * window.height / layout.height;
            let offset = self.byte_offset(window.x_off, src_y);
            self.access_block(offset, &mut stage)?;

            let row_start = i_line * layout.line_space;
            if window.width == layout.width {
                copy_words(
                    &stage,
                    dt,
                    pixel_stride as isize,
                    &mut buf[row_start..],
                    layout.data_type,
                    layout.pixel_space as isize,
                    window.width,
                );
            } else {
                for i_pixel in 0..layout.width {
                    let src_x = i_pixel * window.width / layout.width;
                    copy_words(
                        &stage[src_x * pixel_stride..],
                        dt,
                        pixel_stride as isize,
                        &mut buf[row_start + i_pixel * layout.pixel_space..],
                        layout.data_type,
                        layout.pixel_space as isize,
                        1,
                    );
                }
            }

            if let Some(cb) = progress.as_mut() {
                if !cb((i_line + 1) as f64 / layout.height as f64) {
                    return Err(Error::Cancelled);
                }
            }
        }

        Ok(())
    }

    /// Writes `buf` shaped by `layout` into `window`, converting the
    /// element type when it differs. Sizes may differ; source pixels are
    /// scattered to their nearest window positions.
    pub fn write_window(
        &mut self,
        window: Window,
        buf: &[u8],
        layout: BufferLayout,
        opts: &IoOptions,
    ) -> Result<()> {
        if self.access == Access::ReadOnly {
            return Err(Error::Unsupported("raster opened read-only".to_string()));
        }
        self.check_request(&window, buf.len(), &layout)?;
        if window.is_empty() || layout.width == 0 || layout.height == 0 {
            return Ok(());
        }

        if !self.can_use_direct_io(&window, opts.resample) {
            return self.write_window_cached(window, buf, layout);
        }

        debug!("direct write on {}", self.file.identifier());

        let dt = self.layout.data_type;
        let dt_size = dt.size_bytes();

        // Contiguous full-width native-order request written in one pass.
        if window.width == self.width
            && window.width == layout.width
            && window.height == layout.height
            && layout.data_type == dt
            && self.layout.pixel_stride == dt_size as i64
            && layout.pixel_space == dt_size
            && layout.line_space == layout.pixel_space * window.width
            && (self.native_order() || dt_size == 1)
        {
            let offset = self.byte_offset(0, window.y_off);
            let nbytes = window.width * window.height * dt_size;
            return match self.file.write_at(offset, &buf[..nbytes]) {
                Err(e) => Err(Error::Io(e)),
                Ok(n) if n < nbytes => Err(Error::TruncatedWrite(window.y_off)),
                Ok(_) => Ok(()),
            };
        }

        let pixel_stride = self.layout.pixel_stride as usize;
        let row_bytes = pixel_stride * window.width;
        let mut stage = Vec::new();
        stage
            .try_reserve_exact(row_bytes)
            .map_err(|_| Error::Allocation(row_bytes))?;
        stage.resize(row_bytes, 0);

        for i_line in 0..layout.height {
            let src_y = window.y_off + i_line * window.height / layout.height;
            let offset = self.byte_offset(window.x_off, src_y);

            // Preserve interleaved bytes belonging to other bands.
            if pixel_stride > dt_size {
                self.access_block(offset, &mut stage)?;
            }

            let row_start = i_line * layout.line_space;
            if window.width == layout.width {
                copy_words(
                    &buf[row_start..],
                    layout.data_type,
                    layout.pixel_space as isize,
                    &mut stage,
                    dt,
                    pixel_stride as isize,
                    window.width,
                );
            } else {
                for i_pixel in 0..layout.width {
                    let src_x = i_pixel * window.width / layout.width;
                    copy_words(
                        &buf[row_start + i_pixel * layout.pixel_space..],
                        layout.data_type,
                        layout.pixel_space as isize,
                        &mut stage[src_x * pixel_stride..],
                        dt,
                        pixel_stride as isize,
                        1,
                    );
                }
            }

            if self.swap_needed() {
                swap_pixel_words(&mut stage, dt, window.width, pixel_stride);
            }

            match self.file.write_at(offset, &stage) {
                Err(e) => return Err(Error::Io(e)),
                Ok(n) if n < row_bytes => return Err(Error::TruncatedWrite(src_y)),
                Ok(_) => {}
            }
        }

        self.dirty = true;
        Ok(())
    }

    fn check_request(&self, window: &Window, buf_len: usize, layout: &BufferLayout) -> Result<()> {
        let x_end = window.x_off.checked_add(window.width);
        let y_end = window.y_off.checked_add(window.height);
        if x_end.is_none_or(|e| e > self.width) || y_end.is_none_or(|e| e > self.height) {
            return Err(Error::Window(format!(
                "window {}x{}+{}+{} outside {}x{} raster",
                window.width, window.height, window.x_off, window.y_off, self.width, self.height
            )));
        }
        let needed = layout.min_len();
        if needed > buf_len {
            return Err(Error::Window(format!(
                "buffer of {buf_len} bytes, layout needs {needed}"
            )));
        }
        Ok(())
    }

    /// Positioned read into `buf` with zero fill for unreachable or sparse
    /// regions, then byte swap to native order.
    fn access_block(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        debug_assert!(self.layout.pixel_stride > 0);

        match self.file.read_at(offset, buf) {
            Err(_) => {
                buf.fill(0);
                return Ok(());
            }
            Ok(n) if n < buf.len() => {
                buf[n..].fill(0);
                return Ok(());
            }
            Ok(_) => {}
        }

        let dt = self.layout.data_type;
        let stride = self.layout.pixel_stride as usize;
        // Overlapping-pixel layouts (stride smaller than the element) have
        // no well-defined word positions; leave them untouched.
        if self.swap_needed() && stride >= dt.size_bytes() {
            swap_pixel_words(buf, dt, buf.len() / stride, stride);
        }
        Ok(())
    }

    fn read_window_cached(
        &mut self,
        window: Window,
        buf: &mut [u8],
        layout: BufferLayout,
        opts: &IoOptions,
    ) -> Result<()> {
        let same_size = window.width == layout.width && window.height == layout.height;
        match opts.resample {
            ResamplingMethod::Nearest => self.read_cached_nearest(window, buf, layout),
            _ if same_size => self.read_cached_nearest(window, buf, layout),
            ResamplingMethod::Bilinear => self.read_cached_interpolated(window, buf, layout, false),
            ResamplingMethod::Bicubic => self.read_cached_interpolated(window, buf, layout, true),
        }
    }

    fn read_cached_nearest(
        &mut self,
        window: Window,
        buf: &mut [u8],
        layout: BufferLayout,
    ) -> Result<()> {
        let dt = self.layout.data_type;
        let dt_size = dt.size_bytes();

        for i_line in 0..layout.height {
            let src_y = window.y_off + i_line * window.height / layout.height;
            let row_start = i_line * layout.line_space;
            let block = self.ensure_block(src_y)?;

            if window.width == layout.width {
                copy_words(
                    &block.data[window.x_off * dt_size..],
                    dt,
                    dt_size as isize,
                    &mut buf[row_start..],
                    layout.data_type,
                    layout.pixel_space as isize,
                    window.width,
                );
            } else {
                for i_pixel in 0..layout.width {
                    let src_x = window.x_off + i_pixel * window.width / layout.width;
                    copy_words(
                        &block.data[src_x * dt_size..],
                        dt,
                        dt_size as isize,
                        &mut buf[row_start + i_pixel * layout.pixel_space..],
                        layout.data_type,
                        layout.pixel_space as isize,
                        1,
                    );
                }
            }
        }
        Ok(())
    }

    fn read_cached_interpolated(
        &mut self,
        window: Window,
        buf: &mut [u8],
        layout: BufferLayout,
        bicubic: bool,
    ) -> Result<()> {
        let out_size = layout.data_type.size_bytes();

        for i_line in 0..layout.height {
            let fy = window.y_off as f64
                + ((i_line as f64 + 0.5) * window.height as f64 / layout.height as f64)
                - 0.5;
            for i_pixel in 0..layout.width {
                let fx = window.x_off as f64
                    + ((i_pixel as f64 + 0.5) * window.width as f64 / layout.width as f64)
                    - 0.5;
                let (re, im) = if bicubic {
                    self.sample_bicubic(fx, fy, &window)?
                } else {
                    self.sample_bilinear(fx, fy, &window)?
                };
                let d = i_line * layout.line_space + i_pixel * layout.pixel_space;
                write_word(&mut buf[d..d + out_size], layout.data_type, re, im);
            }
        }
        Ok(())
    }

    fn sample_value(&mut self, x: usize, y: usize) -> Result<(f64, f64)> {
        let dt = self.layout.data_type;
        let dt_size = dt.size_bytes();
        let block = self.ensure_block(y)?;
        Ok(read_word(&block.data[x * dt_size..x * dt_size + dt_size], dt))
    }

    fn sample_bilinear(&mut self, fx: f64, fy: f64, window: &Window) -> Result<(f64, f64)> {
        let x0f = fx.floor();
        let y0f = fy.floor();
        let tx = fx - x0f;
        let ty = fy - y0f;

        let x0 = clamp_coord(x0f, window.x_off, window.width);
        let x1 = clamp_coord(x0f + 1.0, window.x_off, window.width);
        let y0 = clamp_coord(y0f, window.y_off, window.height);
        let y1 = clamp_coord(y0f + 1.0, window.y_off, window.height);

        let v00 = self.sample_value(x0, y0)?;
        let v10 = self.sample_value(x1, y0)?;
        let v01 = self.sample_value(x0, y1)?;
        let v11 = self.sample_value(x1, y1)?;

        let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
        let re = lerp(lerp(v00.0, v10.0, tx), lerp(v01.0, v11.0, tx), ty);
        let im = lerp(lerp(v00.1, v10.1, tx), lerp(v01.1, v11.1, tx), ty);
        Ok((re, im))
    }

    fn sample_bicubic(&mut self, fx: f64, fy: f64, window: &Window) -> Result<(f64, f64)> {
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;

        let mut re = 0.0;
        let mut im = 0.0;
        let mut weight_sum = 0.0;
        for m in -1i64..=2 {
            let wy = bicubic_weight(m as f64 - ty);
            if wy == 0.0 {
                continue;
            }
            let sy = clamp_coord(y0 + m as f64, window.y_off, window.height);
            for n in -1i64..=2 {
                let wx = bicubic_weight(n as f64 - tx);
                if wx == 0.0 {
                    continue;
                }
                let sx = clamp_coord(x0 + n as f64, window.x_off, window.width);
                let (vr, vi) = self.sample_value(sx, sy)?;
                let w = wx * wy;
                re += vr * w;
                im += vi * w;
                weight_sum += w;
            }
        }
        if weight_sum != 0.0 {
            re /= weight_sum;
            im /= weight_sum;
        }
        Ok((re, im))
    }

    fn write_window_cached(
        &mut self,
        window: Window,
        buf: &[u8],
        layout: BufferLayout,
    ) -> Result<()> {
        let dt = self.layout.data_type;
        let dt_size = dt.size_bytes();

        for i_line in 0..layout.height {
            let src_y = window.y_off + i_line * window.height / layout.height;
            let row_start = i_line * layout.line_space;
            let x_off = window.x_off;
            let block = self.ensure_block(src_y)?;

            if window.width == layout.width {
                copy_words(
                    &buf[row_start..],
                    layout.data_type,
                    layout.pixel_space as isize,
                    &mut block.data[x_off * dt_size..],
                    dt,
                    dt_size as isize,
                    window.width,
                );
            } else {
                for i_pixel in 0..layout.width {
                    let src_x = x_off + i_pixel * window.width / layout.width;
                    copy_words(
                        &buf[row_start + i_pixel * layout.pixel_space..],
                        layout.data_type,
                        layout.pixel_space as isize,
                        &mut block.data[src_x * dt_size..],
                        dt,
                        dt_size as isize,
                        1,
                    );
                }
            }
            block.dirty = true;
        }
        Ok(())
    }

    /// Loads row `y` into the block cache if absent, writing back any dirty
    /// block the insertion evicts.
    fn ensure_block(&mut self, y: usize) -> Result<&mut CachedBlock> {
        if !self.blocks.contains(y) {
            let n = self.width * self.layout.data_type.size_bytes();
            let mut data = Vec::new();
            data.try_reserve_exact(n)
                .map_err(|_| Error::Allocation(n))?;
            data.resize(n, 0);
            self.read_block(y, &mut data)?;
            for (row, spilled) in self.blocks.insert(y, data, false) {
                self.write_block(row, &spilled)?;
            }
        }
        Ok(self
            .blocks
            .get_mut(y)
            .expect("scanline cached immediately above"))
    }

    fn pick_overview(&self, window: &Window, layout: &BufferLayout) -> Option<usize> {
        let needed = (window.width as f64 / layout.width as f64)
            .max(window.height as f64 / layout.height as f64);
        if needed < 1.5 {
            return None;
        }
        let mut best = None;
        let mut best_scale = 0usize;
        for (idx, ovr) in self.overviews.iter().enumerate() {
            let scale = self.width / ovr.width.max(1);
            if scale as f64 <= needed && scale > best_scale {
                best_scale = scale;
                best = Some(idx);
            }
        }
        best
    }

    fn overview_window(&self, window: &Window, idx: usize) -> Window {
        let ovr = &self.overviews[idx];
        let x_off = window.x_off * ovr.width / self.width;
        let y_off = window.y_off * ovr.height / self.height;
        let width = (window.width * ovr.width / self.width)
            .max(1)
            .min(ovr.width - x_off);
        let height = (window.height * ovr.height / self.height)
            .max(1)
            .min(ovr.height - y_off);
        Window::new(x_off, y_off, width, height)
    }

    /// Best-effort contiguous mapped view of the band.
    ///
    /// Available when the file has a native handle, both strides are
    /// non-negative, the data needs no byte swap, and the file already
    /// spans the addressed region. The band's caches are flushed first.
    pub fn virtual_mem(&mut self, writable: bool) -> Result<MappedView> {
        let dt = self.layout.data_type;
        if writable && self.access == Access::ReadOnly {
            return Err(Error::Unsupported("raster opened read-only".to_string()));
        }
        if self.layout.pixel_stride < 0 || self.layout.line_stride < 0 {
            return Err(Error::Unsupported(
                "negative strides cannot be mapped".to_string(),
            ));
        }
        if !(self.native_order() || dt.size_bytes() == 1) {
            return Err(Error::Unsupported(
                "foreign byte order cannot be mapped".to_string(),
            ));
        }

        let span = (self.height as u64 - 1) * self.layout.line_stride as u64
            + (self.width as u64 - 1) * self.layout.pixel_stride as u64
            + dt.size_bytes() as u64;
        let total = self
            .layout
            .img_offset
            .checked_add(span)
            .ok_or_else(|| Error::Unsupported("mapped span too large".to_string()))?;
        let total_usize = usize::try_from(total)
            .map_err(|_| Error::Unsupported("mapped span exceeds address space".to_string()))?;

        self.flush()?;

        if self.file.len().map_err(Error::Io)? < total {
            return Err(Error::Unsupported(
                "file shorter than the mapped span".to_string(),
            ));
        }
        let file = self
            .file
            .as_native()
            .ok_or_else(|| Error::Unsupported("no native file handle".to_string()))?;

        // Safety: the caller controls concurrent mutation of the file, as
        // with any shared read/write handle to the same raster.
        let map = unsafe {
            if writable {
                MapInner::Rw(MmapMut::map_mut(file)?)
            } else {
                MapInner::Ro(Mmap::map(file)?)
            }
        };
        if map.bytes().len() < total_usize {
            return Err(Error::Unsupported(
                "mapping shorter than the addressed span".to_string(),
            ));
        }

        Ok(MappedView {
            map,
            offset: self.layout.img_offset as usize,
            len: span as usize,
            pixel_space: self.layout.pixel_stride,
            line_space: self.layout.line_stride,
        })
    }
}

impl Drop for RawBand {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("flush on drop failed for {}: {e}", self.file.identifier());
        }
    }
}

#[inline]
fn clamp_coord(v: f64, off: usize, extent: usize) -> usize {
    let min = off as f64;
    let max = (off + extent - 1) as f64;
    v.clamp(min, max) as usize
}

fn validate_layout(layout: &BandLayout, width: usize, height: usize) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(Error::Layout(format!(
            "raster dimensions {width}x{height} must be positive"
        )));
    }
    if layout.pixel_stride == 0 {
        return Err(Error::Layout("pixel stride of zero".to_string()));
    }

    let w1 = width as u64 - 1;
    let h1 = height as u64 - 1;
    let overflow = || Error::Layout("addressable range overflows the offset type".to_string());

    let mut smallest = layout.img_offset;
    let mut largest = layout.img_offset;

    if layout.line_stride < 0 {
        let span = layout
            .line_stride
            .unsigned_abs()
            .checked_mul(h1)
            .ok_or_else(overflow)?;
        if span > smallest {
            return Err(Error::Layout(
                "line stride walks below the start of the file".to_string(),
            ));
        }
        smallest -= span;
    } else {
        let span = (layout.line_stride as u64)
            .checked_mul(h1)
            .ok_or_else(overflow)?;
        largest = largest.checked_add(span).ok_or_else(overflow)?;
    }

    if layout.pixel_stride < 0 {
        let span = layout
            .pixel_stride
            .unsigned_abs()
            .checked_mul(w1)
            .ok_or_else(overflow)?;
        if span > smallest {
            return Err(Error::Layout(
                "pixel stride walks below the start of the file".to_string(),
            ));
        }
    } else {
        let span = (layout.pixel_stride as u64)
            .checked_mul(w1)
            .ok_or_else(overflow)?;
        largest = largest.checked_add(span).ok_or_else(overflow)?;
    }

    if largest > i64::MAX as u64 {
        return Err(Error::Layout(
            "largest addressable offset too big".to_string(),
        ));
    }

    let line_size = layout
        .pixel_stride
        .unsigned_abs()
        .checked_mul(w1)
        .and_then(|v| v.checked_add(layout.data_type.size_bytes() as u64))
        .filter(|v| *v <= i32::MAX as u64)
        .ok_or_else(|| Error::Layout("scanline size overflows".to_string()))?;

    Ok(line_size as usize)
}

/// Contiguous mapped view of a band, reported with the band's own strides.
pub struct MappedView {
    map: MapInner,
    offset: usize,
    len: usize,
    pixel_space: i64,
    line_space: i64,
}

enum MapInner {
    Ro(Mmap),
    Rw(MmapMut),
}

impl MapInner {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Ro(m) => &m[..],
            Self::Rw(m) => &m[..],
        }
    }
}

impl MappedView {
    /// Bytes of the addressed span, starting at row 0, pixel 0.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.map.bytes()[self.offset..self.offset + self.len]
    }

    /// Mutable bytes for a writable view, `None` for a read-only one.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.map {
            MapInner::Rw(m) => Some(&mut m[self.offset..self.offset + self.len]),
            MapInner::Ro(_) => None,
        }
    }

    /// Byte distance between adjacent pixels in the view.
    #[must_use]
    pub fn pixel_space(&self) -> i64 {
        self.pixel_space
    }

    /// Byte distance between adjacent lines in the view.
    #[must_use]
    pub fn line_space(&self) -> i64 {
        self.line_space
    }

    /// Length of the addressed span in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the span is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
