//! # rawgrid - Raw Strided Raster I/O
//!
//! A library for reading and writing raw, headerless (or header-separated)
//! two-dimensional pixel grids stored as a regular arithmetic progression
//! of bytes. Four numbers describe the on-disk layout - a starting byte
//! offset, a per-pixel byte stride, a per-line byte stride, and an element
//! type with byte order - and the library presents that region as a typed
//! raster readable and writable in arbitrary rectangular windows.
//!
//! ## Features
//!
//! - **Signed strides**: right-to-left and bottom-up layouts via negative
//!   pixel/line strides, with overflow-checked addressing
//! - **Scanline caching**: windowed requests revisit rows through an LRU
//!   block cache with dirty write-back
//! - **Direct I/O**: large requests bypass the cache and move data between
//!   the file and the caller's buffer in one pass
//! - **Type conversion**: read or write any window as any element type,
//!   with rounding and clamping on narrowing
//! - **Byte order**: transparent per-word swapping, complex halves handled
//!   separately
//! - **Multi-band**: BIP/BIL/BSQ datasets over a shared file handle, with
//!   layout inference back out of the strides
//! - **Resampling**: nearest, bilinear and bicubic output sizing on reads
//! - **Memory mapping**: best-effort contiguous views when the layout
//!   permits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rawgrid::{BandLayout, BufferLayout, ByteOrder, DataType, IoOptions, RawBand, Window};
//!
//! let layout = BandLayout {
//!     img_offset: 0,
//!     pixel_stride: 2,
//!     line_stride: 2 * 1024,
//!     data_type: DataType::U16,
//!     byte_order: ByteOrder::LittleEndian,
//! };
//! let mut band = RawBand::open("elevation.raw", layout, 1024, 1024)?;
//!
//! let mut tile = vec![0u8; 256 * 256 * 2];
//! band.read_window(
//!     Window::new(128, 128, 256, 256),
//!     &mut tile,
//!     BufferLayout::packed(256, 256, DataType::U16),
//!     &IoOptions::default(),
//!     None,
//! )?;
//! ```
//!
//! ## Architecture
//!
//! - [`band`]: single-band scanline cache, direct I/O path, mapped views
//! - [`dataset`]: multi-band dispatch, layout inference, pre-open checks
//! - [`file`]: positioned-I/O abstraction over local files and memory
//! - [`data_type`]: element types (including complex pairs) and byte order
//! - [`window`]: request geometry, buffer shapes, resampling options
//! - [`swap`] / [`convert`]: strided byte reversal and type conversion
//! - [`config`]: environment-overridable I/O strategy options
//! - [`raster`]: minimal sampling trait over assembled datasets

pub mod band;
pub mod config;
pub mod convert;
pub mod data_type;
pub mod dataset;
pub mod error;
pub mod file;
pub mod raster;
pub mod swap;
pub mod window;

mod block_cache;

// ============================================================================
// Bands
// ============================================================================

pub use band::{Access, BandLayout, BandOptions, MappedView, RawBand};

// ============================================================================
// Datasets & Layout Inference
// ============================================================================

pub use dataset::{
    check_layout_size, Interleaving, RawBinaryLayout, RawDataset, MD_INTERLEAVE, MD_SPARSE_OK,
};

// ============================================================================
// Request Geometry
// ============================================================================

pub use window::{BufferLayout, IoOptions, Progress, ResamplingMethod, Window};

// ============================================================================
// Element Types
// ============================================================================

pub use data_type::{ByteOrder, DataType};

// ============================================================================
// Files (I/O Abstraction)
// ============================================================================

pub use file::{LocalFile, MemoryFile, RawFile};

// ============================================================================
// Errors & Configuration
// ============================================================================

pub use config::Config;
pub use error::{Error, Result};

// ============================================================================
// Raster Abstraction
// ============================================================================

pub use raster::Raster;
