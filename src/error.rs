//! Error types for raster I/O operations.

use std::io;
use thiserror::Error;

/// Raster I/O error.
#[derive(Debug, Error)]
pub enum Error {
    /// Inconsistent offsets, strides or dimensions at construction.
    #[error("invalid layout: {0}")]
    Layout(String),

    /// A working buffer could not be allocated.
    #[error("allocation of {0} bytes failed")]
    Allocation(usize),

    /// Underlying file I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A scanline read came back short on a read-only raster.
    #[error("failed to read scanline {0}")]
    TruncatedRead(usize),

    /// A scanline write came back short.
    #[error("failed to write scanline {0}")]
    TruncatedWrite(usize),

    /// Requested window or buffer geometry does not fit the raster.
    #[error("bad request: {0}")]
    Window(String),

    /// The progress callback asked to stop.
    #[error("cancelled by progress callback")]
    Cancelled,

    /// The file is smaller than the described layout can plausibly occupy.
    #[error("file too small: expected at least {expected} bytes, found {actual}")]
    FileTooSmall {
        /// Minimum plausible size for the described layout.
        expected: u64,
        /// Size actually found on disk.
        actual: u64,
    },

    /// The layout would require excessive scanline buffer memory.
    #[error("layout needs too much memory: {0}")]
    MemoryLimit(String),

    /// The operation is not available for this band configuration.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result type for raster I/O operations.
pub type Result<T> = std::result::Result<T, Error>;
