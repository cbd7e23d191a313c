//! Positioned-I/O interface over the backing storage.
//!
//! This abstraction lets the same band code run against:
//! - Local files (positioned read/write, no shared cursor)
//! - In-memory buffers (tests, scratch rasters)
//!
//! All methods take `&self` so several bands of one interleaved file can
//! share a single handle through an [`Arc`](std::sync::Arc).

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Trait for positioned reads and writes against any storage.
pub trait RawFile: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// count actually read. A short count means the region extends past the
    /// end of the storage; an error means the region cannot be addressed at
    /// all.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes `buf` starting at `offset`, returning the count actually
    /// written. The storage grows as needed.
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Current total size of the storage in bytes.
    fn len(&self) -> io::Result<u64>;

    /// Whether the storage is empty.
    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Pushes buffered writes down to the storage.
    fn flush(&self) -> io::Result<()>;

    /// Human-readable identifier for logging and errors.
    fn identifier(&self) -> &str;

    /// Native file handle, when one exists (memory mapping eligibility).
    fn as_native(&self) -> Option<&File> {
        None
    }
}

/// Local file with positioned I/O.
pub struct LocalFile {
    file: File,
    path: PathBuf,
    ident: String,
}

impl LocalFile {
    /// Opens an existing file read-only.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self::wrap(file, path))
    }

    /// Opens an existing file for reading and writing.
    pub fn update(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self::wrap(file, path))
    }

    /// Creates (or truncates) a file for reading and writing.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self::wrap(file, path))
    }

    fn wrap(file: File, path: PathBuf) -> Self {
        let ident = path.to_string_lossy().into_owned();
        Self { file, path, ident }
    }

    /// Path this file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RawFile for LocalFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match positioned_read(&self.file, offset + total as u64, &mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match positioned_write(&self.file, offset + total as u64, &buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn flush(&self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn identifier(&self) -> &str {
        &self.ident
    }

    fn as_native(&self) -> Option<&File> {
        Some(&self.file)
    }
}

#[cfg(unix)]
fn positioned_read(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn positioned_write(file: &File, offset: u64, buf: &[u8]) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn positioned_read(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn positioned_write(file: &File, offset: u64, buf: &[u8]) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

/// Growable in-memory storage.
///
/// Useful in tests and for staging small rasters before moving them
/// somewhere durable. Reads past the end are short; writes past the end
/// zero-fill the gap.
pub struct MemoryFile {
    data: Mutex<Vec<u8>>,
    ident: String,
}

impl MemoryFile {
    /// Creates an empty in-memory file.
    #[must_use]
    pub fn new() -> Self {
        Self::with_data(Vec::new())
    }

    /// Creates an in-memory file with initial contents.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
            ident: "<memory>".to_string(),
        }
    }

    /// Copies the current contents out.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RawFile for MemoryFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.lock().unwrap();
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.data.lock().unwrap();
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        let end = start + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.lock().unwrap().len() as u64)
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn identifier(&self) -> &str {
        &self.ident
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_local_file_read_at() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Hello, World!").unwrap();

        let reader = LocalFile::open(file.path()).unwrap();
        assert_eq!(reader.len().unwrap(), 13);

        let mut buf = [0u8; 5];
        assert_eq!(reader.read_at(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"Hello");

        assert_eq!(reader.read_at(7, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"World");

        // Short read at the tail, zero past the end.
        assert_eq!(reader.read_at(10, &mut buf).unwrap(), 3);
        assert_eq!(reader.read_at(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_local_file_write_at_extends() {
        let file = NamedTempFile::new().unwrap();
        let writer = LocalFile::update(file.path()).unwrap();

        assert_eq!(writer.write_at(4, b"data").unwrap(), 4);
        assert_eq!(writer.len().unwrap(), 8);

        let mut buf = [0u8; 8];
        assert_eq!(writer.read_at(0, &mut buf).unwrap(), 8);
        assert_eq!(&buf[4..], b"data");
    }

    #[test]
    fn test_memory_file() {
        let file = MemoryFile::new();
        assert!(file.is_empty().unwrap());

        file.write_at(2, &[7, 8]).unwrap();
        assert_eq!(file.len().unwrap(), 4);
        assert_eq!(file.contents(), vec![0, 0, 7, 8]);

        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(1, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[0, 7, 8]);
    }
}
