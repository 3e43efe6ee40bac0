//! Storage backends: a small capability set over positional I/O.
//!
//! Two implementations exist: [`FileStorage`] wraps a real file, and
//! [`MemoryStorage`] keeps the bytes in a growable vector. The disk
//! manager depends only on the capability, never on the backend.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use fheap_error::Result;

/// Positional byte storage.
///
/// `read_at` may return fewer bytes than requested at end-of-file; the
/// caller decides whether a short read is an error. `write_at` past the
/// current end extends the storage, zero-filling any gap.
pub trait Storage: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes actually read; zero means end-of-file.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Write all of `buf` starting at `offset`.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()>;

    /// Current length in bytes.
    fn size(&self) -> Result<u64>;

    /// Flush the contents to stable storage.
    fn sync(&self) -> Result<()>;
}

/// Opens storage for a path. The disk manager keeps one opener and
/// caches whatever it hands out.
pub trait StorageOpener: Send + Sync {
    /// Open (creating if necessary) the storage behind `path`.
    fn open(&self, path: &Path) -> Result<Arc<dyn Storage>>;
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// A [`Storage`] backed by a real file.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
}

impl FileStorage {
    /// Open `path` read-write, creating it if it does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }
}

impl Storage for FileStorage {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.file.read_at(&mut buf[total..], offset + total as u64)? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// Opener producing [`FileStorage`] handles.
#[derive(Debug, Default)]
pub struct FileOpener;

impl StorageOpener for FileOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn Storage>> {
        Ok(Arc::new(FileStorage::open(path)?))
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// A [`Storage`] backed by an in-memory byte vector.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buf: Mutex<Vec<u8>>,
}

impl MemoryStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.buf.lock();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        let mut data = self.buf.lock();
        let start = usize::try_from(offset)
            .map_err(|_| fheap_error::FerroError::internal("memory storage offset overflow"))?;
        let end = start + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.buf.lock().len() as u64)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Opener producing [`MemoryStorage`] handles. Each distinct path gets
/// its own vector; the disk manager's handle cache makes repeated opens
/// of one path share it.
#[derive(Debug, Default)]
pub struct MemoryOpener;

impl StorageOpener for MemoryOpener {
    fn open(&self, _path: &Path) -> Result<Arc<dyn Storage>> {
        Ok(Arc::new(MemoryStorage::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_storage(storage: &dyn Storage) {
        assert_eq!(storage.size().unwrap(), 0);

        storage.write_at(b"hello", 0).unwrap();
        assert_eq!(storage.size().unwrap(), 5);

        let mut buf = [0u8; 5];
        assert_eq!(storage.read_at(&mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        // Reading past the end is a short read, not an error.
        assert_eq!(storage.read_at(&mut buf, 100).unwrap(), 0);

        // Writing past the end zero-fills the gap.
        storage.write_at(b"x", 10).unwrap();
        assert_eq!(storage.size().unwrap(), 11);
        let mut gap = [0xFFu8; 5];
        assert_eq!(storage.read_at(&mut gap, 5).unwrap(), 5);
        assert_eq!(&gap, &[0, 0, 0, 0, 0]);

        storage.sync().unwrap();
    }

    #[test]
    fn memory_storage() {
        check_storage(&MemoryStorage::new());
    }

    #[test]
    fn file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(&dir.path().join("probe")).unwrap();
        check_storage(&storage);
    }

    #[test]
    fn memory_partial_read_at_tail() {
        let storage = MemoryStorage::new();
        storage.write_at(&[1, 2, 3], 0).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(storage.read_at(&mut buf, 1).unwrap(), 2);
        assert_eq!(&buf[..2], &[2, 3]);
    }
}
