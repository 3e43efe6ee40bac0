//! The commit log's own disk manager.
//!
//! One file, a flat sequence of pages. Reading past the end is not an
//! error here: the log grows implicitly as transaction ids are handed
//! out, so a read beyond the file extends it with zero pages (all in
//! progress) until the target exists.

use std::path::Path;
use std::sync::Arc;

use fheap_disk::{FileStorage, MemoryStorage, Storage};
use fheap_error::{FerroError, Result};
use fheap_types::{PageId, PAGE_SIZE};

/// File name of the log within its directory.
pub const CLOG_FILE_NAME: &str = "clog";

/// Page-granular storage for the commit log.
pub struct ClogDisk {
    storage: Arc<dyn Storage>,
}

impl ClogDisk {
    /// Open (creating if needed) the log file under `dir`.
    pub fn file(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            storage: Arc::new(FileStorage::open(&dir.join(CLOG_FILE_NAME))?),
        })
    }

    /// A log that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new()),
        }
    }

    /// Read `page` into `buf`, extending the file with zero pages first
    /// when it does not reach that far yet.
    pub fn read_page(&self, page: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        loop {
            let n = self.storage.read_at(buf, page.file_offset())?;
            if n == PAGE_SIZE {
                return Ok(());
            }
            match self.last_page_id()? {
                Some(last) if last >= page => {
                    // The file is long enough yet the read came short.
                    return Err(FerroError::ShortRead {
                        expected: PAGE_SIZE,
                        actual: n,
                    });
                }
                _ => self.extend_to(page)?,
            }
        }
    }

    /// Write `buf` as `page`.
    pub fn write_page(&self, page: PageId, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.storage.write_at(buf, page.file_offset())
    }

    /// Flush the log file to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.storage.sync()
    }

    fn last_page_id(&self) -> Result<Option<PageId>> {
        let pages = self.storage.size()? / PAGE_SIZE as u64;
        if pages == 0 {
            return Ok(None);
        }
        Ok(Some(PageId::new(
            u32::try_from(pages - 1).map_err(|_| FerroError::RelationFull)?,
        )))
    }

    fn extend_to(&self, page: PageId) -> Result<()> {
        let zeroes = [0u8; PAGE_SIZE];
        loop {
            let next = match self.last_page_id()? {
                Some(last) if last >= page => return Ok(()),
                Some(last) if last == PageId::MAX => return Err(FerroError::RelationFull),
                Some(last) => last.next(),
                None => PageId::FIRST,
            };
            self.storage.write_at(&zeroes, next.file_offset())?;
        }
    }
}

impl std::fmt::Debug for ClogDisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClogDisk").finish_non_exhaustive()
    }
}
