//! The relation-fork disk manager.
//!
//! Every relation is a set of fork files under one base directory:
//! `<base>/<rel>` for tuple pages, `<base>/<rel>_fsm` for the free-space
//! map, `<base>/<rel>_vm` for the visibility map. Page `p` lives at byte
//! offset `p * PAGE_SIZE` of its fork. The commit log is *not* handled
//! here; it has its own manager with its own file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use fheap_error::{FerroError, Result};
use fheap_types::{ForkNumber, PageId, RelationId, PAGE_SIZE};

use crate::storage::{FileOpener, MemoryOpener, Storage, StorageOpener};

/// Maps (relation, fork) to storage and moves pages in and out.
///
/// Handles are cached after the first open, so callers can treat every
/// operation as cheap to address.
pub struct DiskManager {
    base_dir: PathBuf,
    opener: Box<dyn StorageOpener>,
    handles: Mutex<HashMap<(RelationId, ForkNumber), Arc<dyn Storage>>>,
}

impl DiskManager {
    /// Create a file-backed disk manager rooted at `base_dir`, creating
    /// the directory if needed.
    pub fn file(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            opener: Box::new(FileOpener),
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Create a fully in-memory disk manager. Nothing touches the
    /// filesystem; forks live and die with this value.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            base_dir: PathBuf::from("<memory>"),
            opener: Box::new(MemoryOpener),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// File path of a relation fork under the base directory.
    #[must_use]
    pub fn fork_path(&self, rel: RelationId, fork: ForkNumber) -> PathBuf {
        fork_path(&self.base_dir, rel, fork)
    }

    fn open(&self, rel: RelationId, fork: ForkNumber) -> Result<Arc<dyn Storage>> {
        let mut handles = self.handles.lock();
        if let Some(storage) = handles.get(&(rel, fork)) {
            return Ok(Arc::clone(storage));
        }
        let storage = self.opener.open(&self.fork_path(rel, fork))?;
        handles.insert((rel, fork), Arc::clone(&storage));
        Ok(storage)
    }

    /// Read page `page` of a fork into `buf`, which must be exactly one
    /// page long. A short read is an error: pages are written whole.
    pub fn read_page(
        &self,
        rel: RelationId,
        fork: ForkNumber,
        page: PageId,
        buf: &mut [u8],
    ) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let storage = self.open(rel, fork)?;
        let n = storage.read_at(buf, page.file_offset())?;
        if n != PAGE_SIZE {
            return Err(FerroError::ShortRead {
                expected: PAGE_SIZE,
                actual: n,
            });
        }
        Ok(())
    }

    /// Write `buf` (exactly one page) as page `page` of a fork,
    /// optionally syncing to stable storage afterwards.
    pub fn write_page(
        &self,
        rel: RelationId,
        fork: ForkNumber,
        page: PageId,
        buf: &[u8],
        sync: bool,
    ) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let storage = self.open(rel, fork)?;
        storage.write_at(buf, page.file_offset())?;
        if sync {
            storage.sync()?;
        }
        Ok(())
    }

    /// Append a zero-filled page to a fork and return its id.
    pub fn extend_page(&self, rel: RelationId, fork: ForkNumber, sync: bool) -> Result<PageId> {
        let new_page = match self.last_page_id(rel, fork)? {
            Some(last) if last == PageId::MAX => return Err(FerroError::RelationFull),
            Some(last) => last.next(),
            None => PageId::FIRST,
        };
        let zeroes = [0u8; PAGE_SIZE];
        self.write_page(rel, fork, new_page, &zeroes, sync)?;
        debug!(rel = %rel, fork = %fork, page = %new_page, "extended fork");
        Ok(new_page)
    }

    /// The id of the last page in a fork, or `None` when the fork is
    /// empty. A trailing partial page is ignored.
    pub fn last_page_id(&self, rel: RelationId, fork: ForkNumber) -> Result<Option<PageId>> {
        let storage = self.open(rel, fork)?;
        let size = storage.size()?;
        let pages = size / PAGE_SIZE as u64;
        if pages == 0 {
            return Ok(None);
        }
        Ok(Some(PageId::new(u32::try_from(pages - 1).map_err(
            |_| FerroError::internal("fork longer than the page id space"),
        )?)))
    }
}

impl std::fmt::Debug for DiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskManager")
            .field("base_dir", &self.base_dir)
            .field("open_handles", &self.handles.lock().len())
            .finish_non_exhaustive()
    }
}

/// `<base>/<rel>` for the main fork, `<base>/<rel>_<suffix>` otherwise.
fn fork_path(base: &Path, rel: RelationId, fork: ForkNumber) -> PathBuf {
    match fork.suffix() {
        None => base.join(rel.to_string()),
        Some(suffix) => base.join(format!("{rel}_{suffix}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REL: RelationId = RelationId::new(1);

    #[test]
    fn fork_paths() {
        let base = Path::new("/data/base");
        assert_eq!(
            fork_path(base, RelationId::new(16384), ForkNumber::Main),
            Path::new("/data/base/16384")
        );
        assert_eq!(
            fork_path(base, RelationId::new(16384), ForkNumber::Fsm),
            Path::new("/data/base/16384_fsm")
        );
        assert_eq!(
            fork_path(base, RelationId::new(16384), ForkNumber::Vm),
            Path::new("/data/base/16384_vm")
        );
    }

    #[test]
    fn empty_fork_has_no_last_page() {
        let dm = DiskManager::in_memory();
        assert_eq!(dm.last_page_id(REL, ForkNumber::Main).unwrap(), None);
    }

    #[test]
    fn extend_then_read_back() {
        let dm = DiskManager::in_memory();

        let p0 = dm.extend_page(REL, ForkNumber::Main, false).unwrap();
        assert_eq!(p0, PageId::FIRST);
        let p1 = dm.extend_page(REL, ForkNumber::Main, false).unwrap();
        assert_eq!(p1, PageId::new(1));
        assert_eq!(
            dm.last_page_id(REL, ForkNumber::Main).unwrap(),
            Some(PageId::new(1))
        );

        // New pages come back zero-filled.
        let mut buf = [0xAAu8; PAGE_SIZE];
        dm.read_page(REL, ForkNumber::Main, p1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_page_round_trip() {
        let dm = DiskManager::in_memory();
        dm.extend_page(REL, ForkNumber::Main, false).unwrap();

        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xDE;
        page[PAGE_SIZE - 1] = 0xAD;
        dm.write_page(REL, ForkNumber::Main, PageId::FIRST, &page, false)
            .unwrap();

        let mut back = [0u8; PAGE_SIZE];
        dm.read_page(REL, ForkNumber::Main, PageId::FIRST, &mut back)
            .unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn read_missing_page_is_short_read() {
        let dm = DiskManager::in_memory();
        let mut buf = [0u8; PAGE_SIZE];
        let err = dm
            .read_page(REL, ForkNumber::Main, PageId::new(5), &mut buf)
            .unwrap_err();
        assert!(matches!(err, FerroError::ShortRead { .. }));
    }

    #[test]
    fn forks_are_independent() {
        let dm = DiskManager::in_memory();
        dm.extend_page(REL, ForkNumber::Main, false).unwrap();
        assert_eq!(dm.last_page_id(REL, ForkNumber::Fsm).unwrap(), None);
        assert_eq!(dm.last_page_id(REL, ForkNumber::Vm).unwrap(), None);
    }

    #[test]
    fn file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::file(dir.path()).unwrap();

        let page_id = dm.extend_page(REL, ForkNumber::Main, true).unwrap();
        let mut page = [0u8; PAGE_SIZE];
        page[123] = 7;
        dm.write_page(REL, ForkNumber::Main, page_id, &page, true)
            .unwrap();

        // A second manager over the same directory sees the bytes.
        let dm2 = DiskManager::file(dir.path()).unwrap();
        let mut back = [0u8; PAGE_SIZE];
        dm2.read_page(REL, ForkNumber::Main, page_id, &mut back)
            .unwrap();
        assert_eq!(back, page);
        assert!(dir.path().join("1").exists());
    }
}
