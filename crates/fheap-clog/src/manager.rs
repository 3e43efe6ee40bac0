//! Public commit-log surface.
//!
//! An id only ever moves from in-progress to exactly one of committed
//! or aborted; both end states are terminal. Readers treat an id that
//! is neither committed nor aborted as still running — or, for ids old
//! enough that their pages could have been truncated away, implicitly
//! committed, which is why visibility asks "is it aborted?" rather
//! than "is it committed?" wherever the distinction matters.

use std::path::Path;

use fheap_error::Result;
use fheap_types::TransactionId;

use crate::cache::ClogCache;
use crate::codec::XactState;
use crate::disk::ClogDisk;

/// Records and answers per-transaction end state.
#[derive(Debug)]
pub struct ClogManager {
    cache: ClogCache,
}

impl ClogManager {
    /// Open (creating if needed) the log under `dir`.
    pub fn file(dir: &Path) -> Result<Self> {
        Ok(Self {
            cache: ClogCache::new(ClogDisk::file(dir)?),
        })
    }

    /// A log that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            cache: ClogCache::new(ClogDisk::in_memory()),
        }
    }

    /// The recorded state of `tx`.
    pub fn state(&self, tx: TransactionId) -> Result<XactState> {
        self.cache.state(tx)
    }

    /// Record that `tx` committed.
    pub fn set_committed(&self, tx: TransactionId) -> Result<()> {
        self.cache.set_state(tx, XactState::Committed)
    }

    /// Record that `tx` aborted.
    pub fn set_aborted(&self, tx: TransactionId) -> Result<()> {
        self.cache.set_state(tx, XactState::Aborted)
    }

    /// Whether `tx` is recorded as committed.
    pub fn is_committed(&self, tx: TransactionId) -> Result<bool> {
        Ok(self.state(tx)? == XactState::Committed)
    }

    /// Whether `tx` is recorded as aborted.
    pub fn is_aborted(&self, tx: TransactionId) -> Result<bool> {
        Ok(self.state(tx)? == XactState::Aborted)
    }

    /// Flush dirty log pages and sync the file.
    pub fn checkpoint(&self) -> Result<()> {
        self.cache.checkpoint()
    }
}
