//! Buffered access to the free-space-map fork.
//!
//! The FSM tree addresses pages that may not exist yet; descending into
//! a child page must be able to conjure it. These helpers extend the
//! fork on demand and hand back an ordinary pinned buffer; the FSM
//! layer itself applies its tree interpretation to the bytes.

use fheap_error::Result;
use fheap_types::{ForkNumber, PageId, RelationId};

use crate::manager::{BufferManager, PinnedBuffer};

impl BufferManager {
    /// Pin an FSM page, extending the FSM fork up to it first. Fresh
    /// FSM pages are left zero-filled: a zero byte is the "no free
    /// space" category, which is exactly right for unknown pages.
    pub fn read_fsm_buffer(&self, rel: RelationId, fsm_page: PageId) -> Result<PinnedBuffer<'_>> {
        self.extend_fork_to(rel, ForkNumber::Fsm, fsm_page)?;
        self.read_buffer(rel, ForkNumber::Fsm, Some(fsm_page))
    }
}
