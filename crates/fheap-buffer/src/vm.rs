//! Buffered access to the visibility map fork.
//!
//! Heap operations call these helpers whenever a page's all-visible
//! state changes; the VM fork is extended on demand so callers never
//! have to care whether the map exists yet.

use tracing::trace;

use fheap_error::Result;
use fheap_page::{page, vm, VmStatus};
use fheap_types::{ForkNumber, PageId, RelationId};

use crate::manager::BufferManager;

impl BufferManager {
    /// Set the VM bits for `rel_page`, extending and initializing the
    /// VM fork as needed.
    pub fn update_vm_status(
        &self,
        rel: RelationId,
        rel_page: PageId,
        status: VmStatus,
    ) -> Result<()> {
        let vm_page = vm::vm_page_for(rel_page);
        self.extend_fork_to(rel, ForkNumber::Vm, vm_page)?;

        let pinned = self.read_buffer(rel, ForkNumber::Vm, Some(vm_page))?;
        {
            let mut bytes = pinned.write();
            if !page::is_initialized(&bytes[..]) {
                page::init(&mut bytes[..], 0);
            }
            vm::set_status(&mut bytes[..], rel_page, status);
        }
        pinned.mark_dirty();
        trace!(rel = %rel, page = %rel_page, ?status, "updated vm bits");
        Ok(())
    }

    /// Read the VM bits for `rel_page`. A page whose VM page does not
    /// exist yet reports the initialized (all-clear) status.
    pub fn get_vm_status(&self, rel: RelationId, rel_page: PageId) -> Result<VmStatus> {
        let vm_page = vm::vm_page_for(rel_page);
        match self.disk().last_page_id(rel, ForkNumber::Vm)? {
            Some(last) if vm_page <= last => {}
            _ => return Ok(VmStatus::INITIALIZED),
        }

        let pinned = self.read_buffer(rel, ForkNumber::Vm, Some(vm_page))?;
        let bytes = pinned.read();
        if !page::is_initialized(&bytes[..]) {
            return Ok(VmStatus::INITIALIZED);
        }
        Ok(vm::status(&bytes[..], rel_page))
    }

    /// Extend a fork until `page` exists. Shared by the VM and FSM
    /// helpers, whose tree shapes may demand several fresh pages at
    /// once.
    pub(crate) fn extend_fork_to(
        &self,
        rel: RelationId,
        fork: ForkNumber,
        page: PageId,
    ) -> Result<()> {
        loop {
            match self.disk().last_page_id(rel, fork)? {
                Some(last) if page <= last => return Ok(()),
                _ => {
                    self.disk().extend_page(rel, fork, false)?;
                }
            }
        }
    }
}
