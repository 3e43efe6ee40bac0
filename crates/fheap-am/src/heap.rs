//! The heap manager.
//!
//! Every operation follows the same shape: pin the page, take the
//! content latch (shared for scans, exclusive for writes), do the
//! byte work, mark dirty, release in reverse order. Update places the
//! *new* version before it touches the old one, so a failure on the
//! new page leaves the old tuple exactly as it was.

use std::sync::Arc;

use tracing::debug;

use fheap_buffer::BufferManager;
use fheap_error::{FerroError, Result};
use fheap_fsm::FsmManager;
use fheap_mvcc::{Transaction, TransactionManager, TupleModifyResult};
use fheap_page::page::{self, SPECIAL_SIZE_HEAP};
use fheap_page::slot::SLOT_SIZE;
use fheap_page::tuple::{self, OwnedTuple, Tuple};
use fheap_page::VmStatus;
use fheap_types::{ForkNumber, PageId, RelationId, SlotIndex, Tid, PAGE_SIZE};

/// Largest item (header + payload) a heap page can hold.
pub const MAX_ITEM_LEN: usize =
    PAGE_SIZE - page::SLOTS_OFFSET - SPECIAL_SIZE_HEAP - SLOT_SIZE;

/// How many lying FSM candidates to tolerate before extending.
const MAX_PLACE_ATTEMPTS: u32 = 3;

/// One tuple produced by a sequential scan: a stable address plus an
/// owned image detached from the buffer pool.
#[derive(Debug, Clone)]
pub struct ScannedTuple {
    /// Where the version lives.
    pub tid: Tid,
    /// Copied tuple bytes.
    pub tuple: OwnedTuple,
}

/// Result of a heap update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// How the modifiability check came out.
    pub result: TupleModifyResult,
    /// Address of the new version when `result` is `Ok`.
    pub new_tid: Option<Tid>,
}

/// Insert, update, delete, and scan over heap relations.
pub struct HeapManager {
    pool: Arc<BufferManager>,
    fsm: Arc<FsmManager>,
    txn: Arc<TransactionManager>,
}

impl HeapManager {
    /// Create a heap manager over the shared pool, FSM, and
    /// transaction machinery.
    #[must_use]
    pub fn new(
        pool: Arc<BufferManager>,
        fsm: Arc<FsmManager>,
        txn: Arc<TransactionManager>,
    ) -> Self {
        Self { pool, fsm, txn }
    }

    // -----------------------------------------------------------------
    // Insert
    // -----------------------------------------------------------------

    /// Insert `payload` as a new tuple of `rel`, returning its tid.
    pub fn insert(&self, rel: RelationId, payload: &[u8], tx: &mut Transaction) -> Result<Tid> {
        let _ = self.txn.ensure_snapshot(tx);
        // The ctid is a placeholder until the slot is known.
        let tuple_bytes = tuple::compose(
            tx.id(),
            Tid::new(PageId::FIRST, SlotIndex::FIRST),
            payload,
        );
        if tuple_bytes.len() > MAX_ITEM_LEN {
            return Err(FerroError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_ITEM_LEN - tuple::TUPLE_HEADER_LEN,
            });
        }
        let tid = self.place_tuple(rel, &tuple_bytes)?;
        debug!(rel = %rel, tid = %tid, tx = %tx.id(), len = payload.len(), "heap insert");
        Ok(tid)
    }

    /// Find a page with room, place the tuple, point its ctid at
    /// itself, and keep the visibility map and FSM honest.
    fn place_tuple(&self, rel: RelationId, tuple_bytes: &[u8]) -> Result<Tid> {
        let needed = tuple_bytes.len() + SLOT_SIZE;
        let mut attempts = 0;
        let mut candidate = self.fsm.search(rel, needed)?;
        loop {
            let pinned = match candidate {
                Some(pid) => self.pool.read_buffer(rel, ForkNumber::Main, Some(pid))?,
                None => self.pool.read_buffer(rel, ForkNumber::Main, None)?,
            };
            let page_id = pinned.page_id();

            let placed = {
                let mut bytes = pinned.write();
                if !page::is_initialized(&bytes[..]) {
                    page::init(&mut bytes[..], SPECIAL_SIZE_HEAP);
                    pinned.mark_dirty();
                }
                if page::free_space(&bytes[..]) >= needed {
                    let slot = page::add_item(&mut bytes[..], tuple_bytes, None)?;
                    let tid = Tid::new(page_id, slot);
                    Tuple::new(page::item_mut(&mut bytes[..], slot)?)?.set_ctid(tid);
                    self.clear_all_visible(rel, page_id, &mut bytes[..])?;
                    Some((tid, page::free_space(&bytes[..])))
                } else {
                    None
                }
            };

            match placed {
                Some((tid, free)) => {
                    pinned.mark_dirty();
                    drop(pinned);
                    self.fsm.update(rel, page_id, free)?;
                    return Ok(tid);
                }
                None => {
                    // The map promised more than the page has; record
                    // the truth so the next search skips it.
                    let actual_free = {
                        let bytes = pinned.read();
                        page::free_space(&bytes[..])
                    };
                    drop(pinned);
                    self.fsm.update(rel, page_id, actual_free)?;
                    attempts += 1;
                    candidate = if attempts >= MAX_PLACE_ATTEMPTS {
                        None
                    } else {
                        self.fsm.search(rel, needed)?
                    };
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------

    /// Delete the tuple at `tid` by stamping the transaction's id as
    /// its xmax. Conflicts come back as values, not errors.
    pub fn delete(
        &self,
        rel: RelationId,
        tid: Tid,
        tx: &mut Transaction,
    ) -> Result<TupleModifyResult> {
        let snapshot = self.txn.ensure_snapshot(tx);
        let pinned = self.pool.read_buffer(rel, ForkNumber::Main, Some(tid.page()))?;
        let mut bytes = pinned.write();

        let verdict = self.check_modifiable(&mut bytes[..], tid, tx, &snapshot)?;
        if verdict != TupleModifyResult::Ok {
            return Ok(verdict);
        }

        self.clear_all_visible(rel, tid.page(), &mut bytes[..])?;
        Tuple::new(page::item_mut(&mut bytes[..], tid.slot())?)?.set_xmax(tx.id());
        drop(bytes);
        pinned.mark_dirty();
        debug!(rel = %rel, tid = %tid, tx = %tx.id(), "heap delete");
        Ok(TupleModifyResult::Ok)
    }

    // -----------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------

    /// Replace the tuple at `tid` with a new version carrying
    /// `payload`. The old version gets `xmax` and a forward ctid link;
    /// the new one lands on the same page when it fits, elsewhere
    /// otherwise.
    pub fn update(
        &self,
        rel: RelationId,
        tid: Tid,
        payload: &[u8],
        tx: &mut Transaction,
    ) -> Result<UpdateOutcome> {
        let snapshot = self.txn.ensure_snapshot(tx);
        let new_bytes = tuple::compose(
            tx.id(),
            Tid::new(PageId::FIRST, SlotIndex::FIRST),
            payload,
        );
        if new_bytes.len() > MAX_ITEM_LEN {
            return Err(FerroError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_ITEM_LEN - tuple::TUPLE_HEADER_LEN,
            });
        }

        let pinned = self.pool.read_buffer(rel, ForkNumber::Main, Some(tid.page()))?;
        let mut bytes = pinned.write();

        let verdict = self.check_modifiable(&mut bytes[..], tid, tx, &snapshot)?;
        if verdict != TupleModifyResult::Ok {
            return Ok(UpdateOutcome {
                result: verdict,
                new_tid: None,
            });
        }

        self.clear_all_visible(rel, tid.page(), &mut bytes[..])?;

        let needed = new_bytes.len() + SLOT_SIZE;
        let new_tid = if page::free_space(&bytes[..]) >= needed {
            let slot = page::add_item(&mut bytes[..], &new_bytes, None)?;
            let new_tid = Tid::new(tid.page(), slot);
            Tuple::new(page::item_mut(&mut bytes[..], slot)?)?.set_ctid(new_tid);
            new_tid
        } else {
            // Not enough room here: place the new version elsewhere
            // *first*, so a failure leaves the old tuple untouched.
            // The old page stays latched so the version chain appears
            // atomically to other writers.
            self.place_tuple(rel, &new_bytes)?
        };

        let mut old = Tuple::new(page::item_mut(&mut bytes[..], tid.slot())?)?;
        old.set_xmax(tx.id());
        old.set_ctid(new_tid);
        let free = page::free_space(&bytes[..]);
        drop(bytes);
        pinned.mark_dirty();
        drop(pinned);
        self.fsm.update(rel, tid.page(), free)?;

        debug!(rel = %rel, old = %tid, new = %new_tid, tx = %tx.id(), "heap update");
        Ok(UpdateOutcome {
            result: TupleModifyResult::Ok,
            new_tid: Some(new_tid),
        })
    }

    // -----------------------------------------------------------------
    // Sequential scan
    // -----------------------------------------------------------------

    /// Materialize every tuple of `rel` visible to `tx`'s snapshot, in
    /// (page, slot) order. Each page is released before the next is
    /// pinned.
    pub fn scan(&self, rel: RelationId, tx: &mut Transaction) -> Result<Vec<ScannedTuple>> {
        let snapshot = self.txn.ensure_snapshot(tx);
        let snapshots = self.txn.snapshots();
        let mut out = Vec::new();
        let Some(last) = self.pool.disk().last_page_id(rel, ForkNumber::Main)? else {
            return Ok(out);
        };

        let mut pid = PageId::FIRST;
        loop {
            let pinned = self.pool.read_buffer(rel, ForkNumber::Main, Some(pid))?;
            {
                let bytes = pinned.read();
                if page::is_initialized(&bytes[..]) {
                    for raw in 0..page::slot_count(&bytes[..]) {
                        let idx = SlotIndex::new(raw);
                        if !page::slot(&bytes[..], idx)?.is_normal() {
                            continue;
                        }
                        // Work on a copied image: the shared latch
                        // forbids writing hints back.
                        let mut tuple =
                            Tuple::new(page::item(&bytes[..], idx)?.to_vec())?;
                        if snapshots.is_visible(&mut tuple, &snapshot, tx.id())? {
                            out.push(ScannedTuple {
                                tid: Tid::new(pid, idx),
                                tuple,
                            });
                        }
                    }
                }
            }
            drop(pinned);
            if pid == last {
                break;
            }
            pid = pid.next();
        }
        debug!(rel = %rel, tx = %tx.id(), tuples = out.len(), "heap scan");
        Ok(out)
    }

    // -----------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------

    /// Run the modifiability checks on the tuple at `tid`, folding the
    /// snapshot visibility requirement into the verdict.
    fn check_modifiable(
        &self,
        bytes: &mut [u8],
        tid: Tid,
        tx: &Transaction,
        snapshot: &fheap_mvcc::Snapshot,
    ) -> Result<TupleModifyResult> {
        let live = matches!(
            page::slot(bytes, tid.slot()),
            Ok(slot) if slot.is_normal()
        );
        if !live {
            return Err(FerroError::TupleNotFound {
                page: tid.page().get(),
                slot: tid.slot().get(),
            });
        }
        let snapshots = self.txn.snapshots();
        let mut tup = Tuple::new(page::item_mut(bytes, tid.slot())?)?;
        let mut verdict = snapshots.can_modify(&tup, tx.id())?;
        if verdict == TupleModifyResult::Ok
            && !snapshots.is_visible(&mut tup, snapshot, tx.id())?
        {
            verdict = TupleModifyResult::Updated;
        }
        Ok(verdict)
    }

    /// Clear the page-level all-visible bit and its VM mirror when
    /// set. Any heap modification invalidates both summaries.
    fn clear_all_visible(&self, rel: RelationId, page_id: PageId, bytes: &mut [u8]) -> Result<()> {
        if page::is_all_visible(bytes) {
            page::clear_all_visible(bytes);
            self.pool
                .update_vm_status(rel, page_id, VmStatus::INITIALIZED)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HeapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapManager").finish_non_exhaustive()
    }
}
