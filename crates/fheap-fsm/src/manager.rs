//! FSM search and update.
//!
//! Search descends right-first from the root FSM page; update writes a
//! bottom-level leaf and bubbles the new category rootward. A page
//! latch is never held while another FSM page is acquired: each
//! descent or climb step releases the current page first. The price is
//! a benign race — a concurrently drained page can make a descent lie —
//! answered by restarting from the root a bounded number of times.

use tracing::{trace, warn};

use fheap_buffer::BufferManager;
use fheap_error::{FerroError, Result};
use fheap_types::{PageId, RelationId};
use std::sync::Arc;

use crate::address::{
    address_of_heap_page, child_address, fsm_page_id, heap_page_of, parent_address, Address,
    BOTTOM_LEVEL, ROOT_LEVEL,
};
use crate::category::{category_for, category_needed};
use crate::tree::{
    is_leaf, left_child, node_of_slot, node_value, parent, right_child, set_node_value, slot_of,
    NODE_COUNT, ROOT_NODE,
};

/// Give up and report "no page" after this many root restarts.
const MAX_SEARCH_RESTARTS: u32 = 8;

/// What one page's descent concluded.
enum Descent {
    /// The page's root cannot satisfy the request.
    Insufficient,
    /// Reached this leaf slot.
    Slot(usize),
}

/// Locates and maintains per-page free space for heap relations.
pub struct FsmManager {
    pool: Arc<BufferManager>,
}

impl FsmManager {
    /// Create a manager over the shared buffer pool.
    #[must_use]
    pub fn new(pool: Arc<BufferManager>) -> Self {
        Self { pool }
    }

    /// Find a heap page with at least `size` free bytes, or `None` when
    /// the map knows of none (the caller then extends the relation).
    pub fn search(&self, rel: RelationId, size: usize) -> Result<Option<PageId>> {
        let wanted =
            category_needed(size).ok_or(FerroError::InvalidSpaceRequest { size })?;
        if wanted == 0 {
            // Zero-byte requests are satisfied by any page at all.
            return Ok(Some(PageId::FIRST));
        }

        let mut restarts = 0;
        'restart: loop {
            let mut addr = Address::ROOT;
            loop {
                let outcome = {
                    let pinned = self.pool.read_fsm_buffer(rel, fsm_page_id(addr))?;
                    let bytes = pinned.read();
                    descend_in_page(&bytes[..], wanted)
                };
                let slot = match outcome {
                    Descent::Insufficient if addr.level == ROOT_LEVEL => {
                        // The whole tree has nothing big enough.
                        return Ok(None);
                    }
                    Descent::Insufficient => {
                        // A parent promised space this child no longer
                        // has: someone consumed it since we read the
                        // summary. Start over.
                        restarts += 1;
                        if restarts >= MAX_SEARCH_RESTARTS {
                            warn!(rel = %rel, size, "fsm search contended; giving up");
                            return Ok(None);
                        }
                        trace!(rel = %rel, restarts, "fsm search restarting from root");
                        continue 'restart;
                    }
                    Descent::Slot(slot) => slot,
                };

                if addr.level == BOTTOM_LEVEL {
                    let page = heap_page_of(addr, slot)
                        .ok_or_else(|| FerroError::internal("bottom fsm address overflow"))?;
                    trace!(rel = %rel, size, page = %page, "fsm search hit");
                    return Ok(Some(page));
                }
                addr = child_address(addr, slot)
                    .ok_or_else(|| FerroError::internal("fsm child of bottom level"))?;
            }
        }
    }

    /// Record that heap page `rel_page` now has `size` free bytes, and
    /// bubble the category toward the tree root.
    pub fn update(&self, rel: RelationId, rel_page: PageId, size: usize) -> Result<()> {
        let category =
            category_for(size).ok_or(FerroError::InvalidSpaceRequest { size })?;
        let (mut addr, slot) = address_of_heap_page(rel_page);
        let mut node = node_of_slot(slot);

        loop {
            let done = {
                let pinned = self.pool.read_fsm_buffer(rel, fsm_page_id(addr))?;
                let mut bytes = pinned.write();
                set_node_value(&mut bytes[..], node, category);
                pinned.mark_dirty();

                // Bubble within this page until a parent already
                // dominates the new category.
                let mut reached_root = true;
                let mut n = node;
                while n != ROOT_NODE {
                    n = parent(n);
                    if node_value(&bytes[..], n) >= category {
                        reached_root = false;
                        break;
                    }
                    set_node_value(&mut bytes[..], n, category);
                }
                !reached_root
            };
            if done || addr.level == ROOT_LEVEL {
                trace!(rel = %rel, page = %rel_page, category, "fsm updated");
                return Ok(());
            }

            // The page root changed: the parent page's summary leaf
            // must follow. The current page is released before the
            // parent is pinned.
            let (parent_addr, parent_slot) =
                parent_address(addr).ok_or_else(|| FerroError::internal("fsm root has no parent"))?;
            addr = parent_addr;
            node = node_of_slot(parent_slot);
        }
    }
}

impl std::fmt::Debug for FsmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsmManager").finish_non_exhaustive()
    }
}

/// Descend right-first inside one page until a leaf satisfies
/// `wanted`.
fn descend_in_page(bytes: &[u8], wanted: u8) -> Descent {
    if node_value(bytes, ROOT_NODE) < wanted {
        return Descent::Insufficient;
    }
    let mut node = ROOT_NODE;
    loop {
        let right = right_child(node);
        let left = left_child(node);
        node = if right < NODE_COUNT && node_value(bytes, right) >= wanted {
            right
        } else if left < NODE_COUNT && node_value(bytes, left) >= wanted {
            left
        } else {
            // An inner node promised more than both children deliver;
            // the summary is stale.
            return Descent::Insufficient;
        };
        if is_leaf(node) {
            return Descent::Slot(slot_of(node).expect("leaf node has a slot"));
        }
    }
}
