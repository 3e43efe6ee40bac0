//! The snapshot manager.
//!
//! Tracks which transactions are running, hands out snapshots, and
//! answers the three tuple questions the heap layer asks: is this
//! version visible under a snapshot, may this transaction modify it,
//! and may vacuum reclaim it. The commit log is the authority on
//! completed transactions; infomask hints only cache its answers, so
//! setting a hint late (or not at all) is always safe.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use fheap_clog::ClogManager;
use fheap_error::Result;
use fheap_page::{InfoMask, Tuple};
use fheap_types::TransactionId;

use crate::snapshot::Snapshot;

/// Verdict on whether a transaction may update or delete a tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleModifyResult {
    /// Modifiable, pending the caller's snapshot visibility check.
    Ok,
    /// Another live transaction already set its xmax.
    BeingModified,
    /// The version was never visible to this transaction.
    Invisible,
    /// A committed transaction already updated or deleted it.
    Updated,
}

/// Coarse tuple classification used by vacuum eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleVisibilityStatus {
    /// Live: no committed deleter.
    Alive,
    /// Deleted by a committed transaction; snapshots may still see it.
    RecentlyDead,
    /// Visible to no one, now or ever (aborted insert).
    Dead,
}

struct SharedState {
    in_progress: HashSet<TransactionId>,
    latest_completed: TransactionId,
    /// Snapshot published per running transaction, for the vacuum
    /// horizon.
    horizons: HashMap<TransactionId, Snapshot>,
}

/// Tracks running transactions and answers visibility questions.
pub struct SnapshotManager {
    clog: Arc<ClogManager>,
    shared: RwLock<SharedState>,
}

impl SnapshotManager {
    /// Create a manager backed by `clog`.
    #[must_use]
    pub fn new(clog: Arc<ClogManager>) -> Self {
        Self {
            clog,
            shared: RwLock::new(SharedState {
                in_progress: HashSet::new(),
                latest_completed: TransactionId::INVALID,
                horizons: HashMap::new(),
            }),
        }
    }

    // -----------------------------------------------------------------
    // Transaction bookkeeping
    // -----------------------------------------------------------------

    /// Add a freshly allocated id to the in-progress set. Must run
    /// inside the id allocator's critical section, or a concurrent
    /// snapshot could misclassify the id as completed.
    pub fn register_in_progress(&self, tx: TransactionId) {
        self.shared.write().in_progress.insert(tx);
    }

    /// Whether the system (not some snapshot) considers `tx` running.
    #[must_use]
    pub fn is_in_progress(&self, tx: TransactionId) -> bool {
        self.shared.read().in_progress.contains(&tx)
    }

    /// Finish `tx`: drop it from the in-progress set and the horizon
    /// map, and advance the latest-completed id if it moved forward.
    /// The caller records the outcome in the commit log *before* this,
    /// so no reader can find the id absent from both places.
    pub fn complete(&self, tx: TransactionId) {
        let mut shared = self.shared.write();
        shared.in_progress.remove(&tx);
        shared.horizons.remove(&tx);
        if tx.follows(shared.latest_completed) {
            shared.latest_completed = tx;
        }
        trace!(tx = %tx, "transaction completed");
    }

    /// Publish the snapshot `tx` runs under, so vacuum can honor it.
    pub fn publish_snapshot(&self, tx: TransactionId, snapshot: Snapshot) {
        self.shared.write().horizons.insert(tx, snapshot);
    }

    /// Build a snapshot of the current transaction state. The calling
    /// transaction must already be registered in-progress.
    #[must_use]
    pub fn take_snapshot(&self) -> Snapshot {
        let shared = self.shared.read();
        let xmax = shared.latest_completed;
        let xmin = shared
            .in_progress
            .iter()
            .copied()
            .reduce(|a, b| if a.follows(b) { b } else { a })
            .unwrap_or(TransactionId::INVALID);
        Snapshot::new(xmin, xmax, shared.in_progress.clone())
    }

    // -----------------------------------------------------------------
    // Visibility
    // -----------------------------------------------------------------

    /// Whether the tuple version is visible under `snapshot` to the
    /// transaction `current`.
    ///
    /// A transaction always sees its own still-live inserts and never
    /// its own deletions, regardless of the snapshot (which lists the
    /// transaction itself as in progress). Unknown xmin/xmax states
    /// resolve through the commit log and the answers are cached as
    /// hint bits; callers that pass a borrowed page tuple must hold
    /// the exclusive content latch, callers with an owned image just
    /// lose the cached hint. Pass an invalid `current` for checks made
    /// outside any transaction.
    pub fn is_visible<B>(
        &self,
        tuple: &mut Tuple<B>,
        snapshot: &Snapshot,
        current: TransactionId,
    ) -> Result<bool>
    where
        B: AsRef<[u8]> + AsMut<[u8]>,
    {
        let mask = tuple.infomask();
        let xmin_known_committed = mask.contains(InfoMask::XMIN_COMMITTED)
            || mask.contains(InfoMask::XMIN_FROZEN)
            || tuple.xmin() == TransactionId::FROZEN;

        if !xmin_known_committed {
            if mask.contains(InfoMask::XMIN_INVALID) {
                return Ok(false);
            }
            let xmin = tuple.xmin();
            if !current.is_invalid() && xmin == current {
                // Our own insert: visible unless we deleted it again.
                return Ok(tuple.xmax() != current);
            }
            if xmin.follows(snapshot.xmax()) {
                return Ok(false);
            }
            if snapshot.is_in_progress(xmin) {
                return Ok(false);
            }
            if self.clog.is_aborted(xmin)? {
                tuple.set_hint(InfoMask::XMIN_INVALID);
                return Ok(false);
            }
            // Completed and not aborted: committed. Cache it.
            tuple.set_hint(InfoMask::XMIN_COMMITTED);
        }

        let mask = tuple.infomask();
        if !mask.contains(InfoMask::XMAX_COMMITTED) {
            if mask.contains(InfoMask::XMAX_INVALID) || tuple.xmax().is_invalid() {
                return Ok(true);
            }
            let xmax = tuple.xmax();
            if !current.is_invalid() && xmax == current {
                // We deleted this version in this very transaction.
                return Ok(false);
            }
            if xmax.follows(snapshot.xmax()) {
                return Ok(true);
            }
            if snapshot.is_in_progress(xmax) {
                return Ok(true);
            }
            if self.clog.is_aborted(xmax)? {
                return Ok(true);
            }
            // The deleter committed.
            tuple.set_hint(InfoMask::XMAX_COMMITTED);
            return Ok(false);
        }

        // Both ends resolved committed: deleted, hence invisible.
        Ok(false)
    }

    /// Whether `current` may set the tuple's xmax (update/delete).
    ///
    /// `Ok` still requires the caller to confirm snapshot visibility;
    /// a tuple whose deleter is merely *running* reports
    /// `BeingModified` so the caller can apply isolation policy.
    pub fn can_modify<B: AsRef<[u8]>>(
        &self,
        tuple: &Tuple<B>,
        current: TransactionId,
    ) -> Result<TupleModifyResult> {
        let mask = tuple.infomask();
        let xmin = tuple.xmin();

        // A version whose inserter aborted, or is still running in
        // some other transaction, was never visible to us.
        if mask.contains(InfoMask::XMIN_INVALID) {
            return Ok(TupleModifyResult::Invisible);
        }
        let xmin_frozen =
            mask.contains(InfoMask::XMIN_FROZEN) || xmin == TransactionId::FROZEN;
        if !xmin_frozen {
            if xmin != current && self.is_in_progress(xmin) {
                return Ok(TupleModifyResult::BeingModified);
            }
            if !mask.contains(InfoMask::XMIN_COMMITTED) && self.clog.is_aborted(xmin)? {
                return Ok(TupleModifyResult::Invisible);
            }
        }

        let xmax = tuple.xmax();
        if mask.contains(InfoMask::XMAX_INVALID) || xmax.is_invalid() {
            return Ok(TupleModifyResult::Ok);
        }
        if xmax == current {
            // We already deleted this version ourselves.
            return Ok(TupleModifyResult::Updated);
        }
        if self.is_in_progress(xmax) {
            return Ok(TupleModifyResult::BeingModified);
        }
        if self.clog.is_aborted(xmax)? {
            // The deleter rolled back; the version is still live.
            return Ok(TupleModifyResult::Ok);
        }
        Ok(TupleModifyResult::Updated)
    }

    // -----------------------------------------------------------------
    // Vacuum eligibility
    // -----------------------------------------------------------------

    /// Classify a tuple for reclamation purposes.
    pub fn visibility_status<B: AsRef<[u8]>>(
        &self,
        tuple: &Tuple<B>,
    ) -> Result<TupleVisibilityStatus> {
        if tuple.infomask().contains(InfoMask::XMIN_INVALID)
            || self.clog.is_aborted(tuple.xmin())?
        {
            return Ok(TupleVisibilityStatus::Dead);
        }
        let xmax = tuple.xmax();
        if xmax.is_invalid()
            || tuple.infomask().contains(InfoMask::XMAX_INVALID)
            || self.is_in_progress(xmax)
            || self.clog.is_aborted(xmax)?
        {
            return Ok(TupleVisibilityStatus::Alive);
        }
        Ok(TupleVisibilityStatus::RecentlyDead)
    }

    /// Whether no live snapshot can still see this tuple, so its bytes
    /// may be reclaimed.
    pub fn is_vacuumable<B: AsRef<[u8]>>(&self, tuple: &Tuple<B>) -> Result<bool> {
        match self.visibility_status(tuple)? {
            TupleVisibilityStatus::Dead => Ok(true),
            TupleVisibilityStatus::Alive => Ok(false),
            TupleVisibilityStatus::RecentlyDead => {
                let Some(oldest) = self.oldest_snapshot_xmin() else {
                    // Nothing is running: nobody can see the corpse.
                    return Ok(true);
                };
                Ok(oldest.follows(tuple.xmax()))
            }
        }
    }

    /// Minimum xmin across all published snapshots, with running
    /// transactions themselves as a floor.
    fn oldest_snapshot_xmin(&self) -> Option<TransactionId> {
        let shared = self.shared.read();
        let candidates = shared
            .horizons
            .values()
            .map(Snapshot::xmin)
            .filter(|x| x.is_normal())
            .chain(shared.in_progress.iter().copied());
        candidates.reduce(|a, b| if a.follows(b) { b } else { a })
    }
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.read();
        f.debug_struct("SnapshotManager")
            .field("in_progress", &shared.in_progress.len())
            .field("latest_completed", &shared.latest_completed)
            .finish_non_exhaustive()
    }
}
