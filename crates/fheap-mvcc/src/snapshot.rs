//! Point-in-time snapshots.
//!
//! A snapshot is (xmin, xmax, in-progress set): ids before `xmin` had
//! completed when the snapshot was taken, ids after `xmax` had not
//! started, and ids in between are in progress iff the set contains
//! them. All comparisons use wrap-around order.

use std::collections::HashSet;

use fheap_types::TransactionId;

/// A consistent view of which transactions count as completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    xmin: TransactionId,
    xmax: TransactionId,
    xip: HashSet<TransactionId>,
}

impl Snapshot {
    /// Assemble a snapshot. `xmin` is invalid when nothing was in
    /// progress; `xmax` is the latest completed id at snapshot time.
    #[must_use]
    pub fn new(xmin: TransactionId, xmax: TransactionId, xip: HashSet<TransactionId>) -> Self {
        Self { xmin, xmax, xip }
    }

    /// Smallest in-progress id at snapshot time (invalid if none).
    #[must_use]
    pub fn xmin(&self) -> TransactionId {
        self.xmin
    }

    /// Latest completed id at snapshot time.
    #[must_use]
    pub fn xmax(&self) -> TransactionId {
        self.xmax
    }

    /// The in-progress ids captured at snapshot time.
    #[must_use]
    pub fn in_progress_ids(&self) -> &HashSet<TransactionId> {
        &self.xip
    }

    /// Whether `tx` counts as in progress from this snapshot's point
    /// of view. Ids newer than `xmax` had not even started, so they
    /// are "in progress" for visibility purposes.
    #[must_use]
    pub fn is_in_progress(&self, tx: TransactionId) -> bool {
        if self.xmin.follows(tx) {
            return false;
        }
        if tx.follows(self.xmax) {
            return true;
        }
        self.xip.contains(&tx)
    }
}
