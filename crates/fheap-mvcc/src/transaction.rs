//! Transactions and their manager.
//!
//! `begin` allocates an id and registers it in-progress inside the
//! allocator's critical section; `commit`/`abort` record the outcome
//! in the commit log *before* the id leaves the in-progress set, so a
//! concurrent visibility check always finds the id in at least one of
//! the two. Snapshots attach lazily per statement: read-committed
//! takes a fresh one each time, repeatable-read keeps its first.

use std::sync::Arc;

use tracing::debug;

use fheap_clog::ClogManager;
use fheap_error::Result;
use fheap_types::TransactionId;

use crate::snapmgr::SnapshotManager;
use crate::snapshot::Snapshot;
use crate::txid::TxidAllocator;

/// Supported isolation levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize,
)]
pub enum IsolationLevel {
    /// Each statement sees everything committed before it started.
    #[default]
    ReadCommitted,
    /// Every statement sees the transaction's first snapshot.
    RepeatableRead,
}

impl IsolationLevel {
    /// Whether one snapshot serves the whole transaction.
    #[must_use]
    pub const fn uses_transaction_snapshot(self) -> bool {
        matches!(self, Self::RepeatableRead)
    }
}

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Running.
    InProgress,
    /// Ended in commit.
    Committed,
    /// Ended in abort.
    Aborted,
}

impl TxState {
    /// Whether the transaction has ended either way.
    #[must_use]
    pub const fn is_completed(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

/// A transaction handle.
///
/// Not `Clone` and not shareable: exactly one thread drives a
/// transaction, and the manager consumes its end states through
/// `&mut`.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    isolation: IsolationLevel,
    state: TxState,
    snapshot: Option<Arc<Snapshot>>,
}

impl Transaction {
    /// This transaction's id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The isolation level fixed at begin.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TxState {
        self.state
    }

    /// The currently attached snapshot, if a statement has run.
    #[must_use]
    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        self.snapshot.as_ref()
    }
}

/// Coordinates ids, snapshots, and the commit log.
pub struct TransactionManager {
    allocator: TxidAllocator,
    snapshots: Arc<SnapshotManager>,
    clog: Arc<ClogManager>,
}

impl TransactionManager {
    /// Create a manager over shared snapshot state and commit log.
    #[must_use]
    pub fn new(snapshots: Arc<SnapshotManager>, clog: Arc<ClogManager>) -> Self {
        Self {
            allocator: TxidAllocator::new(),
            snapshots,
            clog,
        }
    }

    /// The snapshot manager, for visibility checks.
    #[must_use]
    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    /// Start a transaction at `isolation`.
    pub fn begin(&self, isolation: IsolationLevel) -> Transaction {
        let id = self
            .allocator
            .allocate_with(|id| self.snapshots.register_in_progress(id));
        debug!(tx = %id, ?isolation, "begin");
        Transaction {
            id,
            isolation,
            state: TxState::InProgress,
            snapshot: None,
        }
    }

    /// The snapshot the next statement of `tx` should use, taking a
    /// fresh one unless the isolation level reuses the first.
    pub fn ensure_snapshot(&self, tx: &mut Transaction) -> Arc<Snapshot> {
        if tx.isolation.uses_transaction_snapshot() {
            if let Some(snapshot) = &tx.snapshot {
                return Arc::clone(snapshot);
            }
        }
        let snapshot = Arc::new(self.snapshots.take_snapshot());
        self.snapshots
            .publish_snapshot(tx.id, (*snapshot).clone());
        tx.snapshot = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// Commit: record the outcome, then retire the id.
    pub fn commit(&self, tx: &mut Transaction) -> Result<()> {
        debug_assert_eq!(tx.state, TxState::InProgress);
        self.clog.set_committed(tx.id)?;
        self.snapshots.complete(tx.id);
        tx.state = TxState::Committed;
        debug!(tx = %tx.id, "commit");
        Ok(())
    }

    /// Abort: record the outcome, then retire the id.
    pub fn abort(&self, tx: &mut Transaction) -> Result<()> {
        debug_assert_eq!(tx.state, TxState::InProgress);
        self.clog.set_aborted(tx.id)?;
        self.snapshots.complete(tx.id);
        tx.state = TxState::Aborted;
        debug!(tx = %tx.id, "abort");
        Ok(())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_id", &self.allocator.peek_next())
            .finish_non_exhaustive()
    }
}
