//! MVCC: transaction ids, snapshots, visibility, and the transaction
//! manager.
//!
//! Readers never block writers and writers never block readers: every
//! update makes a new tuple version, and each transaction decides what
//! it can see from three inputs — its snapshot, the commit log, and
//! the hint bits cached in tuple headers. This crate owns all of that
//! decision-making; the heap layer supplies tuples and applies the
//! verdicts.

pub mod snapshot;
pub mod snapmgr;
pub mod transaction;
pub mod txid;

pub use snapmgr::{SnapshotManager, TupleModifyResult, TupleVisibilityStatus};
pub use snapshot::Snapshot;
pub use transaction::{IsolationLevel, Transaction, TransactionManager, TxState};
pub use txid::TxidAllocator;
