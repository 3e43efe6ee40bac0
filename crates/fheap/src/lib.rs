//! Ferroheap: an embeddable, disk-backed, append-only MVCC heap
//! storage engine.
//!
//! The [`Engine`] wires the whole kernel together — disk manager,
//! shared buffer pool with a background writer, free-space map,
//! commit log, snapshot machinery, and the heap access methods — and
//! exposes the transactional surface callers use:
//!
//! ```no_run
//! use fheap::{Config, Engine, RelationId};
//!
//! # fn main() -> fheap::Result<()> {
//! let engine = Engine::open(Config::default())?;
//! let rel = RelationId::new(1);
//!
//! let mut tx = engine.begin();
//! let tid = engine.insert(rel, b"hello", &mut tx)?;
//! engine.commit(&mut tx)?;
//!
//! let mut tx = engine.begin();
//! for row in engine.scan(rel, &mut tx)? {
//!     println!("{}: {:?}", row.tid, row.tuple.payload());
//! }
//! let _ = tid;
//! # Ok(())
//! # }
//! ```
//!
//! SQL, WAL/recovery, indexes, and catalogs live above or beside this
//! crate; the engine assumes callers already resolved relation ids and
//! serialized their rows to bytes.

pub mod config;
pub mod engine;

pub use config::Config;
pub use engine::Engine;

pub use fheap_am::{HeapManager, ScannedTuple, UpdateOutcome};
pub use fheap_error::{ErrorClass, FerroError, Result};
pub use fheap_mvcc::{
    IsolationLevel, Snapshot, Transaction, TupleModifyResult, TxState,
};
pub use fheap_page::{InfoMask, OwnedTuple, VmStatus};
pub use fheap_types::{ForkNumber, PageId, RelationId, SlotIndex, Tid, TransactionId, PAGE_SIZE};
