//! The commit log (CLOG).
//!
//! Two bits per transaction id record how each transaction ended:
//! in-progress (the initial zero state), committed, or aborted. The
//! log lives in a single file, separate from every relation fork, and
//! is cached by a small LRU page cache of its own — commit-state
//! lookups have a very different access pattern from heap pages, so
//! they do not compete with the main buffer pool.
//!
//! Tuple visibility treats this log as the authority; the hint bits in
//! tuple headers are merely caches of answers read here.

pub mod cache;
pub mod codec;
pub mod disk;
pub mod manager;

pub use codec::XactState;
pub use manager::ClogManager;
