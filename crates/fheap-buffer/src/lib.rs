//! The shared buffer pool.
//!
//! A fixed array of page-sized frames caches pages of every relation
//! fork. Each frame packs pin count, usage count, and flags into one
//! atomic word edited by compare-and-swap; the bytes themselves sit
//! behind a reader/writer content latch that callers hold across all
//! page access. Cold misses take a frame from the free list or evict a
//! victim by clock sweep, flushing dirty victims before the tag moves.
//!
//! The commit log is *not* cached here; it keeps its own small cache.

pub mod bgwriter;
pub mod frame;
pub mod fsm;
pub mod manager;
pub mod vm;

pub use bgwriter::BackgroundWriter;
pub use frame::{BufferTag, Frame};
pub use manager::{BufferManager, PinnedBuffer};
