//! Disk management for relation forks.
//!
//! The disk manager maps (relation, fork) pairs to files under a base
//! directory and moves whole pages between those files and memory. All
//! I/O goes through the [`Storage`] capability trait so tests (and
//! fully in-memory engines) can run without touching a real filesystem.

pub mod manager;
pub mod storage;

pub use manager::DiskManager;
pub use storage::{FileOpener, FileStorage, MemoryOpener, MemoryStorage, Storage, StorageOpener};
