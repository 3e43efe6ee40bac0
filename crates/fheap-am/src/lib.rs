//! Heap access methods.
//!
//! The heap is the one table layout Ferroheap supports: unordered
//! tuples in slotted pages, addressed by tid. This crate implements
//! the four operations on it — insert, update, delete, and sequential
//! scan — on top of the buffer pool, the free-space map, and the MVCC
//! layer. Nothing is ever removed here: delete stamps an xmax, update
//! links a fresh version behind the old one, and reclamation is a
//! later pass guided by the snapshot manager's vacuum checks.

pub mod heap;

pub use heap::{HeapManager, ScannedTuple, UpdateOutcome};
