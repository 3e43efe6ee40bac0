//! The free-space map.
//!
//! Per relation, a dedicated fork summarizes how much free space every
//! heap page has, so tuple placement is a tree descent instead of a
//! scan. Each FSM page packs a complete binary tree of one-byte
//! categories into its data region: leaves carry page categories,
//! inner nodes the max of their children. Three levels of FSM pages
//! stack the same shape across pages, enough to address every possible
//! page id.
//!
//! The map is advisory. Readers may see stale values; the search
//! restarts from the root when a descent contradicts itself, and the
//! caller falls back to extending the relation when the map finds
//! nothing.

pub mod address;
pub mod category;
pub mod manager;
pub mod tree;

pub use category::{category_for, category_needed};
pub use manager::FsmManager;
