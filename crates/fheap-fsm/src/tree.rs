//! The binary tree packed inside one FSM page.
//!
//! Nodes are one byte each, laid out breadth-first after the 16-byte
//! page header: children of node `i` sit at `2i+1` and `2i+2`, its
//! parent at `(i-1)/2`. The first `INNER_NODE_COUNT` nodes are inner
//! (each the max of its children); the rest are leaves, addressed by
//! slot number. A zero-filled page is a valid tree of "no free space".

use fheap_types::PAGE_SIZE;

/// Byte offset of node 0 within the page.
pub const ROOT_NODE_OFFSET: usize = 16;

/// Total nodes per page.
pub const NODE_COUNT: usize = PAGE_SIZE - ROOT_NODE_OFFSET;

/// Inner nodes: everything before the first leaf of a complete binary
/// tree of `NODE_COUNT` nodes.
pub const INNER_NODE_COUNT: usize = NODE_COUNT / 2;

/// Leaves per page, which is also the fan-out between FSM levels.
pub const LEAF_COUNT: usize = NODE_COUNT - INNER_NODE_COUNT;

/// Breadth-first node index.
pub type NodeIndex = usize;

/// The root node.
pub const ROOT_NODE: NodeIndex = 0;

/// Left child of `node`.
#[inline]
#[must_use]
pub fn left_child(node: NodeIndex) -> NodeIndex {
    node * 2 + 1
}

/// Right child of `node`.
#[inline]
#[must_use]
pub fn right_child(node: NodeIndex) -> NodeIndex {
    node * 2 + 2
}

/// Parent of `node`.
#[inline]
#[must_use]
pub fn parent(node: NodeIndex) -> NodeIndex {
    (node - 1) / 2
}

/// Whether `node` is a leaf.
#[inline]
#[must_use]
pub fn is_leaf(node: NodeIndex) -> bool {
    node >= INNER_NODE_COUNT
}

/// Slot number of a leaf node.
#[inline]
#[must_use]
pub fn slot_of(node: NodeIndex) -> Option<usize> {
    node.checked_sub(INNER_NODE_COUNT)
}

/// Leaf node for a slot number.
#[inline]
#[must_use]
pub fn node_of_slot(slot: usize) -> NodeIndex {
    INNER_NODE_COUNT + slot
}

/// Read the category stored in `node`.
#[inline]
#[must_use]
pub fn node_value(page: &[u8], node: NodeIndex) -> u8 {
    page[ROOT_NODE_OFFSET + node]
}

/// Store a category into `node`.
#[inline]
pub fn set_node_value(page: &mut [u8], node: NodeIndex, value: u8) {
    page[ROOT_NODE_OFFSET + node] = value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_constants() {
        assert_eq!(NODE_COUNT, 8176);
        assert_eq!(INNER_NODE_COUNT, 4088);
        assert_eq!(LEAF_COUNT, 4088);
        // Every leaf node fits in the page.
        assert!(ROOT_NODE_OFFSET + node_of_slot(LEAF_COUNT - 1) < PAGE_SIZE);
        // Three levels cover the whole page id space.
        assert!((LEAF_COUNT as u64).pow(3) > u64::from(u32::MAX));
    }

    #[test]
    fn navigation() {
        assert_eq!(left_child(ROOT_NODE), 1);
        assert_eq!(right_child(ROOT_NODE), 2);
        assert_eq!(parent(1), ROOT_NODE);
        assert_eq!(parent(2), ROOT_NODE);
        assert_eq!(parent(right_child(5)), 5);
        assert_eq!(parent(left_child(5)), 5);
    }

    #[test]
    fn leaves_and_slots() {
        assert!(!is_leaf(ROOT_NODE));
        assert!(!is_leaf(INNER_NODE_COUNT - 1));
        assert!(is_leaf(INNER_NODE_COUNT));
        assert_eq!(slot_of(INNER_NODE_COUNT), Some(0));
        assert_eq!(slot_of(node_of_slot(17)), Some(17));
        assert_eq!(slot_of(0), None);
    }

    #[test]
    fn values_round_trip() {
        let mut page = vec![0u8; PAGE_SIZE];
        set_node_value(&mut page, ROOT_NODE, 200);
        set_node_value(&mut page, node_of_slot(0), 13);
        assert_eq!(node_value(&page, ROOT_NODE), 200);
        assert_eq!(node_value(&page, node_of_slot(0)), 13);
        // Header bytes untouched.
        assert!(page[..ROOT_NODE_OFFSET].iter().all(|&b| b == 0));
    }
}
