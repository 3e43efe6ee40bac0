//! Transaction-id allocation.
//!
//! Allocation and in-progress registration must be one atomic step: if
//! an id could be handed out before it reaches the in-progress set, a
//! snapshot taken in between would classify it as completed and later
//! treat its tuples as committed. The allocator therefore runs the
//! caller's bookkeeping inside its own critical section.

use parking_lot::Mutex;

use fheap_types::TransactionId;

/// Monotonic (wrap-around-aware) transaction-id source.
#[derive(Debug)]
pub struct TxidAllocator {
    next: Mutex<TransactionId>,
}

impl Default for TxidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TxidAllocator {
    /// Allocator starting at the first normal id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: Mutex::new(TransactionId::FIRST_NORMAL),
        }
    }

    /// Allocate the next id, running `register` on it before the
    /// allocator's mutex is released.
    pub fn allocate_with(&self, register: impl FnOnce(TransactionId)) -> TransactionId {
        let mut next = self.next.lock();
        let id = *next;
        *next = next.advance();
        register(id);
        id
    }

    /// The id the next allocation will return.
    #[must_use]
    pub fn peek_next(&self) -> TransactionId {
        *self.next.lock()
    }
}
