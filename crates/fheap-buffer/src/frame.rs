//! Buffer frames and their packed state word.
//!
//! One 32-bit atomic encodes everything eviction needs to know:
//!
//! ```text
//! bit 31      header lock
//! bits 22..30 flags (dirty, I/O in progress)
//! bits 18..21 usage count
//! bits  0..17 pin count
//! ```
//!
//! All transitions are compare-and-swap loops. The header-lock bit is a
//! short-term mutual-exclusion bit: while it is set no other thread may
//! CAS the word, and multi-field edits (victim selection, tag swaps)
//! happen under it. Waiters spin briefly and then yield; they never
//! block.

use std::sync::atomic::{AtomicIsize, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};

use fheap_types::{ForkNumber, PageId, RelationId, PAGE_SIZE};

const PIN_MASK: u32 = (1 << 18) - 1;
const USAGE_SHIFT: u32 = 18;
const USAGE_ONE: u32 = 1 << USAGE_SHIFT;
const USAGE_MASK: u32 = 0xF << USAGE_SHIFT;
/// Usage saturates here; a hot frame survives this many sweep passes.
pub const MAX_USAGE_COUNT: u32 = 4;

const FLAG_DIRTY: u32 = 1 << 22;
const FLAG_IO_IN_PROGRESS: u32 = 1 << 23;
const FLAG_LOCKED: u32 = 1 << 31;

/// How many spins to burn before yielding the CPU while waiting for the
/// header lock.
const SPINS_BEFORE_YIELD: u32 = 64;

/// Identity of the page a frame holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferTag {
    /// Relation the page belongs to.
    pub rel: RelationId,
    /// Fork within the relation.
    pub fork: ForkNumber,
    /// Page within the fork.
    pub page: PageId,
}

impl BufferTag {
    /// Create a tag.
    #[must_use]
    pub const fn new(rel: RelationId, fork: ForkNumber, page: PageId) -> Self {
        Self { rel, fork, page }
    }
}

/// One frame of the buffer pool.
///
/// The pool owns every frame for the process lifetime; callers pin a
/// frame temporarily and must release it. The content latch (`page`)
/// guards the bytes; the state word guards everything else.
pub struct Frame {
    state: AtomicU32,
    tag: Mutex<Option<BufferTag>>,
    /// Next frame in the free list; `-1` terminates. Only touched under
    /// the pool's strategy lock.
    next_free: AtomicIsize,
    page: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl Frame {
    pub(crate) fn new(next_free: isize) -> Self {
        Self {
            state: AtomicU32::new(0),
            tag: Mutex::new(None),
            next_free: AtomicIsize::new(next_free),
            page: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    /// The content latch over the frame's bytes.
    pub(crate) fn page(&self) -> &RwLock<Box<[u8; PAGE_SIZE]>> {
        &self.page
    }

    pub(crate) fn tag(&self) -> &Mutex<Option<BufferTag>> {
        &self.tag
    }

    pub(crate) fn next_free(&self) -> &AtomicIsize {
        &self.next_free
    }

    // --- state word primitives ---

    fn load(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }

    /// CAS loop that waits out the header lock, then applies `f`.
    fn update(&self, f: impl Fn(u32) -> u32) -> u32 {
        let mut spins = 0u32;
        loop {
            let old = self.load();
            if old & FLAG_LOCKED != 0 {
                spins += 1;
                if spins % SPINS_BEFORE_YIELD == 0 {
                    std::thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
                continue;
            }
            let new = f(old);
            if self
                .state
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return new;
            }
        }
    }

    /// Acquire the header lock: spin until the bit can be set.
    pub(crate) fn lock_header(&self) {
        self.update(|st| st | FLAG_LOCKED);
    }

    /// Release the header lock.
    pub(crate) fn unlock_header(&self) {
        self.state.fetch_and(!FLAG_LOCKED, Ordering::AcqRel);
    }

    /// Increment the pin count.
    pub(crate) fn pin(&self) {
        self.update(|st| {
            debug_assert!(st & PIN_MASK < PIN_MASK);
            st + 1
        });
    }

    /// Pin while holding the header lock, releasing it in the same
    /// atomic step so no rival can slip in between.
    pub(crate) fn pin_and_unlock(&self) {
        let st = self.load();
        debug_assert!(st & FLAG_LOCKED != 0, "caller must hold the header lock");
        self.state
            .store((st + 1) & !FLAG_LOCKED, Ordering::Release);
    }

    /// Decrement the pin count. On the transition to zero pins the
    /// usage count goes up (saturating), so a recently used frame is
    /// skipped for one clock-sweep revolution.
    pub(crate) fn unpin(&self) {
        self.update(|st| {
            debug_assert!(st & PIN_MASK > 0, "unpin of an unpinned frame");
            let mut new = st - 1;
            if new & PIN_MASK == 0 && (new & USAGE_MASK) >> USAGE_SHIFT < MAX_USAGE_COUNT {
                new += USAGE_ONE;
            }
            new
        });
    }

    /// Decrement the usage count; the caller holds the header lock.
    pub(crate) fn decrement_usage_locked(&self) {
        let st = self.load();
        debug_assert!(st & FLAG_LOCKED != 0, "caller must hold the header lock");
        debug_assert!(st & USAGE_MASK != 0);
        self.state.store(st - USAGE_ONE, Ordering::Release);
    }

    /// Set the dirty bit.
    pub(crate) fn set_dirty(&self) {
        self.update(|st| st | FLAG_DIRTY);
    }

    /// Clear the dirty bit. Only used when a frame is recycled with
    /// fresh contents; eviction deliberately leaves the bit set after
    /// its flush.
    pub(crate) fn clear_dirty(&self) {
        self.update(|st| st & !FLAG_DIRTY);
    }

    pub(crate) fn set_io_in_progress(&self) {
        self.update(|st| st | FLAG_IO_IN_PROGRESS);
    }

    pub(crate) fn clear_io_in_progress(&self) {
        self.update(|st| st & !FLAG_IO_IN_PROGRESS);
    }

    // --- observers ---

    /// Current pin count.
    #[must_use]
    pub fn pin_count(&self) -> u32 {
        self.load() & PIN_MASK
    }

    /// Current usage count.
    #[must_use]
    pub fn usage_count(&self) -> u32 {
        (self.load() & USAGE_MASK) >> USAGE_SHIFT
    }

    /// Whether the frame holds unwritten changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.load() & FLAG_DIRTY != 0
    }

    /// Whether a disk transfer is running on this frame.
    #[must_use]
    pub fn io_in_progress(&self) -> bool {
        self.load() & FLAG_IO_IN_PROGRESS != 0
    }

    /// Pin and usage counts in one load; used by victim selection while
    /// the header lock is held.
    pub(crate) fn pin_and_usage(&self) -> (u32, u32) {
        let st = self.load();
        (st & PIN_MASK, (st & USAGE_MASK) >> USAGE_SHIFT)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.load();
        f.debug_struct("Frame")
            .field("pin", &(st & PIN_MASK))
            .field("usage", &((st & USAGE_MASK) >> USAGE_SHIFT))
            .field("dirty", &(st & FLAG_DIRTY != 0))
            .field("locked", &(st & FLAG_LOCKED != 0))
            .field("tag", &*self.tag.lock())
            .finish()
    }
}
