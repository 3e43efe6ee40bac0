//! The buffer manager: pinning, lookup, eviction, flushing.
//!
//! Lock order is mapping lock → header lock → tag lock; the content
//! latch is only ever acquired after the mapping lock is released (or
//! never taken). Clock sweep and the free list hand out victims; a
//! dirty victim is flushed before its tag is reassigned, so eviction
//! never drops data.

use std::collections::HashMap;
use std::sync::atomic::{AtomicIsize, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use fheap_disk::DiskManager;
use fheap_error::{FerroError, Result};
use fheap_types::{ForkNumber, PageId, RelationId, PAGE_SIZE};

use crate::frame::{BufferTag, Frame};

/// End-of-list marker for the free list.
const FREE_LIST_END: isize = -1;

/// The shared buffer pool manager.
pub struct BufferManager {
    disk: Arc<DiskManager>,
    frames: Box<[Frame]>,
    /// Tag → frame index. One global lock; partitioning would be an
    /// optimization, not a semantic change.
    table: RwLock<HashMap<BufferTag, usize>>,
    /// Head of the free list. Checked optimistically, popped under the
    /// strategy lock.
    free_head: AtomicIsize,
    strategy_lock: Mutex<()>,
    /// Clock hand. Monotonic; reduced modulo the pool size per tick.
    next_victim: AtomicU64,
}

impl BufferManager {
    /// Create a pool of `pool_size` frames over `disk`.
    #[must_use]
    pub fn new(disk: Arc<DiskManager>, pool_size: usize) -> Self {
        assert!(pool_size > 0, "buffer pool needs at least one frame");
        let frames: Box<[Frame]> = (0..pool_size)
            .map(|i| {
                let next = if i + 1 < pool_size {
                    i as isize + 1
                } else {
                    FREE_LIST_END
                };
                Frame::new(next)
            })
            .collect();
        Self {
            disk,
            frames,
            table: RwLock::new(HashMap::new()),
            free_head: AtomicIsize::new(0),
            strategy_lock: Mutex::new(()),
            next_victim: AtomicU64::new(0),
        }
    }

    /// Number of frames in the pool.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// The disk manager the pool reads and writes through.
    #[must_use]
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Frame metadata, for diagnostics and tests.
    #[must_use]
    pub fn frame(&self, id: usize) -> &Frame {
        &self.frames[id]
    }

    /// Current clock-hand position, for diagnostics and the background
    /// writer's scan origin.
    #[must_use]
    pub(crate) fn clock_hand(&self) -> usize {
        (self.next_victim.load(Ordering::Relaxed) % self.frames.len() as u64) as usize
    }

    // -----------------------------------------------------------------
    // read_buffer
    // -----------------------------------------------------------------

    /// Pin the frame holding `page` of the given fork, reading it from
    /// disk on a miss. `None` extends the fork by one fresh page and
    /// pins that.
    ///
    /// The returned guard unpins on drop. Content access goes through
    /// [`PinnedBuffer::read`] / [`PinnedBuffer::write`], which acquire
    /// the frame's content latch.
    pub fn read_buffer(
        &self,
        rel: RelationId,
        fork: ForkNumber,
        page: Option<PageId>,
    ) -> Result<PinnedBuffer<'_>> {
        let page_id = match page {
            Some(p) => p,
            None => self.disk.extend_page(rel, fork, false)?,
        };
        let tag = BufferTag::new(rel, fork, page_id);

        // Fast path: the page is already resident. The pin lands while
        // the mapping lock is held so the frame cannot be retagged
        // between lookup and pin.
        {
            let table = self.table.read();
            if let Some(&id) = table.get(&tag) {
                self.frames[id].pin();
                trace!(?tag, frame = id, "buffer hit");
                return Ok(PinnedBuffer::new(self, id, page_id));
            }
        }

        // Slow path: allocate a victim, flush it if needed, retag it,
        // and read the page in.
        loop {
            let victim = self.allocate_victim()?;
            let frame = &self.frames[victim];

            // Flush a dirty victim before its identity changes. The pin
            // we hold keeps it from being re-selected.
            if frame.is_dirty() {
                let old_tag = *frame.tag().lock();
                if let Some(old_tag) = old_tag {
                    let bytes = frame.page().read();
                    if let Err(e) = self.flush_frame(victim, old_tag, &bytes[..]) {
                        drop(bytes);
                        frame.unpin();
                        return Err(e);
                    }
                }
            }

            let mut table = self.table.write();
            if let Some(&existing) = table.get(&tag) {
                // Raced: another thread loaded the page first. Use its
                // frame and put our victim back in circulation.
                self.frames[existing].pin();
                drop(table);
                frame.unpin();
                trace!(?tag, frame = existing, "buffer hit after race");
                return Ok(PinnedBuffer::new(self, existing, page_id));
            }
            table.insert(tag, victim);

            // Re-verify under the header lock: we must be the only pin
            // and nobody may have re-dirtied the frame since the flush.
            frame.lock_header();
            let (pins, _) = frame.pin_and_usage();
            if pins != 1 || frame.is_dirty() {
                frame.unlock_header();
                table.remove(&tag);
                drop(table);
                frame.unpin();
                trace!(frame = victim, "victim verification failed; retrying");
                continue;
            }

            // Install the new identity and drop the old mapping.
            {
                let mut tag_slot = frame.tag().lock();
                if let Some(old) = tag_slot.take() {
                    table.remove(&old);
                }
                *tag_slot = Some(tag);
            }
            frame.unlock_header();

            // Take the content latch before the mapping lock goes, so
            // a racing pinner of the new tag blocks until the bytes
            // are real. Uncontended here: we hold the only pin.
            frame.set_io_in_progress();
            let mut bytes = frame.page().write();
            drop(table);

            let read = self.disk.read_page(rel, fork, page_id, &mut bytes[..]);
            frame.clear_io_in_progress();
            drop(bytes);

            if let Err(e) = read {
                let mut table = self.table.write();
                table.remove(&tag);
                *frame.tag().lock() = None;
                drop(table);
                frame.unpin();
                return Err(e);
            }
            frame.clear_dirty();
            debug!(?tag, frame = victim, "buffer loaded");
            return Ok(PinnedBuffer::new(self, victim, page_id));
        }
    }

    /// Unpin a frame. Public counterpart of [`PinnedBuffer`]'s drop for
    /// code that tracks frame ids manually.
    pub(crate) fn release(&self, id: usize) {
        self.frames[id].unpin();
    }

    // -----------------------------------------------------------------
    // Victim selection
    // -----------------------------------------------------------------

    /// Take the free-list head or run clock sweep. The returned frame
    /// is pinned and its header lock is already released.
    fn allocate_victim(&self) -> Result<usize> {
        loop {
            let Some(id) = self.pop_free_list() else {
                let id = self.clock_sweep()?;
                // Sweep returns with the header lock held so nobody can
                // pin the victim out from under us.
                self.frames[id].pin_and_unlock();
                return Ok(id);
            };
            let frame = &self.frames[id];
            frame.lock_header();
            let (pins, _) = frame.pin_and_usage();
            if pins != 0 {
                // Someone is using a frame that was still on the free
                // list; leave it to them and pick again.
                frame.unlock_header();
                continue;
            }
            frame.pin_and_unlock();
            return Ok(id);
        }
    }

    /// Pop the free-list head, if any. Once a frame leaves the list it
    /// never returns.
    fn pop_free_list(&self) -> Option<usize> {
        // Optimistic check before paying for the strategy lock.
        if self.free_head.load(Ordering::Acquire) == FREE_LIST_END {
            return None;
        }
        let _guard = self.strategy_lock.lock();
        let head = self.free_head.load(Ordering::Acquire);
        if head == FREE_LIST_END {
            return None;
        }
        let next = self.frames[head as usize].next_free().load(Ordering::Acquire);
        self.free_head.store(next, Ordering::Release);
        Some(head as usize)
    }

    /// Advance the clock hand one position.
    fn tick(&self) -> usize {
        let raw = self.next_victim.fetch_add(1, Ordering::Relaxed) + 1;
        (raw % self.frames.len() as u64) as usize
    }

    /// One full clock-sweep allocation. Returns the victim with its
    /// header lock held, or fails when a whole revolution finds only
    /// pinned frames.
    fn clock_sweep(&self) -> Result<usize> {
        let mut tries = self.frames.len();
        loop {
            let id = self.tick();
            let frame = &self.frames[id];
            frame.lock_header();
            let (pins, usage) = frame.pin_and_usage();
            if pins != 0 {
                frame.unlock_header();
                tries -= 1;
                if tries == 0 {
                    return Err(FerroError::BufferPoolExhausted {
                        pool_size: self.frames.len(),
                    });
                }
                continue;
            }
            if usage != 0 {
                frame.decrement_usage_locked();
                // The store above kept the lock bit; drop it now.
                self.frames[id].unlock_header();
                tries = self.frames.len();
                continue;
            }
            trace!(frame = id, "clock sweep selected victim");
            return Ok(id);
        }
    }

    // -----------------------------------------------------------------
    // Flushing
    // -----------------------------------------------------------------

    /// Write a frame's bytes to its page on disk. The caller holds a
    /// pin and the shared content latch (`bytes`).
    ///
    /// The dirty bit is intentionally left set: the common case is an
    /// immediate re-dirty, and a redundant flush later is cheaper than
    /// the extra store here. Callers that need "was dirty" information
    /// consult the bit before flushing.
    fn flush_frame(&self, id: usize, tag: BufferTag, bytes: &[u8]) -> Result<()> {
        let frame = &self.frames[id];
        frame.set_io_in_progress();
        let result = self
            .disk
            .write_page(tag.rel, tag.fork, tag.page, bytes, false);
        frame.clear_io_in_progress();
        debug!(?tag, frame = id, ok = result.is_ok(), "flushed frame");
        result
    }

    /// Flush one frame if it is dirty. Used by the background writer.
    /// Returns whether a write happened.
    pub fn sync_one_buffer(&self, id: usize) -> Result<bool> {
        let frame = &self.frames[id];
        frame.lock_header();
        if !frame.is_dirty() {
            frame.unlock_header();
            return Ok(false);
        }
        // Pin while still holding the header lock so the frame cannot
        // be evicted between the dirty check and the flush.
        frame.pin_and_unlock();

        let result = (|| {
            let Some(tag) = *frame.tag().lock() else {
                return Ok(false);
            };
            let bytes = frame.page().read();
            self.flush_frame(id, tag, &bytes[..])?;
            // Safe to clear here: page bytes only change under the
            // exclusive content latch, which our shared latch excludes,
            // so the flushed image is current.
            frame.clear_dirty();
            Ok(true)
        })();
        frame.unpin();
        result
    }

    /// Flush every dirty resident frame; used at engine shutdown.
    pub fn flush_all(&self) -> Result<()> {
        for id in 0..self.frames.len() {
            self.sync_one_buffer(id)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("pool_size", &self.frames.len())
            .field("resident", &self.table.read().len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PinnedBuffer
// ---------------------------------------------------------------------------

/// A pinned frame. Dropping it releases the pin; page bytes are reached
/// through the content latch via [`read`](Self::read) /
/// [`write`](Self::write).
pub struct PinnedBuffer<'a> {
    pool: &'a BufferManager,
    id: usize,
    page_id: PageId,
}

impl<'a> PinnedBuffer<'a> {
    fn new(pool: &'a BufferManager, id: usize, page_id: PageId) -> Self {
        Self { pool, id, page_id }
    }

    /// Index of the pinned frame.
    #[must_use]
    pub fn frame_id(&self) -> usize {
        self.id
    }

    /// The page this pin addresses. For a `read_buffer(.., None)` call
    /// this is the id of the freshly extended page.
    #[must_use]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Acquire the content latch shared and borrow the page bytes.
    #[must_use]
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.pool.frames[self.id].page().read()
    }

    /// Acquire the content latch exclusive and borrow the page bytes
    /// mutably.
    #[must_use]
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.pool.frames[self.id].page().write()
    }

    /// Set the frame's dirty bit.
    pub fn mark_dirty(&self) {
        self.pool.frames[self.id].set_dirty();
    }

    /// Flush this frame to disk. Acquires the shared content latch
    /// itself, so the caller must not be holding the write latch.
    pub fn flush(&self) -> Result<()> {
        let frame = self.pool.frames.get(self.id).expect("own frame id");
        let Some(tag) = *frame.tag().lock() else {
            return Err(FerroError::internal("flush of an untagged frame"));
        };
        let bytes = frame.page().read();
        self.pool.flush_frame(self.id, tag, &bytes[..])
    }
}

impl Drop for PinnedBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}

impl std::fmt::Debug for PinnedBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedBuffer")
            .field("frame", &self.id)
            .field("page", &self.page_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fheap_page::page;

    const REL: RelationId = RelationId::new(1);

    fn pool(frames: usize) -> BufferManager {
        BufferManager::new(Arc::new(DiskManager::in_memory()), frames)
    }

    #[test]
    fn extend_and_read_back() {
        let bm = pool(8);
        let pinned = bm.read_buffer(REL, ForkNumber::Main, None).unwrap();
        assert_eq!(pinned.page_id(), PageId::FIRST);
        // The fresh page is zeroed, hence uninitialized.
        assert!(!page::is_initialized(&pinned.read()[..]));
    }

    #[test]
    fn repeated_reads_share_a_frame_and_stack_pins() {
        let bm = pool(8);
        let first = bm.read_buffer(REL, ForkNumber::Main, None).unwrap();
        let page_id = first.page_id();
        let frame = first.frame_id();
        assert_eq!(bm.frame(frame).pin_count(), 1);

        let second = bm
            .read_buffer(REL, ForkNumber::Main, Some(page_id))
            .unwrap();
        assert_eq!(second.frame_id(), frame);
        assert_eq!(bm.frame(frame).pin_count(), 2);

        drop(second);
        drop(first);
        assert_eq!(bm.frame(frame).pin_count(), 0);
    }

    #[test]
    fn writes_survive_eviction() {
        // Pool of two frames: loading a third page must evict one.
        let bm = pool(2);

        let target = {
            let pinned = bm.read_buffer(REL, ForkNumber::Main, None).unwrap();
            let mut bytes = pinned.write();
            page::init(&mut bytes[..], 0);
            bytes[100] = 0xCE;
            drop(bytes);
            pinned.mark_dirty();
            pinned.page_id()
        };

        // Fill the rest of the pool and one more to force eviction of
        // the dirty page.
        for _ in 0..2 {
            let p = bm.read_buffer(REL, ForkNumber::Main, None).unwrap();
            drop(p);
        }

        // The dirty page was flushed during eviction; reading it back
        // (possibly from disk) sees the bytes.
        let pinned = bm.read_buffer(REL, ForkNumber::Main, Some(target)).unwrap();
        assert_eq!(pinned.read()[100], 0xCE);
    }

    #[test]
    fn eviction_flushes_exact_bytes_to_disk() {
        let bm = pool(1);

        let target = {
            let pinned = bm.read_buffer(REL, ForkNumber::Main, None).unwrap();
            let mut bytes = pinned.write();
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = (i % 251) as u8;
            }
            drop(bytes);
            pinned.mark_dirty();
            pinned.page_id()
        };

        // Force the single frame to turn over.
        drop(bm.read_buffer(REL, ForkNumber::Main, None).unwrap());

        let mut on_disk = [0u8; PAGE_SIZE];
        bm.disk()
            .read_page(REL, ForkNumber::Main, target, &mut on_disk)
            .unwrap();
        for (i, b) in on_disk.iter().enumerate() {
            assert_eq!(*b, (i % 251) as u8, "byte {i}");
        }
    }

    #[test]
    fn all_pinned_pool_is_exhausted() {
        let bm = pool(2);
        let _a = bm.read_buffer(REL, ForkNumber::Main, None).unwrap();
        let _b = bm.read_buffer(REL, ForkNumber::Main, None).unwrap();
        let err = bm.read_buffer(REL, ForkNumber::Main, None).unwrap_err();
        assert!(matches!(err, FerroError::BufferPoolExhausted { .. }));
    }

    #[test]
    fn clock_sweep_skips_pinned_frames() {
        let bm = pool(4);
        // Drain the free list.
        let pins: Vec<_> = (0..4)
            .map(|_| bm.read_buffer(REL, ForkNumber::Main, None).unwrap())
            .collect();
        let held = pins.into_iter().next().unwrap(); // keep frame 0 pinned
        let held_frame = held.frame_id();
        let held_state_before = (
            bm.frame(held_frame).pin_count(),
            bm.frame(held_frame).usage_count(),
        );

        // Frames 1..3 are unpinned with usage 1; two sweep revolutions
        // pick one of them, never the pinned frame.
        let fresh = bm.read_buffer(REL, ForkNumber::Main, None).unwrap();
        assert_ne!(fresh.frame_id(), held_frame);
        assert_eq!(
            (
                bm.frame(held_frame).pin_count(),
                bm.frame(held_frame).usage_count()
            ),
            held_state_before,
            "pinned frame state must be untouched"
        );
    }

    #[test]
    fn clock_sweep_with_idle_pool_picks_first_unpinned() {
        let bm = pool(4);
        // Occupy every frame, then zero out the usage counts so the
        // sweep sees an idle pool with the hand still at 0.
        let mut pins: Vec<_> = (0..4)
            .map(|_| bm.read_buffer(REL, ForkNumber::Main, None).unwrap())
            .collect();
        let held = pins.remove(1);
        drop(pins);
        assert_eq!(held.frame_id(), 1);
        for id in [0, 2, 3] {
            while bm.frame(id).usage_count() > 0 {
                bm.frame(id).lock_header();
                bm.frame(id).decrement_usage_locked();
                bm.frame(id).unlock_header();
            }
        }

        // Hand at 0: the first candidate is frame 1 (pinned, skipped
        // without touching it), the second is frame 2 (taken).
        let fresh = bm.read_buffer(REL, ForkNumber::Main, None).unwrap();
        assert_eq!(fresh.frame_id(), 2);
        assert_eq!(bm.frame(1).pin_count(), 1);
        assert_eq!(bm.frame(1).usage_count(), 0);
    }

    #[test]
    fn sync_one_buffer_flushes_only_dirty() {
        let bm = pool(2);
        let pinned = bm.read_buffer(REL, ForkNumber::Main, None).unwrap();
        let target = pinned.page_id();
        let frame = pinned.frame_id();

        // Clean frame: nothing to do.
        assert!(!bm.sync_one_buffer(frame).unwrap());

        {
            let mut bytes = pinned.write();
            bytes[7] = 0x77;
        }
        pinned.mark_dirty();
        assert!(bm.sync_one_buffer(frame).unwrap());

        let mut on_disk = [0u8; PAGE_SIZE];
        bm.disk()
            .read_page(REL, ForkNumber::Main, target, &mut on_disk)
            .unwrap();
        assert_eq!(on_disk[7], 0x77);
        // The pin taken for the flush was released.
        assert_eq!(bm.frame(frame).pin_count(), 1);
    }

    #[test]
    fn flush_on_pinned_buffer() {
        let bm = pool(2);
        let pinned = bm.read_buffer(REL, ForkNumber::Main, None).unwrap();
        {
            let mut bytes = pinned.write();
            page::init(&mut bytes[..], 0);
        }
        pinned.mark_dirty();
        pinned.flush().unwrap();

        let mut on_disk = [0u8; PAGE_SIZE];
        bm.disk()
            .read_page(REL, ForkNumber::Main, pinned.page_id(), &mut on_disk)
            .unwrap();
        assert!(page::is_initialized(&on_disk));
    }
}
