//! The commit log's LRU page cache.
//!
//! A handful of frames under one reader/writer lock. Hits bump a
//! per-frame LRU stamp and read the byte in place; misses escalate to
//! the write lock, evict the least-recently-used frame (skipping the
//! latest page, which is where commits land, and frames mid-I/O), and
//! fetch the page. During disk transfers the global lock is dropped
//! and the frame is protected by its own I/O mutex plus an in-progress
//! status that victim selection refuses to touch.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, trace};

use fheap_error::{FerroError, Result};
use fheap_types::{PageId, TransactionId, PAGE_SIZE};

use crate::codec;
use crate::codec::XactState;
use crate::disk::ClogDisk;

/// Frames in the cache. Commit-state access is so localized that a
/// handful of pages covers hundreds of thousands of transactions.
pub const CLOG_CACHE_FRAMES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStatus {
    Empty,
    Used,
    ReadInProgress,
    WriteInProgress,
}

#[derive(Debug, Clone, Copy)]
struct FrameMeta {
    page: Option<PageId>,
    status: FrameStatus,
    dirty: bool,
}

impl FrameMeta {
    const EMPTY: Self = Self {
        page: None,
        status: FrameStatus::Empty,
        dirty: false,
    };
}

struct CacheInner {
    meta: [FrameMeta; CLOG_CACHE_FRAMES],
    /// Page most recently written to; the victim scan spares it.
    latest_page: Option<PageId>,
}

struct ClogFrame {
    /// Held across disk transfers while the global lock is released.
    io: Mutex<()>,
    data: Mutex<Box<[u8; PAGE_SIZE]>>,
}

/// The cache proper.
pub struct ClogCache {
    disk: ClogDisk,
    inner: RwLock<CacheInner>,
    frames: Vec<ClogFrame>,
    lru_clock: AtomicU64,
    lru_stamps: Vec<AtomicU64>,
}

impl ClogCache {
    /// Create a cache over `disk`.
    #[must_use]
    pub fn new(disk: ClogDisk) -> Self {
        Self {
            disk,
            inner: RwLock::new(CacheInner {
                meta: [FrameMeta::EMPTY; CLOG_CACHE_FRAMES],
                latest_page: None,
            }),
            frames: (0..CLOG_CACHE_FRAMES)
                .map(|_| ClogFrame {
                    io: Mutex::new(()),
                    data: Mutex::new(Box::new([0u8; PAGE_SIZE])),
                })
                .collect(),
            lru_clock: AtomicU64::new(1),
            lru_stamps: (0..CLOG_CACHE_FRAMES).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Read the recorded state of `tx`.
    pub fn state(&self, tx: TransactionId) -> Result<XactState> {
        let page = codec::page_of(tx);
        let byte_off = codec::byte_of(tx);

        // Hit path under the shared lock: holding it keeps the frame
        // from being evicted while the byte is read.
        {
            let inner = self.inner.read();
            if let Some(frame) = search_used(&inner, page) {
                self.bump_lru(frame);
                let byte = self.frames[frame].data.lock()[byte_off];
                return Ok(codec::state_in(byte, tx));
            }
        }

        let (inner, frame) = self.fetch_page(page)?;
        let byte = self.frames[frame].data.lock()[byte_off];
        drop(inner);
        Ok(codec::state_in(byte, tx))
    }

    /// Record `state` for `tx` and mark the hosting frame dirty.
    pub fn set_state(&self, tx: TransactionId, state: XactState) -> Result<()> {
        let page = codec::page_of(tx);
        let byte_off = codec::byte_of(tx);

        let (mut inner, frame) = self.fetch_page(page)?;
        {
            let mut data = self.frames[frame].data.lock();
            data[byte_off] = codec::with_state(data[byte_off], tx, state);
        }
        inner.meta[frame].dirty = true;
        inner.latest_page = Some(page);
        trace!(tx = %tx, ?state, "clog state recorded");
        Ok(())
    }

    /// Write every dirty frame out and sync the file.
    pub fn checkpoint(&self) -> Result<()> {
        let mut inner = self.inner.write();
        for frame in 0..CLOG_CACHE_FRAMES {
            if inner.meta[frame].status == FrameStatus::Used && inner.meta[frame].dirty {
                inner = self.write_out(inner, frame)?;
            }
        }
        drop(inner);
        self.disk.sync()
    }

    fn bump_lru(&self, frame: usize) {
        // Consecutive hits on one page would otherwise spin the clock
        // for nothing; skip the bump when the frame is already newest.
        let clock = self.lru_clock.load(Ordering::Relaxed);
        if self.lru_stamps[frame].load(Ordering::Relaxed) == clock {
            return;
        }
        let stamp = self.lru_clock.fetch_add(1, Ordering::Relaxed) + 1;
        self.lru_stamps[frame].store(stamp, Ordering::Relaxed);
    }

    /// Ensure `page` is resident and return its frame, with the global
    /// write lock held so the caller can finish its byte access before
    /// eviction becomes possible again.
    fn fetch_page(
        &self,
        page: PageId,
    ) -> Result<(RwLockWriteGuard<'_, CacheInner>, usize)> {
        let mut inner = self.inner.write();
        loop {
            if let Some(frame) = search_used(&inner, page) {
                self.bump_lru(frame);
                return Ok((inner, frame));
            }

            // If another thread has the page mid-transfer, wait on its
            // I/O mutex rather than loading a duplicate copy.
            if let Some(frame) = search_in_progress(&inner, page) {
                drop(inner);
                drop(self.frames[frame].io.lock());
                inner = self.inner.write();
                continue;
            }

            let Some(victim) = self.select_victim(&inner) else {
                // Every frame is mid-I/O; let the I/O finish.
                drop(inner);
                std::thread::yield_now();
                inner = self.inner.write();
                continue;
            };

            if inner.meta[victim].status == FrameStatus::Used && inner.meta[victim].dirty {
                inner = self.write_out(inner, victim)?;
                // The map may have changed while the lock was down.
                continue;
            }

            // Claim the frame and read the page in, without the global
            // lock but with the frame's I/O mutex held.
            inner.meta[victim] = FrameMeta {
                page: Some(page),
                status: FrameStatus::ReadInProgress,
                dirty: false,
            };
            let io = self.frames[victim].io.lock();
            drop(inner);
            let read = {
                let mut data = self.frames[victim].data.lock();
                self.disk.read_page(page, &mut data[..])
            };
            drop(io);
            inner = self.inner.write();
            match read {
                Ok(()) => {
                    inner.meta[victim].status = FrameStatus::Used;
                    self.bump_lru(victim);
                    debug!(page = %page, frame = victim, "clog page loaded");
                    return Ok((inner, victim));
                }
                Err(e) => {
                    inner.meta[victim] = FrameMeta::EMPTY;
                    return Err(e);
                }
            }
        }
    }

    /// Flush one dirty frame, juggling the global lock around the disk
    /// write. Returns the re-acquired lock.
    fn write_out<'a>(
        &'a self,
        mut inner: RwLockWriteGuard<'a, CacheInner>,
        frame: usize,
    ) -> Result<RwLockWriteGuard<'a, CacheInner>> {
        let page = inner.meta[frame]
            .page
            .ok_or_else(|| FerroError::internal("dirty clog frame without a page"))?;
        inner.meta[frame].status = FrameStatus::WriteInProgress;
        let io = self.frames[frame].io.lock();
        drop(inner);
        let write = {
            let data = self.frames[frame].data.lock();
            self.disk.write_page(page, &data[..])
        };
        drop(io);
        let mut inner = self.inner.write();
        inner.meta[frame].status = FrameStatus::Used;
        write?;
        inner.meta[frame].dirty = false;
        debug!(page = %page, frame, "clog page flushed");
        Ok(inner)
    }

    /// Least-recently-used victim, preferring empty frames, skipping
    /// frames mid-I/O and the latest written page.
    fn select_victim(&self, inner: &CacheInner) -> Option<usize> {
        let mut victim: Option<(usize, u64)> = None;
        for frame in 0..CLOG_CACHE_FRAMES {
            match inner.meta[frame].status {
                FrameStatus::Empty => return Some(frame),
                FrameStatus::ReadInProgress | FrameStatus::WriteInProgress => continue,
                FrameStatus::Used => {}
            }
            if inner.meta[frame].page.is_some() && inner.meta[frame].page == inner.latest_page {
                continue;
            }
            let stamp = self.lru_stamps[frame].load(Ordering::Relaxed);
            if victim.map_or(true, |(_, best)| stamp < best) {
                victim = Some((frame, stamp));
            }
        }
        victim.map(|(frame, _)| frame).or_else(|| {
            // Only the latest page is left; evicting it beats failing.
            (0..CLOG_CACHE_FRAMES)
                .find(|&f| inner.meta[f].status == FrameStatus::Used)
        })
    }
}

fn search_used(inner: &CacheInner, page: PageId) -> Option<usize> {
    (0..CLOG_CACHE_FRAMES).find(|&frame| {
        inner.meta[frame].status == FrameStatus::Used && inner.meta[frame].page == Some(page)
    })
}

fn search_in_progress(inner: &CacheInner, page: PageId) -> Option<usize> {
    (0..CLOG_CACHE_FRAMES).find(|&frame| {
        matches!(
            inner.meta[frame].status,
            FrameStatus::ReadInProgress | FrameStatus::WriteInProgress
        ) && inner.meta[frame].page == Some(page)
    })
}

impl std::fmt::Debug for ClogCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClogCache")
            .field("frames", &CLOG_CACHE_FRAMES)
            .finish_non_exhaustive()
    }
}
