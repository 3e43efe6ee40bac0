//! The background writer.
//!
//! Eviction-time flushes stall whoever needs the frame, so a background
//! thread walks the pool ahead of the clock hand and writes dirty
//! frames out before anyone has to wait for them. Each round starts at
//! the current next-victim position, visits at most the whole pool,
//! flushes at most `max_pages` frames, and then sleeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use fheap_error::Result;

use crate::manager::BufferManager;

/// Periodically flushes dirty buffers.
pub struct BackgroundWriter {
    pool: Arc<BufferManager>,
    delay: Duration,
    max_pages: usize,
    stop: Arc<AtomicBool>,
}

impl BackgroundWriter {
    /// Create a writer over `pool` that wakes every `delay` and writes
    /// at most `max_pages` frames per round.
    #[must_use]
    pub fn new(pool: Arc<BufferManager>, delay: Duration, max_pages: usize) -> Self {
        Self {
            pool,
            delay,
            max_pages,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that makes [`run`](Self::run) return after its current
    /// round.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// One flushing round. Exposed so tests (and shutdown paths) can
    /// drive the writer without a thread.
    pub fn run_round(&self) -> Result<usize> {
        let pool_size = self.pool.pool_size();
        let mut written = 0;
        let mut id = self.pool.clock_hand();
        for _ in 0..pool_size {
            if self.pool.sync_one_buffer(id)? {
                written += 1;
                if written >= self.max_pages {
                    break;
                }
            }
            id = (id + 1) % pool_size;
        }
        if written > 0 {
            debug!(written, "background writer round");
        }
        Ok(written)
    }

    /// Flush rounds until the stop handle is flipped. I/O errors are
    /// logged and the loop keeps going; a failed flush leaves the frame
    /// dirty, so the next round retries it.
    pub fn run(&self) {
        info!(
            delay_ms = self.delay.as_millis() as u64,
            max_pages = self.max_pages,
            "background writer started"
        );
        while !self.stop.load(Ordering::Acquire) {
            if let Err(e) = self.run_round() {
                warn!(error = %e, "background writer round failed");
            }
            // Sleep in small slices so shutdown is prompt.
            let mut remaining = self.delay;
            while !self.stop.load(Ordering::Acquire) && !remaining.is_zero() {
                let slice = remaining.min(Duration::from_millis(50));
                std::thread::sleep(slice);
                remaining = remaining.saturating_sub(slice);
            }
        }
        info!("background writer stopped");
    }
}
