//! Engine assembly and lifecycle.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::info;

use fheap_am::{HeapManager, ScannedTuple, UpdateOutcome};
use fheap_buffer::{BackgroundWriter, BufferManager};
use fheap_clog::ClogManager;
use fheap_disk::DiskManager;
use fheap_error::Result;
use fheap_fsm::FsmManager;
use fheap_mvcc::{
    IsolationLevel, SnapshotManager, Transaction, TransactionManager, TupleModifyResult,
};
use fheap_types::{RelationId, Tid};

use crate::config::Config;

/// The assembled storage engine.
///
/// Construction wires every manager to its dependencies; all methods
/// take `&self`, so one `Engine` (or an `Arc` of it) serves any number
/// of threads. Dropping the engine stops the background writer and
/// flushes what it can.
pub struct Engine {
    config: Config,
    pool: Arc<BufferManager>,
    clog: Arc<ClogManager>,
    txn: Arc<TransactionManager>,
    heap: HeapManager,
    bgwriter: Mutex<Option<BgWriterHandle>>,
}

struct BgWriterHandle {
    stop: Arc<std::sync::atomic::AtomicBool>,
    thread: JoinHandle<()>,
}

impl Engine {
    /// Open a file-backed engine, creating its directories as needed,
    /// and start the background writer.
    pub fn open(config: Config) -> Result<Self> {
        let disk = Arc::new(DiskManager::file(&config.base_dir)?);
        let clog = Arc::new(ClogManager::file(&config.clog_dir)?);
        let engine = Self::assemble(config, disk, clog);
        engine.start_background_writer();
        info!(base = %engine.config.base_dir.display(), "engine opened");
        Ok(engine)
    }

    /// A fully in-memory engine. Nothing touches the filesystem and
    /// no background writer runs; tests and ephemeral workloads use
    /// this.
    #[must_use]
    pub fn in_memory(config: Config) -> Self {
        let disk = Arc::new(DiskManager::in_memory());
        let clog = Arc::new(ClogManager::in_memory());
        Self::assemble(config, disk, clog)
    }

    fn assemble(config: Config, disk: Arc<DiskManager>, clog: Arc<ClogManager>) -> Self {
        let pool = Arc::new(BufferManager::new(disk, config.buffer_pool_size));
        let fsm = Arc::new(FsmManager::new(Arc::clone(&pool)));
        let snapshots = Arc::new(SnapshotManager::new(Arc::clone(&clog)));
        let txn = Arc::new(TransactionManager::new(snapshots, Arc::clone(&clog)));
        let heap = HeapManager::new(Arc::clone(&pool), fsm, Arc::clone(&txn));
        Self {
            config,
            pool,
            clog,
            txn,
            heap,
            bgwriter: Mutex::new(None),
        }
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared buffer pool, for diagnostics.
    #[must_use]
    pub fn pool(&self) -> &Arc<BufferManager> {
        &self.pool
    }

    // -----------------------------------------------------------------
    // Background writer
    // -----------------------------------------------------------------

    /// Start the background writer thread if it is not running.
    pub fn start_background_writer(&self) {
        let mut slot = self.bgwriter.lock();
        if slot.is_some() {
            return;
        }
        let writer = BackgroundWriter::new(
            Arc::clone(&self.pool),
            self.config.bgwriter_delay(),
            self.config.bgwriter_max_pages,
        );
        let stop = writer.stop_handle();
        let thread = std::thread::Builder::new()
            .name("fheap-bgwriter".into())
            .spawn(move || writer.run())
            .expect("spawn background writer");
        *slot = Some(BgWriterHandle { stop, thread });
    }

    /// Stop the background writer and wait for it to exit.
    pub fn stop_background_writer(&self) {
        if let Some(handle) = self.bgwriter.lock().take() {
            handle.stop.store(true, Ordering::Release);
            let _ = handle.thread.join();
        }
    }

    /// Flush every dirty buffer and the commit log. Best effort
    /// durability; there is no write-ahead log to replay.
    pub fn checkpoint(&self) -> Result<()> {
        self.pool.flush_all()?;
        self.clog.checkpoint()
    }

    /// Stop background work and flush everything once.
    pub fn shutdown(&self) -> Result<()> {
        self.stop_background_writer();
        self.checkpoint()?;
        info!("engine shut down");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------

    /// Begin a transaction at the configured default isolation.
    #[must_use]
    pub fn begin(&self) -> Transaction {
        self.txn.begin(self.config.default_isolation)
    }

    /// Begin a transaction at an explicit isolation level.
    #[must_use]
    pub fn begin_with(&self, isolation: IsolationLevel) -> Transaction {
        self.txn.begin(isolation)
    }

    /// Commit `tx`.
    pub fn commit(&self, tx: &mut Transaction) -> Result<()> {
        self.txn.commit(tx)
    }

    /// Abort `tx`.
    pub fn abort(&self, tx: &mut Transaction) -> Result<()> {
        self.txn.abort(tx)
    }

    // -----------------------------------------------------------------
    // Heap operations
    // -----------------------------------------------------------------

    /// Insert a tuple; returns its tid.
    pub fn insert(&self, rel: RelationId, payload: &[u8], tx: &mut Transaction) -> Result<Tid> {
        self.heap.insert(rel, payload, tx)
    }

    /// Update the tuple at `tid` to a new version.
    pub fn update(
        &self,
        rel: RelationId,
        tid: Tid,
        payload: &[u8],
        tx: &mut Transaction,
    ) -> Result<UpdateOutcome> {
        self.heap.update(rel, tid, payload, tx)
    }

    /// Delete the tuple at `tid`.
    pub fn delete(
        &self,
        rel: RelationId,
        tid: Tid,
        tx: &mut Transaction,
    ) -> Result<TupleModifyResult> {
        self.heap.delete(rel, tid, tx)
    }

    /// Scan every tuple of `rel` visible to `tx`.
    pub fn scan(&self, rel: RelationId, tx: &mut Transaction) -> Result<Vec<ScannedTuple>> {
        self.heap.scan(rel, tx)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_background_writer();
        let _ = self.checkpoint();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pool", &self.pool)
            .field("bgwriter_running", &self.bgwriter.lock().is_some())
            .finish_non_exhaustive()
    }
}
