//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use fheap_mvcc::IsolationLevel;

/// Tunables for an [`Engine`](crate::Engine).
///
/// Serializable so deployments can keep it in a config file; every
/// field has a sensible default.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding relation fork files.
    pub base_dir: PathBuf,
    /// Directory holding the commit log file.
    pub clog_dir: PathBuf,
    /// Frames in the shared buffer pool.
    pub buffer_pool_size: usize,
    /// Milliseconds between background-writer rounds.
    pub bgwriter_delay_ms: u64,
    /// Most frames one background-writer round will flush.
    pub bgwriter_max_pages: usize,
    /// Isolation level `begin` uses.
    pub default_isolation: IsolationLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("base"),
            clog_dir: PathBuf::from("clog"),
            buffer_pool_size: 128,
            bgwriter_delay_ms: 200,
            bgwriter_max_pages: 100,
            default_isolation: IsolationLevel::ReadCommitted,
        }
    }
}

impl Config {
    /// Root both directories under `dir` (`<dir>/base`, `<dir>/clog`).
    #[must_use]
    pub fn under(dir: &std::path::Path) -> Self {
        Self {
            base_dir: dir.join("base"),
            clog_dir: dir.join("clog"),
            ..Self::default()
        }
    }

    /// Background-writer period as a [`Duration`].
    #[must_use]
    pub fn bgwriter_delay(&self) -> Duration {
        Duration::from_millis(self.bgwriter_delay_ms)
    }
}
