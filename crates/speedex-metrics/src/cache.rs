//! Result cache: holds the most recent measurement result.
//!
//! Reads are lock-free (`ArcSwapOption`) so a scrape never waits on a
//! measurement. Writers are serialized and only move forward in time.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use arc_swap::ArcSwapOption;
use tracing::warn;

use speedex_core::SpeedtestResult;

/// The stored result and when it was stored.
#[derive(Debug)]
pub struct CacheEntry {
    pub result: Arc<SpeedtestResult>,
    pub stored_at: SystemTime,
}

/// Holds zero or one result. Starts empty; never cleared.
#[derive(Debug, Default)]
pub struct ResultCache {
    current: ArcSwapOption<CacheEntry>,
    write_lock: Mutex<()>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last stored result, or `None` if nothing has completed yet.
    pub fn read(&self) -> Option<Arc<SpeedtestResult>> {
        self.current.load_full().map(|entry| Arc::clone(&entry.result))
    }

    pub fn entry(&self) -> Option<Arc<CacheEntry>> {
        self.current.load_full()
    }

    /// Replace the stored result.
    ///
    /// Returns `false` and leaves the cache alone when `result` completed
    /// before the one already stored.
    pub fn write(&self, result: Arc<SpeedtestResult>) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = &*self.current.load() {
            if existing.result.timestamp > result.timestamp {
                // Persisting refusals usually mean the wall clock stepped back.
                warn!(
                    cached_at = existing.result.unix_timestamp(),
                    refused_at = result.unix_timestamp(),
                    "ignoring result older than the cached one"
                );
                return false;
            }
        }

        self.current.store(Some(Arc::new(CacheEntry {
            result,
            stored_at: SystemTime::now(),
        })));
        true
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_none()
    }
}
