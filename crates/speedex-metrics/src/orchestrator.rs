//! Scrape orchestrator: maps one scrape onto the coordinator or the cache.

use std::sync::Arc;

use tracing::debug;

use speedex_core::{ScrapeMode, SpeedtestResult};

use crate::cache::ResultCache;
use crate::coordinator::Coordinator;
use crate::prometheus::render_prometheus;

/// Decides, per scrape, whether to measure or to serve the cache.
pub struct ScrapeOrchestrator {
    mode: ScrapeMode,
    coordinator: Arc<Coordinator>,
    cache: Arc<ResultCache>,
}

impl ScrapeOrchestrator {
    pub fn new(mode: ScrapeMode, coordinator: Arc<Coordinator>) -> Self {
        let cache = Arc::clone(coordinator.cache());
        Self {
            mode,
            coordinator,
            cache,
        }
    }

    pub fn mode(&self) -> ScrapeMode {
        self.mode
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// The result this scrape should report.
    ///
    /// On-demand mode may wait for a measurement; cached mode never does
    /// and yields `None` until something has been stored.
    pub async fn current(&self) -> Option<Arc<SpeedtestResult>> {
        match self.mode {
            ScrapeMode::OnDemand => {
                debug!("scrape received, running or joining a speedtest");
                Some(self.coordinator.run_or_join().await)
            }
            ScrapeMode::Cached => {
                let cached = self.cache.read();
                if cached.is_none() {
                    debug!("scrape received before any background run completed");
                }
                cached
            }
        }
    }

    /// Handle one scrape and return the exposition text.
    pub async fn scrape(&self) -> String {
        let result = self.current().await;
        render_prometheus(result.as_deref())
    }
}
