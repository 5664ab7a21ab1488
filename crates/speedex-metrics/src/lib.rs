//! speedex-metrics: measurement coordination and Prometheus exposition.
//!
//! Every route to a speedtest result goes through the [`Coordinator`], so
//! the tool never runs twice at once no matter how many scrapes, schedule
//! ticks or CLI runs ask for one.
//!
//! # Architecture
//!
//! ```text
//! ScrapeOrchestrator
//!   ├── on_demand → Coordinator::run_or_join() → Measure (speedtest CLI)
//!   └── cached    → ResultCache::read()
//!
//! Coordinator
//!   ├── ResultCache::write() ← every completed attempt
//!   └── StateFile::save()    ← optional, shared with `speedexd once`
//!
//! Background (cached mode)
//!   ├── run_schedule()      → Coordinator at a fixed interval
//!   └── follow_state_file() → ResultCache from an external writer
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod cache;
pub mod coordinator;
pub mod orchestrator;
pub mod persist;
pub mod prometheus;
pub mod schedule;

pub use cache::{CacheEntry, ResultCache};
pub use coordinator::Coordinator;
pub use orchestrator::ScrapeOrchestrator;
pub use persist::{PersistError, StateFile};
pub use prometheus::render_prometheus;
pub use schedule::{follow_state_file, load_if_newer, run_schedule};
