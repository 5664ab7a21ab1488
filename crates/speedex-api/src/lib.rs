//! speedex-api: HTTP surface of the exporter.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Prometheus exposition (may run a measurement in on-demand mode) |
//! | GET | `/healthz` | Liveness, never touches the coordinator |
//! | GET | `/` | Plain-text pointer to `/metrics` |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use speedex_metrics::ScrapeOrchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<ScrapeOrchestrator>,
}

/// Build the complete router.
pub fn build_router(orchestrator: Arc<ScrapeOrchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/", get(handlers::index))
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}
